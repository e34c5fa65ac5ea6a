//! Browser control panel.
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────┐
//! │ Browser  │ ───────> │  server.rs  (axum Router, ServerConfig)      │
//! │  (SPA)   │ <─────── │    └─ api.rs  (route handlers, AppState)     │
//! └──────────┘ WebSocket│         │                                    │
//!                       │         │ PanelContext::launch()             │
//!                       │         v                                    │
//!                       │  orchestrator::drive  ── RunEvent ──> ws.rs  │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! Clients that cannot hold a WebSocket open can poll `GET /api/session`,
//! which returns the accumulated log and phase of the current run.

pub mod api;
pub mod embedded;
pub mod server;
pub mod ws;

pub use server::{ServerConfig, build_router, start_server};
