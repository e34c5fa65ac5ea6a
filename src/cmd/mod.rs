//! CLI command implementations.
//!
//! | Module    | Commands handled       |
//! |-----------|------------------------|
//! | `serve`   | `Serve`                |
//! | `run`     | `Run`                  |
//! | `targets` | `Targets`, `Catalog`   |
//! | `config`  | `Config`               |

pub mod config;
pub mod run;
pub mod serve;
pub mod targets;

pub use config::cmd_config;
pub use run::cmd_run;
pub use serve::cmd_serve;
pub use targets::{cmd_catalog, cmd_targets};
