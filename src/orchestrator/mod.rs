//! Long-running command orchestration: process execution, log streaming,
//! session state and documentation server supervision.

pub mod context;
pub mod driver;
pub mod log_channel;
pub mod ports;
pub mod process;
pub mod session;
pub mod supervisor;

pub use context::{LaunchOutcome, PanelContext, PortUsage};
pub use driver::{RunEvent, drive};
pub use log_channel::{LogEntry, LogReceiver, LogSender, log_channel};
pub use ports::PortRegistry;
pub use process::{ProcessGroupKiller, ProcessHandle, ProcessRunner, Termination, TreeTerminator};
pub use session::{AnalysisSession, Completion, PollOutcome, SessionPhase, SessionSnapshot};
pub use supervisor::{ServerStarted, ServerStatus, ServiceSupervisor};
