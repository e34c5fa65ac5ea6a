//! Line conduit between a command's output reader and the session consumer.
//!
//! The channel is bounded: when the consumer falls behind, the producer (a
//! blocking reader thread) waits, which in turn back-pressures the child
//! process through its pipe. Every send also wakes the consumer through a
//! shared [`Notify`], so a consumer can sleep until there is something to
//! drain without holding any lock.
//!
//! The terminal entry is always the last entry: [`LogSender::finish`] and
//! [`LogSender::blocking_finish`] consume the sender.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Default number of buffered entries.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Exit code reported when the producer vanished without a terminal entry.
pub const ORPHANED_EXIT_CODE: i32 = 1;

const ORPHANED_MESSAGE: &str = "Output reader stopped without reporting an exit status\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// One line of combined stdout/stderr, terminator included when present.
    Line(String),
    /// Terminal entry carrying the exit code.
    Exit(i32),
}

/// Create a bounded log channel.
pub fn log_channel(capacity: usize) -> (LogSender, LogReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let notify = Arc::new(Notify::new());
    (
        LogSender {
            tx,
            notify: Arc::clone(&notify),
        },
        LogReceiver {
            rx,
            notify,
            state: ReceiverState::Open,
        },
    )
}

/// Producer half. Dropping it without finishing is reported to the consumer.
#[derive(Debug)]
pub struct LogSender {
    tx: mpsc::Sender<LogEntry>,
    notify: Arc<Notify>,
}

impl LogSender {
    /// Push a line from a blocking thread. Returns `false` once the consumer
    /// is gone. Must not be called from inside an async task.
    pub fn blocking_line(&self, line: impl Into<String>) -> bool {
        let line = line.into();
        if line.is_empty() {
            return true;
        }
        let sent = self.tx.blocking_send(LogEntry::Line(line)).is_ok();
        self.notify.notify_one();
        sent
    }

    /// Push a line from async code.
    pub async fn line(&self, line: impl Into<String>) -> bool {
        let line = line.into();
        if line.is_empty() {
            return true;
        }
        let sent = self.tx.send(LogEntry::Line(line)).await.is_ok();
        self.notify.notify_one();
        sent
    }

    /// Push the terminal entry from a blocking thread.
    pub fn blocking_finish(self, exit_code: i32) {
        let _ = self.tx.blocking_send(LogEntry::Exit(exit_code));
    }

    /// Push the terminal entry from async code.
    pub async fn finish(self, exit_code: i32) {
        let _ = self.tx.send(LogEntry::Exit(exit_code)).await;
    }
}

impl Drop for LogSender {
    fn drop(&mut self) {
        // Wakes the consumer for the terminal entry, or for the disconnect.
        self.notify.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    Open,
    /// Producer dropped; the diagnostic line was delivered, exit is next.
    Orphaned,
    Finished,
}

/// Entries drained in one non-blocking pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drain {
    pub lines: Vec<String>,
    /// Set when the terminal entry was reached in this pass.
    pub exit: Option<i32>,
}

/// Consumer half.
#[derive(Debug)]
pub struct LogReceiver {
    rx: mpsc::Receiver<LogEntry>,
    notify: Arc<Notify>,
    state: ReceiverState,
}

impl LogReceiver {
    /// Take everything currently available without waiting. Stops at the
    /// terminal entry; nothing is drained after it.
    pub fn try_drain(&mut self) -> Drain {
        let mut drain = Drain::default();
        loop {
            match self.state {
                ReceiverState::Finished => break,
                ReceiverState::Orphaned => {
                    self.state = ReceiverState::Finished;
                    drain.exit = Some(ORPHANED_EXIT_CODE);
                    break;
                }
                ReceiverState::Open => {}
            }
            match self.rx.try_recv() {
                Ok(LogEntry::Line(line)) => drain.lines.push(line),
                Ok(LogEntry::Exit(code)) => {
                    self.state = ReceiverState::Finished;
                    drain.exit = Some(code);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drain.lines.push(ORPHANED_MESSAGE.to_string());
                    self.state = ReceiverState::Orphaned;
                }
            }
        }
        drain
    }

    /// Wait for the next entry. Returns `None` after the terminal entry.
    pub async fn recv(&mut self) -> Option<LogEntry> {
        match self.state {
            ReceiverState::Finished => None,
            ReceiverState::Orphaned => {
                self.state = ReceiverState::Finished;
                Some(LogEntry::Exit(ORPHANED_EXIT_CODE))
            }
            ReceiverState::Open => match self.rx.recv().await {
                Some(LogEntry::Exit(code)) => {
                    self.state = ReceiverState::Finished;
                    Some(LogEntry::Exit(code))
                }
                Some(line) => Some(line),
                None => {
                    self.state = ReceiverState::Orphaned;
                    Some(LogEntry::Line(ORPHANED_MESSAGE.to_string()))
                }
            },
        }
    }

    /// Wake-up handle signalled on every send and when the producer goes away.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Whether the terminal entry has been observed.
    pub fn is_finished(&self) -> bool {
        self.state == ReceiverState::Finished
    }
}
