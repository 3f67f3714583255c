use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{NavxError, TaskError};

type SessionResult = Result<(), NavxError>;

/// How each half of a session ended. `None` means a clean stop.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    pub read_error: Option<NavxError>,
    pub write_error: Option<NavxError>,
}

impl SessionOutcome {
    pub fn is_clean(&self) -> bool {
        self.read_error.is_none() && self.write_error.is_none()
    }
}

/// The read and write tasks of one connection.
pub struct SessionTasks {
    read: JoinHandle<SessionResult>,
    write: JoinHandle<SessionResult>,
}

impl SessionTasks {
    /// Spawns both halves of a session on the runtime.
    ///
    /// # Arguments
    ///
    /// * `read` - The loop that decodes and dispatches inbound frames.
    /// * `write` - The loop that drains the command outbox.
    pub fn spawn<R, W>(read: R, write: W) -> Self
    where
        R: Future<Output = SessionResult> + Send + 'static,
        W: Future<Output = SessionResult> + Send + 'static,
    {
        Self {
            read: tokio::spawn(read),
            write: tokio::spawn(write),
        }
    }

    /// Wait until either task finishes or `cancel` fires, then stop the
    /// other one and collect both results.
    pub async fn supervise(mut self, cancel: &CancellationToken) -> SessionOutcome {
        let mut read = None;
        let mut write = None;

        tokio::select! {
            r = &mut self.read => read = Some(r),
            w = &mut self.write => write = Some(w),
            _ = cancel.cancelled() => {}
        }
        cancel.cancel();

        let read = match read {
            Some(r) => r,
            None => self.read.await,
        };
        let write = match write {
            Some(w) => w,
            None => self.write.await,
        };

        let outcome = SessionOutcome {
            read_error: flatten(read),
            write_error: flatten(write),
        };
        debug!(clean = outcome.is_clean(), "session tasks joined");
        outcome
    }
}

fn flatten(joined: Result<SessionResult, JoinError>) -> Option<NavxError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) => Some(NavxError::Task(TaskError::from(e))),
    }
}
