use crate::command::Command;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Repeats a command at a fixed interval until stopped
///
/// The first emission happens one interval after start. Cancellation is
/// checked before every emission; after [`stop`] returns, at most one
/// emission that already passed that check can still go out. Dropping the
/// repeater stops it as well.
///
/// [`stop`]: HoldRepeater::stop
pub struct HoldRepeater {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl HoldRepeater {
    pub fn start(transport: Arc<dyn Transport>, command: Command, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        debug!("Starting repeat of {} every {:?}", command, interval);
        let task = tokio::spawn(async move {
            let mut repeats = 0usize;
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if child.is_cancelled() {
                    break;
                }
                transport.send(command);
                repeats += 1;
            }
            debug!("Repeat of {} stopped after {} emissions", command, repeats);
        });

        Self { token, task }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for HoldRepeater {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
