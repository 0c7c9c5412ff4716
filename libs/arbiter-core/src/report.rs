// Progress sink for one judging run

use arbiter_common::types::{JudgeEvent, Progress, Verdict};
use tokio::sync::mpsc;

/// Sender side of a run's event stream
///
/// `end` consumes the reporter, so a run emits at most one terminal event.
#[derive(Debug)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<JudgeEvent>,
}

pub fn channel() -> (Reporter, mpsc::UnboundedReceiver<JudgeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Reporter { tx }, rx)
}

impl Reporter {
    pub fn next(&self, progress: Progress) {
        if self.tx.send(JudgeEvent::Progress(progress)).is_err() {
            tracing::debug!("Event receiver dropped, progress discarded");
        }
    }

    pub fn end(self, verdict: Verdict) {
        if self.tx.send(JudgeEvent::End(verdict)).is_err() {
            tracing::warn!("Event receiver dropped before the verdict");
        }
    }
}
