use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Channel a controller uses to report that its coverage pass finished.
///
/// The orchestrator owns the receiving end and forwards each instance name to
/// the assignment scheduler.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: UnboundedSender<String>,
}

impl CompletionSignal {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn signal(&self, instance_name: &str) {
        if self.tx.send(instance_name.to_string()).is_err() {
            debug!(instance = %instance_name, "Completion signal dropped, no listener");
        }
    }
}
