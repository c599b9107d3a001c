//! Multi-producer, single-consumer queue between packet receipt and the
//! authoritative tick.

use shared::InputSample;
use tokio::sync::mpsc;

/// Producer handle; clone freely.
#[derive(Debug, Clone)]
pub struct InputQueue {
    sender: mpsc::UnboundedSender<InputSample>,
}

/// Consumer handle, owned by the authoritative tick.
#[derive(Debug)]
pub struct InputReceiver {
    receiver: mpsc::UnboundedReceiver<InputSample>,
}

pub fn input_queue() -> (InputQueue, InputReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (InputQueue { sender }, InputReceiver { receiver })
}

impl InputQueue {
    /// Never blocks. Returns false once the consumer is gone.
    pub fn push(&self, sample: InputSample) -> bool {
        self.sender.send(sample).is_ok()
    }
}

impl InputReceiver {
    /// Pops until empty without waiting, preserving arrival order.
    pub fn drain(&mut self) -> Vec<InputSample> {
        let mut samples = Vec::new();
        while let Ok(sample) = self.receiver.try_recv() {
            samples.push(sample);
        }
        samples
    }
}
