//! Post-settlement notification hand-off.
//!
//! `enqueue` is fire-and-forget. A notification that cannot be delivered
//! is logged and dropped; it never affects the settled record.

use std::sync::{
    mpsc::{self, Receiver, Sender},
    Mutex,
};

pub trait Notifier: Send + Sync {
    fn enqueue(&self, txn_id: &str);
}

/// Hands transaction ids to a consumer over an mpsc channel.
pub struct ChannelNotifier {
    tx: Sender<String>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn enqueue(&self, txn_id: &str) {
        if self.tx.send(txn_id.to_string()).is_err() {
            log::warn!("notifier: receiver gone, dropping notification for {txn_id}");
        }
    }
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn enqueue(&self, txn_id: &str) {
        log::debug!("notifier: settled {txn_id}");
    }
}

/// Keeps every enqueued id in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn enqueue(&self, txn_id: &str) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(txn_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_delivers_in_order() {
        let (notifier, rx) = ChannelNotifier::new();
        notifier.enqueue("TXN-1");
        notifier.enqueue("TXN-2");
        assert_eq!(rx.try_recv().unwrap(), "TXN-1");
        assert_eq!(rx.try_recv().unwrap(), "TXN-2");
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.enqueue("TXN-3");
    }
}
