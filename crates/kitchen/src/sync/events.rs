//! Progress and completion notifications
//!
//! Any number of observers (including none) subscribe to a channel; the
//! engine never knows who is listening.

use log::debug;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::result::SyncResult;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Emitted after each phase; `percent` never decreases within a round
    Progress { stage: String, percent: u8 },
    /// Emitted once at the end of every round that was started
    Completed(SyncResult),
}

/// Fan-out of [`SyncEvent`]s to every live subscriber
#[derive(Clone, Default)]
pub struct SyncEvents {
    subscribers: Arc<Mutex<Vec<Sender<SyncEvent>>>>,
}

impl SyncEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Send `event` to all subscribers, dropping those that hung up
    pub fn emit(&self, event: SyncEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!("Sync event delivered to {} subscriber(s)", subscribers.len());
    }

    pub(crate) fn progress(&self, stage: impl Into<String>, percent: u8) {
        self.emit(SyncEvent::Progress {
            stage: stage.into(),
            percent: percent.min(100),
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
