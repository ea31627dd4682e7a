//! Typed backend event channels.
//!
//! One broadcast channel per event kind. Subscribers receive every event
//! published after they subscribed; slow subscribers may observe
//! `RecvError::Lagged` and must resynchronise from the backend.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{UserId, VlobId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    VlobUpdated,
    UserVlobUpdated,
    MessageArrived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::VlobUpdated => "vlob_updated",
            EventKind::UserVlobUpdated => "user_vlob_updated",
            EventKind::MessageArrived => "message_arrived",
        }
    }
}

/// A vlob received a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlobUpdated {
    pub id: VlobId,
}

/// A user's singleton vlob received a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVlobUpdated {
    pub user: UserId,
}

/// A message was posted for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageArrived {
    pub recipient: UserId,
}

/// Untyped form used on the wire: `{event, sender}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEvent {
    pub event: EventKind,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    vlob_updated: broadcast::Sender<VlobUpdated>,
    user_vlob_updated: broadcast::Sender<UserVlobUpdated>,
    message_arrived: broadcast::Sender<MessageArrived>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            vlob_updated: broadcast::channel(CHANNEL_CAPACITY).0,
            user_vlob_updated: broadcast::channel(CHANNEL_CAPACITY).0,
            message_arrived: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn on_vlob_updated(&self) -> broadcast::Receiver<VlobUpdated> {
        self.vlob_updated.subscribe()
    }

    pub fn on_user_vlob_updated(&self) -> broadcast::Receiver<UserVlobUpdated> {
        self.user_vlob_updated.subscribe()
    }

    pub fn on_message_arrived(&self) -> broadcast::Receiver<MessageArrived> {
        self.message_arrived.subscribe()
    }

    // Send errors only mean that nobody is listening right now.

    pub fn vlob_updated(&self, id: VlobId) {
        let _ = self.vlob_updated.send(VlobUpdated { id });
    }

    pub fn user_vlob_updated(&self, user: UserId) {
        let _ = self.user_vlob_updated.send(UserVlobUpdated { user });
    }

    pub fn message_arrived(&self, recipient: UserId) {
        let _ = self.message_arrived.send(MessageArrived { recipient });
    }

    /// Routes an untyped event to its typed channel.
    pub fn publish(&self, event: BackendEvent) {
        match event.event {
            EventKind::VlobUpdated => self.vlob_updated(VlobId::new(event.sender)),
            EventKind::UserVlobUpdated => self.user_vlob_updated(UserId::new(event.sender)),
            EventKind::MessageArrived => self.message_arrived(UserId::new(event.sender)),
        }
    }
}
