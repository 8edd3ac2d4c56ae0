use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::task::{GroupId, StatusHandle};

/// Notification routed to the status-rendering consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeEvent {
    /// Files are about to be published to the group
    UploadStarted {
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
    },
    ProcessSuccess {
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
        file_names: Vec<String>,
    },
    ProcessFailure {
        group_id: GroupId,
        status_handle: Option<StatusHandle>,
        error_message: String,
    },
}

impl OutcomeEvent {
    pub fn group_id(&self) -> GroupId {
        match self {
            OutcomeEvent::UploadStarted { group_id, .. }
            | OutcomeEvent::ProcessSuccess { group_id, .. }
            | OutcomeEvent::ProcessFailure { group_id, .. } => *group_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutcomeEvent::UploadStarted { .. })
    }
}

/// Bounded, lossy channel from workers to the event consumer.
///
/// Sends never wait: when the buffer is full the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<OutcomeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutcomeEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Try to deliver `event`, returning whether it was buffered
    pub fn try_publish(&self, event: OutcomeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel is full, dropping event for group {}", event.group_id());
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!("Event consumer is gone, dropping event for group {}", event.group_id());
                false
            }
        }
    }
}
