use tokio::sync::broadcast;

use crate::buffer::CapturedMessage;
use crate::capture::CaptureState;
use crate::session::{SessionId, SessionState};

/// Notifications published to display and storage consumers
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    DeviceConnected(SessionId),
    DeviceDisconnected(SessionId),
    SessionStateChanged { id: SessionId, state: SessionState },
    CaptureStateChanged(CaptureState),
    MessageCaptured(CapturedMessage),
}

pub type EventSender = broadcast::Sender<CaptureEvent>;
pub type EventReceiver = broadcast::Receiver<CaptureEvent>;

pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity.max(1))
}

/// Publishes an event; having no subscriber is not an error.
pub(crate) fn publish(sender: &EventSender, event: CaptureEvent) {
    let _ = sender.send(event);
}
