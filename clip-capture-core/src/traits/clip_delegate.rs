use std::sync::mpsc::{self, Receiver, Sender};

use crate::models::error::CaptureError;
use crate::models::export_result::ExportOutcome;
use crate::models::state::CaptureState;

/// Notifications from a capture session to the UI.
///
/// All methods are called from worker threads (capture, control, export),
/// never from the UI thread. Implementations should marshal if needed.
pub trait ClipDelegate: Send + Sync {
    fn on_state_changed(&self, state: &CaptureState);

    /// A capture or command failure. Export failures arrive through
    /// `on_export_finished` instead.
    fn on_error(&self, error: &CaptureError);

    /// Exactly one call per export job, carrying the clip path or the reason
    /// it failed.
    fn on_export_finished(&self, outcome: &ExportOutcome);
}

/// Delegate notifications as plain messages.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    StateChanged(CaptureState),
    Error(CaptureError),
    ExportFinished(ExportOutcome),
}

/// `ClipDelegate` that forwards every notification into a channel, for UIs
/// that poll a message queue instead of taking callbacks.
pub struct ChannelDelegate {
    sender: Sender<RecorderEvent>,
}

impl ChannelDelegate {
    pub fn new() -> (Self, Receiver<RecorderEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: RecorderEvent) {
        // The receiver going away just means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}

impl ClipDelegate for ChannelDelegate {
    fn on_state_changed(&self, state: &CaptureState) {
        self.send(RecorderEvent::StateChanged(*state));
    }

    fn on_error(&self, error: &CaptureError) {
        self.send(RecorderEvent::Error(error.clone()));
    }

    fn on_export_finished(&self, outcome: &ExportOutcome) {
        self.send(RecorderEvent::ExportFinished(outcome.clone()));
    }
}
