use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use super::clip_session::ClipSession;
use crate::models::config::RetentionWindow;
use crate::models::error::CaptureError;
use crate::models::media::AudioLevels;
use crate::models::state::CaptureState;

/// Messages accepted by the control thread.
#[derive(Debug)]
pub enum RecorderCommand {
    Start,
    Stop,
    SetRetention(u32),
    SetAudio { microphone: bool, system_audio: bool },
    TriggerExport,
    Status(Sender<RecorderStatus>),
    Shutdown,
}

/// Point-in-time view of the session for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderStatus {
    pub state: CaptureState,
    pub retention_secs: u32,
    pub buffered_frames: usize,
    pub capacity: usize,
    pub microphone: bool,
    pub system_audio: bool,
    pub levels: AudioLevels,
}

/// Message-passing front end for a [`ClipSession`].
///
/// A `clip-control` thread owns the session; every method here just sends a
/// command and returns. Results arrive through the session's delegate.
/// Retention and audio changes made while capturing are applied as
/// stop → change → start.
pub struct ClipRecorder {
    sender: Sender<RecorderCommand>,
    handle: Option<JoinHandle<()>>,
}

impl ClipRecorder {
    pub fn spawn(session: ClipSession) -> Result<Self, CaptureError> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("clip-control".into())
            .spawn(move || control_loop(session, receiver))
            .map_err(|e| CaptureError::Unknown(format!("failed to spawn control thread: {}", e)))?;
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        self.send(RecorderCommand::Start)
    }

    pub fn stop(&self) -> Result<(), CaptureError> {
        self.send(RecorderCommand::Stop)
    }

    pub fn set_retention(&self, secs: u32) -> Result<(), CaptureError> {
        self.send(RecorderCommand::SetRetention(secs))
    }

    pub fn set_audio(&self, microphone: bool, system_audio: bool) -> Result<(), CaptureError> {
        self.send(RecorderCommand::SetAudio {
            microphone,
            system_audio,
        })
    }

    pub fn trigger_export(&self) -> Result<(), CaptureError> {
        self.send(RecorderCommand::TriggerExport)
    }

    /// Ask the control thread for a status report. Waits for commands
    /// queued before it to finish.
    pub fn status(&self) -> Result<RecorderStatus, CaptureError> {
        let (reply, response) = mpsc::channel();
        self.send(RecorderCommand::Status(reply))?;
        response.recv().map_err(|_| closed())
    }

    /// Stop capture, wait for in-flight exports, and join the control thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.sender.send(RecorderCommand::Shutdown);
        if handle.join().is_err() {
            log::error!("control thread panicked");
        }
    }

    fn send(&self, command: RecorderCommand) -> Result<(), CaptureError> {
        self.sender.send(command).map_err(|_| closed())
    }
}

impl Drop for ClipRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn closed() -> CaptureError {
    CaptureError::InvalidState("recorder has shut down".into())
}

fn control_loop(mut session: ClipSession, commands: Receiver<RecorderCommand>) {
    log::debug!("control thread started");
    for command in commands.iter() {
        match command {
            RecorderCommand::Start => {
                if let Err(e) = session.start() {
                    session.report_error(&e);
                }
            }
            RecorderCommand::Stop => session.stop(),
            RecorderCommand::SetRetention(secs) => {
                if let Err(e) = RetentionWindow::new(secs) {
                    session.report_error(&e);
                    continue;
                }
                restart_around(&mut session, |s| s.set_retention(secs));
            }
            RecorderCommand::SetAudio {
                microphone,
                system_audio,
            } => restart_around(&mut session, |s| s.set_audio(microphone, system_audio)),
            RecorderCommand::TriggerExport => session.trigger_export(),
            RecorderCommand::Status(reply) => {
                let (microphone, system_audio) = session.audio_selection();
                let _ = reply.send(RecorderStatus {
                    state: session.state(),
                    retention_secs: session.retention().secs(),
                    buffered_frames: session.buffered_frames(),
                    capacity: session.capacity(),
                    microphone,
                    system_audio,
                    levels: session.audio_levels(),
                });
            }
            RecorderCommand::Shutdown => break,
        }
    }
    session.shutdown();
    log::debug!("control thread exiting");
}

/// Apply a change that requires idle capture, resuming capture afterwards
/// if it was running.
fn restart_around(session: &mut ClipSession, change: impl FnOnce(&mut ClipSession) -> Result<(), CaptureError>) {
    let was_running = session.state().is_running();
    if was_running {
        session.stop();
    }
    if let Err(e) = change(session) {
        session.report_error(&e);
    }
    if was_running {
        if let Err(e) = session.start() {
            session.report_error(&e);
        }
    }
}
