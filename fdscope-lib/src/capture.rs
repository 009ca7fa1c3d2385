//! Capture state machine.
//!
//! ```text
//!            attach                start ok
//! Suspended ───────► Stopped ───────────────► Capturing
//!     ▲                 ▲  ▲                   │    ▲
//!     │ detach (any)    │  └──── stop ok ──────┤    │ start ok
//!     │                 └─ stop ok ── Paused ◄─┘    │
//!                                      │  pause ok  │
//!                                      └────────────┘
//! ```
//!
//! Each command records a [`PendingTransition`] before its control request is
//! issued and commits the target state only if the request succeeds and the
//! transition is still the pending one when it resolves. A newer command
//! replaces the pending transition; the older one's completion is then ignored.

use std::sync::{Arc, Mutex};
use strum_macros::Display;
use tracing::{debug, info, warn};

use crate::buffer::{CaptureBuffer, CapturedMessage};
use crate::config::CaptureConfig;
use crate::control::ControlClient;
use crate::error::{Result, ScopeError};
use crate::events::{CaptureEvent, EventSender, publish};
use crate::lock;
use crate::pump::CapturePump;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CaptureState {
    /// No device attached
    #[strum(to_string = "suspended")]
    Suspended,
    #[strum(to_string = "stopped")]
    Stopped,
    #[strum(to_string = "paused")]
    Paused,
    #[strum(to_string = "capturing")]
    Capturing,
}

impl CaptureState {
    pub fn can_start(&self) -> bool {
        !matches!(self, CaptureState::Suspended | CaptureState::Capturing)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, CaptureState::Capturing)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, CaptureState::Capturing | CaptureState::Paused)
    }
}

/// Operator capture commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Command {
    #[strum(to_string = "start")]
    Start,
    #[strum(to_string = "pause")]
    Pause,
    #[strum(to_string = "stop")]
    Stop,
}

impl Command {
    fn target(&self) -> CaptureState {
        match self {
            Command::Start => CaptureState::Capturing,
            Command::Pause => CaptureState::Paused,
            Command::Stop => CaptureState::Stopped,
        }
    }

    fn allowed_from(&self, state: CaptureState) -> bool {
        match self {
            Command::Start => state.can_start(),
            Command::Pause => state.can_pause(),
            Command::Stop => state.can_stop(),
        }
    }
}

/// Identifies one issued command; compared on resolution to spot superseded ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransition {
    pub command: Command,
    pub target: CaptureState,
    pub token: TransitionToken,
}

#[derive(Debug)]
struct Machine {
    state: CaptureState,
    pending: Option<PendingTransition>,
    next_token: u64,
}

/// Drives the gadget's capture for one attached device.
pub struct CaptureController<T> {
    client: ControlClient<T>,
    pump: CapturePump<T>,
    buffer: Arc<Mutex<CaptureBuffer>>,
    machine: Mutex<Machine>,
    events: EventSender,
}

impl<T: Transport> CaptureController<T> {
    /// Builds a controller in the `Suspended` state
    pub fn new(transport: Arc<T>, config: &CaptureConfig, events: EventSender) -> Self {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::new(config.history_limit)));
        let pump = CapturePump::new(Arc::clone(&transport), Arc::clone(&buffer), events.clone(), config);
        Self {
            client: ControlClient::new(transport),
            pump,
            buffer,
            machine: Mutex::new(Machine {
                state: CaptureState::Suspended,
                pending: None,
                next_token: 0,
            }),
            events,
        }
    }

    pub fn state(&self) -> CaptureState {
        lock(&self.machine).state
    }

    pub fn pending(&self) -> Option<PendingTransition> {
        lock(&self.machine).pending
    }

    pub fn can_start(&self) -> bool {
        self.state().can_start()
    }

    pub fn can_pause(&self) -> bool {
        self.state().can_pause()
    }

    pub fn can_stop(&self) -> bool {
        self.state().can_stop()
    }

    pub fn client(&self) -> &ControlClient<T> {
        &self.client
    }

    pub fn pump(&self) -> &CapturePump<T> {
        &self.pump
    }

    pub fn buffer(&self) -> &Arc<Mutex<CaptureBuffer>> {
        &self.buffer
    }

    /// Newest-first copy of the capture history
    pub fn messages(&self) -> Vec<CapturedMessage> {
        lock(&self.buffer).snapshot()
    }

    fn set_state(&self, machine: &mut Machine, state: CaptureState) {
        if machine.state != state {
            info!(from = %machine.state, to = %state, "Capture state changed");
            machine.state = state;
            publish(&self.events, CaptureEvent::CaptureStateChanged(state));
        }
    }

    /// Device attached: leaves `Suspended`, resets the gadget and starts the pool.
    ///
    /// A failed reset leaves the pool idle and is returned, but the state still
    /// moves to `Stopped`.
    pub async fn attach(&self) -> Result<()> {
        {
            let mut machine = lock(&self.machine);
            if machine.state == CaptureState::Suspended {
                self.set_state(&mut machine, CaptureState::Stopped);
            }
        }

        match self.client.reset().await {
            Ok(()) => {
                info!("Successfully reset device");
                self.pump.start();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to reset device");
                self.pump.stop();
                Err(e)
            }
        }
    }

    /// Device detached: drops any pending transition and idles the pool
    pub fn detach(&self) {
        self.pump.stop();
        let mut machine = lock(&self.machine);
        machine.pending = None;
        self.set_state(&mut machine, CaptureState::Suspended);
    }

    /// Checks the guard and installs a new pending transition
    fn begin(&self, command: Command) -> Result<TransitionToken> {
        let mut machine = lock(&self.machine);
        if !command.allowed_from(machine.state) {
            debug!(%command, state = %machine.state, "Command not allowed");
            return Err(ScopeError::CommandNotAllowed {
                command,
                state: machine.state,
            });
        }

        let token = TransitionToken(machine.next_token);
        machine.next_token = machine.next_token.wrapping_add(1);
        if let Some(previous) = machine.pending.replace(PendingTransition {
            command,
            target: command.target(),
            token,
        }) {
            debug!(superseded = %previous.command, by = %command, "Pending transition superseded");
        }
        Ok(token)
    }

    /// Resolves the transition for `token` with the control request's outcome
    fn finish(&self, token: TransitionToken, outcome: Result<()>) -> Result<()> {
        let mut machine = lock(&self.machine);
        match machine.pending.filter(|p| p.token == token) {
            Some(pending) => {
                machine.pending = None;
                match &outcome {
                    Ok(()) => {
                        // Only a committed stop drops the history
                        if pending.command == Command::Stop {
                            lock(&self.buffer).clear();
                        }
                        self.set_state(&mut machine, pending.target);
                    }
                    Err(e) => warn!(command = %pending.command, error = %e, "Capture command failed"),
                }
            }
            None => debug!(?token, "Ignoring completion of superseded transition"),
        }
        outcome
    }

    /// Sends captureStart and (re)starts the pool; commits `Capturing` on success
    pub async fn start(&self) -> Result<()> {
        let token = self.begin(Command::Start)?;
        self.pump.start();
        let outcome = self.client.capture_start().await;
        self.finish(token, outcome)
    }

    /// Sends captureStop; commits `Paused` on success. The pool keeps running.
    pub async fn pause(&self) -> Result<()> {
        let token = self.begin(Command::Pause)?;
        let outcome = self.client.capture_stop().await;
        self.finish(token, outcome)
    }

    /// Idles the pool and sends captureStop. The history is cleared only when
    /// the stop commits `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let token = self.begin(Command::Stop)?;
        self.pump.stop();
        let outcome = self.client.capture_stop().await;
        self.finish(token, outcome)
    }
}
