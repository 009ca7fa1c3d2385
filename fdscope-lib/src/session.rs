//! Device session registry.
//!
//! Sessions are keyed by a [`SessionId`] built from the vendor/product pair and a
//! monotonic discovery counter, so identities never depend on enumeration order
//! or on handle identity. Hot-plug removal deletes the session outright; a
//! device that comes back gets a new session.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{info, warn};

use crate::error::{Result, ScopeError};
use crate::events::{CaptureEvent, EventSender, publish};
use crate::transport::{DeviceEvent, UsbDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub vendor_id: u16,
    pub product_id: u16,
    pub discovery: u64,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "USB device {:04x}/{:04x}#{}",
            self.vendor_id, self.product_id, self.discovery
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    #[strum(to_string = "Disconnected")]
    Disconnected,
    #[strum(to_string = "Connecting")]
    Connecting,
    #[strum(to_string = "Connected")]
    Connected,
    #[strum(to_string = "Errored")]
    Errored,
}

pub struct Session<D: UsbDevice> {
    id: SessionId,
    device: D,
    state: SessionState,
    transport: Option<Arc<D::Transport>>,
}

impl<D: UsbDevice> Session<D> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Claimed interface, present once connected
    pub fn transport(&self) -> Option<&Arc<D::Transport>> {
        self.transport.as_ref()
    }
}

impl<D: UsbDevice> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.device.key())
            .field("state", &self.state)
            .finish()
    }
}

/// Owns every known session and the active selection.
pub struct SessionManager<D: UsbDevice> {
    sessions: BTreeMap<SessionId, Session<D>>,
    active: Option<SessionId>,
    next_discovery: u64,
    events: EventSender,
}

impl<D: UsbDevice> SessionManager<D> {
    pub fn new(events: EventSender) -> Self {
        Self {
            sessions: BTreeMap::new(),
            active: None,
            next_discovery: 0,
            events,
        }
    }

    /// Looks up the session of a transport-level device key
    pub fn find(&self, key: &D::Key) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| &s.device.key() == key)
            .map(|s| s.id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session<D>> {
        self.sessions.get(&id)
    }

    pub fn list(&self) -> impl Iterator<Item = &Session<D>> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registers a device, returning the existing session if it is already known
    pub fn add_device(&mut self, device: D) -> SessionId {
        if let Some(id) = self.find(&device.key()) {
            return id;
        }

        let id = SessionId {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            discovery: self.next_discovery,
        };
        self.next_discovery += 1;
        self.sessions.insert(
            id,
            Session {
                id,
                device,
                state: SessionState::Disconnected,
                transport: None,
            },
        );
        info!(%id, "Device added");
        id
    }

    /// Registers every device from an enumeration pass
    pub fn load_devices(&mut self, devices: impl IntoIterator<Item = D>) {
        for device in devices {
            self.add_device(device);
        }
    }

    pub fn set_state(&mut self, id: SessionId, state: SessionState) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        session.state = state;
        publish(&self.events, CaptureEvent::SessionStateChanged { id, state });
        true
    }

    /// Opens the device, selects configuration 1 and claims interface 0.
    ///
    /// Any failure leaves the session `Errored`; nothing is retried.
    pub async fn connect(&mut self, id: SessionId) -> Result<Arc<D::Transport>> {
        if !self.set_state(id, SessionState::Connecting) {
            return Err(ScopeError::UnknownSession(id));
        }

        let result = match self.sessions.get(&id) {
            Some(session) => session.device.connect().await,
            None => return Err(ScopeError::UnknownSession(id)),
        };

        match result {
            Ok(transport) => {
                let transport = Arc::new(transport);
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.transport = Some(Arc::clone(&transport));
                }
                self.set_state(id, SessionState::Connected);
                info!(%id, "Device connected");
                publish(&self.events, CaptureEvent::DeviceConnected(id));
                Ok(transport)
            }
            Err(e) => {
                warn!(%id, error = %e, "Device failed to connect");
                self.set_state(id, SessionState::Errored);
                Err(e)
            }
        }
    }

    /// Deletes the session of a removed device, clearing it as active if needed
    pub fn remove(&mut self, key: &D::Key) -> Option<SessionId> {
        let id = self.find(key)?;
        self.sessions.remove(&id);
        if self.active == Some(id) {
            self.active = None;
        }
        info!(%id, "Device disconnected");
        publish(&self.events, CaptureEvent::DeviceDisconnected(id));
        Some(id)
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn active(&self) -> Option<&Session<D>> {
        self.active.and_then(|id| self.sessions.get(&id))
    }

    /// Selects the active session; `None` clears it. Unknown ids are refused.
    pub fn set_active(&mut self, id: Option<SessionId>) -> bool {
        match id {
            Some(id) if !self.sessions.contains_key(&id) => false,
            _ => {
                self.active = id;
                true
            }
        }
    }

    /// Activates the first known session when none is active
    pub fn ensure_active(&mut self) -> Option<SessionId> {
        if self.active.is_none() {
            self.active = self.sessions.keys().next().copied();
        }
        self.active
    }

    /// Applies a hot-plug event. A connecting device is registered, connected
    /// and made active; a departing device's session is deleted.
    pub async fn handle_event(&mut self, event: DeviceEvent<D>) -> Option<SessionId> {
        match event {
            DeviceEvent::Connected(device) => {
                let id = self.add_device(device);
                // Failure is already recorded as the Errored state
                let _ = self.connect(id).await;
                self.active = Some(id);
                Some(id)
            }
            DeviceEvent::Disconnected(key) => self.remove(&key),
        }
    }
}
