//! Transport boundary consumed by the capture engine.
//!
//! [`Transport`] is the claimed-interface half (control and bulk transfers);
//! [`UsbDevice`] is the not-yet-opened half that a session connects through.
//! The nusb-backed implementations live here as well; everything above this
//! module is written against the traits so it can run on a scripted transport.

use std::fmt;
use std::future::Future;

use futures_lite::{Stream, StreamExt};
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, RequestBuffer, TransferError};
use nusb::{DeviceId, Interface};
use tracing::{debug, info};

use crate::constants::{CONFIGURATION, INTERFACE, is_gadget};
use crate::error::{Result, ScopeError};

/// Setup fields of a vendor control request.
///
/// Request type is always class and recipient always interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// A claimed device interface able to run control and bulk transfers.
///
/// Completions are delivered by the returned futures; there is no cancellation,
/// a caller that loses interest simply discards the result.
pub trait Transport: Send + Sync + 'static {
    /// Class/interface IN control request expecting up to `length` bytes
    fn control_in(
        &self,
        setup: ControlSetup,
        length: u16,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, TransferError>> + Send;

    /// Class/interface OUT control request carrying `data` in the data phase
    fn control_out(
        &self,
        setup: ControlSetup,
        data: &[u8],
    ) -> impl Future<Output = std::result::Result<(), TransferError>> + Send;

    /// Bulk IN read of up to `length` bytes
    fn bulk_in(
        &self,
        endpoint: u8,
        length: usize,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, TransferError>> + Send;
}

/// A discovered device that has not been opened yet.
pub trait UsbDevice: Send + Sync + 'static {
    type Transport: Transport;
    /// Transport-level identity used to match hot-plug events
    type Key: Clone + PartialEq + fmt::Debug + Send + Sync;

    fn key(&self) -> Self::Key;
    fn vendor_id(&self) -> u16;
    fn product_id(&self) -> u16;

    fn product_name(&self) -> Option<String> {
        None
    }

    fn serial_number(&self) -> Option<String> {
        None
    }

    /// Device release as `major.minor.subminor`
    fn version(&self) -> Option<String> {
        None
    }

    /// Open the device, select its first configuration and claim its first interface
    fn connect(&self) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Hot-plug notification from the host USB stack
#[derive(Debug)]
pub enum DeviceEvent<D: UsbDevice> {
    Connected(D),
    Disconnected(D::Key),
}

/// Claimed interface of a gadget opened through nusb
#[derive(Clone)]
pub struct NusbTransport {
    interface: Interface,
}

impl NusbTransport {
    pub fn new(interface: Interface) -> Self {
        Self { interface }
    }
}

impl Transport for NusbTransport {
    async fn control_in(&self, setup: ControlSetup, length: u16) -> std::result::Result<Vec<u8>, TransferError> {
        let completion = self
            .interface
            .control_in(ControlIn {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: setup.request,
                value: setup.value,
                index: setup.index,
                length,
            })
            .await;
        completion.into_result()
    }

    async fn control_out(&self, setup: ControlSetup, data: &[u8]) -> std::result::Result<(), TransferError> {
        let completion = self
            .interface
            .control_out(ControlOut {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: setup.request,
                value: setup.value,
                index: setup.index,
                data,
            })
            .await;
        completion.into_result().map(|_| ())
    }

    async fn bulk_in(&self, endpoint: u8, length: usize) -> std::result::Result<Vec<u8>, TransferError> {
        let completion = self.interface.bulk_in(endpoint, RequestBuffer::new(length)).await;
        completion.into_result()
    }
}

/// A gadget seen by nusb enumeration or hot-plug
#[derive(Debug, Clone)]
pub struct NusbDevice {
    info: nusb::DeviceInfo,
}

impl NusbDevice {
    pub fn new(info: nusb::DeviceInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &nusb::DeviceInfo {
        &self.info
    }
}

impl UsbDevice for NusbDevice {
    type Transport = NusbTransport;
    type Key = DeviceId;

    fn key(&self) -> DeviceId {
        self.info.id()
    }

    fn vendor_id(&self) -> u16 {
        self.info.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.info.product_id()
    }

    fn product_name(&self) -> Option<String> {
        self.info.product_string().map(str::to_string)
    }

    fn serial_number(&self) -> Option<String> {
        self.info.serial_number().map(str::to_string)
    }

    fn version(&self) -> Option<String> {
        // bcdDevice: major.minor.subminor
        let bcd = self.info.device_version();
        Some(format!("{}.{}.{}", bcd >> 8, (bcd >> 4) & 0xF, bcd & 0xF))
    }

    async fn connect(&self) -> Result<NusbTransport> {
        info!(
            "Opening device on bus {} addr {}",
            self.info.bus_number(),
            self.info.device_address()
        );
        let device = self.info.open().map_err(ScopeError::DeviceOpen)?;
        device
            .set_configuration(CONFIGURATION)
            .map_err(ScopeError::Configure)?;
        let interface = device
            .detach_and_claim_interface(INTERFACE)
            .map_err(ScopeError::ClaimInterface)?;
        info!("Interface claimed successfully.");
        Ok(NusbTransport::new(interface))
    }
}

/// Lists the gadgets currently attached
pub fn discover() -> Result<Vec<NusbDevice>> {
    let devices = nusb::list_devices()
        .map_err(ScopeError::Io)?
        .filter(|d| is_gadget(d.vendor_id(), d.product_id()))
        .map(NusbDevice::new)
        .collect::<Vec<_>>();
    debug!(count = devices.len(), "Discovered gadgets");
    Ok(devices)
}

/// Streams gadget connect events and every disconnect event.
///
/// Disconnects only carry the transport id, so they are not filtered; the
/// session manager ignores ids it does not know.
pub fn watch() -> Result<impl Stream<Item = DeviceEvent<NusbDevice>> + Send + Unpin> {
    let watch = nusb::watch_devices().map_err(ScopeError::Io)?;
    Ok(watch.filter_map(|event| match event {
        nusb::hotplug::HotplugEvent::Connected(info) if is_gadget(info.vendor_id(), info.product_id()) => {
            Some(DeviceEvent::Connected(NusbDevice::new(info)))
        }
        nusb::hotplug::HotplugEvent::Connected(_) => None,
        nusb::hotplug::HotplugEvent::Disconnected(id) => Some(DeviceEvent::Disconnected(id)),
    }))
}
