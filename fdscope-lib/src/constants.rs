// Protocol constants for the FDCAN debugger gadget

/// USB vendor id of the gadget
pub const VID: u16 = 0x0483;

/// USB product id of the gadget
pub const PID: u16 = 0x5740;

/// Interface carrying the vendor control requests and the capture endpoints
pub const INTERFACE: u8 = 0;

/// Configuration selected when a session connects
pub const CONFIGURATION: u8 = 1;

/// Bulk IN endpoint carrying captured frames
pub const ENDPOINT_IN: u8 = 0x81;

/// Size of the packed FDCAN RX header preceding every frame (8 bytes)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest FDCAN payload (64 bytes)
pub const MAX_PAYLOAD_SIZE: usize = 64;

/// Size of one gadget RX element on the wire (header + max payload)
pub const RX_ELEMENT_SIZE: usize = FRAME_HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Bytes requested by every bulk read (four RX elements)
pub const TRANSFER_SIZE: usize = 4 * RX_ELEMENT_SIZE;

/// Number of bulk reads kept outstanding by the capture pump
pub const POOL_SIZE: usize = 100;

/// Number of captured messages retained for display
pub const HISTORY_LIMIT: usize = 100;

/// Delay before a slot that hit a bus error is resubmitted (milliseconds)
pub const RETRY_BACKOFF_MS: u64 = 100;

/// Length of the getDeviceInfo response (32 bytes)
pub const DEVICE_INFO_SIZE: usize = 32;

/// Length of a register value in the control data phase (4 bytes)
pub const REGISTER_SIZE: usize = 4;

/// Returns true when the vendor/product pair identifies the gadget
pub fn is_gadget(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == VID && product_id == PID
}
