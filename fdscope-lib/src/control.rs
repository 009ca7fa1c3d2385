use std::sync::Arc;

use tracing::{debug, info};
use zerocopy::FromBytes;

use crate::constants::{DEVICE_INFO_SIZE, REGISTER_SIZE};
use crate::error::{Result, ScopeError};
use crate::protocol::{DeviceInfo, DeviceInfoRaw, Op, Register, RegisterValue};
use crate::transport::{ControlSetup, Transport};

/// Issues the gadget's vendor requests over a claimed interface.
pub struct ControlClient<T> {
    transport: Arc<T>,
}

impl<T> Clone for ControlClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> ControlClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    fn setup(op: Op, value: u16) -> ControlSetup {
        ControlSetup {
            request: op.into(),
            value,
            index: 0,
        }
    }

    /// IN request for `op`, returning whatever the device sent
    async fn request_in(&self, op: Op, value: u16) -> Result<Vec<u8>> {
        let length = op.response_len() as u16;
        let data = self
            .transport
            .control_in(Self::setup(op, value), length)
            .await
            .map_err(|source| ScopeError::ControlTransfer { op, source })?;
        debug!(%op, value, bytes = hex::encode(&data), "Control IN");
        Ok(data)
    }

    async fn command(&self, op: Op) -> Result<()> {
        self.request_in(op, 0).await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.command(Op::Reset).await?;
        info!("Device reset");
        Ok(())
    }

    pub async fn capture_start(&self) -> Result<()> {
        self.command(Op::CaptureStart).await
    }

    pub async fn capture_stop(&self) -> Result<()> {
        self.command(Op::CaptureStop).await
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo> {
        let data = self.request_in(Op::GetDeviceInfo, 0).await?;
        let (raw, _) = DeviceInfoRaw::read_from_prefix(&data).map_err(|_| ScopeError::ShortResponse {
            op: Op::GetDeviceInfo,
            expected: DEVICE_INFO_SIZE,
            actual: data.len(),
        })?;
        Ok(DeviceInfo::from(raw))
    }

    pub async fn read_register(&self, register: Register) -> Result<u32> {
        let data = self.request_in(Op::ReadRegister, register.into()).await?;
        let bytes: [u8; REGISTER_SIZE] = data.as_slice().try_into().map_err(|_| ScopeError::ShortResponse {
            op: Op::ReadRegister,
            expected: REGISTER_SIZE,
            actual: data.len(),
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub async fn write_register(&self, register: Register, value: u32) -> Result<()> {
        let op = Op::WriteRegister;
        let data = value.to_le_bytes();
        debug!(%register, value, "Control OUT");
        self.transport
            .control_out(Self::setup(op, register.into()), &data)
            .await
            .map_err(|source| ScopeError::ControlTransfer { op, source })
    }

    /// Reads a register and decodes it into its value enum
    pub async fn read_typed<V: RegisterValue>(&self) -> Result<V> {
        let value = self.read_register(V::REGISTER).await?;
        V::try_from(value).map_err(|_| ScopeError::UnknownRegisterValue {
            register: V::REGISTER,
            value,
        })
    }

    pub async fn write_typed<V: RegisterValue>(&self, value: V) -> Result<()> {
        self.write_register(V::REGISTER, value.into()).await
    }
}
