use serialport::SerialPortType;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;

use super::{Result, SerialError, SerialPortInfo};
use crate::device::Endpoint;

/// Byte stream a session runs its line protocol over.
pub trait PortIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PortIo for T {}

/// Opens the raw link for an endpoint. The handshake is not part of this;
/// see [`super::SerialInterface::open`].
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn PortIo>>;
}

/// Connector for real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeConnector;

#[async_trait::async_trait]
impl Connector for NativeConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn PortIo>> {
        let stream = tokio_serial::new(endpoint.address.as_str(), endpoint.baud_rate)
            .open_native_async()
            .map_err(|e| {
                SerialError::ConnectionFailed(format!("{}: {}", endpoint.address, e))
            })?;

        log::debug!("Opened {} at {} baud", endpoint.address, endpoint.baud_rate);
        Ok(Box::new(stream))
    }
}

/// List serial ports known to the OS
pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => Some(match (usb.manufacturer, usb.product) {
                    (Some(m), Some(p)) => format!("{} {} ({:04x}:{:04x})", m, p, usb.vid, usb.pid),
                    (None, Some(p)) => format!("{} ({:04x}:{:04x})", p, usb.vid, usb.pid),
                    _ => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
                }),
                SerialPortType::BluetoothPort => Some("Bluetooth".to_string()),
                SerialPortType::PciPort => Some("PCI".to_string()),
                SerialPortType::Unknown => None,
            };
            SerialPortInfo {
                port_name: port.port_name,
                description,
            }
        })
        .collect())
}
