use std::{
    io::{self, Write},
    time::Duration,
};

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};

use super::{FrameBuffer, Transport, TransportError};
use crate::{color::Color, models::Strip};

pub const BAUD_RATE: u32 = 115_200;
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Strip driven by a microcontroller on a serial port
///
/// Serial I/O is blocking, so it runs on the blocking thread pool. The port is moved there and
/// back for every operation; it is lost if that task fails, and later operations then fail too.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    frame: FrameBuffer,
}

fn join_error(error: tokio::task::JoinError) -> io::Error {
    io::Error::other(error)
}

impl SerialTransport {
    pub async fn open(strip: &Strip) -> Result<Self, TransportError> {
        let name = strip.com.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let path = resolve_port(&name);

            serialport::new(path.as_str(), BAUD_RATE)
                .timeout(WRITE_TIMEOUT)
                .open()
                .map(|port| (path, port))
                .map_err(io::Error::from)
        })
        .await
        .map_err(join_error)
        .and_then(|opened| opened);

        let (path, port) = opened.map_err(|source| TransportError::ConnectionFailed {
            key: strip.key(),
            source,
        })?;

        info!(name = %strip.com, path = %path, leds = %strip.leds, "opened serial strip");

        Ok(Self {
            port: Some(port),
            frame: FrameBuffer::new(strip.leds),
        })
    }

    /// Run `f` on the port from the blocking thread pool
    async fn with_port(
        &mut self,
        bytes: Vec<u8>,
        f: fn(&mut Box<dyn SerialPort>, &[u8]) -> io::Result<()>,
    ) -> Result<(), TransportError> {
        let mut port = self
            .port
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut port, &bytes);
            (port, result)
        })
        .await
        .map_err(join_error)?;

        self.port = Some(port);
        Ok(result?)
    }
}

fn matches_name(info: &SerialPortInfo, needle: &str) -> bool {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => [&usb.product, &usb.manufacturer, &usb.serial_number]
            .iter()
            .filter_map(|field| field.as_deref())
            .any(|field| field.to_lowercase().contains(needle)),
        _ => false,
    }
}

/// Find the system path of the serial device called `name`
///
/// `name` is either a port name (`COM3`, `/dev/ttyACM0`) or a fragment of the product,
/// manufacturer or serial number of a USB device. Unknown names are returned as-is so the open
/// error reports them.
fn resolve_port(name: &str) -> String {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(error) => {
            debug!(error = %error, "cannot enumerate serial ports");
            return name.to_owned();
        }
    };

    if ports.iter().any(|info| info.port_name == name) {
        return name.to_owned();
    }

    let needle = name.to_lowercase();
    ports
        .into_iter()
        .find(|info| matches_name(info, &needle))
        .map(|info| info.port_name)
        .unwrap_or_else(|| name.to_owned())
}

#[async_trait]
impl Transport for SerialTransport {
    fn led_count(&self) -> usize {
        self.frame.led_count()
    }

    async fn write(&mut self, index: usize, color: Color) -> Result<(), TransportError> {
        self.frame.set(index, color)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let bytes = self.frame.as_bytes().to_vec();

        self.with_port(bytes, |port, bytes| {
            port.write_all(bytes)?;
            port.flush()
        })
        .await
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        // The device handle itself is closed when the transport is dropped
        self.with_port(Vec::new(), |port, _| port.flush()).await
    }
}
