//! Links streaming raw RGB frames to a strip
//!
//! Both transports share the same byte layout: 3 bytes per LED in R, G, B order, LEDs in
//! ascending index order, no header or framing.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    color::Color,
    models::{Strip, StripKey, StripKind},
};

mod common;
pub use common::FrameBuffer;

// Transport implementation modules

mod network;
pub use network::NetworkTransport;

mod serial;
pub use serial::SerialTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to {key}: {source}")]
    ConnectionFailed {
        key: StripKey,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("led index {index} out of range for a strip of {led_count} leds")]
    IndexOutOfRange { index: usize, led_count: usize },
}

#[async_trait]
pub trait Transport: Send {
    fn led_count(&self) -> usize;

    /// Stage the color of the LED at `index` for the next flush
    async fn write(&mut self, index: usize, color: Color) -> Result<(), TransportError>;

    /// Push the staged frame to the device
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Release the underlying device without blanking it
    async fn release(&mut self) -> Result<(), TransportError>;
}

/// Opens transports for strips
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, strip: &Strip) -> Result<Box<dyn Transport>, TransportError>;
}

/// [Connector] reaching the physical devices described by the configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceConnector;

#[async_trait]
impl Connector for DeviceConnector {
    async fn open(&self, strip: &Strip) -> Result<Box<dyn Transport>, TransportError> {
        open(strip).await
    }
}

#[instrument(skip(strip), fields(key = %strip.key()))]
pub async fn open(strip: &Strip) -> Result<Box<dyn Transport>, TransportError> {
    let transport: Box<dyn Transport> = match strip.kind {
        StripKind::Serial => Box::new(SerialTransport::open(strip).await?),
        StripKind::Network => Box::new(NetworkTransport::connect(strip).await?),
    };

    Ok(transport)
}

async fn blank(transport: &mut dyn Transport) -> Result<(), TransportError> {
    for index in 0..transport.led_count() {
        transport.write(index, Color::default()).await?;
    }

    transport.flush().await
}

/// Turn off every LED and release the transport
///
/// This never fails: errors are logged and dropped along with the transport.
pub async fn close(mut transport: Box<dyn Transport>) {
    if let Err(error) = blank(transport.as_mut()).await {
        debug!(error = %error, "failed to blank strip");
    }

    if let Err(error) = transport.release().await {
        debug!(error = %error, "failed to release transport");
    }
}
