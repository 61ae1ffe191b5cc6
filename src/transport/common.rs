use super::TransportError;
use crate::color::Color;

const BYTES_PER_LED: usize = 3;

/// Staging buffer holding one raw RGB frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(led_count: usize) -> Self {
        Self {
            buf: vec![0; led_count * BYTES_PER_LED],
        }
    }

    pub fn led_count(&self) -> usize {
        self.buf.len() / BYTES_PER_LED
    }

    pub fn set(&mut self, index: usize, color: Color) -> Result<(), TransportError> {
        let led_count = self.led_count();
        if index >= led_count {
            return Err(TransportError::IndexOutOfRange { index, led_count });
        }

        let start = index * BYTES_PER_LED;
        let (r, g, b) = color.into_components();
        self.buf[start..start + BYTES_PER_LED].copy_from_slice(&[r, g, b]);

        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}
