use std::sync::{
    atomic::{AtomicU32, Ordering},
    RwLock,
};

use crate::color::{Color, Correction};

fn pack(color: Color) -> u32 {
    let (r, g, b) = color.into_components();
    ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

fn unpack(value: u32) -> Color {
    Color::new((value >> 16) as u8, (value >> 8) as u8, value as u8)
}

/// Target colors of a strip
///
/// Written by the capture collaborator and read by the strip updater on every tick. Every LED is
/// stored in its own atomic so neither side ever waits for the other.
#[derive(Debug)]
pub struct TargetFrame {
    leds: Box<[AtomicU32]>,
    correction: RwLock<Correction>,
}

impl TargetFrame {
    pub fn new(led_count: usize, correction: Correction) -> Self {
        Self {
            leds: (0..led_count).map(|_| AtomicU32::new(0)).collect(),
            correction: RwLock::new(correction),
        }
    }

    pub fn len(&self) -> usize {
        self.leds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leds.is_empty()
    }

    fn correction(&self) -> Correction {
        *self
            .correction
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn set_correction(&self, correction: Correction) {
        *self
            .correction
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = correction;
    }

    /// Current target of the LED at `index`, black if out of range
    pub fn get(&self, index: usize) -> Color {
        self.leds
            .get(index)
            .map(|led| unpack(led.load(Ordering::Relaxed)))
            .unwrap_or_default()
    }

    /// Set the target of one LED after brightness correction
    ///
    /// Out of range indices are ignored.
    pub fn set(&self, index: usize, color: Color) {
        if let Some(led) = self.leds.get(index) {
            led.store(pack(self.correction().apply(color)), Ordering::Relaxed);
        }
    }

    /// Set the targets of the first `colors.len()` LEDs after brightness correction
    pub fn publish(&self, colors: &[Color]) {
        let correction = self.correction();

        for (led, &color) in self.leds.iter().zip(colors) {
            led.store(pack(correction.apply(color)), Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Vec<Color> {
        self.leds
            .iter()
            .map(|led| unpack(led.load(Ordering::Relaxed)))
            .collect()
    }
}
