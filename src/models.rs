use std::{collections::HashMap, path::Path, str::FromStr, time::Duration};

use parse_display::Display;
use strum_macros::IntoStaticStr;
use thiserror::Error;
use validator::Validate;

/// Name of the configuration file, relative to the watched directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Shortest delay between two strip refreshes
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("segment {segment} of strip {strip} ends at led {end} but the strip only has {leds} leds")]
    SegmentOutOfBounds {
        strip: usize,
        segment: usize,
        end: usize,
        leds: usize,
    },
    #[error("{kind} strip {strip} has no device address")]
    MissingAddress { strip: usize, kind: StripKind },
    #[error("strip {strip} drives the same device as strip {first} ({key})")]
    DuplicateStrip {
        strip: usize,
        first: usize,
        key: StripKey,
    },
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[display(style = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StripKind {
    /// Serial device addressed by its name
    Serial,
    /// TCP stream addressed by host and port
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Mapping from a rectangular screen region to a contiguous run of LEDs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Segment {
    pub offset: usize,
    pub length: usize,
    #[serde(rename = "display")]
    pub display_index: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Number of samples averaged along the scan direction
    #[validate(range(min = 1))]
    pub steps: u32,
    #[serde(with = "crate::serde::orientation")]
    pub orientation: Orientation,
    pub invert: bool,
}

impl Segment {
    /// Index one past the last LED of this segment
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// LED indices covered by this segment, in scan order
    pub fn led_indices(&self) -> impl Iterator<Item = usize> {
        let (offset, length, invert) = (self.offset, self.length, self.invert);

        (0..length).map(move |k| {
            if invert {
                offset + length - 1 - k
            } else {
                offset + k
            }
        })
    }
}

/// Identity of a strip across configuration reloads
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{kind}:{address}")]
pub struct StripKey {
    pub kind: StripKind,
    pub address: String,
}

/// One physical LED chain and the transport used to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Strip {
    #[serde(rename = "type")]
    pub kind: StripKind,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub com: String,
    #[validate(range(min = 1, max = 65535))]
    pub leds: usize,
    #[validate(nested)]
    pub segments: Vec<Segment>,
    #[validate(range(max = 765))]
    pub max_brightness: u16,
    #[validate(range(min = 0.0, max = 1.0))]
    pub reduction_r: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub reduction_g: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub reduction_b: f32,
}

impl Strip {
    pub fn key(&self) -> StripKey {
        let address = match self.kind {
            StripKind::Serial => self.com.clone(),
            StripKind::Network => format!("{}:{}", self.ip, self.port),
        };

        StripKey {
            kind: self.kind,
            address,
        }
    }

    /// Cross-field checks the derived validation cannot express
    fn check(&self, index: usize) -> Result<(), ConfigError> {
        let has_address = match self.kind {
            StripKind::Serial => !self.com.is_empty(),
            StripKind::Network => !self.ip.is_empty() && self.port != 0,
        };

        if !has_address {
            return Err(ConfigError::MissingAddress {
                strip: index,
                kind: self.kind,
            });
        }

        for (segment_index, segment) in self.segments.iter().enumerate() {
            if segment.end() > self.leds {
                return Err(ConfigError::SegmentOutOfBounds {
                    strip: index,
                    segment: segment_index,
                    end: segment.end(),
                    leds: self.leds,
                });
            }
        }

        Ok(())
    }
}

/// Root configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Configuration {
    #[validate(nested)]
    pub strips: Vec<Strip>,
    /// Capture updates per second
    #[validate(range(min = 1, max = 1000))]
    pub ups: u32,
    /// Strip refreshes per second
    #[validate(range(min = 1, max = 1000))]
    pub fps: u32,
    /// Blend factor applied to the target color on every refresh
    #[validate(range(min = 0.0, max = 1.0))]
    pub lerp: f32,
}

impl Configuration {
    pub async fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let full = tokio::fs::read_to_string(path).await?;
        full.parse()
    }

    /// Check all the invariants of this configuration
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        let mut seen = HashMap::with_capacity(self.strips.len());
        for (index, strip) in self.strips.iter().enumerate() {
            strip.check(index)?;

            let key = strip.key();
            if let Some(&first) = seen.get(&key) {
                return Err(ConfigError::DuplicateStrip {
                    strip: index,
                    first,
                    key,
                });
            }

            seen.insert(key, index);
        }

        Ok(())
    }

    pub fn strip(&self, key: &StripKey) -> Option<&Strip> {
        self.strips.iter().find(|strip| &strip.key() == key)
    }

    /// Delay between two strip refreshes, never shorter than [MIN_FRAME_INTERVAL]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64).max(MIN_FRAME_INTERVAL)
    }

    pub fn to_string_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromStr for Configuration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Configuration = serde_json::from_str(s)?;
        config.check()?;
        Ok(config)
    }
}
