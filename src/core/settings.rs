//! User-tunable processing settings with bounds checking.

use serde::{Deserialize, Serialize};

pub const INPAINT_RADIUS_DEFAULT: u32 = 3;
pub const INPAINT_RADIUS_MIN: u32 = 1;
pub const INPAINT_RADIUS_MAX: u32 = 10;

pub const BITRATE_MBPS_DEFAULT: u32 = 20;
pub const BITRATE_MBPS_MIN: u32 = 1;
pub const BITRATE_MBPS_MAX: u32 = 50;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("inpaintRadius {value} outside [{INPAINT_RADIUS_MIN}, {INPAINT_RADIUS_MAX}]")]
    InpaintRadiusOutOfRange { value: u32 },
    #[error("bitrateMbps {value} outside [{BITRATE_MBPS_MIN}, {BITRATE_MBPS_MAX}]")]
    BitrateOutOfRange { value: u32 },
}

/// Processing settings supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(rename = "inpaintRadius")]
    pub inpaint_radius: u32,
    #[serde(rename = "bitrateMbps")]
    pub bitrate_mbps: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            inpaint_radius: INPAINT_RADIUS_DEFAULT,
            bitrate_mbps: BITRATE_MBPS_DEFAULT,
        }
    }
}

impl ProcessingConfig {
    /// Check both fields against their allowed ranges.
    /// The error names the offending field and value.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(INPAINT_RADIUS_MIN..=INPAINT_RADIUS_MAX).contains(&self.inpaint_radius) {
            return Err(SettingsError::InpaintRadiusOutOfRange {
                value: self.inpaint_radius,
            });
        }
        if !(BITRATE_MBPS_MIN..=BITRATE_MBPS_MAX).contains(&self.bitrate_mbps) {
            return Err(SettingsError::BitrateOutOfRange {
                value: self.bitrate_mbps,
            });
        }
        Ok(())
    }
}
