//! Frame loop configuration.

use crate::error::{Error, Result};

/// Upper bound accepted for [`FrameConfig::frames_in_flight`].
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// Which presentation behaviour the surface negotiation should aim for.
///
/// The platform always supports vsync (FIFO), so every preference can fall
/// back to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// Non-blocking, tear-free presentation (mailbox).
    #[default]
    LowLatency,
    /// Vertical sync (FIFO).
    Vsync,
    /// Present immediately, may tear.
    Immediate,
}

impl std::str::FromStr for PresentModePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mailbox" | "low-latency" => Ok(Self::LowLatency),
            "fifo" | "vsync" => Ok(Self::Vsync),
            "immediate" => Ok(Self::Immediate),
            other => Err(Error::Config(format!("unknown present mode '{}'", other))),
        }
    }
}

/// Settings consumed by the presenter and the application loop.
#[derive(Clone, Debug)]
pub struct FrameConfig {
    /// Size of the in-flight slot ring.
    pub frames_in_flight: usize,
    /// Initial drawable width in pixels.
    pub width: u32,
    /// Initial drawable height in pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
    /// Present mode preference.
    pub present_mode: PresentModePreference,
    /// Enable the Vulkan validation layer when available.
    pub validation: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            width: 1280,
            height: 720,
            title: "swapframe".to_string(),
            present_mode: PresentModePreference::default(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl FrameConfig {
    /// Checks that the configuration can drive a presenter.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.frames_in_flight
            )));
        }

        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "initial size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FrameConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_frames_in_flight() {
        let config = FrameConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_too_many_frames_in_flight() {
        let config = FrameConfig {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT_LIMIT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let config = FrameConfig {
            width: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_present_mode_from_str() {
        assert_eq!(
            "mailbox".parse::<PresentModePreference>().unwrap(),
            PresentModePreference::LowLatency
        );
        assert_eq!(
            "VSYNC".parse::<PresentModePreference>().unwrap(),
            PresentModePreference::Vsync
        );
        assert_eq!(
            "immediate".parse::<PresentModePreference>().unwrap(),
            PresentModePreference::Immediate
        );
        assert!("triple".parse::<PresentModePreference>().is_err());
    }
}
