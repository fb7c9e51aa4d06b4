//! Configuration types for netplay sessions.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `LockstepConfig` | Input delay, pacing and buffer limits | `lan()`, `high_latency()`, `competitive()` |
//! | `HoldConfig` | Minimum-hold policies per input path | `Default` |
//!
//! # Example
//!
//! ```
//! use netplay_lockstep::{Config, LockstepConfig, SessionBuilder};
//!
//! # struct MyConfig;
//! # impl Config for MyConfig {
//! #     type Address = String;
//! # }
//! let builder = SessionBuilder::<MyConfig>::new()
//!     .with_lockstep_config(LockstepConfig::high_latency());
//! ```

use web_time::Duration;

use crate::input::hold::HoldPolicy;
use crate::{InvalidRequestKind, NetplayError};

/// Configuration of the lockstep engine.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Construct it
/// with `..LockstepConfig::default()`.
///
/// # Example
///
/// ```
/// use netplay_lockstep::LockstepConfig;
///
/// // Three frames of delay for a connection with ~50 ms one-way latency.
/// let config = LockstepConfig {
///     input_delay: 3,
///     ..LockstepConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "LockstepConfig has no effect unless passed to SessionBuilder::with_lockstep_config()"]
pub struct LockstepConfig {
    /// Frames between capturing local input and applying it. The remote
    /// side has this long to deliver its input before the simulation waits.
    ///
    /// Default: 2
    pub input_delay: usize,

    /// Frames applied at most per call to `tick`, across all advances of
    /// that call. Bounds catch-up bursts after a stall.
    ///
    /// Default: 4
    pub max_steps_per_tick: u32,

    /// Nominal time per frame.
    ///
    /// Default: 1/60 s
    pub frame_interval: Duration,

    /// Elapsed time counted at most per call to `tick`.
    ///
    /// Default: 250 ms
    pub max_tick_elapsed: Duration,

    /// Frames the input buffer may hold before the run is discarded and
    /// both sides resynchronize.
    ///
    /// Default: 240 (four seconds at 60 Hz)
    pub max_buffered_frames: usize,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            input_delay: 2,
            max_steps_per_tick: 4,
            frame_interval: Duration::from_nanos(1_000_000_000 / 60),
            max_tick_elapsed: Duration::from_millis(250),
            max_buffered_frames: 240,
        }
    }
}

impl LockstepConfig {
    /// Creates a new `LockstepConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for local networks: one frame of delay.
    pub fn lan() -> Self {
        Self {
            input_delay: 1,
            ..Self::default()
        }
    }

    /// Preset for slow connections (100 ms and more one-way).
    ///
    /// More delay, a larger buffer and faster catch-up.
    pub fn high_latency() -> Self {
        Self {
            input_delay: 6,
            max_steps_per_tick: 6,
            max_buffered_frames: 480,
            ..Self::default()
        }
    }

    /// Preset for competitive play on good connections.
    ///
    /// Minimal delay, and catch-up limited to two frames per tick so a
    /// stall never turns into a visible jump.
    pub fn competitive() -> Self {
        Self {
            input_delay: 1,
            max_steps_per_tick: 2,
            max_buffered_frames: 120,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `NetplayError::InvalidRequest` if any value is out of range.
    pub fn validate(&self) -> Result<(), NetplayError> {
        // input_delay: 0 to 30 frames (half a second at 60 Hz)
        if self.input_delay > 30 {
            return Err(InvalidRequestKind::ConfigValueOutOfRange {
                field: "input_delay",
                min: 0,
                max: 30,
                actual: self.input_delay as u64,
            }
            .into());
        }

        if self.max_steps_per_tick < 1 || self.max_steps_per_tick > 60 {
            return Err(InvalidRequestKind::ConfigValueOutOfRange {
                field: "max_steps_per_tick",
                min: 1,
                max: 60,
                actual: u64::from(self.max_steps_per_tick),
            }
            .into());
        }

        if self.frame_interval < Duration::from_millis(1)
            || self.frame_interval > Duration::from_millis(1000)
        {
            return Err(InvalidRequestKind::DurationConfigOutOfRange {
                field: "frame_interval",
                min_ms: 1,
                max_ms: 1000,
                actual_ms: self.frame_interval.as_millis() as u64,
            }
            .into());
        }

        // max_tick_elapsed: at least one frame, at most 10 s
        if self.max_tick_elapsed < self.frame_interval
            || self.max_tick_elapsed > Duration::from_secs(10)
        {
            return Err(InvalidRequestKind::DurationConfigOutOfRange {
                field: "max_tick_elapsed",
                min_ms: self.frame_interval.as_millis() as u64,
                max_ms: 10_000,
                actual_ms: self.max_tick_elapsed.as_millis() as u64,
            }
            .into());
        }

        if self.max_buffered_frames <= self.input_delay {
            return Err(InvalidRequestKind::BufferSmallerThanDelay {
                max_buffered_frames: self.max_buffered_frames,
                input_delay: self.input_delay,
            }
            .into());
        }

        if self.max_buffered_frames > 3600 {
            return Err(InvalidRequestKind::ConfigValueOutOfRange {
                field: "max_buffered_frames",
                min: self.input_delay as u64 + 1,
                max: 3600,
                actual: self.max_buffered_frames as u64,
            }
            .into());
        }

        Ok(())
    }
}

/// Minimum-hold policies of the three input paths.
///
/// # Example
///
/// ```
/// use netplay_lockstep::{HoldConfig, HoldPolicy};
///
/// let config = HoldConfig {
///     relay_min_frames: 6,
///     ..HoldConfig::default()
/// };
/// assert_eq!(config.relay_policy(), HoldPolicy::FrameCount(6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "HoldConfig has no effect unless passed to SessionBuilder::with_hold_config()"]
pub struct HoldConfig {
    /// Policy of the local aggregator feeding lockstep capture.
    ///
    /// Default: [`HoldPolicy::LOCAL_CAPTURE`] (1 frame)
    pub local: HoldPolicy,

    /// Frames a relay press is held at minimum.
    ///
    /// Default: 4
    pub relay_min_frames: u32,

    /// Policy of controller clients.
    ///
    /// Default: [`HoldPolicy::CONTROLLER_CLIENT`] (60 ms)
    pub controller_client: HoldPolicy,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            local: HoldPolicy::LOCAL_CAPTURE,
            relay_min_frames: 4,
            controller_client: HoldPolicy::CONTROLLER_CLIENT,
        }
    }
}

impl HoldConfig {
    /// The relay policy as a [`HoldPolicy`].
    #[must_use]
    pub const fn relay_policy(&self) -> HoldPolicy {
        HoldPolicy::FrameCount(self.relay_min_frames)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `NetplayError::InvalidRequest` if a hold is longer than one
    /// second (60 frames).
    pub fn validate(&self) -> Result<(), NetplayError> {
        validate_policy("local", self.local)?;
        validate_policy("relay_min_frames", self.relay_policy())?;
        validate_policy("controller_client", self.controller_client)
    }
}

fn validate_policy(field: &'static str, policy: HoldPolicy) -> Result<(), NetplayError> {
    match policy {
        HoldPolicy::None => Ok(()),
        HoldPolicy::FrameCount(frames) if frames > 60 => {
            Err(InvalidRequestKind::ConfigValueOutOfRange {
                field,
                min: 0,
                max: 60,
                actual: u64::from(frames),
            }
            .into())
        },
        HoldPolicy::WallClock(min) if min > Duration::from_secs(1) => {
            Err(InvalidRequestKind::DurationConfigOutOfRange {
                field,
                min_ms: 0,
                max_ms: 1000,
                actual_ms: min.as_millis() as u64,
            }
            .into())
        },
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_presets_are_valid() {
        for config in [
            LockstepConfig::default(),
            LockstepConfig::lan(),
            LockstepConfig::high_latency(),
            LockstepConfig::competitive(),
        ] {
            config.validate().unwrap();
        }
        HoldConfig::default().validate().unwrap();
    }

    #[test]
    fn default_values() {
        let config = LockstepConfig::default();
        assert_eq!(config.input_delay, 2);
        assert_eq!(config.max_steps_per_tick, 4);
        assert_eq!(config.max_buffered_frames, 240);
        assert_eq!(config.frame_interval.as_micros(), 16_666);
    }

    #[test]
    fn zero_step_cap_is_rejected() {
        let config = LockstepConfig {
            max_steps_per_tick: 0,
            ..LockstepConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NetplayError::InvalidRequest {
                kind: InvalidRequestKind::ConfigValueOutOfRange {
                    field: "max_steps_per_tick",
                    ..
                }
            })
        ));
    }

    #[test]
    fn buffer_must_exceed_delay() {
        let config = LockstepConfig {
            input_delay: 4,
            max_buffered_frames: 4,
            ..LockstepConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(NetplayError::InvalidRequest {
                kind: InvalidRequestKind::BufferSmallerThanDelay {
                    max_buffered_frames: 4,
                    input_delay: 4
                }
            })
        );
    }

    #[test]
    fn tick_clamp_must_cover_one_frame() {
        let config = LockstepConfig {
            max_tick_elapsed: Duration::from_millis(5),
            ..LockstepConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overlong_holds_are_rejected() {
        let config = HoldConfig {
            relay_min_frames: 61,
            ..HoldConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HoldConfig {
            controller_client: HoldPolicy::WallClock(Duration::from_secs(2)),
            ..HoldConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
