//! Integration tests for configuration structs.
//!
//! These tests verify that:
//! 1. Presets return sensible, valid values
//! 2. Invalid values are rejected when a session starts
//! 3. Configs are applied to the session they build

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

use common::stubs::PeerConfig;
use netplay_lockstep::{
    HoldConfig, HoldPolicy, InvalidRequestKind, LockstepConfig, MemoryTransport, NetplayError,
    SessionBuilder, SessionMode,
};
use web_time::Duration;

// ============================================================================
// LockstepConfig Tests
// ============================================================================

#[test]
fn test_lockstep_config_default() {
    let config = LockstepConfig::default();

    assert_eq!(config.input_delay, 2);
    assert_eq!(config.max_steps_per_tick, 4);
    assert_eq!(config.frame_interval, Duration::from_nanos(1_000_000_000 / 60));
    assert_eq!(config.max_tick_elapsed, Duration::from_millis(250));
    assert_eq!(config.max_buffered_frames, 240);
    assert_eq!(config, LockstepConfig::new());
}

#[test]
fn test_lockstep_presets_are_valid() {
    for config in [
        LockstepConfig::default(),
        LockstepConfig::lan(),
        LockstepConfig::high_latency(),
        LockstepConfig::competitive(),
    ] {
        assert!(config.validate().is_ok(), "{config:?}");
    }
    assert!(LockstepConfig::lan().input_delay < LockstepConfig::default().input_delay);
    assert!(LockstepConfig::high_latency().input_delay > LockstepConfig::default().input_delay);
}

#[test]
fn test_buffer_must_exceed_delay() {
    let config = LockstepConfig {
        input_delay: 8,
        max_buffered_frames: 8,
        ..LockstepConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_session_rejects_invalid_lockstep_config() {
    let result = SessionBuilder::<PeerConfig>::new()
        .with_lockstep_config(LockstepConfig {
            max_steps_per_tick: 0,
            ..LockstepConfig::default()
        })
        .start_session(MemoryTransport::new(1u8));
    assert!(matches!(
        result,
        Err(NetplayError::InvalidRequest {
            kind: InvalidRequestKind::ConfigValueOutOfRange { .. }
        })
    ));
}

#[test]
fn test_custom_lockstep_config_is_applied() {
    let session = SessionBuilder::<PeerConfig>::new()
        .with_lockstep_config(LockstepConfig::high_latency())
        .start_session(MemoryTransport::new(1u8))
        .unwrap();

    assert_eq!(*session.lockstep_config(), LockstepConfig::high_latency());
    assert_eq!(session.stepper().input_delay(), 6);
    assert_eq!(session.stepper().max_buffered_frames(), 480);
}

// ============================================================================
// HoldConfig Tests
// ============================================================================

#[test]
fn test_hold_config_default() {
    let config = HoldConfig::default();

    assert_eq!(config.local, HoldPolicy::LOCAL_CAPTURE);
    assert_eq!(config.relay_min_frames, 4);
    assert_eq!(config.relay_policy(), HoldPolicy::RELAY);
    assert_eq!(config.controller_client, HoldPolicy::CONTROLLER_CLIENT);
}

#[test]
fn test_hold_config_bounds() {
    let too_long = HoldConfig {
        controller_client: HoldPolicy::WallClock(Duration::from_secs(5)),
        ..HoldConfig::default()
    };
    assert!(too_long.validate().is_err());

    let no_hold = HoldConfig {
        local: HoldPolicy::None,
        relay_min_frames: 0,
        controller_client: HoldPolicy::None,
    };
    assert!(no_hold.validate().is_ok());
}

#[test]
fn test_custom_hold_config_is_applied() {
    let session = SessionBuilder::<PeerConfig>::new()
        .with_mode(SessionMode::Relay)
        .with_hold_config(HoldConfig {
            relay_min_frames: 2,
            ..HoldConfig::default()
        })
        .start_session(MemoryTransport::new(1u8))
        .unwrap();

    assert_eq!(session.relay().min_hold_frames(), 2);
    assert_eq!(session.hold_config().relay_policy(), HoldPolicy::FrameCount(2));
}

// ============================================================================
// Builder Tests
// ============================================================================

#[test]
fn test_event_queue_size_floor() {
    let err = SessionBuilder::<PeerConfig>::new()
        .with_event_queue_size(1)
        .unwrap_err();
    assert!(matches!(err, NetplayError::InvalidRequest { .. }));
}
