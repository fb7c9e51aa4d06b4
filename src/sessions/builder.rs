//! [`SessionBuilder`] validates configuration and starts a [`NetplaySession`].
//!
//! [`NetplaySession`]: crate::NetplaySession

use std::sync::Arc;

use crate::{
    error::InvalidRequestKind,
    sessions::config::{HoldConfig, LockstepConfig},
    sessions::netplay_session::NetplaySession,
    telemetry::ViolationObserver,
    Config, NetplayError, PlayerSlot, SessionMode, Transport,
};

/// Default event queue size.
/// Events older than this threshold are dropped if not polled.
const DEFAULT_EVENT_QUEUE_SIZE: usize = 100;
const MIN_EVENT_QUEUE_SIZE: usize = 10;

/// The [`SessionBuilder`] builds a [`NetplaySession`].
///
/// After setting all appropriate values, call
/// [`SessionBuilder::start_session`] with a transport.
///
/// # Example
///
/// ```
/// use netplay_lockstep::{Config, LockstepConfig, MemoryTransport, SessionBuilder, SessionMode, SessionState};
///
/// struct Local;
/// impl Config for Local {
///     type Address = u8;
/// }
///
/// let session = SessionBuilder::<Local>::new()
///     .with_mode(SessionMode::Solo)
///     .with_lockstep_config(LockstepConfig::lan())
///     .start_session(MemoryTransport::new(0u8))?;
/// assert_eq!(session.current_state(), SessionState::AwaitingLocalReady);
/// # Ok::<(), netplay_lockstep::NetplayError>(())
/// ```
#[must_use = "SessionBuilder must be consumed by calling start_session"]
pub struct SessionBuilder<T>
where
    T: Config,
{
    lockstep_config: LockstepConfig,
    hold_config: HoldConfig,
    local_slot: PlayerSlot,
    mode: SessionMode,
    event_queue_size: usize,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    _config: std::marker::PhantomData<T>,
}

impl<T: Config> std::fmt::Debug for SessionBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("lockstep_config", &self.lockstep_config)
            .field("hold_config", &self.hold_config)
            .field("local_slot", &self.local_slot)
            .field("mode", &self.mode)
            .field("event_queue_size", &self.event_queue_size)
            .field("has_violation_observer", &self.violation_observer.is_some())
            .finish()
    }
}

impl<T: Config> Default for SessionBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Config> SessionBuilder<T> {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            lockstep_config: LockstepConfig::default(),
            hold_config: HoldConfig::default(),
            local_slot: PlayerSlot::ONE,
            mode: SessionMode::default(),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            violation_observer: None,
            _config: std::marker::PhantomData,
        }
    }

    /// Sets the lockstep configuration: input delay, pacing and buffer cap.
    /// See [`LockstepConfig`] for the presets.
    pub fn with_lockstep_config(mut self, config: LockstepConfig) -> Self {
        self.lockstep_config = config;
        self
    }

    /// Shorthand for changing only [`LockstepConfig::input_delay`].
    pub fn with_input_delay(mut self, delay: usize) -> Self {
        self.lockstep_config.input_delay = delay;
        self
    }

    /// Sets the minimum-hold policies.
    pub fn with_hold_config(mut self, config: HoldConfig) -> Self {
        self.hold_config = config;
        self
    }

    /// Sets the slot local input is captured for. The peer must use the
    /// other one. Defaults to [`PlayerSlot::ONE`].
    pub fn with_local_slot(mut self, slot: PlayerSlot) -> Self {
        self.local_slot = slot;
        self
    }

    /// Sets the initial mode. Defaults to [`SessionMode::Paired`].
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the maximum number of events kept before the oldest are dropped.
    ///
    /// # Errors
    /// Returns [`NetplayError::InvalidRequest`] if `size` is below 10.
    pub fn with_event_queue_size(mut self, size: usize) -> Result<Self, NetplayError> {
        if size < MIN_EVENT_QUEUE_SIZE {
            return Err(InvalidRequestKind::ConfigValueOutOfRange {
                field: "event_queue_size",
                min: MIN_EVENT_QUEUE_SIZE as u64,
                max: u64::MAX,
                actual: size as u64,
            }
            .into());
        }
        self.event_queue_size = size;
        Ok(self)
    }

    /// Sets an observer for protocol drops, overflows and broken invariants.
    /// Without one, reports go to `tracing`.
    ///
    /// ```
    /// use netplay_lockstep::{SessionBuilder, Config, telemetry::CollectingObserver};
    /// use std::sync::Arc;
    ///
    /// # struct MyConfig;
    /// # impl Config for MyConfig {
    /// #     type Address = u32;
    /// # }
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = SessionBuilder::<MyConfig>::new()
    ///     .with_violation_observer(observer.clone());
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Consumes the builder to construct a [`NetplaySession`] on `transport`.
    ///
    /// # Errors
    /// Returns [`NetplayError::InvalidRequest`] if the lockstep or hold
    /// configuration is invalid.
    pub fn start_session(
        self,
        transport: impl Transport<T::Address> + 'static,
    ) -> Result<NetplaySession<T>, NetplayError> {
        self.lockstep_config.validate()?;
        self.hold_config.validate()?;

        Ok(NetplaySession::new(
            self.lockstep_config,
            self.hold_config,
            self.local_slot,
            self.mode,
            Box::new(transport),
            self.event_queue_size,
            self.violation_observer,
        ))
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
    use crate::{MemoryTransport, SessionState};

    struct TestConfig;

    impl Config for TestConfig {
        type Address = u32;
    }

    #[test]
    fn defaults() {
        let builder = SessionBuilder::<TestConfig>::new();
        assert_eq!(builder.lockstep_config, LockstepConfig::default());
        assert_eq!(builder.hold_config, HoldConfig::default());
        assert_eq!(builder.local_slot, PlayerSlot::ONE);
        assert_eq!(builder.mode, SessionMode::Paired);
        assert_eq!(builder.event_queue_size, DEFAULT_EVENT_QUEUE_SIZE);
    }

    #[test]
    fn input_delay_shorthand_keeps_other_values() {
        let builder = SessionBuilder::<TestConfig>::new()
            .with_lockstep_config(LockstepConfig::competitive())
            .with_input_delay(3);
        assert_eq!(builder.lockstep_config.input_delay, 3);
        assert_eq!(builder.lockstep_config.max_steps_per_tick, 2);
    }

    #[test]
    fn event_queue_size_has_a_floor() {
        assert!(SessionBuilder::<TestConfig>::new()
            .with_event_queue_size(9)
            .is_err());
        let builder = SessionBuilder::<TestConfig>::new()
            .with_event_queue_size(10)
            .unwrap();
        assert_eq!(builder.event_queue_size, 10);
    }

    #[test]
    fn start_validates_configuration() {
        let result = SessionBuilder::<TestConfig>::new()
            .with_input_delay(300)
            .start_session(MemoryTransport::new(1u32));
        assert!(matches!(result, Err(NetplayError::InvalidRequest { .. })));

        let result = SessionBuilder::<TestConfig>::new()
            .with_hold_config(HoldConfig {
                relay_min_frames: 1000,
                ..HoldConfig::default()
            })
            .start_session(MemoryTransport::new(1u32));
        assert!(result.is_err());
    }

    #[test]
    fn started_session_reflects_builder() {
        let session = SessionBuilder::<TestConfig>::new()
            .with_local_slot(PlayerSlot::TWO)
            .with_mode(SessionMode::Relay)
            .start_session(MemoryTransport::new(1u32))
            .unwrap();
        assert_eq!(session.local_slot(), PlayerSlot::TWO);
        assert_eq!(session.mode(), SessionMode::Relay);
        assert_eq!(session.current_state(), SessionState::AwaitingLocalReady);
        assert!(session.violation_observer().is_none());
    }

    #[test]
    fn paired_session_starts_idle() {
        let session = SessionBuilder::<TestConfig>::new()
            .start_session(MemoryTransport::new(1u32))
            .unwrap();
        assert_eq!(session.current_state(), SessionState::Idle);
    }
}
