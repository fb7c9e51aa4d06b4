//! Structured reports for dropped messages, forced resyncs and broken
//! invariants.
//!
//! Nothing reported here stops a session. A [`ViolationObserver`] decides
//! what happens to each [`Violation`]:
//!
//! - [`TracingObserver`] (used when none is configured) logs it;
//! - [`CollectingObserver`] keeps it for assertions in tests.
//!
//! # Example
//!
//! ```
//! use netplay_lockstep::telemetry::{CollectingObserver, ViolationKind};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! // ... hand `observer.clone()` to a SessionBuilder, run the session ...
//! assert!(!observer.has_violation(ViolationKind::Invariant));
//! ```

use crate::Frame;
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// How bad a violation is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Something was ignored; the session is unaffected.
    Warning,
    /// The current run was discarded or a connection was lost.
    Error,
    /// An internal invariant is broken.
    Critical,
}

impl ViolationSeverity {
    /// Lower-case label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// A message was undecodable or not acceptable from its sender: framed
    /// input for the wrong slot or a stale frame, controller input before
    /// `hello`, a controller message from the peer.
    InputProtocol,
    /// The peer announced different content.
    Handshake,
    /// The frame input buffer hit its cap and the run was discarded.
    Overflow,
    /// A connection failed.
    Transport,
    /// Internal logic error, such as a message that could not be encoded.
    InternalError,
    /// A runtime invariant check failed. Only checked in debug builds or
    /// with the `paranoid` feature.
    Invariant,
}

impl ViolationKind {
    /// Lower-case label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputProtocol => "input_protocol",
            Self::Handshake => "handshake",
            Self::Overflow => "overflow",
            Self::Transport => "transport",
            Self::InternalError => "internal_error",
            Self::Invariant => "invariant",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported violation.
///
/// Built with the [`violation!`](crate::violation) macro, which records the
/// source location.
///
/// ```
/// use netplay_lockstep::telemetry::{ViolationKind, ViolationSeverity};
/// use netplay_lockstep::{violation, Frame};
///
/// let v = violation!(ViolationSeverity::Warning, ViolationKind::InputProtocol, "stale input")
///     .with_frame(Frame::new(7))
///     .with_connection(&"guest");
///
/// assert!(v.to_string().contains("frame 7"));
/// assert_eq!(v.connection.as_deref(), Some("\"guest\""));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Violation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// What went wrong.
    pub kind: ViolationKind,
    /// Human-readable description.
    pub message: String,
    /// Where it was detected (`file:line`).
    pub location: &'static str,
    /// The lockstep frame involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
    /// The `Debug` rendering of the offending connection's address, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

impl Violation {
    /// Creates a violation without frame or connection.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            frame: None,
            connection: None,
        }
    }

    /// Attaches the frame involved. [`Frame::NULL`] is ignored.
    #[must_use]
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = (!frame.is_null()).then_some(frame);
        self
    }

    /// Attaches the address of the connection involved.
    #[must_use]
    pub fn with_connection<A: Debug + ?Sized>(mut self, addr: &A) -> Self {
        self.connection = Some(format!("{addr:?}"));
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.severity, self.kind, self.message)?;
        if let Some(connection) = &self.connection {
            write!(f, ", connection {connection}")?;
        }
        if let Some(frame) = self.frame {
            write!(f, ", frame {frame}")?;
        }
        write!(f, " ({})", self.location)
    }
}

/// Receives reported violations.
///
/// ```
/// use netplay_lockstep::telemetry::{Violation, ViolationObserver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl ViolationObserver for Counter {
///     fn on_violation(&self, _violation: &Violation) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait ViolationObserver: Send + Sync {
    /// Called for every violation, from inside `tick` or `poll_remote_clients`.
    fn on_violation(&self, violation: &Violation);
}

/// Receives reported violations.
#[cfg(not(feature = "sync-send"))]
pub trait ViolationObserver {
    /// Called for every violation, from inside `tick` or `poll_remote_clients`.
    fn on_violation(&self, violation: &Violation);
}

/// Logs warnings at `warn` and everything else at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let kind = violation.kind.as_str();
        let frame = violation.frame.map(Frame::as_i32);
        let connection = violation.connection.as_deref();
        match violation.severity {
            ViolationSeverity::Warning => tracing::warn!(
                kind,
                location = violation.location,
                frame,
                connection,
                "{}",
                violation.message
            ),
            ViolationSeverity::Error | ViolationSeverity::Critical => tracing::error!(
                severity = violation.severity.as_str(),
                kind,
                location = violation.location,
                frame,
                connection,
                "{}",
                violation.message
            ),
        }
    }
}

/// Keeps every violation for later inspection.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// An observer with nothing collected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything collected so far.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns `true` if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Returns `true` if a violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Every collected violation of `kind`.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Every collected violation caused by the connection to `addr`.
    #[must_use]
    pub fn violations_from<A: Debug + ?Sized>(&self, addr: &A) -> Vec<Violation> {
        let wanted = format!("{addr:?}");
        self.violations
            .lock()
            .iter()
            .filter(|v| v.connection.as_deref() == Some(wanted.as_str()))
            .cloned()
            .collect()
    }

    /// Forgets everything collected.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Hands `violation` to `observer`, or to [`TracingObserver`] without one.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &Violation,
) {
    match observer {
        Some(observer) => observer.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Builds a [`Violation`](crate::telemetry::Violation) at the current
/// `file:line` from a format string.
#[macro_export]
macro_rules! violation {
    ($severity:expr, $kind:expr, $($fmt:tt)+) => {
        $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($fmt)+),
            concat!(file!(), ":", line!()),
        )
    };
}

/// Builds a violation and logs it through
/// [`TracingObserver`](crate::telemetry::TracingObserver). For code without
/// access to a session's observer.
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $($fmt:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        $crate::telemetry::TracingObserver
            .on_violation(&$crate::violation!($severity, $kind, $($fmt)+));
    }};
}

/// Builds a violation and hands it to an `Option<Arc<dyn ViolationObserver>>`.
///
/// ```
/// use netplay_lockstep::report_violation_to;
/// use netplay_lockstep::telemetry::{
///     CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
/// use std::sync::Arc;
///
/// let collector = Arc::new(CollectingObserver::new());
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
///
/// report_violation_to!(&observer, ViolationSeverity::Warning, ViolationKind::InputProtocol,
///     "input from unattached controller {}", 3);
/// assert_eq!(collector.len(), 1);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, $($fmt:tt)+) => {
        $crate::telemetry::report_to_observer(
            $observer.as_ref(),
            &$crate::violation!($severity, $kind, $($fmt)+),
        )
    };
}

// ==========================================
// Runtime invariant checking
// ==========================================

/// A broken invariant of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// The type whose invariant broke.
    pub type_name: &'static str,
    /// The invariant, stated as what should hold.
    pub invariant: &'static str,
    /// Values involved.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a violation of `invariant` on `type_name`.
    #[must_use]
    pub const fn new(type_name: &'static str, invariant: &'static str) -> Self {
        Self {
            type_name,
            invariant,
            details: None,
        }
    }

    /// Adds the values involved.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        match &self.details {
            Some(details) => write!(f, " ({details})"),
            None => Ok(()),
        }
    }
}

/// Types with internal invariants that can be checked at runtime.
pub trait InvariantChecker {
    /// Returns the first broken invariant, if any.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Checks invariants and reports a failure as [`ViolationKind::Invariant`],
/// to the given observer if one is passed.
///
/// Compiles to nothing in release builds unless `paranoid` is enabled.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($subject:expr, $context:expr) => {
        $crate::debug_check_invariants!($subject, $context, &None::<::std::sync::Arc<dyn $crate::telemetry::ViolationObserver>>)
    };
    ($subject:expr, $context:expr, $observer:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(broken) = $subject.check_invariants() {
            $crate::report_violation_to!(
                $observer,
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} [{}]",
                broken,
                $context
            );
        }
    }};
}

/// Release builds without `paranoid` skip invariant checks.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($subject:expr, $context:expr) => {{}};
    ($subject:expr, $context:expr, $observer:expr) => {{}};
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

    fn dropped(conn: u8) -> Violation {
        crate::violation!(
            ViolationSeverity::Warning,
            ViolationKind::InputProtocol,
            "dropped input"
        )
        .with_connection(&conn)
    }

    #[test]
    fn severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn display_names_connection_and_frame() {
        let text = dropped(3).with_frame(Frame::new(12)).to_string();
        assert!(text.starts_with("[warning/input_protocol] dropped input, connection 3, frame 12 ("));
        assert!(text.contains("telemetry.rs:"));
    }

    #[test]
    fn null_frames_are_not_recorded() {
        assert_eq!(dropped(1).with_frame(Frame::NULL).frame, None);
    }

    #[test]
    fn collecting_observer_filters_by_kind_and_connection() {
        let observer = CollectingObserver::new();
        observer.on_violation(&dropped(1));
        observer.on_violation(&dropped(2));
        observer.on_violation(&crate::violation!(
            ViolationSeverity::Error,
            ViolationKind::Overflow,
            "{} frames buffered",
            241
        ));

        assert_eq!(observer.len(), 3);
        assert_eq!(observer.violations_of_kind(ViolationKind::InputProtocol).len(), 2);
        assert_eq!(observer.violations_from(&2u8).len(), 1);
        assert!(!observer.has_violation(ViolationKind::Handshake));
        assert_eq!(
            observer.violations_of_kind(ViolationKind::Overflow)[0].message,
            "241 frames buffered"
        );
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn report_violation_to_prefers_the_given_observer() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::Handshake,
            "peer {} runs other content",
            "x"
        );
        assert_eq!(collector.violations()[0].message, "peer x runs other content");

        let none: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            &none,
            ViolationSeverity::Error,
            ViolationKind::InternalError,
            "logged instead"
        );
    }

    struct Window {
        low: i32,
        high: i32,
    }

    impl InvariantChecker for Window {
        fn check_invariants(&self) -> Result<(), InvariantViolation> {
            if self.low > self.high {
                return Err(InvariantViolation::new("Window", "low <= high")
                    .with_details(format!("low={}, high={}", self.low, self.high)));
            }
            Ok(())
        }
    }

    #[test]
    fn broken_invariants_reach_the_observer() {
        assert!(Window { low: 1, high: 2 }.check_invariants().is_ok());
        let err = Window { low: 3, high: 2 }.check_invariants().unwrap_err();
        assert_eq!(err.to_string(), "Window: low <= high (low=3, high=2)");

        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        debug_check_invariants!(Window { low: 3, high: 2 }, "test", &observer);
        if cfg!(any(debug_assertions, feature = "paranoid")) {
            assert!(collector.has_violation(ViolationKind::Invariant));
        }
    }

    #[test]
    fn violations_serialize_without_empty_fields() {
        let json = serde_json::to_string(&dropped(5)).unwrap();
        assert!(json.contains(r#""kind":"input_protocol""#));
        assert!(json.contains(r#""connection":"5""#));
        assert!(!json.contains("frame"));
    }
}
