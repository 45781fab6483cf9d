//! Structured diagnostic events handed to an [`IncidentSink`](crate::IncidentSink).

use std::fmt;
use std::panic::Location;

/// How serious an incident is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Informational only.
    Info,
    /// Degraded but operational.
    Warning,
    /// A transition or operation failed.
    Critical,
    /// Critical, affecting only this participant.
    CriticalLocal,
    /// Critical, affecting the whole simulation.
    CriticalGlobal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::CriticalLocal => write!(f, "critical (local)"),
            Self::CriticalGlobal => write!(f, "critical (global)"),
        }
    }
}

/// Machine-readable incident classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IncidentCode {
    /// Standalone mode was switched on or off.
    StandaloneModeChanged,
    /// A request listener vetoed a state transition.
    StateRequestDenied,
    /// Exit, cleanup or entry listeners failed during a transition.
    TransitionFailed,
    /// The participant failed while still in Startup.
    StartupFailure,
    /// An incoming sample was dropped because every slot was locked.
    SampleDropped,
    /// Slots were still locked while the data access layer was cleared.
    SamplesStillLocked,
    /// A step callback exceeded its runtime budget.
    RuntimeViolation,
    /// An input was not valid in time for a step.
    InputValidityViolation,
    /// A trigger fell due while the previous step was still computing.
    TriggerViolation,
    /// A step acknowledgement could not be transmitted.
    AckTransmitFailed,
    /// A trigger tick arrived out of order.
    OutOfOrderTrigger,
    /// No trigger arrived within the system timeout.
    SystemTimeout,
    /// A schedule request came from a participant other than the master.
    UnexpectedScheduleRequest,
    /// The schedule could not be sent to the timing master.
    ScheduleTransmitFailed,
}

impl fmt::Display for IncidentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StandaloneModeChanged => "standalone mode changed",
            Self::StateRequestDenied => "state request denied",
            Self::TransitionFailed => "state transition failed",
            Self::StartupFailure => "startup failure",
            Self::SampleDropped => "sample dropped",
            Self::SamplesStillLocked => "samples still locked",
            Self::RuntimeViolation => "runtime violation",
            Self::InputValidityViolation => "input validity violation",
            Self::TriggerViolation => "trigger violation",
            Self::AckTransmitFailed => "acknowledgement transmit failed",
            Self::OutOfOrderTrigger => "out-of-order trigger",
            Self::SystemTimeout => "system timeout",
            Self::UnexpectedScheduleRequest => "unexpected schedule request",
            Self::ScheduleTransmitFailed => "schedule transmit failed",
        };
        f.write_str(s)
    }
}

/// A diagnostic event.
///
/// `line` and `file` record the call site that raised the incident.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incident {
    /// Classification.
    pub code: IncidentCode,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// Component that raised the incident.
    pub origin: String,
    /// Source line of the raising call site.
    pub line: u32,
    /// Source file of the raising call site.
    pub file: &'static str,
}

impl Incident {
    /// Build an incident stamped with the caller's source location.
    #[track_caller]
    pub fn new(
        code: IncidentCode,
        severity: Severity,
        description: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        let loc = Location::caller();
        Self {
            code,
            severity,
            description: description.into(),
            origin: origin.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} from {}: {}",
            self.severity, self.code, self.origin, self.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_records_call_site() {
        let inc = Incident::new(
            IncidentCode::SampleDropped,
            Severity::Warning,
            "all slots locked",
            "DataAccess",
        );
        assert!(inc.file.ends_with("incident.rs"));
        assert!(inc.line > 0);
        assert_eq!(
            inc.to_string(),
            "[warning] sample dropped from DataAccess: all slots locked"
        );
    }

    #[test]
    fn severity_orders_by_gravity() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::CriticalGlobal);
    }
}
