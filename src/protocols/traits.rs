//! Detector plug-in contract
//!
//! Defines the interface every flow detector implements to integrate with
//! the discovery framework.

use crate::core::{Direction, FlowTuple, Session};

/// Verdict a detector returns to the framework for one payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorStatus {
    /// Keep feeding payloads for this flow.
    InProcess,
    /// Detection concluded for this flow. An application may or may not
    /// have been reported; "conclusively not ours" is also a success.
    Success,
    /// The flow does not speak this detector's protocol.
    NoMatch,
}

/// Which half of discovery a detector serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    /// Driven by initiator payloads, may also observe responder payloads.
    Client,
    /// Driven by responder payloads, owns the service verdict.
    Service,
}

/// Per-payload arguments handed to [`FlowDetector::validate`].
pub struct ValidateArgs<'a> {
    pub direction: Direction,
    pub payload: &'a [u8],
    /// The flow's session. Holds the detector's own per-flow state.
    pub session: &'a mut Session,
    /// Flow identity for log context.
    pub tuple: FlowTuple,
}

/// A protocol detector.
///
/// Detectors are immutable after construction and shared by reference
/// across workers; every piece of per-flow mutability lives in the session.
pub trait FlowDetector: Send + Sync {
    /// Protocol identifier (e.g. "pop3")
    fn name(&self) -> &'static str;

    fn kind(&self) -> DetectorKind;

    /// Inspect one payload and update the flow's session.
    fn validate(&self, args: &mut ValidateArgs<'_>) -> DetectorStatus;
}
