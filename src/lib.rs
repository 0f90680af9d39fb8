//! Passive application identification for bidirectional TCP flows.
//!
//! `flowident` watches the two byte streams of a TCP flow and decides what
//! application is speaking, without terminating, proxying, or modifying the
//! traffic. Protocol support is plug-in shaped: detectors register through
//! a [`protocols::DetectorRegistry`] and are driven one payload at a time
//! with [`protocols::ValidateArgs`] against the flow's [`core::Session`].
//!
//! The crate ships the POP3/POP3S detector pair in [`protocols::pop3`]:
//! a client-command state machine and a server-response state machine that
//! share per-flow state through the session, capture the authenticated
//! username, recognize the STLS upgrade, and extract vendor and version
//! details from server greetings.
//!
//! The library never blocks and performs no I/O; payload delivery order
//! within one flow is the caller's responsibility.

pub mod core;
pub mod protocols;

pub use crate::core::{AppId, Direction, FlowTuple, Session, SessionFlags};
pub use crate::protocols::{DetectorRegistry, DetectorStatus, FlowDetector, ValidateArgs};
