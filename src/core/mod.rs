//! Core shared types for flow identification
//!
//! Provides the vocabulary every detector speaks:
//! - `Direction`: which side of the flow a payload came from
//! - `FlowTuple`: the flow's address pair, carried for log context
//! - `Session`: the shared per-flow object detectors read and annotate

pub mod packet;
pub mod session;

pub use packet::{Direction, FlowTuple};
pub use session::{
    AppAnnouncement, AppId, ServiceAnnouncement, ServiceSubtype, Session, SessionFlags,
    UserAnnouncement,
};
