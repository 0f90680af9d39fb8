//! Per-flow POP3 detection state.

use crate::core::ServiceSubtype;

/// Client-side phase of the flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientPhase {
    /// AUTHORIZATION: nobody is authenticated yet.
    #[default]
    Authorization,
    /// TRANSACTION: a user is (or is assumed to be) authenticated.
    Transaction,
    /// STLS sent; the next server status decides between a TLS upgrade and
    /// a fallback to AUTHORIZATION.
    StlsPending,
}

/// Server-side phase of the flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerPhase {
    /// Nothing seen from the server; the next payload is the greeting.
    #[default]
    Greeting,
    /// Expecting a `+OK` / `-ERR` status line.
    Status,
    /// Inside a multi-line body, terminated by a lone `.` line.
    Body,
}

/// Captured usernames are bounded to this many bytes.
pub const MAX_USERNAME_LEN: usize = 252;
/// Captured version strings are bounded to this many bytes.
pub const MAX_VERSION_LEN: usize = 63;

/// Mutable record attached to one TCP flow, shared by the client and
/// service detectors through the session storage. Created on the first
/// payload in either direction, torn down with the session.
#[derive(Debug, Default)]
pub struct Pop3FlowState {
    pub client: ClientPhase,
    pub server: ServerPhase,

    /// Captured by USER or APOP, surrendered on the next server status.
    pub username: Option<String>,
    /// A login was acknowledged by the server.
    pub got_user: bool,
    /// POP3 confirmed from the client direction.
    pub detected: bool,

    /// First-call session flag setup done.
    pub flags_set: bool,
    /// The flow still wants server payloads routed to the client detector.
    pub need_continue: bool,

    /// Vendor token from the greeting; one of a fixed set, never freed.
    pub vendor: Option<&'static str>,
    /// Version string from the greeting, bounded to `MAX_VERSION_LEN`.
    pub version: String,
    /// Add-on services advertised in the greeting.
    pub subtypes: Vec<ServiceSubtype>,

    /// Completed server responses.
    pub responses: u32,
    /// The last status line was `-ERR`.
    pub last_error: bool,
}
