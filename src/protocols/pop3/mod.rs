//! POP3 / POP3S application identification
//!
//! Two coupled detectors work on one flow: the client detector consumes
//! client-to-server commands, the service detector consumes server-to-client
//! responses. They share one [`Pop3FlowState`] through the session and
//! together decide whether the flow is POP3, whether it upgraded to POP3S
//! via STLS, and which user authenticated.
//!
//! Identification outcomes:
//! - a transaction-phase command in the transaction phase confirms POP3
//!   from the client side;
//! - a `+OK` answer to STLS reclassifies the flow as POP3S and stops
//!   plaintext inspection;
//! - four completed server responses let the service detector declare the
//!   service, together with any vendor details from the greeting;
//! - one unrecognized client command concludes that the flow is not POP3.

pub mod line;
pub mod patterns;
pub mod state;

mod client;
mod server;

pub use server::ResponseError;
pub use state::{ClientPhase, Pop3FlowState, ServerPhase};

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::core::{AppId, Direction, Session, SessionFlags};

use super::registry::{
    AppEntry, DetectorRegistration, APPINFO_CLIENT_USER, APPINFO_SERVICE_ADDITIONAL,
};
use super::traits::{DetectorKind, DetectorStatus, FlowDetector, ValidateArgs};

use patterns::CommandMatcher;

/// Default POP3 service port.
pub const POP3_PORT: u16 = 110;
/// Completed server responses required before the service is declared.
const RESPONSE_THRESHOLD: u32 = 4;

const POP3_APPS: &[AppEntry] = &[
    AppEntry {
        app: AppId::Pop3,
        flags: APPINFO_SERVICE_ADDITIONAL | APPINFO_CLIENT_USER,
    },
    AppEntry {
        app: AppId::Pop3s,
        flags: APPINFO_SERVICE_ADDITIONAL | APPINFO_CLIENT_USER,
    },
];

/// Flow counters kept by a detector instance.
#[derive(Debug, Default)]
pub struct Pop3Stats {
    /// POP3 client confirmations
    pub pop3_clients: AtomicU64,
    /// POP3S upgrades observed
    pub pop3s_clients: AtomicU64,
    /// Flows whose service verdict was delivered
    pub pop3_flows: AtomicU64,
}

/// Point-in-time copy of [`Pop3Stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pop3StatsSnapshot {
    pub pop3_clients: u64,
    pub pop3s_clients: u64,
    pub pop3_flows: u64,
}

impl Pop3Stats {
    pub fn snapshot(&self) -> Pop3StatsSnapshot {
        Pop3StatsSnapshot {
            pop3_clients: self.pop3_clients.load(Ordering::Relaxed),
            pop3s_clients: self.pop3s_clients.load(Ordering::Relaxed),
            pop3_flows: self.pop3_flows.load(Ordering::Relaxed),
        }
    }
}

/// Fetch the shared flow state, creating it on first sight of the flow.
fn take_state(session: &mut Session) -> Pop3FlowState {
    session.take_flow_state::<Pop3FlowState>().unwrap_or_default()
}

/// Client-direction POP3 detector.
pub struct Pop3ClientDetector {
    matcher: CommandMatcher,
    stats: Pop3Stats,
}

impl Pop3ClientDetector {
    pub fn new() -> Self {
        Self {
            matcher: CommandMatcher::new(),
            stats: Pop3Stats::default(),
        }
    }

    pub fn stats(&self) -> &Pop3Stats {
        &self.stats
    }

    fn run(&self, state: &mut Pop3FlowState, args: &mut ValidateArgs<'_>) -> DetectorStatus {
        if !state.flags_set {
            state.flags_set = true;
            state.need_continue = true;
            args.session
                .set_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);
        }

        if args.direction == Direction::ToClient {
            trace!(flow = %args.tuple, "pop3 client detector observing server bytes");
            if server::feed(state, args.session, args.payload, false, &self.stats).is_err() {
                args.session
                    .clear_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);
            }
            return DetectorStatus::InProcess;
        }

        client::feed(&self.matcher, state, args.session, args.payload, &self.stats)
    }
}

impl Default for Pop3ClientDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowDetector for Pop3ClientDetector {
    fn name(&self) -> &'static str {
        "pop3"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Client
    }

    fn validate(&self, args: &mut ValidateArgs<'_>) -> DetectorStatus {
        if args.payload.is_empty() {
            return DetectorStatus::InProcess;
        }

        let mut state = take_state(args.session);
        let status = self.run(&mut state, args);
        args.session.store_flow_state(state);
        status
    }
}

/// Service-direction POP3 detector. Owns the default port and the final
/// service verdict.
pub struct Pop3ServiceDetector {
    stats: Pop3Stats,
}

impl Pop3ServiceDetector {
    pub fn new() -> Self {
        Self {
            stats: Pop3Stats::default(),
        }
    }

    pub fn stats(&self) -> &Pop3Stats {
        &self.stats
    }

    fn run(&self, state: &mut Pop3FlowState, args: &mut ValidateArgs<'_>) -> DetectorStatus {
        let session = &mut *args.session;

        // The server side is answering, so the client detector no longer
        // needs its packets.
        session.clear_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);

        if state.need_continue {
            session.set_flag(SessionFlags::CONTINUE);
        } else {
            session.clear_flag(SessionFlags::CONTINUE);
            if session.has_flag(SessionFlags::SERVICE_DETECTED) {
                self.stats.pop3_flows.fetch_add(1, Ordering::Relaxed);
                return DetectorStatus::Success;
            }
        }

        match server::feed(state, session, args.payload, true, &self.stats) {
            Ok(()) => {
                if state.responses >= RESPONSE_THRESHOLD
                    && !session.has_flag(SessionFlags::SERVICE_DETECTED)
                {
                    let app = if state.client == ClientPhase::StlsPending {
                        AppId::Pop3s
                    } else {
                        AppId::Pop3
                    };
                    let version = if state.version.is_empty() {
                        None
                    } else {
                        Some(state.version.clone())
                    };
                    let subtypes = std::mem::take(&mut state.subtypes);
                    session.add_service_consume_subtype(
                        &args.tuple,
                        args.direction,
                        app,
                        state.vendor,
                        version,
                        subtypes,
                    );
                    self.stats.pop3_flows.fetch_add(1, Ordering::Relaxed);
                    return DetectorStatus::Success;
                }
                session.service_inprocess(&args.tuple, args.direction);
                DetectorStatus::InProcess
            }
            Err(err) => {
                if !session.has_flag(SessionFlags::SERVICE_DETECTED) {
                    debug!(flow = %args.tuple, %err, "pop3 service parse failed");
                    session.fail_service(&args.tuple, args.direction);
                    return DetectorStatus::NoMatch;
                }
                session.clear_flag(SessionFlags::CONTINUE);
                self.stats.pop3_flows.fetch_add(1, Ordering::Relaxed);
                DetectorStatus::Success
            }
        }
    }
}

impl Default for Pop3ServiceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowDetector for Pop3ServiceDetector {
    fn name(&self) -> &'static str {
        "pop3"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Service
    }

    fn validate(&self, args: &mut ValidateArgs<'_>) -> DetectorStatus {
        if args.payload.is_empty() || args.direction != Direction::ToClient {
            args.session.service_inprocess(&args.tuple, args.direction);
            return DetectorStatus::InProcess;
        }

        let mut state = take_state(args.session);
        let status = self.run(&mut state, args);
        args.session.store_flow_state(state);
        status
    }
}

/// Registration for the client-direction detector.
pub fn client_registration() -> DetectorRegistration {
    DetectorRegistration {
        name: "pop3",
        kind: DetectorKind::Client,
        tcp_ports: &[],
        apps: POP3_APPS,
        create: || Box::new(Pop3ClientDetector::new()),
    }
}

/// Registration for the service-direction detector, owning the default
/// service port.
pub fn service_registration() -> DetectorRegistration {
    DetectorRegistration {
        name: "pop3",
        kind: DetectorKind::Service,
        tcp_ports: &[POP3_PORT],
        apps: POP3_APPS,
        create: || Box::new(Pop3ServiceDetector::new()),
    }
}
