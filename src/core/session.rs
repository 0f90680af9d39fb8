//! Shared per-flow session object
//!
//! One `Session` exists per tracked flow. Detectors borrow it for the
//! duration of a single validate call: they read and write session flags,
//! keep their own per-flow state in the session's typed storage, and report
//! identification results through it. The surrounding framework guarantees
//! a flow is touched by one worker at a time, so the session carries no
//! internal synchronization.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

use tracing::trace;

use super::packet::{Direction, FlowTuple};

/// Application identities this crate can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppId {
    Pop3,
    Pop3s,
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppId::Pop3 => write!(f, "pop3"),
            AppId::Pop3s => write!(f, "pop3s"),
        }
    }
}

/// Session flag bits gating further discovery on a flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionFlags(u32);

impl SessionFlags {
    /// Server payloads should also be routed to the client detector.
    pub const CLIENT_GETS_SERVER_PACKETS: SessionFlags = SessionFlags(0x0001);
    /// Client-side identification concluded.
    pub const CLIENT_DETECTED: SessionFlags = SessionFlags(0x0002);
    /// Service-side identification concluded.
    pub const SERVICE_DETECTED: SessionFlags = SessionFlags(0x0004);
    /// The flow wants further service-side packets.
    pub const CONTINUE: SessionFlags = SessionFlags(0x0008);
    /// The flow switched to TLS mid-session.
    pub const ENCRYPTED: SessionFlags = SessionFlags(0x0010);

    pub fn contains(self, other: SessionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SessionFlags {
    type Output = SessionFlags;

    fn bitor(self, rhs: SessionFlags) -> SessionFlags {
        SessionFlags(self.0 | rhs.0)
    }
}

/// An auxiliary `{service, version}` identifier extracted from a server
/// greeting, e.g. an add-on module advertised by the server banner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceSubtype {
    pub service: String,
    pub version: Option<String>,
}

/// A client application reported for the flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppAnnouncement {
    pub client: AppId,
    pub payload: AppId,
    pub version: Option<String>,
}

/// An authenticated (or failed) login reported for the flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserAnnouncement {
    pub username: String,
    pub app: AppId,
    pub success: bool,
}

/// The service identification reported for the flow. Vendor identifiers
/// are borrowed from a fixed set of known tokens; version and subtype
/// strings are owned by the announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAnnouncement {
    pub app: AppId,
    pub vendor: Option<&'static str>,
    pub version: Option<String>,
    pub subtypes: Vec<ServiceSubtype>,
}

/// Per-flow session: flags, detector storage, and report sinks.
///
/// Detector state lives in a `TypeId`-keyed storage owned by the session;
/// it is released together with the session when the flow is torn down.
#[derive(Default)]
pub struct Session {
    flags: SessionFlags,
    per_flow: HashMap<TypeId, Box<dyn Any + Send>>,
    client_apps: Vec<AppAnnouncement>,
    users: Vec<UserAnnouncement>,
    service: Option<ServiceAnnouncement>,
    service_failed: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn set_flag(&mut self, flag: SessionFlags) {
        self.flags = self.flags | flag;
    }

    pub fn clear_flag(&mut self, flag: SessionFlags) {
        self.flags = SessionFlags(self.flags.0 & !flag.0);
    }

    pub fn has_flag(&self, flag: SessionFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    // ------------------------------------------------------------------
    // Per-flow detector storage
    // ------------------------------------------------------------------

    /// Move a detector's flow state out of the session for the duration of
    /// one validate call. Pair with [`Session::store_flow_state`].
    pub fn take_flow_state<T: Any + Send>(&mut self) -> Option<T> {
        self.per_flow
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Hand a detector's flow state to the session, replacing any previous
    /// state of the same type. The session owns it until flow teardown.
    pub fn store_flow_state<T: Any + Send>(&mut self, state: T) {
        self.per_flow.insert(TypeId::of::<T>(), Box::new(state));
    }

    /// Borrow a detector's flow state without moving it.
    pub fn flow_state<T: Any + Send>(&self) -> Option<&T> {
        self.per_flow
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    // ------------------------------------------------------------------
    // Report sinks
    // ------------------------------------------------------------------

    /// Report the client application. Identical repeat announcements are
    /// collapsed. Also concludes client-side identification.
    pub fn add_app(&mut self, client: AppId, payload: AppId, version: Option<String>) {
        self.set_flag(SessionFlags::CLIENT_DETECTED);
        let announcement = AppAnnouncement {
            client,
            payload,
            version,
        };
        if !self.client_apps.contains(&announcement) {
            self.client_apps.push(announcement);
        }
    }

    /// Report a login attempt observed on the flow.
    pub fn add_user(&mut self, username: String, app: AppId, success: bool) {
        self.users.push(UserAnnouncement {
            username,
            app,
            success,
        });
    }

    /// Report the identified service, taking ownership of the subtype list.
    /// Concludes service-side identification.
    pub fn add_service_consume_subtype(
        &mut self, tuple: &FlowTuple, direction: Direction, app: AppId,
        vendor: Option<&'static str>, version: Option<String>, subtypes: Vec<ServiceSubtype>,
    ) {
        trace!(flow = %tuple, %direction, %app, "service identified");
        self.set_flag(SessionFlags::SERVICE_DETECTED);
        self.service = Some(ServiceAnnouncement {
            app,
            vendor,
            version,
            subtypes,
        });
    }

    /// Record that service identification failed for this flow. Discovery
    /// is over either way.
    pub fn fail_service(&mut self, tuple: &FlowTuple, direction: Direction) {
        trace!(flow = %tuple, %direction, "service identification failed");
        self.set_flag(SessionFlags::SERVICE_DETECTED);
        self.service_failed = true;
    }

    /// Note that service identification is still in progress.
    pub fn service_inprocess(&self, tuple: &FlowTuple, direction: Direction) {
        trace!(flow = %tuple, %direction, "service identification in progress");
    }

    // ------------------------------------------------------------------
    // Report access
    // ------------------------------------------------------------------

    pub fn client_apps(&self) -> &[AppAnnouncement] {
        &self.client_apps
    }

    pub fn users(&self) -> &[UserAnnouncement] {
        &self.users
    }

    pub fn service(&self) -> Option<&ServiceAnnouncement> {
        self.service.as_ref()
    }

    pub fn service_failed(&self) -> bool {
        self.service_failed
    }
}
