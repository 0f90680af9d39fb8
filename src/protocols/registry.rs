//! Detector registry
//!
//! Manages registration of flow detectors and provides lookup by name and
//! by default service port.

use std::collections::HashMap;

use crate::core::AppId;

use super::traits::{DetectorKind, FlowDetector};

/// The application also carries service-side additional information.
pub const APPINFO_SERVICE_ADDITIONAL: u8 = 0x01;
/// The application can report an authenticated client user.
pub const APPINFO_CLIENT_USER: u8 = 0x02;

/// An application id a detector advertises, with its app-info flags.
#[derive(Clone, Copy, Debug)]
pub struct AppEntry {
    pub app: AppId,
    pub flags: u8,
}

/// Detector registration entry
pub struct DetectorRegistration {
    /// Protocol identifier (e.g. "pop3")
    pub name: &'static str,

    pub kind: DetectorKind,

    /// Default TCP service ports (empty for client-side detectors)
    pub tcp_ports: &'static [u16],

    /// Applications this detector can report
    pub apps: &'static [AppEntry],

    /// Factory for a detector instance
    pub create: fn() -> Box<dyn FlowDetector>,
}

impl DetectorRegistration {
    pub fn new_detector(&self) -> Box<dyn FlowDetector> {
        (self.create)()
    }
}

/// Registry of flow detectors, indexed by name and default TCP port.
pub struct DetectorRegistry {
    detectors: Vec<DetectorRegistration>,
    tcp_ports: HashMap<u16, Vec<usize>>,
    by_name: HashMap<(&'static str, DetectorKind), usize>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            tcp_ports: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn register(&mut self, registration: DetectorRegistration) {
        let idx = self.detectors.len();

        self.by_name
            .insert((registration.name, registration.kind), idx);

        for &port in registration.tcp_ports {
            self.tcp_ports.entry(port).or_default().push(idx);
        }

        self.detectors.push(registration);
    }

    /// Detectors registered for a TCP service port.
    pub fn for_tcp_port(&self, port: u16) -> impl Iterator<Item = &DetectorRegistration> {
        self.tcp_ports
            .get(&port)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&idx| &self.detectors[idx])
    }

    pub fn get(&self, name: &str, kind: DetectorKind) -> Option<&DetectorRegistration> {
        self.by_name
            .get(&(name, kind))
            .map(|&idx| &self.detectors[idx])
    }

    pub fn all(&self) -> impl Iterator<Item = &DetectorRegistration> {
        self.detectors.iter()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
