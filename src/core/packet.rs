//! Packet-level vocabulary shared by all detectors.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Direction of data flow relative to the flow initiator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server (initiator)
    ToServer,
    /// Server to client (responder)
    ToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToServer => write!(f, "to_server"),
            Direction::ToClient => write!(f, "to_client"),
        }
    }
}

/// The address pair of the flow a payload belongs to.
///
/// Detectors never key on this; it only gives log lines a flow identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    /// Initiator address
    pub client: SocketAddr,
    /// Responder address
    pub server: SocketAddr,
}

impl FlowTuple {
    pub fn new(client: SocketAddr, server: SocketAddr) -> Self {
        Self { client, server }
    }

    /// Placeholder tuple for callers without address context.
    pub fn unspecified() -> Self {
        let unspec = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            client: unspec,
            server: unspec,
        }
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.client, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_tuple_display() {
        let tuple = FlowTuple::new(
            "10.0.0.1:49152".parse().unwrap(),
            "10.0.0.2:110".parse().unwrap(),
        );
        assert_eq!(tuple.to_string(), "10.0.0.1:49152 -> 10.0.0.2:110");
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::ToServer.to_string(), "to_server");
        assert_eq!(Direction::ToClient.to_string(), "to_client");
    }
}
