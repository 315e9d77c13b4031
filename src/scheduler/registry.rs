//! Node identity and the validation rules `RegisterNode` enforces.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A node known to the cluster: its address and its live/capacity counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub name: String,
    pub ipv4: String,
    pub scheme: String,
    pub port: u16,
    #[serde(default)]
    pub connections: u32,
    pub max_connections: u32,
}

impl NodeRecord {
    /// Validates identity, address, and capacity fields.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(format!(
                "node name '{}' must be alphanumeric",
                self.name
            )));
        }
        if self.ipv4.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(Error::Validation(format!(
                "'{}' is not a valid IPv4 address",
                self.ipv4
            )));
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(Error::Validation(format!(
                "scheme must be 'http' or 'https', got '{}'",
                self.scheme
            )));
        }
        if self.port == 0 {
            return Err(Error::Validation("port must be > 0".into()));
        }
        if self.max_connections == 0 {
            return Err(Error::Validation("maxConnections must be > 0".into()));
        }
        Ok(())
    }

    /// Whether this node has spare capacity to take on one more connection.
    pub fn has_capacity(&self) -> bool {
        self.connections < self.max_connections
    }

    /// The base URL this node can be reached at, e.g. for peer redirects.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.ipv4, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeRecord {
        NodeRecord {
            name: name.to_owned(),
            ipv4: "127.0.0.1".to_owned(),
            scheme: "http".to_owned(),
            port: 8000,
            connections: 0,
            max_connections: 10,
        }
    }

    #[test]
    fn rejects_non_alphanumeric_name() {
        assert!(node("node-1").validate().is_err());
    }

    #[test]
    fn rejects_bad_ipv4() {
        let mut n = node("node1");
        n.ipv4 = "not-an-ip".to_owned();
        assert!(n.validate().is_err());
    }

    #[test]
    fn rejects_bad_scheme() {
        let mut n = node("node1");
        n.scheme = "ftp".to_owned();
        assert!(n.validate().is_err());
    }

    #[test]
    fn rejects_zero_port_or_capacity() {
        let mut n = node("node1");
        n.port = 0;
        assert!(n.validate().is_err());

        let mut n = node("node1");
        n.max_connections = 0;
        assert!(n.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_node() {
        assert!(node("node1").validate().is_ok());
    }
}
