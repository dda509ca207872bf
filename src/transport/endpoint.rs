// src/transport/endpoint.rs
use crate::error::QueueError;

/// A parsed transport address.
///
/// Two schemes are supported: `tcp://host:port` for cross-process channels and
/// `inproc://name` when broker and workers share a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://` address, stored as the `host:port` part.
    Tcp(String),
    /// `inproc://` address, stored as the endpoint name.
    Inproc(String),
}

impl Endpoint {
    pub fn parse(address: &str) -> Result<Self, QueueError> {
        if let Some(rest) = address.strip_prefix("tcp://") {
            if rest.is_empty() {
                return Err(QueueError::connection(address, "missing host:port"));
            }
            Ok(Endpoint::Tcp(rest.to_string()))
        } else if let Some(rest) = address.strip_prefix("inproc://") {
            if rest.is_empty() {
                return Err(QueueError::connection(address, "missing endpoint name"));
            }
            Ok(Endpoint::Inproc(rest.to_string()))
        } else {
            Err(QueueError::connection(address, "unsupported address scheme"))
        }
    }

    /// True for `tcp://` addresses on port 0, which the OS resolves to a fresh
    /// ephemeral port at bind time.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Endpoint::Tcp(addr) if addr.ends_with(":0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_addresses() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:5000").unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:5000".into()));
        assert!(!endpoint.is_ephemeral());
    }

    #[test]
    fn parses_inproc_addresses() {
        let endpoint = Endpoint::parse("inproc://recipe-info").unwrap();
        assert_eq!(endpoint, Endpoint::Inproc("recipe-info".into()));
    }

    #[test]
    fn port_zero_is_ephemeral() {
        assert!(Endpoint::parse("tcp://127.0.0.1:0").unwrap().is_ephemeral());
    }

    #[test]
    fn rejects_unknown_schemes() {
        for address in ["ipc:///tmp/queue", "127.0.0.1:5000", "tcp://", "inproc://"] {
            let err = Endpoint::parse(address).unwrap_err();
            assert!(matches!(err, QueueError::Connection { .. }), "{address}");
        }
    }
}
