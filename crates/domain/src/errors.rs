use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("Failed to parse DNS message: {0}")]
    MalformedPacket(String),

    #[error("Failed to serialize DNS message: {0}")]
    SerializeError(String),

    #[error("Message has no question section")]
    NoQuestion,

    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    #[error("Invalid upstream address: {0}")]
    InvalidUpstreamAddress(String),

    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("TIMEOUT")]
    Timeout { server: String },

    #[error("Transport connection refused by {server}: {details}")]
    ConnectionRefused { server: String, details: String },

    #[error("I/O error talking to {server}: {details}")]
    TransportIo { server: String, details: String },

    #[error("Response too large: {0} bytes")]
    ResponseTooLarge(usize),

    #[error("Upstream response id mismatch")]
    IdMismatch,

    #[error("All upstream servers failed: {0}")]
    AllUpstreamsFailed(String),

    #[error("Failed to initialize any upstream")]
    NoUsableUpstreams,

    #[error("Filter init error: {0}")]
    FilterError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Listener error: {0}")]
    ListenerError(String),
}

impl DnsError {
    /// A timed-out exchange already consumed the per-upstream budget, so
    /// callers skip the single retry they would otherwise make.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DnsError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_displays_as_bare_timeout() {
        let err = DnsError::Timeout {
            server: "udp://8.8.8.8:53".to_string(),
        };
        assert_eq!(err.to_string(), "TIMEOUT");
        assert!(err.is_timeout());
    }

    #[test]
    fn other_errors_are_not_timeouts() {
        let err = DnsError::ConnectionRefused {
            server: "udp://8.8.8.8:53".to_string(),
            details: "connection refused".to_string(),
        };
        assert!(!err.is_timeout());
    }
}
