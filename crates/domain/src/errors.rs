use thiserror::Error;

/// Errors surfaced by the proxy core.
///
/// The dispatcher recovers `UpstreamUnreachable`, `UpstreamProtocolError`
/// and `Timeout` by falling through to the next candidate upstream; the
/// remaining variants abort the request.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream protocol error (status {status}): {body}")]
    UpstreamProtocolError { status: u16, body: String },

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Query timeout")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Upstream {0} loops back to this process")]
    LoopDetected(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl ProxyError {
    /// True for failures the dispatcher may recover from by advancing to
    /// the next upstream in the candidate list.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamUnreachable(_)
                | ProxyError::UpstreamProtocolError { .. }
                | ProxyError::Timeout
        )
    }
}
