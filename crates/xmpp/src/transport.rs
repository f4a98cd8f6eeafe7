use std::future::Future;

use crate::error::ConnectionError;

/// Per-connection transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server domain the stream is opened to.
    pub domain: String,
    /// Transport endpoint, e.g. a BOSH URL.
    pub service: String,
    pub wait: u64,
    pub hold: u32,
    pub route: Option<String>,
    /// HTTP headers attached to every request.
    pub headers: Vec<(String, String)>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

impl ConnectionConfig {
    pub const DEFAULT_WAIT: u64 = 60;
    pub const DEFAULT_HOLD: u32 = 1;

    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            wait: Self::DEFAULT_WAIT,
            hold: Self::DEFAULT_HOLD,
            route: None,
            headers: Vec::new(),
            max_retries: 5,
            timeout_seconds: 30,
        }
    }
}

/// Stream transport used by [`crate::Connection`].
///
/// Frames are single top-level XML elements. `connect` must leave the first
/// `<stream:features/>` frame readable through `recv`, and so must `restart`.
pub trait XmppTransport: Send + 'static {
    fn connect(
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self, ConnectionError>> + Send
    where
        Self: Sized;

    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Next inbound frame. Must be cancel-safe: the connection races it
    /// against deadlines, and a dropped call may not lose data.
    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, ConnectionError>> + Send;

    /// Restart the stream after SASL success.
    fn restart(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
