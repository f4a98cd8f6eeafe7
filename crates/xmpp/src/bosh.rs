//! XMPP over BOSH (XEP-0124 / XEP-0206).
//!
//! Requests are issued one at a time. A request that stalls, fails to
//! connect or comes back with a 5xx status is posted again with the same
//! `rid`. Every request carries the configured custom headers.
//!
//! The empty long-poll behind `recv` runs as its own task. Dropping a
//! `recv` future leaves that poll in flight, and the next `recv` picks up
//! its response.

use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;

use minidom::Element;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::ns;
use crate::stanza;
use crate::transport::{ConnectionConfig, XmppTransport};

const BOSH_VERSION: &str = "1.6";
const PRIMARY_TIMEOUT_FACTOR: f64 = 1.1;

type PendingPoll = JoinHandle<Result<Element, ConnectionError>>;

/// What a request needs once it leaves the transport: enough to post and
/// re-post one body without borrowing the session.
#[derive(Clone)]
struct Poster {
    client: reqwest::Client,
    service: String,
    headers: HeaderMap,
    wait: u64,
    max_retries: u32,
}

pub struct BoshTransport {
    poster: Poster,
    config: ConnectionConfig,
    sid: String,
    rid: u64,
    inbound: VecDeque<Vec<u8>>,
    poll: Option<PendingPoll>,
    terminated: bool,
}

impl BoshTransport {
    /// Seconds before an outstanding request counts as stalled.
    pub fn primary_timeout(wait: u64) -> Duration {
        Duration::from_secs((PRIMARY_TIMEOUT_FACTOR * wait as f64).floor() as u64)
    }

    /// Delay before re-posting a request that has already been sent
    /// `sends` times. The first retry goes out immediately.
    pub fn backoff(wait: u64, sends: u32) -> Option<Duration> {
        if sends <= 1 {
            return None;
        }
        let cap = Self::primary_timeout(wait).as_secs();
        let cubed = u64::from(sends).saturating_pow(3);
        Some(Duration::from_secs(cap.min(cubed)))
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    fn next_rid(&mut self) -> u64 {
        self.rid += 1;
        self.rid
    }

    fn session_request(&mut self) -> String {
        let rid = self.next_rid();
        let mut body = format!(
            "<body content='text/xml; charset=utf-8' hold='{hold}' rid='{rid}' to='{to}' ver='{ver}' wait='{wait}' xml:lang='en' xmpp:version='1.0' xmlns='{httpbind}' xmlns:xmpp='{bosh}'",
            hold = self.config.hold,
            to = escape_attr(&self.config.domain),
            ver = BOSH_VERSION,
            wait = self.config.wait,
            httpbind = ns::HTTPBIND,
            bosh = ns::BOSH,
        );
        if let Some(route) = &self.config.route {
            body.push_str(&format!(" route='{}'", escape_attr(route)));
        }
        body.push_str("/>");
        body
    }

    fn wrap(&mut self, payload: &str) -> String {
        let rid = self.next_rid();
        format!(
            "<body rid='{rid}' sid='{sid}' xmlns='{httpbind}'>{payload}</body>",
            sid = escape_attr(&self.sid),
            httpbind = ns::HTTPBIND,
        )
    }

    fn restart_request(&mut self) -> String {
        let rid = self.next_rid();
        format!(
            "<body rid='{rid}' sid='{sid}' to='{to}' xml:lang='en' xmpp:restart='true' xmlns='{httpbind}' xmlns:xmpp='{bosh}'/>",
            sid = escape_attr(&self.sid),
            to = escape_attr(&self.config.domain),
            httpbind = ns::HTTPBIND,
            bosh = ns::BOSH,
        )
    }

    fn terminate_request(&mut self) -> String {
        let rid = self.next_rid();
        format!(
            "<body rid='{rid}' sid='{sid}' type='terminate' xmlns='{httpbind}'><presence type='unavailable' xmlns='{client}'/></body>",
            sid = escape_attr(&self.sid),
            httpbind = ns::HTTPBIND,
            client = ns::CLIENT,
        )
    }

    /// Post one body, retrying stalled requests, and queue the children of
    /// the response.
    async fn exchange(&mut self, body: String) -> Result<Element, ConnectionError> {
        if self.terminated {
            return Err(ConnectionError::TransportError(
                "BOSH session has been terminated".to_string(),
            ));
        }

        let response = self.poster.post(body).await?;
        self.absorb(response)
    }

    /// Queue the children of a response body, or end the session when the
    /// server terminated it.
    fn absorb(&mut self, response: Element) -> Result<Element, ConnectionError> {
        if response.attr("type") == Some("terminate") {
            self.terminated = true;
            let condition = response.attr("condition").unwrap_or("unknown");
            return Err(ConnectionError::StreamError(format!(
                "BOSH session terminated: {condition}"
            )));
        }

        for child in response.children() {
            self.inbound.push_back(stanza::serialize_element(child)?);
        }
        Ok(response)
    }

    fn start_poll(&mut self) {
        let body = self.wrap("");
        let poster = self.poster.clone();
        debug!(rid = self.rid, "starting BOSH long-poll");
        self.poll = Some(tokio::spawn(async move { poster.post(body).await }));
    }

    fn abort_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
    }
}

impl Poster {
    fn new(client: reqwest::Client, config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        Ok(Self {
            client,
            service: config.service.clone(),
            headers: header_map(&config.headers)?,
            wait: config.wait,
            max_retries: config.max_retries,
        })
    }

    async fn post(&self, body: String) -> Result<Element, ConnectionError> {
        let mut sends: u32 = 0;

        loop {
            if let Some(delay) = BoshTransport::backoff(self.wait, sends) {
                debug!(sends, delay_secs = delay.as_secs(), "backing off before BOSH retry");
                tokio::time::sleep(delay).await;
            }
            sends += 1;

            let result = self
                .client
                .post(&self.service)
                .headers(self.headers.clone())
                .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                .timeout(BoshTransport::primary_timeout(self.wait))
                .body(body.clone())
                .send()
                .await;

            let failure = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        format!("HTTP {}", status.as_u16())
                    } else if !status.is_success() {
                        return Err(ConnectionError::TransportError(format!(
                            "BOSH request rejected with HTTP {}",
                            status.as_u16()
                        )));
                    } else {
                        let text = response.text().await.map_err(|error| {
                            ConnectionError::TransportError(format!(
                                "failed to read BOSH response: {error}"
                            ))
                        })?;
                        return parse_body(&text);
                    }
                }
                Err(error) if error.is_timeout() || error.is_connect() => error.to_string(),
                Err(error) => {
                    return Err(ConnectionError::TransportError(format!(
                        "BOSH request failed: {error}"
                    )));
                }
            };

            if sends > self.max_retries {
                warn!(sends, reason = %failure, "giving up on stalled BOSH request");
                return Err(ConnectionError::Timeout);
            }
            warn!(sends, reason = %failure, "BOSH request stalled, retrying");
        }
    }
}

impl XmppTransport for BoshTransport {
    async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|error| {
                ConnectionError::TransportError(format!("failed to build HTTP client: {error}"))
            })?;

        let mut transport = Self {
            poster: Poster::new(client, config)?,
            config: config.clone(),
            sid: String::new(),
            rid: initial_rid(),
            inbound: VecDeque::new(),
            poll: None,
            terminated: false,
        };

        let request = transport.session_request();
        let response = transport.exchange(request).await?;
        transport.sid = response
            .attr("sid")
            .ok_or_else(|| {
                ConnectionError::StreamError("BOSH session response carries no sid".to_string())
            })?
            .to_string();

        debug!(sid = %transport.sid, service = %transport.config.service, "BOSH session created");
        Ok(transport)
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let payload = std::str::from_utf8(data).map_err(|error| {
            ConnectionError::TransportError(format!("outbound stanza is not UTF-8: {error}"))
        })?;
        let body = self.wrap(payload);
        self.exchange(body).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        loop {
            if let Some(frame) = self.inbound.pop_front() {
                return Ok(frame);
            }
            if self.terminated {
                return Err(ConnectionError::TransportError(
                    "BOSH session has been terminated".to_string(),
                ));
            }
            if self.poll.is_none() {
                self.start_poll();
            }
            let Some(poll) = self.poll.as_mut() else {
                continue;
            };

            // Awaiting through `&mut` keeps the handle in place if this
            // future is dropped.
            let outcome = poll.await;
            self.poll = None;
            let response = outcome.map_err(|error| {
                ConnectionError::TransportError(format!("BOSH long-poll task failed: {error}"))
            })??;
            self.absorb(response)?;
        }
    }

    async fn restart(&mut self) -> Result<(), ConnectionError> {
        let body = self.restart_request();
        self.exchange(body).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.terminated || self.sid.is_empty() {
            return Ok(());
        }
        self.abort_poll();
        let body = self.terminate_request();
        let result = self.poster.post(body).await.map(|_| ());
        self.terminated = true;
        self.inbound.clear();
        result
    }
}

impl Drop for BoshTransport {
    fn drop(&mut self) {
        self.abort_poll();
    }
}

fn initial_rid() -> u64 {
    // Leave plenty of room below 2^53 for the session's increments.
    (Uuid::new_v4().as_u128() & 0xFFFF_FFFF) as u64 + 1
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, ConnectionError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name).map_err(|error| {
            ConnectionError::TransportError(format!("invalid header name {name:?}: {error}"))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|error| {
            ConnectionError::TransportError(format!("invalid value for header {name:?}: {error}"))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn parse_body(text: &str) -> Result<Element, ConnectionError> {
    let body = Element::from_str(text.trim()).map_err(|error| {
        ConnectionError::StreamError(format!("invalid BOSH response body: {error}"))
    })?;
    if !body.is("body", ns::HTTPBIND) {
        return Err(ConnectionError::StreamError(format!(
            "expected <body/> wrapper, got <{}/>",
            body.name()
        )));
    }
    Ok(body)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}
