//! In-process event bus.
//!
//! Channel names are lowercase, dot-separated, and start with a [`Domain`].
//! Every domain has its own broadcast queue. Subscribers filter with a glob
//! pattern over the full channel name.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EventBusError;

/// Channels published by the connection.
pub mod channels {
    pub const CONNECTION_STATUS: &str = "system.connection.status";
    pub const CONNECTION_ESTABLISHED: &str = "system.connection.established";
    pub const CONNECTION_LOST: &str = "system.connection.lost";
    pub const ERROR_OCCURRED: &str = "system.error.occurred";
    pub const STANZA_RECEIVED: &str = "xmpp.debug.stanza.received";
    pub const STANZA_SENT: &str = "xmpp.debug.stanza.sent";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    System,
    Xmpp,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::System, Domain::Xmpp];

    pub fn parse(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == segment)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Domain::System => "system",
            Domain::Xmpp => "xmpp",
        }
    }

    const fn slot(self) -> usize {
        match self {
            Domain::System => 0,
            Domain::Xmpp => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel {
    name: String,
    domain: Domain,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Result<Self, EventBusError> {
        let name = name.into();
        let well_formed = name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        });
        let domain = name.split('.').next().and_then(Domain::parse);

        match domain {
            Some(domain) if well_formed => Ok(Self { name, domain }),
            _ => Err(EventBusError::InvalidChannel(name)),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl TryFrom<String> for Channel {
    type Error = EventBusError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.name
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Envelope carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
    /// Links events that belong to one exchange, e.g. a stanza and its reply.
    pub correlation_id: Option<Uuid>,
    pub source: EventSource,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            correlation_id: None,
            source,
            payload,
        }
    }

    pub fn correlated(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    System(String),
    Xmpp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    ConnectionEstablished {
        jid: String,
    },
    ConnectionLost {
        reason: String,
        will_retry: bool,
    },
    /// Every status reported to the connection's status callback, including
    /// extension codes.
    ConnectionStatusChanged {
        code: u16,
        status: String,
        condition: Option<String>,
    },
    ErrorOccurred {
        component: String,
        message: String,
        recoverable: bool,
    },
    RawStanzaReceived {
        stanza: String,
    },
    RawStanzaSent {
        stanza: String,
    },
}

pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> Result<(), EventBusError>;
    fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError>;
}

/// [`EventBus`] over one `tokio::sync::broadcast` queue per domain.
#[derive(Clone)]
pub struct BroadcastEventBus {
    senders: [broadcast::Sender<Event>; 2],
}

impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        Self {
            senders: Domain::ALL.map(|_| broadcast::channel(capacity).0),
        }
    }

    /// Receivers for every domain `pattern` can match.
    fn receivers(&self, pattern: &str) -> Result<Receivers, EventBusError> {
        let invalid = || EventBusError::InvalidPattern(pattern.to_string());
        let first = pattern.split('.').next().unwrap_or_default();
        if first.is_empty() {
            return Err(invalid());
        }

        let wanted: Vec<Domain> = if first.contains(GLOB_META) {
            Domain::ALL.to_vec()
        } else {
            vec![Domain::parse(first).ok_or_else(invalid)?]
        };

        Ok(Domain::ALL.map(|domain| {
            wanted
                .contains(&domain)
                .then(|| self.senders[domain.slot()].subscribe())
        }))
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> Result<(), EventBusError> {
        // No subscribers is not an error.
        let _ = self.senders[event.channel.domain().slot()].send(event);
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|_| EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();
        Ok(EventSubscription {
            matcher,
            receivers: self.receivers(pattern)?,
        })
    }
}

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '!'];

type Receivers = [Option<broadcast::Receiver<Event>>; 2];

pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: Receivers,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        loop {
            let [system, xmpp] = &mut self.receivers;
            let received = tokio::select! {
                result = next_from(system.as_mut()) => result,
                result = next_from(xmpp.as_mut()) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(EventBusError::Lagged(count));
                }
            }
        }
    }

    /// Next buffered matching event, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Event>, EventBusError> {
        for receiver in self.receivers.iter_mut().flatten() {
            loop {
                match receiver.try_recv() {
                    Ok(event) if self.matcher.is_match(event.channel.as_str()) => {
                        return Ok(Some(event));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::TryRecvError::Empty)
                    | Err(broadcast::error::TryRecvError::Closed) => break,
                    Err(broadcast::error::TryRecvError::Lagged(count)) => {
                        return Err(EventBusError::Lagged(count));
                    }
                }
            }
        }
        Ok(None)
    }
}

async fn next_from(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
