//! An in-memory [`XmppTransport`] driven by a script.
//!
//! State lives in a process-wide slot, so tests sharing a binary must hold
//! [`test_lock`] while they use it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, OnceLock};

use tokio::sync::Mutex as AsyncMutex;
use waddle_xmpp::{ConnectionConfig, ConnectionError, XmppTransport, stanza};

/// Frames the fake server sends, and the answers it gives to outbound
/// stanzas.
#[derive(Debug, Clone, Default)]
pub struct Script {
    inbound: VecDeque<String>,
    replies: Vec<(String, String)>,
    after_restart: Vec<String>,
    fail_connect: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame that is readable right after `connect`.
    pub fn inbound(mut self, frame: impl Into<String>) -> Self {
        self.inbound.push_back(frame.into());
        self
    }

    /// When an outbound stanza contains `trigger`, queue `reply` with `{id}`
    /// replaced by the stanza's id. Each rule fires once, in order.
    pub fn reply(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.replies.push((trigger.into(), reply.into()));
        self
    }

    /// Frames readable after a stream restart.
    pub fn after_restart(mut self, frame: impl Into<String>) -> Self {
        self.after_restart.push(frame.into());
        self
    }

    pub fn fail_connect(mut self, reason: impl Into<String>) -> Self {
        self.fail_connect = Some(reason.into());
        self
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    script: Script,
    sent: Vec<String>,
    configs: Vec<ConnectionConfig>,
    restarts: u32,
    close_calls: u32,
}

fn state() -> MutexGuard<'static, ScriptState> {
    static STATE: OnceLock<Mutex<ScriptState>> = OnceLock::new();
    STATE
        .get_or_init(|| Mutex::new(ScriptState::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn test_lock() -> &'static AsyncMutex<()> {
    static LOCK: OnceLock<AsyncMutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| AsyncMutex::new(()))
}

/// Replace the script and forget everything recorded so far.
pub fn install(script: Script) {
    *state() = ScriptState {
        script,
        ..Default::default()
    };
}

/// Deliver a frame later, e.g. after a deadline has passed.
pub fn push_inbound(frame: impl Into<String>) {
    state().script.inbound.push_back(frame.into());
}

pub fn sent() -> Vec<String> {
    state().sent.clone()
}

/// Configurations passed to every `connect`, oldest first.
pub fn connect_configs() -> Vec<ConnectionConfig> {
    state().configs.clone()
}

pub fn restarts() -> u32 {
    state().restarts
}

pub fn close_calls() -> u32 {
    state().close_calls
}

pub fn pending_inbound() -> usize {
    state().script.inbound.len()
}

#[derive(Debug)]
pub struct ScriptedTransport;

impl XmppTransport for ScriptedTransport {
    async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let mut state = state();
        state.configs.push(config.clone());
        match state.script.fail_connect.take() {
            Some(reason) => Err(ConnectionError::TransportError(reason)),
            None => Ok(Self),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let payload = String::from_utf8_lossy(data).into_owned();
        let mut state = state();
        if let Some(index) = state
            .script
            .replies
            .iter()
            .position(|(trigger, _)| payload.contains(trigger.as_str()))
        {
            let (_, reply) = state.script.replies.remove(index);
            let id = stanza::parse_frame(data)
                .ok()
                .and_then(|element| element.attr("id").map(str::to_string))
                .unwrap_or_default();
            state.script.inbound.push_back(reply.replace("{id}", &id));
        }
        state.sent.push(payload);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let next = state().script.inbound.pop_front();
        match next {
            Some(frame) => Ok(frame.into_bytes()),
            None => std::future::pending().await,
        }
    }

    async fn restart(&mut self) -> Result<(), ConnectionError> {
        let mut state = state();
        state.restarts += 1;
        let frames = std::mem::take(&mut state.script.after_restart);
        state.script.inbound.extend(frames);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        state().close_calls += 1;
        Ok(())
    }
}
