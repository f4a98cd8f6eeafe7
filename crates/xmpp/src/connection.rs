use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jid::Jid;
use minidom::Element;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use waddle_core::event::{Channel, Event, EventBus, EventPayload, EventSource, channels};
use xmpp_parsers::bind::BindQuery;
use xmpp_parsers::iq::Iq;

use crate::error::ConnectionError;
use crate::extension::{
    AuthenticateHook, ConnectionExtension, Credentials, ExtensionAction, FeaturesHook, Negotiation,
};
use crate::ns::{self, Namespaces};
use crate::sasl::{SaslExchange, SaslStep, select_mechanism};
use crate::stanza;
use crate::status::{NO_AUTH_MECH, Status};
use crate::transport::{ConnectionConfig, XmppTransport};

pub type StatusCallback = Box<dyn FnMut(Status, Option<&str>) + Send>;

/// Optional per-connect overrides of the BOSH session parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub wait: Option<u64>,
    pub hold: Option<u32>,
    pub route: Option<String>,
}

struct Deadline {
    id: String,
    at: Instant,
}

enum FeaturesDecision {
    Intercepted(Vec<ExtensionAction>),
    Proceed(Vec<String>),
}

enum Inbound {
    Frame(Vec<u8>),
    Deadline(String),
}

/// A client connection with extension hooks.
///
/// The connection owns the transport and drives SASL and resource binding.
/// Extensions observe feature negotiation, authentication and inbound
/// stanzas, and answer with [`ExtensionAction`]s.
pub struct Connection<T>
where
    T: XmppTransport,
{
    settings: ConnectionConfig,
    transport: Option<T>,
    callback: Option<StatusCallback>,
    credentials: Option<Credentials>,
    bound_jid: Option<String>,
    negotiation: Option<Negotiation>,
    extensions: Vec<Box<dyn ConnectionExtension>>,
    namespaces: Namespaces,
    deadlines: Vec<Deadline>,
    status: Option<Status>,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl<T> Connection<T>
where
    T: XmppTransport,
{
    /// `settings.domain` is replaced on every `connect`.
    pub fn new(settings: ConnectionConfig) -> Self {
        Self {
            settings,
            transport: None,
            callback: None,
            credentials: None,
            bound_jid: None,
            negotiation: None,
            extensions: Vec::new(),
            namespaces: Namespaces::new(),
            deadlines: Vec::new(),
            status: None,
            event_bus: None,
        }
    }

    pub fn with_event_bus(settings: ConnectionConfig, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            event_bus: Some(event_bus),
            ..Self::new(settings)
        }
    }

    pub fn add_extension(&mut self, extension: Box<dyn ConnectionExtension>) {
        for (name, uri) in extension.namespaces() {
            if !self.namespaces.add(name, uri) {
                warn!(extension = extension.name(), namespace = name, "namespace already declared");
            }
        }
        debug!(extension = extension.name(), "extension attached");
        self.extensions.push(extension);
    }

    pub fn extension<E>(&self) -> Option<&E>
    where
        E: ConnectionExtension,
    {
        self.extensions
            .iter()
            .find_map(|extension| extension.as_any().downcast_ref::<E>())
    }

    pub fn extension_mut<E>(&mut self) -> Option<&mut E>
    where
        E: ConnectionExtension,
    {
        self.extensions
            .iter_mut()
            .find_map(|extension| extension.as_any_mut().downcast_mut::<E>())
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Service discovery features advertised by the attached extensions.
    pub fn disco_features(&self) -> Vec<&'static str> {
        let mut features: Vec<&'static str> = self
            .extensions
            .iter()
            .flat_map(|extension| extension.features().iter().copied())
            .collect();
        features.sort_unstable();
        features.dedup();
        features
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// The JID bound by the server once CONNECTED.
    pub fn bound_jid(&self) -> Option<&str> {
        self.bound_jid.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn pending_deadlines(&self) -> usize {
        self.deadlines.len()
    }

    /// Open a stream to the domain of `jid`.
    ///
    /// With a password and a JID that has a local part the connection logs in
    /// once features arrive. An empty password connects anonymously, which
    /// leaves the features to whichever extension claims them.
    pub async fn connect(
        &mut self,
        jid: &str,
        password: Option<&str>,
        callback: StatusCallback,
        options: ConnectOptions,
    ) -> Result<(), ConnectionError> {
        let parsed = Jid::new(jid.trim()).map_err(|error| {
            ConnectionError::StreamError(format!("invalid JID {jid:?}: {error}"))
        })?;
        let domain = parsed.domain().as_str().to_string();

        self.callback = Some(callback);
        self.credentials = match (parsed.node(), password) {
            (Some(node), Some(password)) if !password.is_empty() => Some(Credentials {
                jid: parsed.to_string(),
                authzid: parsed.to_bare().to_string(),
                authcid: node.as_str().to_string(),
                password: password.to_string(),
            }),
            _ => None,
        };

        let mut config = self.settings.clone();
        config.domain = domain.clone();
        if let Some(wait) = options.wait {
            config.wait = wait;
        }
        if let Some(hold) = options.hold {
            config.hold = hold;
        }
        if options.route.is_some() {
            config.route = options.route;
        }

        self.change_status(Status::Connecting, None);
        info!(%domain, service = %config.service, "connecting");

        let transport = match T::connect(&config).await {
            Ok(transport) => transport,
            Err(error) => {
                let reason = error.to_string();
                self.change_status(Status::ConnFail, Some(&reason));
                self.emit_connection_lost(reason, false);
                self.emit_connection_error(&error);
                return Err(error);
            }
        };
        self.transport = Some(transport);

        let negotiation = self.read_features().await?;
        self.handle_features(negotiation).await
    }

    /// Log in.
    ///
    /// With `None` the attached extensions decide first; an extension may
    /// install credentials and replay a negotiation it stashed earlier.
    /// An explicit mechanism list goes straight to SASL.
    pub async fn authenticate(
        &mut self,
        selection: Option<Vec<String>>,
    ) -> Result<(), ConnectionError> {
        let selected = selection.is_some();
        let mut decision = AuthenticateHook::Continue;
        for extension in &mut self.extensions {
            decision = extension.on_authenticate(selected);
            if !matches!(decision, AuthenticateHook::Continue) {
                debug!(extension = extension.name(), "authentication taken over");
                break;
            }
        }

        match decision {
            AuthenticateHook::Continue => {
                let mechanisms = selection
                    .or_else(|| self.negotiation.as_ref().map(Negotiation::mechanisms))
                    .unwrap_or_default();
                self.login(mechanisms).await
            }
            AuthenticateHook::Handled(actions) => self.apply_actions(actions).await,
            AuthenticateHook::Resume {
                credentials,
                negotiation,
            } => {
                debug!(jid = %credentials.jid, "resuming negotiation with new credentials");
                self.credentials = Some(credentials);
                self.handle_features(negotiation).await
            }
        }
    }

    /// Handle one inbound stanza or one expired deadline, whichever comes
    /// first.
    pub async fn process_next(&mut self) -> Result<(), ConnectionError> {
        let next_deadline = self
            .deadlines
            .iter()
            .min_by_key(|deadline| deadline.at)
            .map(|deadline| (deadline.id.clone(), deadline.at));

        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        let inbound = match next_deadline {
            Some((id, at)) => tokio::select! {
                frame = transport.recv() => Inbound::Frame(frame?),
                _ = tokio::time::sleep_until(at) => Inbound::Deadline(id),
            },
            None => Inbound::Frame(transport.recv().await?),
        };

        match inbound {
            Inbound::Frame(bytes) => {
                let element = stanza::parse_frame(&bytes)?;
                self.surface_inbound(&String::from_utf8_lossy(&bytes));
                self.dispatch_stanza(element).await
            }
            Inbound::Deadline(id) => self.fire_deadline(&id).await,
        }
    }

    pub async fn send(&mut self, element: Element) -> Result<(), ConnectionError> {
        let payload = stanza::serialize_element(&element)?;
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        transport.send(&payload).await?;

        let raw = String::from_utf8_lossy(&payload).into_owned();
        debug!(target: "waddle_xmpp::wire", direction = "out", stanza = %raw);
        self.emit_event(
            channels::STANZA_SENT,
            EventPayload::RawStanzaSent { stanza: raw },
        );
        Ok(())
    }

    /// Drop the transport, pending deadlines and credentials, and let every
    /// extension clear its own state.
    pub fn reset(&mut self) {
        self.transport = None;
        self.deadlines.clear();
        self.credentials = None;
        self.bound_jid = None;
        self.negotiation = None;
        self.status = None;
        for extension in &mut self.extensions {
            extension.on_reset();
        }
        debug!("connection reset");
    }

    pub async fn disconnect(&mut self, reason: Option<&str>) -> Result<(), ConnectionError> {
        self.deadlines.clear();
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };

        self.change_status(Status::Disconnecting, reason);
        let result = transport.close().await;
        if let Err(error) = &result {
            warn!(%error, "transport close failed");
            self.emit_connection_error(error);
        }

        self.bound_jid = None;
        self.change_status(Status::Disconnected, None);
        self.emit_connection_lost(
            reason.unwrap_or("user requested disconnect").to_string(),
            false,
        );
        result
    }

    async fn handle_features(&mut self, negotiation: Negotiation) -> Result<(), ConnectionError> {
        match self.dispatch_features(negotiation) {
            FeaturesDecision::Intercepted(actions) => self.apply_actions(actions).await,
            FeaturesDecision::Proceed(mechanisms) => self.login(mechanisms).await,
        }
    }

    fn dispatch_features(&mut self, negotiation: Negotiation) -> FeaturesDecision {
        if !negotiation.surfaced {
            self.surface_inbound(&negotiation.raw);
        }

        for extension in &mut self.extensions {
            if let FeaturesHook::Intercepted(actions) =
                extension.on_features_negotiated(&negotiation)
            {
                debug!(extension = extension.name(), "stream features intercepted");
                return FeaturesDecision::Intercepted(actions);
            }
        }

        let mechanisms = negotiation.mechanisms();
        self.negotiation = Some(negotiation);
        FeaturesDecision::Proceed(mechanisms)
    }

    async fn login(&mut self, mechanisms: Vec<String>) -> Result<(), ConnectionError> {
        let offered: HashSet<String> = mechanisms.into_iter().collect();
        let Some(selected) = select_mechanism(&offered) else {
            debug!(offered = ?offered, "no usable SASL mechanism");
            return self.no_auth_received().await;
        };

        let Some(credentials) = self.credentials.clone() else {
            warn!("no credentials installed, cannot authenticate");
            self.change_status(Status::AuthFail, Some("missing-credentials"));
            return Ok(());
        };

        self.change_status(Status::Authenticating, None);
        let (mut exchange, auth) =
            SaslExchange::start(selected, &credentials.authcid, &credentials.password)?;
        self.send(auth).await?;

        loop {
            let frame = self.recv_element().await?;
            let step = match exchange.step(&frame) {
                Ok(step) => step,
                Err(error) => {
                    self.change_status(Status::AuthFail, Some(&error.to_string()));
                    return Err(error);
                }
            };
            match step {
                SaslStep::Respond(response) => self.send(response).await?,
                SaslStep::Succeeded => break,
                SaslStep::Failed(condition) => {
                    self.change_status(Status::AuthFail, Some(&condition));
                    return Ok(());
                }
                SaslStep::Ignored => self.dispatch_stanza(frame).await?,
            }
        }

        self.restart_and_bind(&credentials).await
    }

    async fn restart_and_bind(&mut self, credentials: &Credentials) -> Result<(), ConnectionError> {
        self.transport
            .as_mut()
            .ok_or_else(not_connected)?
            .restart()
            .await?;

        let negotiation = self.read_features().await?;
        self.surface_inbound(&negotiation.raw);

        let mut jid = credentials.jid.clone();
        if negotiation.can_bind() {
            let id = stanza::unique_id("bind");
            let resource = Jid::new(&credentials.jid)
                .ok()
                .and_then(|parsed| parsed.resource().map(|resource| resource.as_str().to_string()));
            self.send(Iq::from_set(id.clone(), BindQuery::new(resource)).into())
                .await?;

            loop {
                let frame = self.recv_element().await?;
                if !stanza::is_iq(&frame) || frame.attr("id") != Some(id.as_str()) {
                    self.dispatch_stanza(frame).await?;
                    continue;
                }

                if frame.attr("type") != Some("result") {
                    self.change_status(Status::ConnFail, Some("bind-failed"));
                    return Err(ConnectionError::StreamError(
                        "invalid response to resource binding".to_string(),
                    ));
                }
                if let Some(bound) = frame
                    .get_child("bind", ns::BIND)
                    .and_then(|bind| bind.get_child("jid", ns::BIND))
                {
                    jid = bound.text();
                }
                break;
            }
        }

        info!(%jid, "connected");
        self.bound_jid = Some(jid.clone());
        self.change_status(Status::Connected, None);
        self.emit_connection_established(jid);
        Ok(())
    }

    async fn no_auth_received(&mut self) -> Result<(), ConnectionError> {
        warn!("server offered no usable authentication");
        self.change_status(Status::ConnFail, Some(NO_AUTH_MECH));
        self.disconnect(Some(NO_AUTH_MECH)).await
    }

    async fn read_features(&mut self) -> Result<Negotiation, ConnectionError> {
        loop {
            let transport = self.transport.as_mut().ok_or_else(not_connected)?;
            let bytes = transport.recv().await?;
            let element = stanza::parse_frame(&bytes)?;
            let raw = String::from_utf8_lossy(&bytes).into_owned();
            if stanza::is_stream_features(&element) {
                return Ok(Negotiation::new(raw, element));
            }
            self.surface_inbound(&raw);
            debug!(name = element.name(), "skipping frame while waiting for stream features");
        }
    }

    async fn recv_element(&mut self) -> Result<Element, ConnectionError> {
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        let bytes = transport.recv().await?;
        let element = stanza::parse_frame(&bytes)?;
        self.surface_inbound(&String::from_utf8_lossy(&bytes));
        Ok(element)
    }

    async fn dispatch_stanza(&mut self, element: Element) -> Result<(), ConnectionError> {
        let mut consumed = None;
        for extension in &mut self.extensions {
            if let Some(actions) = extension.on_stanza(&element) {
                consumed = Some(actions);
                break;
            }
        }

        match consumed {
            Some(actions) => self.apply_actions(actions).await,
            None => {
                debug!(name = element.name(), id = ?element.attr("id"), "unhandled stanza");
                Ok(())
            }
        }
    }

    async fn fire_deadline(&mut self, id: &str) -> Result<(), ConnectionError> {
        self.deadlines.retain(|deadline| deadline.id != id);
        debug!(%id, "deadline expired");

        let mut actions = Vec::new();
        for extension in &mut self.extensions {
            actions.extend(extension.on_deadline(id));
        }
        self.apply_actions(actions).await
    }

    /// Carry out actions an extension produced outside a hook, e.g. from a
    /// caller request.
    pub async fn apply(&mut self, actions: Vec<ExtensionAction>) -> Result<(), ConnectionError> {
        self.apply_actions(actions).await
    }

    async fn apply_actions(&mut self, actions: Vec<ExtensionAction>) -> Result<(), ConnectionError> {
        for action in actions {
            match action {
                ExtensionAction::Send(element) => self.send(element).await?,
                ExtensionAction::Status { status, condition } => {
                    self.change_status(status, condition.as_deref());
                }
                ExtensionAction::ArmDeadline { id, after } => self.arm_deadline(id, after),
                ExtensionAction::CancelDeadline { id } => {
                    self.deadlines.retain(|deadline| deadline.id != id);
                }
                ExtensionAction::NoAuthReceived => self.no_auth_received().await?,
            }
        }
        Ok(())
    }

    fn arm_deadline(&mut self, id: String, after: Duration) {
        self.deadlines.retain(|deadline| deadline.id != id);
        self.deadlines.push(Deadline {
            id,
            at: Instant::now() + after,
        });
    }

    fn change_status(&mut self, status: Status, condition: Option<&str>) {
        info!(status = %status, condition = ?condition, "connection status changed");
        self.status = Some(status);
        if let Some(callback) = self.callback.as_mut() {
            callback(status, condition);
        }
        self.emit_event(
            channels::CONNECTION_STATUS,
            EventPayload::ConnectionStatusChanged {
                code: status.code(),
                status: status.name().to_string(),
                condition: condition.map(str::to_string),
            },
        );
    }

    fn surface_inbound(&self, raw: &str) {
        debug!(target: "waddle_xmpp::wire", direction = "in", stanza = %raw);
        self.emit_event(
            channels::STANZA_RECEIVED,
            EventPayload::RawStanzaReceived {
                stanza: raw.to_string(),
            },
        );
    }

    fn emit_connection_established(&self, jid: String) {
        self.emit_event(
            channels::CONNECTION_ESTABLISHED,
            EventPayload::ConnectionEstablished { jid },
        );
    }

    fn emit_connection_lost(&self, reason: String, will_retry: bool) {
        self.emit_event(
            channels::CONNECTION_LOST,
            EventPayload::ConnectionLost { reason, will_retry },
        );
    }

    fn emit_connection_error(&self, error: &ConnectionError) {
        self.emit_event(
            channels::ERROR_OCCURRED,
            EventPayload::ErrorOccurred {
                component: "connection".to_string(),
                message: error.to_string(),
                recoverable: error.is_retryable(),
            },
        );
    }

    fn emit_event(&self, channel_name: &str, payload: EventPayload) {
        let Some(event_bus) = &self.event_bus else {
            return;
        };

        let Ok(channel) = Channel::new(channel_name) else {
            return;
        };

        let event = Event::new(channel, EventSource::Xmpp, payload);
        let _ = event_bus.publish(event);
    }
}

fn not_connected() -> ConnectionError {
    ConnectionError::TransportError("cannot exchange data while disconnected".to_string())
}
