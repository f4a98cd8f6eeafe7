use std::sync::Arc;
use std::time::Duration;

use jid::Jid;
use tracing::info;
use waddle_core::event::EventBus;
use waddle_xmpp::{
    ConnectOptions, Connection, ConnectionConfig, ConnectionError, StatusCallback, XmppTransport,
};

use crate::machine::{Registration, RegistrationState};
use crate::session::{Fields, RegistrationSession};

/// A connection with in-band registration attached.
pub struct Registrar<T>
where
    T: XmppTransport,
{
    connection: Connection<T>,
}

impl<T> Registrar<T>
where
    T: XmppTransport,
{
    pub fn new(settings: ConnectionConfig) -> Self {
        Self::with_registration(Connection::new(settings), Registration::new())
    }

    pub fn with_submit_timeout(settings: ConnectionConfig, submit_timeout: Duration) -> Self {
        Self::with_registration(
            Connection::new(settings),
            Registration::with_submit_timeout(submit_timeout),
        )
    }

    pub fn with_event_bus(
        settings: ConnectionConfig,
        event_bus: Arc<dyn EventBus>,
        submit_timeout: Duration,
    ) -> Self {
        Self::with_registration(
            Connection::with_event_bus(settings, event_bus),
            Registration::with_submit_timeout(submit_timeout),
        )
    }

    pub fn with_registration(mut connection: Connection<T>, registration: Registration) -> Self {
        connection.add_extension(Box::new(registration));
        Self { connection }
    }

    /// Connect anonymously to `domain` (a bare domain or any JID on it) and
    /// start a new registration attempt, discarding the previous one.
    pub async fn connect(
        &mut self,
        domain: &str,
        callback: StatusCallback,
        options: ConnectOptions,
    ) -> Result<(), ConnectionError> {
        let domain = Jid::new(domain.trim())
            .map(|jid| jid.domain().as_str().to_string())
            .map_err(|error| {
                ConnectionError::StreamError(format!("invalid domain {domain:?}: {error}"))
            })?;

        self.connection.reset();
        if let Some(registration) = self.connection.extension_mut::<Registration>() {
            registration.begin(&domain);
        }
        info!(%domain, "registering");
        self.connection.connect(&domain, None, callback, options).await
    }

    /// Submit the filled-in form. The verdict arrives through the status
    /// callback while [`Registrar::process_next`] runs.
    pub async fn submit(&mut self) -> Result<(), ConnectionError> {
        let actions = self
            .connection
            .extension_mut::<Registration>()
            .map(Registration::submit)
            .unwrap_or_default();
        self.connection.apply(actions).await
    }

    /// Log in with the registered account.
    pub async fn authenticate(&mut self) -> Result<(), ConnectionError> {
        self.connection.authenticate(None).await
    }

    pub async fn process_next(&mut self) -> Result<(), ConnectionError> {
        self.connection.process_next().await
    }

    pub async fn disconnect(&mut self, reason: Option<&str>) -> Result<(), ConnectionError> {
        self.connection.disconnect(reason).await
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.connection.extension::<Registration>()
    }

    pub fn state(&self) -> RegistrationState {
        self.registration()
            .map(|registration| registration.state().clone())
            .unwrap_or(RegistrationState::Idle)
    }

    pub fn session(&self) -> Option<&RegistrationSession> {
        self.registration().and_then(Registration::session)
    }

    pub fn fields_mut(&mut self) -> Option<&mut Fields> {
        self.connection
            .extension_mut::<Registration>()
            .and_then(Registration::fields_mut)
    }

    /// Fill in one field. Returns false before a registration attempt exists.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.fields_mut() {
            Some(fields) => {
                fields.insert(name, value);
                true
            }
            None => false,
        }
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }
}
