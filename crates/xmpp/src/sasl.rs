use std::collections::HashSet;
use std::str::FromStr;

use minidom::Element;
use sasl::client::Mechanism;
use sasl::client::mechanisms::{Plain, Scram};
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};
use tracing::{debug, warn};
use xmpp_parsers::sasl::{Auth, Challenge, Mechanism as SaslMechanism, Response, Success};

use crate::error::ConnectionError;
use crate::ns;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedMechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl SelectedMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedMechanism::ScramSha256 => "SCRAM-SHA-256",
            SelectedMechanism::ScramSha1 => "SCRAM-SHA-1",
            SelectedMechanism::Plain => "PLAIN",
        }
    }
}

impl std::fmt::Display for SelectedMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const MECHANISM_PREFERENCE: &[SelectedMechanism] = &[
    SelectedMechanism::ScramSha256,
    SelectedMechanism::ScramSha1,
    SelectedMechanism::Plain,
];

pub fn select_mechanism(server_mechanisms: &HashSet<String>) -> Option<SelectedMechanism> {
    MECHANISM_PREFERENCE
        .iter()
        .find(|m| server_mechanisms.contains(m.name()))
        .copied()
}

fn build_mechanism(
    selected: SelectedMechanism,
    credentials: &Credentials,
) -> Result<Box<dyn Mechanism + Send>, ConnectionError> {
    match selected {
        SelectedMechanism::ScramSha256 => Scram::<Sha256>::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "failed to initialize SCRAM-SHA-256: {e:?}"
                ))
            }),
        SelectedMechanism::ScramSha1 => Scram::<Sha1>::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "failed to initialize SCRAM-SHA-1: {e:?}"
                ))
            }),
        SelectedMechanism::Plain => Plain::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!("failed to initialize PLAIN: {e:?}"))
            }),
    }
}

/// What the connection should do with a frame received mid-exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum SaslStep {
    Respond(Element),
    Succeeded,
    /// Server sent `<failure/>`; carries the defined condition.
    Failed(String),
    /// Not a SASL frame.
    Ignored,
}

/// One SASL exchange, driven frame by frame by the connection.
pub struct SaslExchange {
    selected: SelectedMechanism,
    mechanism: Box<dyn Mechanism + Send>,
}

impl SaslExchange {
    /// Prepare the mechanism and build the initial `<auth/>`.
    pub fn start(
        selected: SelectedMechanism,
        username: &str,
        password: &str,
    ) -> Result<(Self, Element), ConnectionError> {
        let credentials = Credentials::default()
            .with_username(username)
            .with_password(password)
            .with_channel_binding(ChannelBinding::Unsupported);

        let mut mechanism = build_mechanism(selected, &credentials)?;
        let initial_data = mechanism.initial();

        let mechanism_name = SaslMechanism::from_str(mechanism.name()).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("invalid SASL mechanism name: {e}"))
        })?;

        debug!(mechanism = %selected, "starting SASL exchange");

        let auth: Element = Auth {
            mechanism: mechanism_name,
            data: initial_data,
        }
        .into();

        Ok((
            Self {
                selected,
                mechanism,
            },
            auth,
        ))
    }

    pub fn selected(&self) -> SelectedMechanism {
        self.selected
    }

    pub fn step(&mut self, frame: &Element) -> Result<SaslStep, ConnectionError> {
        if frame.ns() != ns::SASL {
            return Ok(SaslStep::Ignored);
        }

        match frame.name() {
            "challenge" => {
                let challenge = Challenge::try_from(frame.clone()).map_err(|e| {
                    ConnectionError::StreamError(format!("invalid SASL challenge: {e}"))
                })?;
                let data = self.mechanism.response(&challenge.data).map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "SASL challenge-response failed: {e:?}"
                    ))
                })?;
                Ok(SaslStep::Respond(Response { data }.into()))
            }
            "success" => {
                let success = Success::try_from(frame.clone()).map_err(|e| {
                    ConnectionError::StreamError(format!("invalid SASL success: {e}"))
                })?;
                if let Err(e) = self.mechanism.success(&success.data) {
                    warn!(error = ?e, "server signature verification failed");
                    return Err(ConnectionError::AuthenticationFailed(format!(
                        "server signature verification failed: {e:?}"
                    )));
                }
                debug!(mechanism = %self.selected, "SASL authentication succeeded");
                Ok(SaslStep::Succeeded)
            }
            "failure" => {
                let condition = failure_condition(frame);
                debug!(%condition, "SASL authentication failed");
                Ok(SaslStep::Failed(condition))
            }
            _ => Ok(SaslStep::Ignored),
        }
    }
}

/// The defined condition of a `<failure/>`, e.g. `not-authorized`.
pub fn failure_condition(failure: &Element) -> String {
    failure
        .children()
        .find(|child| child.name() != "text")
        .map(|child| child.name().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
