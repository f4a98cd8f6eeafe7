//! The registration extension and its state machine.
//!
//! [`Registration`] hooks into a [`waddle_xmpp::Connection`]. It claims the
//! first stream features of a registering connection, fetches the form,
//! submits it on request and reports each outcome once through the
//! connection's status callback.

use std::any::Any;
use std::time::Duration;

use minidom::Element;
use tracing::{debug, info, warn};
use waddle_xmpp::status::NO_AUTH_MECH;
use waddle_xmpp::{
    AuthenticateHook, ConnectionExtension, ExtensionAction, FeaturesHook, Negotiation, Status,
    stanza,
};

use crate::error::RegistrationError;
use crate::form::NS_REGISTER;
use crate::outcome::classify;
use crate::parser::parse_form;
use crate::session::{Fields, RegistrationSession};
use crate::status::RegistrationStatus;
use crate::submission::build_submission;

/// How long a submission may go unanswered.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the current registration attempt stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    /// Connected, waiting for the stream features.
    Connecting,
    AwaitingForm,
    /// The form arrived and can be filled in and submitted.
    FormReady,
    AwaitingResult,
    Registered,
    /// The attempt failed with `status`; conflicts and rejections may be
    /// retried with new field values.
    Failed {
        status: Status,
        condition: Option<String>,
    },
    TimedOut,
}

/// XEP-0077 In-Band Registration, run as an extension of the connection.
pub struct Registration {
    submit_timeout: Duration,
    state: RegistrationState,
    session: Option<RegistrationSession>,
    registering: bool,
    awaiting_form: bool,
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration {
    pub fn new() -> Self {
        Self::with_submit_timeout(DEFAULT_SUBMIT_TIMEOUT)
    }

    pub fn with_submit_timeout(submit_timeout: Duration) -> Self {
        Self {
            submit_timeout,
            state: RegistrationState::Idle,
            session: None,
            registering: false,
            awaiting_form: false,
        }
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    pub fn session(&self) -> Option<&RegistrationSession> {
        self.session.as_ref()
    }

    /// Field values to fill in once the form has arrived.
    pub fn fields_mut(&mut self) -> Option<&mut Fields> {
        self.session.as_mut().map(|session| &mut session.fields)
    }

    pub fn submit_timeout(&self) -> Duration {
        self.submit_timeout
    }

    /// Start a fresh attempt against `domain`. The next stream features the
    /// connection receives belong to this attempt.
    pub fn begin(&mut self, domain: &str) {
        self.session = Some(RegistrationSession::new(domain));
        self.registering = true;
        self.awaiting_form = false;
        self.state = RegistrationState::Connecting;
        debug!(%domain, "registration attempt started");
    }

    /// Send the filled-in form.
    ///
    /// Does nothing until a form has arrived, while a submission is in
    /// flight, or once the account exists.
    pub fn submit(&mut self) -> Vec<ExtensionAction> {
        let Some(session) = self.session.as_mut() else {
            warn!("submit called without a registration attempt");
            return Vec::new();
        };
        if !session.form_received {
            warn!(domain = %session.domain, "submit called before the form arrived");
            return Vec::new();
        }
        if let Some(pending) = &session.pending {
            warn!(%pending, "submit called while a submission is pending");
            return Vec::new();
        }
        if session.registered {
            warn!(domain = %session.domain, "account already registered");
            return Vec::new();
        }

        let id = stanza::unique_id("register");
        let submission = build_submission(session, &id);
        session.pending = Some(id.clone());
        self.state = RegistrationState::AwaitingResult;
        debug!(%id, legacy = session.is_legacy(), "submitting registration");

        vec![
            ExtensionAction::ArmDeadline {
                id,
                after: self.submit_timeout,
            },
            ExtensionAction::Send(submission),
        ]
    }

    fn register_cb(&mut self, negotiation: &Negotiation) -> Vec<ExtensionAction> {
        if !negotiation.advertises("register") && !negotiation.advertises("mechanism") {
            let error = RegistrationError::NoUsableFeature;
            warn!(%error, "cannot register");
            self.state = RegistrationState::Failed {
                status: error.status(),
                condition: Some(NO_AUTH_MECH.to_string()),
            };
            return vec![ExtensionAction::NoAuthReceived];
        }

        self.awaiting_form = true;
        self.state = RegistrationState::AwaitingForm;
        let query = Element::builder("query", NS_REGISTER).build();
        vec![ExtensionAction::Send(stanza::iq(
            "get",
            &stanza::unique_id("register-form"),
            query,
        ))]
    }

    fn form_received(&mut self, stanza: &Element) -> Vec<ExtensionAction> {
        self.awaiting_form = false;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        match parse_form(stanza) {
            Ok(parsed) => {
                session.instructions = parsed.instructions;
                session.title = parsed.title;
                session.fields = parsed.fields;
                session.form = parsed.form;
                session.form_received = true;
                self.state = RegistrationState::FormReady;
                info!(
                    fields = ?session.fields.keys().collect::<Vec<_>>(),
                    legacy = session.is_legacy(),
                    "registration form received"
                );
                vec![status_action(RegistrationStatus::Register.status(), None)]
            }
            Err(error) => self.fail(error),
        }
    }

    fn result_received(&mut self, stanza: Option<&Element>) -> Vec<ExtensionAction> {
        match classify(stanza) {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.registered = true;
                }
                self.state = RegistrationState::Registered;
                info!("account registered");
                vec![status_action(RegistrationStatus::Registered.status(), None)]
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(&mut self, error: RegistrationError) -> Vec<ExtensionAction> {
        warn!(%error, "registration failed");
        let status = error.status();
        let condition = error.condition().map(str::to_string);
        self.state = match error {
            RegistrationError::Timeout => RegistrationState::TimedOut,
            _ => RegistrationState::Failed {
                status,
                condition: condition.clone(),
            },
        };
        vec![status_action(status, condition)]
    }
}

fn status_action(status: Status, condition: Option<String>) -> ExtensionAction {
    ExtensionAction::Status { status, condition }
}

impl ConnectionExtension for Registration {
    fn name(&self) -> &'static str {
        "register"
    }

    fn on_features_negotiated(&mut self, negotiation: &Negotiation) -> FeaturesHook {
        if !self.registering {
            return FeaturesHook::Continue;
        }
        self.registering = false;

        let mut stashed = negotiation.clone();
        stashed.surfaced = true;
        if let Some(session) = self.session.as_mut() {
            session.stashed = Some(stashed);
        }
        FeaturesHook::Intercepted(self.register_cb(negotiation))
    }

    fn on_authenticate(&mut self, selected: bool) -> AuthenticateHook {
        self.splice(selected)
    }

    fn on_reset(&mut self) {
        self.session = None;
        self.registering = false;
        self.awaiting_form = false;
        self.state = RegistrationState::Idle;
    }

    fn on_stanza(&mut self, stanza: &Element) -> Option<Vec<ExtensionAction>> {
        if !stanza::is_iq(stanza) {
            return None;
        }
        if self.awaiting_form {
            return Some(self.form_received(stanza));
        }

        let session = self.session.as_mut()?;
        let id = stanza.attr("id")?;
        if session.pending.as_deref() != Some(id) {
            return None;
        }
        session.pending = None;

        let mut actions = vec![ExtensionAction::CancelDeadline { id: id.to_string() }];
        actions.extend(self.result_received(Some(stanza)));
        Some(actions)
    }

    fn on_deadline(&mut self, id: &str) -> Vec<ExtensionAction> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.pending.as_deref() != Some(id) {
            return Vec::new();
        }
        session.pending = None;
        self.result_received(None)
    }

    fn features(&self) -> &'static [&'static str] {
        &[NS_REGISTER]
    }

    fn namespaces(&self) -> &'static [(&'static str, &'static str)] {
        &[("REGISTER", NS_REGISTER)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn element(xml: &str) -> Element {
        Element::from_str(xml).expect("test stanza should parse")
    }

    fn features(xml: &str) -> Negotiation {
        Negotiation::from_element(element(xml))
    }

    fn register_features() -> Negotiation {
        features(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
             <register xmlns='http://jabber.org/features/iq-register'/>\
             </stream:features>",
        )
    }

    const EXTENDED_FORM: &str = "<iq xmlns='jabber:client' type='result' id='any'>\
        <query xmlns='jabber:iq:register'><x xmlns='jabber:x:data' type='form'>\
        <field type='hidden' var='FORM_TYPE'><value>jabber:iq:register</value></field>\
        <field type='text-single' label='Username' var='username'/>\
        <field type='text-private' label='Password' var='password'/>\
        </x></query></iq>";

    fn statuses(actions: &[ExtensionAction]) -> Vec<(u16, Option<String>)> {
        actions
            .iter()
            .filter_map(|action| match action {
                ExtensionAction::Status { status, condition } => {
                    Some((status.code(), condition.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn ready_registration() -> Registration {
        let mut registration = Registration::new();
        registration.begin("example.org");
        let hook = registration.on_features_negotiated(&register_features());
        assert!(matches!(hook, FeaturesHook::Intercepted(_)));
        let actions = registration
            .on_stanza(&element(EXTENDED_FORM))
            .expect("form iq is consumed");
        assert_eq!(
            statuses(&actions),
            vec![(RegistrationStatus::Register.code(), None)]
        );
        registration
    }

    fn pending_id(actions: &[ExtensionAction]) -> String {
        actions
            .iter()
            .find_map(|action| match action {
                ExtensionAction::ArmDeadline { id, .. } => Some(id.clone()),
                _ => None,
            })
            .expect("submit arms a deadline")
    }

    #[test]
    fn intercepts_features_only_while_registering() {
        let mut registration = Registration::new();
        assert_eq!(
            registration.on_features_negotiated(&register_features()),
            FeaturesHook::Continue
        );

        registration.begin("example.org");
        let FeaturesHook::Intercepted(actions) =
            registration.on_features_negotiated(&register_features())
        else {
            panic!("registering connection must intercept features");
        };
        let [ExtensionAction::Send(request)] = actions.as_slice() else {
            panic!("expected a single form request, got {actions:?}");
        };
        assert_eq!(request.attr("type"), Some("get"));
        assert!(request.get_child("query", NS_REGISTER).is_some());
        assert_eq!(registration.state(), &RegistrationState::AwaitingForm);

        let stashed = registration
            .session()
            .and_then(|session| session.stashed.as_ref())
            .expect("negotiation stashed");
        assert!(stashed.surfaced);

        assert_eq!(
            registration.on_features_negotiated(&register_features()),
            FeaturesHook::Continue
        );
    }

    #[test]
    fn features_without_register_or_mechanisms_give_up() {
        let mut registration = Registration::new();
        registration.begin("example.org");
        let hook = registration.on_features_negotiated(&features(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'/>",
        ));
        assert_eq!(
            hook,
            FeaturesHook::Intercepted(vec![ExtensionAction::NoAuthReceived])
        );
        assert_eq!(
            registration.state(),
            &RegistrationState::Failed {
                status: Status::ConnFail,
                condition: Some(NO_AUTH_MECH.to_string()),
            }
        );
    }

    #[test]
    fn form_handler_fires_once() {
        let mut registration = ready_registration();
        assert_eq!(registration.state(), &RegistrationState::FormReady);
        assert!(registration.on_stanza(&element(EXTENDED_FORM)).is_none());
        assert_eq!(
            registration
                .session()
                .map(|session| session.fields.keys().collect::<Vec<_>>()),
            Some(vec!["username", "password"])
        );
    }

    #[test]
    fn wrong_form_type_reports_regifail_without_condition() {
        let mut registration = Registration::new();
        registration.begin("example.org");
        registration.on_features_negotiated(&register_features());
        let actions = registration
            .on_stanza(&element(&EXTENDED_FORM.replace(
                "<value>jabber:iq:register</value>",
                "<value>wrong:ns</value>",
            )))
            .expect("consumed");

        assert_eq!(
            statuses(&actions),
            vec![(RegistrationStatus::RegiFail.code(), None)]
        );
        assert!(registration
            .session()
            .is_some_and(|session| session.fields.is_empty()));
        assert!(registration.submit().is_empty());
    }

    #[test]
    fn submit_arms_deadline_then_sends() {
        let mut registration = ready_registration();
        if let Some(fields) = registration.fields_mut() {
            fields.insert("username", "alice");
            fields.insert("password", "secret");
        }

        let actions = registration.submit();
        assert_eq!(actions.len(), 2);
        let ExtensionAction::ArmDeadline { id, after } = &actions[0] else {
            panic!("deadline first, got {actions:?}");
        };
        assert!(id.ends_with(":register"));
        assert_eq!(*after, DEFAULT_SUBMIT_TIMEOUT);
        let ExtensionAction::Send(submission) = &actions[1] else {
            panic!("submission second, got {actions:?}");
        };
        assert_eq!(submission.attr("id"), Some(id.as_str()));
        assert_eq!(registration.state(), &RegistrationState::AwaitingResult);

        assert!(registration.submit().is_empty(), "one submission at a time");
    }

    #[test]
    fn submit_before_form_is_a_no_op() {
        let mut registration = Registration::new();
        assert!(registration.submit().is_empty());
        registration.begin("example.org");
        assert!(registration.submit().is_empty());
        assert_eq!(registration.state(), &RegistrationState::Connecting);
    }

    #[test]
    fn result_cancels_deadline_and_registers() {
        let mut registration = ready_registration();
        let id = pending_id(&registration.submit());

        let unrelated = element("<iq xmlns='jabber:client' type='result' id='other'/>");
        assert!(registration.on_stanza(&unrelated).is_none());

        let actions = registration
            .on_stanza(&element(&format!(
                "<iq xmlns='jabber:client' type='result' id='{id}'/>"
            )))
            .expect("result consumed");
        assert_eq!(actions[0], ExtensionAction::CancelDeadline { id: id.clone() });
        assert_eq!(
            statuses(&actions),
            vec![(RegistrationStatus::Registered.code(), None)]
        );
        assert_eq!(registration.state(), &RegistrationState::Registered);
        assert!(registration.session().is_some_and(|session| session.registered));

        assert!(registration.on_deadline(&id).is_empty());
        assert!(registration.submit().is_empty());
    }

    #[test]
    fn deadline_reports_timeout_once() {
        let mut registration = ready_registration();
        let id = pending_id(&registration.submit());

        let actions = registration.on_deadline(&id);
        assert_eq!(
            statuses(&actions),
            vec![(
                RegistrationStatus::RegisterTimeout.code(),
                Some("timeout".to_string())
            )]
        );
        assert_eq!(registration.state(), &RegistrationState::TimedOut);

        let late = element(&format!(
            "<iq xmlns='jabber:client' type='result' id='{id}'/>"
        ));
        assert!(registration.on_stanza(&late).is_none());
        assert!(registration.on_deadline(&id).is_empty());
    }

    #[test]
    fn conflict_allows_another_submission() {
        let mut registration = ready_registration();
        let id = pending_id(&registration.submit());

        let actions = registration
            .on_stanza(&element(&format!(
                "<iq xmlns='jabber:client' type='error' id='{id}'>\
                 <error type='cancel'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>"
            )))
            .expect("consumed");
        assert_eq!(
            statuses(&actions),
            vec![(
                RegistrationStatus::Conflict.code(),
                Some("conflict".to_string())
            )]
        );

        let retry = registration.submit();
        assert_ne!(pending_id(&retry), id);
    }

    #[test]
    fn reset_clears_the_attempt() {
        let mut registration = ready_registration();
        registration.submit();
        registration.on_reset();

        assert_eq!(registration.state(), &RegistrationState::Idle);
        assert!(registration.session().is_none());
        assert_eq!(
            registration.on_features_negotiated(&register_features()),
            FeaturesHook::Continue
        );
    }

    #[test]
    fn declares_register_namespace_and_feature() {
        let registration = Registration::new();
        assert_eq!(registration.features(), &[NS_REGISTER]);
        assert_eq!(registration.namespaces(), &[("REGISTER", NS_REGISTER)]);
    }
}
