use jid::BareJid;
use tracing::{debug, info, warn};
use waddle_xmpp::{AuthenticateHook, Credentials};

use crate::machine::Registration;

impl Registration {
    /// Turn a plain `authenticate()` into a login with the account that was
    /// just registered.
    pub(crate) fn splice(&mut self, selected: bool) -> AuthenticateHook {
        if selected {
            return AuthenticateHook::Continue;
        }
        let Some(session) = self.session() else {
            return AuthenticateHook::Continue;
        };

        let (Some(username), Some(password)) =
            (session.filled("username"), session.filled("password"))
        else {
            info!("register an account first");
            return AuthenticateHook::Handled(Vec::new());
        };
        if session.domain.is_empty() {
            info!("register an account first");
            return AuthenticateHook::Handled(Vec::new());
        }
        let Some(negotiation) = session.stashed.clone() else {
            info!("register an account first");
            return AuthenticateHook::Handled(Vec::new());
        };

        let bare = match BareJid::new(&format!("{username}@{}", session.domain)) {
            Ok(bare) => bare,
            Err(error) => {
                warn!(%error, %username, domain = %session.domain, "registered credentials do not form a JID");
                return AuthenticateHook::Handled(Vec::new());
            }
        };
        let authcid = bare
            .node()
            .map(|node| node.as_str().to_string())
            .unwrap_or_else(|| username.to_string());

        debug!(jid = %bare, "logging in with registered account");
        AuthenticateHook::Resume {
            credentials: Credentials {
                jid: bare.to_string(),
                authzid: bare.to_string(),
                authcid,
                password: password.to_string(),
            },
            negotiation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::NS_REGISTER;
    use std::str::FromStr;
    use waddle_xmpp::{ConnectionExtension, Element, FeaturesHook, Negotiation};

    fn registration_with_form() -> Registration {
        let mut registration = Registration::new();
        registration.begin("example.org");
        let features = Negotiation::from_element(
            Element::from_str(
                "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
                 <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
                 <register xmlns='http://jabber.org/features/iq-register'/>\
                 </stream:features>",
            )
            .expect("features should parse"),
        );
        assert!(matches!(
            registration.on_features_negotiated(&features),
            FeaturesHook::Intercepted(_)
        ));
        let form = Element::from_str(&format!(
            "<iq xmlns='jabber:client' type='result' id='f'>\
             <query xmlns='{NS_REGISTER}'><username/><password/></query></iq>"
        ))
        .expect("form should parse");
        registration.on_stanza(&form);
        registration
    }

    #[test]
    fn passes_through_without_an_attempt() {
        let mut registration = Registration::new();
        assert_eq!(registration.on_authenticate(false), AuthenticateHook::Continue);
    }

    #[test]
    fn explicit_mechanisms_pass_through() {
        let mut registration = registration_with_form();
        assert_eq!(registration.on_authenticate(true), AuthenticateHook::Continue);
    }

    #[test]
    #[tracing_test::traced_test]
    fn incomplete_credentials_do_nothing() {
        let mut registration = registration_with_form();
        if let Some(fields) = registration.fields_mut() {
            fields.insert("username", "alice");
        }
        assert_eq!(
            registration.on_authenticate(false),
            AuthenticateHook::Handled(Vec::new())
        );
        assert!(logs_contain("register an account first"));
    }

    #[test]
    fn resumes_stashed_negotiation_with_new_credentials() {
        let mut registration = registration_with_form();
        if let Some(fields) = registration.fields_mut() {
            fields.insert("username", "alice");
            fields.insert("password", "secret");
        }

        let AuthenticateHook::Resume {
            credentials,
            negotiation,
        } = registration.on_authenticate(false)
        else {
            panic!("expected the splice to resume authentication");
        };
        assert_eq!(
            credentials,
            Credentials {
                jid: "alice@example.org".to_string(),
                authzid: "alice@example.org".to_string(),
                authcid: "alice".to_string(),
                password: "secret".to_string(),
            }
        );
        assert!(negotiation.surfaced);
        assert_eq!(negotiation.mechanisms(), vec!["PLAIN"]);
    }

    #[test]
    fn rejects_username_that_is_not_a_local_part() {
        let mut registration = registration_with_form();
        if let Some(fields) = registration.fields_mut() {
            fields.insert("username", "alice/phone");
            fields.insert("password", "secret");
        }
        assert_eq!(
            registration.on_authenticate(false),
            AuthenticateHook::Handled(Vec::new())
        );
    }
}
