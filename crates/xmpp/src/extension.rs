//! Hooks through which extensions take part in a connection's lifecycle.
//!
//! Extensions never touch the transport. Each hook returns the actions the
//! connection should carry out, and the connection applies them in order.

use std::any::Any;
use std::time::Duration;

use minidom::Element;

use crate::ns;
use crate::stanza;
use crate::status::Status;

/// A `<stream:features/>` frame as received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiation {
    /// Raw text of the frame as it arrived.
    pub raw: String,
    pub body: Element,
    /// Set once the frame has been handed to debug sinks, so a resumed
    /// negotiation is not logged twice.
    pub surfaced: bool,
}

impl Negotiation {
    pub fn new(raw: impl Into<String>, body: Element) -> Self {
        Self {
            raw: raw.into(),
            body,
            surfaced: false,
        }
    }

    pub fn from_element(body: Element) -> Self {
        let raw = stanza::to_debug_string(&body);
        Self::new(raw, body)
    }

    /// True if any descendant has the given local name, whatever its namespace.
    pub fn advertises(&self, local_name: &str) -> bool {
        fn walk(element: &Element, local_name: &str) -> bool {
            element
                .children()
                .any(|child| child.name() == local_name || walk(child, local_name))
        }
        walk(&self.body, local_name)
    }

    /// SASL mechanism names in advertised order.
    pub fn mechanisms(&self) -> Vec<String> {
        self.body
            .get_child("mechanisms", ns::SASL)
            .map(|mechanisms| {
                mechanisms
                    .children()
                    .filter(|child| child.is("mechanism", ns::SASL))
                    .map(Element::text)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn can_bind(&self) -> bool {
        self.body.get_child("bind", ns::BIND).is_some()
    }
}

/// Login material installed on the connection before SASL runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub jid: String,
    /// Authorization identity (bare JID).
    pub authzid: String,
    /// Authentication identity (local part).
    pub authcid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionAction {
    Send(Element),
    Status {
        status: Status,
        condition: Option<String>,
    },
    ArmDeadline {
        id: String,
        after: Duration,
    },
    CancelDeadline {
        id: String,
    },
    /// Give up on the negotiation: the server offered nothing usable.
    NoAuthReceived,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeaturesHook {
    Continue,
    Intercepted(Vec<ExtensionAction>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticateHook {
    Continue,
    Handled(Vec<ExtensionAction>),
    /// Install the credentials and run the stashed negotiation again.
    Resume {
        credentials: Credentials,
        negotiation: Negotiation,
    },
}

pub trait ConnectionExtension: Send + 'static {
    fn name(&self) -> &'static str;

    fn on_features_negotiated(&mut self, _negotiation: &Negotiation) -> FeaturesHook {
        FeaturesHook::Continue
    }

    /// `selected` is true when the caller picked mechanisms explicitly.
    fn on_authenticate(&mut self, _selected: bool) -> AuthenticateHook {
        AuthenticateHook::Continue
    }

    fn on_reset(&mut self) {}

    /// Returns `Some` when the stanza was consumed.
    fn on_stanza(&mut self, _stanza: &Element) -> Option<Vec<ExtensionAction>> {
        None
    }

    fn on_deadline(&mut self, _id: &str) -> Vec<ExtensionAction> {
        Vec::new()
    }

    /// Service discovery features this extension adds.
    fn features(&self) -> &'static [&'static str] {
        &[]
    }

    /// Named namespaces to declare on the connection.
    fn namespaces(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn negotiation(xml: &str) -> Negotiation {
        Negotiation::from_element(Element::from_str(xml).expect("features should parse"))
    }

    #[test]
    fn advertises_finds_nested_features() {
        let features = negotiation(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
             <register xmlns='http://jabber.org/features/iq-register'/>\
             </stream:features>",
        );
        assert!(features.advertises("register"));
        assert!(features.advertises("mechanism"));
        assert!(!features.advertises("bind"));
        assert!(!features.surfaced);
    }

    #[test]
    fn mechanisms_keep_server_order() {
        let features = negotiation(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
             <mechanism>SCRAM-SHA-1</mechanism><mechanism>PLAIN</mechanism>\
             </mechanisms></stream:features>",
        );
        assert_eq!(features.mechanisms(), vec!["SCRAM-SHA-1", "PLAIN"]);
    }

    #[test]
    fn empty_features_offer_nothing() {
        let features =
            negotiation("<stream:features xmlns:stream='http://etherx.jabber.org/streams'/>");
        assert!(features.mechanisms().is_empty());
        assert!(!features.advertises("register"));
        assert!(!features.can_bind());
    }
}
