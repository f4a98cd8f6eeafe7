//! Namespace table shared by the connection and its extensions.

use std::collections::BTreeMap;

pub const CLIENT: &str = "jabber:client";
pub const STREAM: &str = "http://etherx.jabber.org/streams";
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";
pub const BOSH: &str = "urn:xmpp:xbosh";
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";

/// Named namespaces known to a connection.
///
/// Extensions declare theirs when they are attached, so lookups by name work
/// the same for built-in and extension namespaces.
#[derive(Debug, Clone)]
pub struct Namespaces {
    entries: BTreeMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        let entries = [
            ("CLIENT", CLIENT),
            ("STREAM", STREAM),
            ("SASL", SASL),
            ("BIND", BIND),
            ("SESSION", SESSION),
            ("STANZAS", STANZAS),
            ("HTTPBIND", HTTPBIND),
            ("BOSH", BOSH),
            ("DISCO_INFO", DISCO_INFO),
        ]
        .into_iter()
        .map(|(name, uri)| (name.to_string(), uri.to_string()))
        .collect();

        Self { entries }
    }

    /// Declare a namespace. An existing name keeps its first value.
    pub fn add(&mut self, name: &str, uri: &str) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_string(), uri.to_string());
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains_uri(&self, uri: &str) -> bool {
        self.entries.values().any(|value| value == uri)
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_namespaces_are_present() {
        let table = Namespaces::new();
        assert_eq!(table.get("SASL"), Some(SASL));
        assert_eq!(table.get("HTTPBIND"), Some(HTTPBIND));
        assert!(table.contains_uri(BIND));
    }

    #[test]
    fn add_does_not_overwrite_existing_names() {
        let mut table = Namespaces::new();
        assert!(table.add("REGISTER", "jabber:iq:register"));
        assert!(!table.add("REGISTER", "urn:other"));
        assert_eq!(table.get("REGISTER"), Some("jabber:iq:register"));
        assert!(!table.add("CLIENT", "urn:other"));
        assert_eq!(table.get("CLIENT"), Some(CLIENT));
    }
}
