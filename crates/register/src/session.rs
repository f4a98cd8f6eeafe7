use waddle_xmpp::Negotiation;

use crate::form::FormModel;

/// Field variable to value, in the order the server listed them.
///
/// Legacy submissions echo fields back in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value in place when `key` exists, appends otherwise.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.insert(key, value);
        }
        fields
    }
}

/// State of one registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSession {
    pub domain: String,
    pub instructions: String,
    pub title: String,
    pub fields: Fields,
    /// Present only when the server sent an extended data form.
    pub form: Option<FormModel>,
    pub registered: bool,
    pub(crate) pending: Option<String>,
    pub(crate) stashed: Option<Negotiation>,
    pub(crate) form_received: bool,
}

impl RegistrationSession {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            instructions: String::new(),
            title: String::new(),
            fields: Fields::new(),
            form: None,
            registered: false,
            pending: None,
            stashed: None,
            form_received: false,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.form.is_none()
    }

    /// Id of the submission awaiting a verdict.
    pub fn pending_submission(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn form_received(&self) -> bool {
        self.form_received
    }

    /// Non-empty value of a field.
    pub(crate) fn filled(&self, key: &str) -> Option<&str> {
        self.fields.get(key).filter(|value| !value.is_empty())
    }
}
