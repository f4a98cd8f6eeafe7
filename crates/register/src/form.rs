//! The server's registration form as received.

/// In-band registration query namespace.
pub const NS_REGISTER: &str = "jabber:iq:register";
/// Stream feature announcing in-band registration.
pub const NS_REGISTER_FEATURE: &str = "http://jabber.org/features/iq-register";
pub const NS_DATA_FORMS: &str = "jabber:x:data";
/// Variable of the hidden field that names the form's purpose.
pub const FORM_TYPE: &str = "FORM_TYPE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    TextSingle,
    TextPrivate,
    Hidden,
    Other(String),
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "text-single" => FieldType::TextSingle,
            "text-private" => FieldType::TextPrivate,
            "hidden" => FieldType::Hidden,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::TextSingle => "text-single",
            FieldType::TextPrivate => "text-private",
            FieldType::Hidden => "hidden",
            FieldType::Other(raw) => raw,
        }
    }

    /// Whether the caller gets to fill this field in.
    pub fn is_collected(&self) -> bool {
        !matches!(self, FieldType::Other(_))
    }
}

/// One `<field/>` of an extended registration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub var: Option<String>,
    /// `None` when the server left the `type` attribute out.
    pub field_type: Option<FieldType>,
    pub label: Option<String>,
    pub default_value: String,
}

impl FormField {
    pub fn is_form_type(&self) -> bool {
        self.var.as_deref() == Some(FORM_TYPE)
    }
}

/// Every field of the form in document order. Never modified after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormModel {
    fields: Vec<FormField>,
}

impl FormModel {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn field(&self, var: &str) -> Option<&FormField> {
        self.fields
            .iter()
            .find(|field| field.var.as_deref() == Some(var))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_types_round_trip_their_attribute() {
        for raw in ["text-single", "text-private", "hidden", "list-single"] {
            assert_eq!(FieldType::parse(raw).as_str(), raw);
        }
        assert!(FieldType::Hidden.is_collected());
        assert!(!FieldType::parse("fixed").is_collected());
    }

    #[test]
    fn model_looks_fields_up_by_var() {
        let model = FormModel::new(vec![
            FormField {
                var: Some(FORM_TYPE.to_string()),
                field_type: Some(FieldType::Hidden),
                label: None,
                default_value: NS_REGISTER.to_string(),
            },
            FormField {
                var: Some("username".to_string()),
                field_type: Some(FieldType::TextSingle),
                label: Some("User".to_string()),
                default_value: String::new(),
            },
        ]);

        assert_eq!(model.len(), 2);
        assert!(model.fields()[0].is_form_type());
        assert_eq!(
            model.field("username").and_then(|field| field.label.as_deref()),
            Some("User")
        );
        assert!(model.field("password").is_none());
    }
}
