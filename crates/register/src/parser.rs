//! Turns the server's answer to a registration form request into a
//! [`ParsedForm`].

use minidom::Element;
use tracing::{debug, warn};

use crate::error::RegistrationError;
use crate::form::{FORM_TYPE, FieldType, FormField, FormModel, NS_DATA_FORMS, NS_REGISTER};
use crate::session::Fields;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedForm {
    pub instructions: String,
    pub title: String,
    /// Fields the caller should fill in, all starting out empty in the
    /// extended dialect.
    pub fields: Fields,
    /// `None` for the legacy dialect.
    pub form: Option<FormModel>,
}

pub fn parse_form(stanza: &Element) -> Result<ParsedForm, RegistrationError> {
    let mut queries = stanza.children().filter(|child| child.name() == "query");
    let (Some(query), None) = (queries.next(), queries.next()) else {
        debug!(id = ?stanza.attr("id"), "registration response without a single query");
        return Err(RegistrationError::MalformedQuery);
    };

    match query.children().find(|child| child.is("x", NS_DATA_FORMS)) {
        Some(form) => parse_extended(form),
        None => Ok(parse_legacy(query)),
    }
}

fn parse_extended(form: &Element) -> Result<ParsedForm, RegistrationError> {
    let mut parsed = ParsedForm::default();
    let mut model = Vec::new();

    for child in form.children() {
        match child.name() {
            "instructions" => parsed.instructions = child.text(),
            "title" => parsed.title = child.text(),
            "field" => {
                let field = FormField {
                    var: child.attr("var").map(str::to_string),
                    field_type: child.attr("type").map(FieldType::parse),
                    label: child.attr("label").map(str::to_string),
                    default_value: child
                        .children()
                        .find(|value| value.name() == "value")
                        .map(Element::text)
                        .unwrap_or_default(),
                };

                // Only FORM_TYPE is checked; other hidden fields are collected.
                if field.is_form_type() {
                    if field.default_value != NS_REGISTER {
                        warn!(found = %field.default_value, "registration form has the wrong FORM_TYPE");
                        return Err(RegistrationError::FormTypeMismatch {
                            found: field.default_value,
                        });
                    }
                } else if let (Some(var), Some(kind)) = (&field.var, &field.field_type) {
                    if kind.is_collected() {
                        parsed.fields.insert(var.clone(), "");
                    }
                }
                model.push(field);
            }
            _ => {}
        }
    }

    parsed.form = Some(FormModel::new(model));
    Ok(parsed)
}

fn parse_legacy(query: &Element) -> ParsedForm {
    let mut parsed = ParsedForm::default();
    for child in query.children() {
        let name = child.name().to_ascii_lowercase();
        match name.as_str() {
            "instructions" => parsed.instructions = child.text(),
            "x" => {}
            _ => parsed.fields.insert(name, child.text()),
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn element(xml: &str) -> Element {
        Element::from_str(xml).expect("test stanza should parse")
    }

    fn extended(form_type: &str) -> Element {
        element(&format!(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'>\
             <x xmlns='jabber:x:data' type='form'>\
             <title>Sign up</title>\
             <instructions>Choose a name</instructions>\
             <field type='hidden' var='FORM_TYPE'><value>{form_type}</value></field>\
             <field type='text-single' label='Username' var='username'><required/></field>\
             <field type='text-private' label='Password' var='password'><required/></field>\
             </x></query></iq>"
        ))
    }

    #[test]
    fn extended_form_collects_empty_fields() {
        let parsed = parse_form(&extended("jabber:iq:register")).expect("form should parse");

        assert_eq!(
            parsed.fields.iter().collect::<Vec<_>>(),
            vec![("username", ""), ("password", "")]
        );
        assert_eq!(parsed.title, "Sign up");
        assert_eq!(parsed.instructions, "Choose a name");

        let form = parsed.form.expect("extended dialect keeps the model");
        let vars: Vec<_> = form
            .fields()
            .iter()
            .filter_map(|field| field.var.as_deref())
            .collect();
        assert_eq!(vars, vec!["FORM_TYPE", "username", "password"]);
        assert_eq!(form.fields()[0].default_value, "jabber:iq:register");
    }

    #[test]
    fn wrong_form_type_aborts_before_collecting() {
        let error = parse_form(&extended("wrong:ns")).expect_err("mismatch must fail");
        assert_eq!(
            error,
            RegistrationError::FormTypeMismatch {
                found: "wrong:ns".to_string()
            }
        );
        assert_eq!(error.condition(), None);
    }

    #[test]
    fn mismatch_after_collected_fields_still_fails() {
        let stanza = element(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'><x xmlns='jabber:x:data' type='form'>\
             <field type='text-single' var='username'/>\
             <field type='hidden' var='FORM_TYPE'><value>urn:other</value></field>\
             </x></query></iq>",
        );
        assert!(matches!(
            parse_form(&stanza),
            Err(RegistrationError::FormTypeMismatch { .. })
        ));
    }

    #[test]
    fn uncollected_field_types_stay_in_the_model() {
        let stanza = element(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'><x xmlns='jabber:x:data' type='form'>\
             <field type='fixed'><value>Welcome</value></field>\
             <field type='list-single' var='locale'><value>en</value></field>\
             <field type='hidden' var='token'><value>abc</value></field>\
             <field var='nickname'/>\
             </x></query></iq>",
        );
        let parsed = parse_form(&stanza).expect("form should parse");

        assert_eq!(parsed.fields.keys().collect::<Vec<_>>(), vec!["token"]);
        let form = parsed.form.expect("model");
        assert_eq!(form.len(), 4);
        assert_eq!(
            form.field("locale").and_then(|field| field.field_type.clone()),
            Some(FieldType::Other("list-single".to_string()))
        );
        assert_eq!(form.field("token").map(|field| field.default_value.as_str()), Some("abc"));
    }

    #[test]
    fn hidden_fields_other_than_form_type_do_not_abort() {
        let stanza = element(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'><x xmlns='jabber:x:data' type='form'>\
             <field type='hidden' var='FORM_TYPE'><value>jabber:iq:register</value></field>\
             <field type='hidden' var='challenge'><value>urn:example:captcha</value></field>\
             <field type='text-single' var='username'/>\
             </x></query></iq>",
        );
        let parsed = parse_form(&stanza).expect("a second hidden field is not a FORM_TYPE");

        assert_eq!(
            parsed.fields.keys().collect::<Vec<_>>(),
            vec!["challenge", "username"]
        );
        let form = parsed.form.expect("model");
        assert_eq!(
            form.field("challenge").map(|field| field.default_value.as_str()),
            Some("urn:example:captcha")
        );
    }

    #[test]
    fn legacy_query_keeps_values_and_skips_x() {
        let stanza = element(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'>\
             <instructions>Fill in</instructions>\
             <Username/><password/><email>a@b.c</email>\
             <x xmlns='jabber:x:oob'><url>https://example.org</url></x>\
             </query></iq>",
        );
        let parsed = parse_form(&stanza).expect("legacy form should parse");

        assert_eq!(parsed.instructions, "Fill in");
        assert!(parsed.form.is_none());
        assert_eq!(
            parsed.fields.iter().collect::<Vec<_>>(),
            vec![("username", ""), ("password", ""), ("email", "a@b.c")]
        );
    }

    #[test]
    fn query_count_must_be_exactly_one() {
        let none = element("<iq xmlns='jabber:client' type='result' id='reg1'/>");
        let two = element(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'/><query xmlns='jabber:iq:register'/></iq>",
        );
        for stanza in [none, two] {
            let error = parse_form(&stanza).expect_err("must fail");
            assert_eq!(error, RegistrationError::MalformedQuery);
            assert_eq!(error.condition(), Some("unknown"));
        }
    }
}
