use minidom::Element;
use waddle_xmpp::stanza;

use crate::form::{FormModel, NS_DATA_FORMS, NS_REGISTER};
use crate::session::RegistrationSession;

/// Build the `iq type='set'` carrying the caller's answers.
///
/// An extended form is echoed back field by field with the caller's values
/// (falling back to each field's default); a legacy form becomes one element
/// per session field.
pub fn build_submission(session: &RegistrationSession, id: &str) -> Element {
    let query = match &session.form {
        Some(form) => extended_query(session, form),
        None => legacy_query(session),
    };
    stanza::iq("set", id, query)
}

fn extended_query(session: &RegistrationSession, form: &FormModel) -> Element {
    let mut x = Element::builder("x", NS_DATA_FORMS)
        .attr("type", "submit")
        .build();

    for field in form.fields() {
        let value = field
            .var
            .as_deref()
            .and_then(|var| session.filled(var))
            .unwrap_or(field.default_value.as_str());

        let mut builder = Element::builder("field", NS_DATA_FORMS);
        if let Some(kind) = &field.field_type {
            builder = builder.attr("type", kind.as_str());
        }
        if let Some(var) = &field.var {
            builder = builder.attr("var", var.as_str());
        }
        if let Some(label) = &field.label {
            builder = builder.attr("label", label.as_str());
        }
        x.append_child(
            builder
                .append(Element::builder("value", NS_DATA_FORMS).append(value).build())
                .build(),
        );
    }

    Element::builder("query", NS_REGISTER).append(x).build()
}

fn legacy_query(session: &RegistrationSession) -> Element {
    Element::builder("query", NS_REGISTER)
        .append_all(
            session
                .fields
                .iter()
                .map(|(name, value)| Element::builder(name, NS_REGISTER).append(value).build()),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_form;
    use std::str::FromStr;

    fn session_from(xml: &str) -> RegistrationSession {
        let stanza = Element::from_str(xml).expect("test stanza should parse");
        let parsed = parse_form(&stanza).expect("form should parse");
        let mut session = RegistrationSession::new("example.org");
        session.instructions = parsed.instructions;
        session.fields = parsed.fields;
        session.form = parsed.form;
        session
    }

    fn submitted_fields(submission: &Element) -> Vec<(String, String, String, String)> {
        submission
            .get_child("query", NS_REGISTER)
            .and_then(|query| query.get_child("x", NS_DATA_FORMS))
            .map(|x| {
                x.children()
                    .map(|field| {
                        (
                            field.attr("var").unwrap_or_default().to_string(),
                            field.attr("type").unwrap_or_default().to_string(),
                            field.attr("label").unwrap_or_default().to_string(),
                            field
                                .get_child("value", NS_DATA_FORMS)
                                .map(Element::text)
                                .unwrap_or_default(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn extended_submission_echoes_every_field_in_order() {
        let mut session = session_from(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'><x xmlns='jabber:x:data' type='form'>\
             <field type='hidden' var='FORM_TYPE'><value>jabber:iq:register</value></field>\
             <field type='text-single' label='Username' var='username'/>\
             <field type='text-private' label='Password' var='password'/>\
             </x></query></iq>",
        );
        session.fields.insert("username", "alice");
        session.fields.insert("password", "secret");

        let submission = build_submission(&session, "abc:register");

        assert_eq!(submission.attr("type"), Some("set"));
        assert_eq!(submission.attr("id"), Some("abc:register"));
        let x = submission
            .get_child("query", NS_REGISTER)
            .and_then(|query| query.get_child("x", NS_DATA_FORMS))
            .expect("data form");
        assert_eq!(x.attr("type"), Some("submit"));

        let owned = |v: &str, t: &str, l: &str, val: &str| {
            (v.to_string(), t.to_string(), l.to_string(), val.to_string())
        };
        assert_eq!(
            submitted_fields(&submission),
            vec![
                owned("FORM_TYPE", "hidden", "", "jabber:iq:register"),
                owned("username", "text-single", "Username", "alice"),
                owned("password", "text-private", "Password", "secret"),
            ]
        );
    }

    #[test]
    fn empty_user_values_fall_back_to_defaults() {
        let mut session = session_from(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'><x xmlns='jabber:x:data' type='form'>\
             <field type='hidden' var='token'><value>t0k3n</value></field>\
             <field type='list-single' var='locale'><value>en</value></field>\
             <field type='text-single' var='username'/>\
             </x></query></iq>",
        );
        session.fields.insert("username", "bob");

        let values: Vec<_> = submitted_fields(&build_submission(&session, "id"))
            .into_iter()
            .map(|(var, _, _, value)| (var, value))
            .collect();
        assert_eq!(
            values,
            vec![
                ("token".to_string(), "t0k3n".to_string()),
                ("locale".to_string(), "en".to_string()),
                ("username".to_string(), "bob".to_string()),
            ]
        );
    }

    #[test]
    fn legacy_submission_follows_field_order() {
        let mut session = session_from(
            "<iq xmlns='jabber:client' type='result' id='reg1'>\
             <query xmlns='jabber:iq:register'>\
             <instructions>Fill in</instructions><username/><password/>\
             </query></iq>",
        );
        session.fields.insert("username", "alice");
        session.fields.insert("password", "secret");

        let submission = build_submission(&session, "abc:register");
        let query = submission
            .get_child("query", NS_REGISTER)
            .expect("query");
        let children: Vec<_> = query
            .children()
            .map(|child| (child.name().to_string(), child.text()))
            .collect();
        assert_eq!(
            children,
            vec![
                ("username".to_string(), "alice".to_string()),
                ("password".to_string(), "secret".to_string()),
            ]
        );
        assert!(query.get_child("instructions", NS_REGISTER).is_none());
    }
}
