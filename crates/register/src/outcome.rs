use minidom::Element;

use crate::error::{Rejection, RegistrationError};

/// Decide what the server's answer to a submission means. `None` is a
/// submission that was never answered.
pub fn classify(response: Option<&Element>) -> Result<(), RegistrationError> {
    let Some(response) = response else {
        return Err(RegistrationError::Timeout);
    };
    if response.attr("type") != Some("error") {
        return Ok(());
    }

    let mut errors = response.children().filter(|child| child.name() == "error");
    let (Some(error), None) = (errors.next(), errors.next()) else {
        return Err(RegistrationError::ServerRejected(Rejection::Other(
            "unknown".to_string(),
        )));
    };

    let condition = error
        .children()
        .next()
        .map(|condition| condition.name().to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    Err(RegistrationError::ServerRejected(Rejection::from_condition(
        &condition,
    )))
}
