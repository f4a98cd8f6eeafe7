use thiserror::Error;
use waddle_xmpp::Status;
use waddle_xmpp::status::NO_AUTH_MECH;

use crate::status::RegistrationStatus;

/// Why the server turned a submission down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Conflict,
    NotAcceptable,
    /// Any other condition, lower-cased.
    Other(String),
}

impl Rejection {
    pub fn condition(&self) -> &str {
        match self {
            Rejection::Conflict => "conflict",
            Rejection::NotAcceptable => "not-acceptable",
            Rejection::Other(condition) => condition,
        }
    }

    pub fn from_condition(condition: &str) -> Self {
        match condition.to_ascii_lowercase().as_str() {
            "conflict" => Rejection::Conflict,
            "not-acceptable" => Rejection::NotAcceptable,
            other => Rejection::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.condition())
    }
}

/// Registration failures. Each maps to exactly one status report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("server advertises neither registration nor SASL mechanisms")]
    NoUsableFeature,

    #[error("registration response must carry exactly one query")]
    MalformedQuery,

    #[error("registration form has FORM_TYPE {found:?}")]
    FormTypeMismatch { found: String },

    #[error("registration rejected: {0}")]
    ServerRejected(Rejection),

    #[error("registration attempt timed out")]
    Timeout,
}

impl RegistrationError {
    pub fn status(&self) -> Status {
        match self {
            RegistrationError::NoUsableFeature => Status::ConnFail,
            RegistrationError::MalformedQuery | RegistrationError::FormTypeMismatch { .. } => {
                RegistrationStatus::RegiFail.status()
            }
            RegistrationError::ServerRejected(Rejection::Conflict) => {
                RegistrationStatus::Conflict.status()
            }
            RegistrationError::ServerRejected(Rejection::NotAcceptable) => {
                RegistrationStatus::NotAcceptable.status()
            }
            RegistrationError::ServerRejected(Rejection::Other(_)) => {
                RegistrationStatus::RegiFail.status()
            }
            RegistrationError::Timeout => RegistrationStatus::RegisterTimeout.status(),
        }
    }

    pub fn condition(&self) -> Option<&str> {
        match self {
            RegistrationError::NoUsableFeature => Some(NO_AUTH_MECH),
            RegistrationError::MalformedQuery => Some("unknown"),
            RegistrationError::FormTypeMismatch { .. } => None,
            RegistrationError::ServerRejected(rejection) => Some(rejection.condition()),
            RegistrationError::Timeout => Some("timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_error_maps_to_its_status_and_condition() {
        let cases = [
            (RegistrationError::NoUsableFeature, Status::ConnFail, Some(NO_AUTH_MECH)),
            (
                RegistrationError::MalformedQuery,
                RegistrationStatus::RegiFail.status(),
                Some("unknown"),
            ),
            (
                RegistrationError::FormTypeMismatch {
                    found: "wrong:ns".to_string(),
                },
                RegistrationStatus::RegiFail.status(),
                None,
            ),
            (
                RegistrationError::ServerRejected(Rejection::Conflict),
                RegistrationStatus::Conflict.status(),
                Some("conflict"),
            ),
            (
                RegistrationError::ServerRejected(Rejection::NotAcceptable),
                RegistrationStatus::NotAcceptable.status(),
                Some("not-acceptable"),
            ),
            (
                RegistrationError::ServerRejected(Rejection::Other("bad-request".to_string())),
                RegistrationStatus::RegiFail.status(),
                Some("bad-request"),
            ),
            (
                RegistrationError::Timeout,
                RegistrationStatus::RegisterTimeout.status(),
                Some("timeout"),
            ),
        ];

        for (error, status, condition) in cases {
            assert_eq!(error.status(), status, "{error}");
            assert_eq!(error.condition(), condition, "{error}");
        }
    }

    #[test]
    fn rejection_conditions_are_case_insensitive() {
        assert_eq!(Rejection::from_condition("Conflict"), Rejection::Conflict);
        assert_eq!(
            Rejection::from_condition("NOT-ACCEPTABLE"),
            Rejection::NotAcceptable
        );
        assert_eq!(
            Rejection::from_condition("Service-Unavailable"),
            Rejection::Other("service-unavailable".to_string())
        );
    }
}
