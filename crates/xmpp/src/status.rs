use std::fmt;

/// Condition reported with CONNFAIL when the server offers no usable way in.
pub const NO_AUTH_MECH: &str = "no-auth-mech";

/// Connection status reported to the caller's status callback.
///
/// Built-in codes are fixed. Extensions reserve their own codes above
/// [`Status::MAX_BUILTIN_CODE`] and report them through [`Status::Extension`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Error,
    Connecting,
    ConnFail,
    Authenticating,
    AuthFail,
    Connected,
    Disconnected,
    Disconnecting,
    Attached,
    Redirect,
    ConnTimeout,
    Extension(ExtensionStatus),
}

/// A status code owned by a connection extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionStatus {
    pub code: u16,
    pub name: &'static str,
}

impl Status {
    /// Highest code used by the built-in statuses.
    pub const MAX_BUILTIN_CODE: u16 = 10;

    const BUILTIN: [Status; 11] = [
        Status::Error,
        Status::Connecting,
        Status::ConnFail,
        Status::Authenticating,
        Status::AuthFail,
        Status::Connected,
        Status::Disconnected,
        Status::Disconnecting,
        Status::Attached,
        Status::Redirect,
        Status::ConnTimeout,
    ];

    pub const fn code(&self) -> u16 {
        match self {
            Status::Error => 0,
            Status::Connecting => 1,
            Status::ConnFail => 2,
            Status::Authenticating => 3,
            Status::AuthFail => 4,
            Status::Connected => 5,
            Status::Disconnected => 6,
            Status::Disconnecting => 7,
            Status::Attached => 8,
            Status::Redirect => 9,
            Status::ConnTimeout => 10,
            Status::Extension(extension) => extension.code,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Status::Error => "ERROR",
            Status::Connecting => "CONNECTING",
            Status::ConnFail => "CONNFAIL",
            Status::Authenticating => "AUTHENTICATING",
            Status::AuthFail => "AUTHFAIL",
            Status::Connected => "CONNECTED",
            Status::Disconnected => "DISCONNECTED",
            Status::Disconnecting => "DISCONNECTING",
            Status::Attached => "ATTACHED",
            Status::Redirect => "REDIRECT",
            Status::ConnTimeout => "CONNTIMEOUT",
            Status::Extension(extension) => extension.name,
        }
    }

    /// Look up a built-in status by code.
    pub fn from_builtin_code(code: u16) -> Option<Status> {
        Self::BUILTIN.iter().copied().find(|status| status.code() == code)
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Status::Extension(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
