use waddle_xmpp::{ExtensionStatus, Status};

/// Status codes reported while registering an account.
///
/// The block sits directly above the connection's built-in codes and keeps
/// this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationStatus {
    RegiFail,
    Register,
    Registered,
    Conflict,
    NotAcceptable,
    RegisterTimeout,
}

impl RegistrationStatus {
    pub const BASE: u16 = Status::MAX_BUILTIN_CODE;

    pub const ALL: [RegistrationStatus; 6] = [
        RegistrationStatus::RegiFail,
        RegistrationStatus::Register,
        RegistrationStatus::Registered,
        RegistrationStatus::Conflict,
        RegistrationStatus::NotAcceptable,
        RegistrationStatus::RegisterTimeout,
    ];

    pub const fn offset(self) -> u16 {
        match self {
            RegistrationStatus::RegiFail => 1,
            RegistrationStatus::Register => 2,
            RegistrationStatus::Registered => 3,
            RegistrationStatus::Conflict => 4,
            RegistrationStatus::NotAcceptable => 5,
            RegistrationStatus::RegisterTimeout => 6,
        }
    }

    pub const fn code(self) -> u16 {
        Self::BASE + self.offset()
    }

    pub const fn name(self) -> &'static str {
        match self {
            RegistrationStatus::RegiFail => "REGIFAIL",
            RegistrationStatus::Register => "REGISTER",
            RegistrationStatus::Registered => "REGISTERED",
            RegistrationStatus::Conflict => "CONFLICT",
            RegistrationStatus::NotAcceptable => "NOTACCEPTABLE",
            RegistrationStatus::RegisterTimeout => "REGISTERTIMEOUT",
        }
    }

    pub const fn status(self) -> Status {
        Status::Extension(ExtensionStatus {
            code: self.code(),
            name: self.name(),
        })
    }

    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Extension(extension) => Self::from_code(extension.code),
            _ => None,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }
}

// The block must clear every built-in code and stay contiguous.
const _: () = {
    let mut index = 0;
    while index < RegistrationStatus::ALL.len() {
        let code = RegistrationStatus::ALL[index].code();
        assert!(code > Status::MAX_BUILTIN_CODE);
        if index > 0 {
            assert!(code == RegistrationStatus::ALL[index - 1].code() + 1);
        }
        index += 1;
    }
};

impl From<RegistrationStatus> for Status {
    fn from(status: RegistrationStatus) -> Self {
        status.status()
    }
}

impl TryFrom<Status> for RegistrationStatus {
    type Error = Status;

    fn try_from(status: Status) -> Result<Self, Self::Error> {
        Self::from_status(status).ok_or(status)
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
