pub mod bosh;
pub mod connection;
pub mod error;
pub mod extension;
pub mod ns;
pub mod sasl;
pub mod stanza;
pub mod status;
pub mod transport;

pub use bosh::BoshTransport;
pub use connection::{ConnectOptions, Connection, StatusCallback};
pub use error::{ConnectionError, PipelineError};
pub use extension::{
    AuthenticateHook, ConnectionExtension, Credentials, ExtensionAction, FeaturesHook, Negotiation,
};
pub use sasl::SelectedMechanism;
pub use status::{ExtensionStatus, Status};
pub use transport::{ConnectionConfig, XmppTransport};

pub use minidom::Element;
