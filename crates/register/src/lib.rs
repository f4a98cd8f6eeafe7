//! In-band account registration (XEP-0077) for Waddle connections.
//!
//! [`Registrar`] wraps a [`waddle_xmpp::Connection`] with the
//! [`Registration`] extension attached:
//!
//! ```no_run
//! # async fn run() -> Result<(), waddle_xmpp::ConnectionError> {
//! use waddle_register::{Registrar, RegistrationState};
//! use waddle_xmpp::{BoshTransport, ConnectOptions, ConnectionConfig, StatusCallback};
//!
//! let settings = ConnectionConfig::new("example.org", "https://example.org/http-bind");
//! let mut registrar = Registrar::<BoshTransport>::new(settings);
//! let callback: StatusCallback = Box::new(|status, _condition| println!("{status}"));
//! registrar
//!     .connect("example.org", callback, ConnectOptions::default())
//!     .await?;
//! while registrar.state() != RegistrationState::FormReady {
//!     registrar.process_next().await?;
//! }
//! registrar.set_field("username", "alice");
//! registrar.set_field("password", "secret");
//! registrar.submit().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod form;
pub mod machine;
pub mod outcome;
pub mod parser;
pub mod registrar;
pub mod session;
mod splice;
pub mod status;
pub mod submission;

pub use error::{Rejection, RegistrationError};
pub use form::{FieldType, FormField, FormModel, NS_REGISTER};
pub use machine::{DEFAULT_SUBMIT_TIMEOUT, Registration, RegistrationState};
pub use outcome::classify;
pub use parser::{ParsedForm, parse_form};
pub use registrar::Registrar;
pub use session::{Fields, RegistrationSession};
pub use status::RegistrationStatus;
pub use submission::build_submission;
