pub mod error;
pub mod loader;
pub mod models;
pub mod settings;
pub mod validation;

pub use error::ConfigError;
pub use loader::{DocumentFormat, RawDocument, parse_document, read_document};
pub use models::*;
pub use settings::{GatewaySettings, load_settings};
pub use validation::{DocumentValidator, ValidationError, ValidationResult};
