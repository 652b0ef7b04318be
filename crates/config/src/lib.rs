//! Gateway configuration: schema, file discovery, and validation.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{discover_and_load, load_config},
    schema::WebgateConfig,
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_toml_str},
};
