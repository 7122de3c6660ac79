//! Declarative source configuration.
//!
//! A document lists source instances under the top-level `sources` key.
//! Loading is all-or-nothing: parsing, structural checks, id uniqueness,
//! type references, and `${VAR}` placeholder resolution must all pass
//! before a [`SourcesConfig`] exists.
//!
//! | Stage | Failure |
//! |-------|---------|
//! | parse | [`ConfigError::Parse`] (also unknown keys) |
//! | structural | [`ConfigError::Invalid`] listing every issue |
//! | uniqueness | [`ConfigError::DuplicateIds`] listing every duplicate |
//! | references | [`ConfigError::UnknownSourceType`] |
//! | placeholders | [`ConfigError::UnresolvedEnvironment`] listing every reference |

mod env;
mod error;
mod loader;
mod model;
mod validate;

pub use env::{EnvLookup, ProcessEnv};
pub use error::{ConfigError, ConfigIssue};
pub use loader::ConfigLoader;
pub use model::{
    FallbackPolicy, SourceInstanceConfig, SourcesConfig, DEFAULT_MAX_AGE_HOURS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT, MAX_ATTEMPTS_LIMIT, MAX_AGE_HOURS_LIMIT, MAX_TIMEOUT,
};
