//! Built-in provider types.
//!
//! | Type | Purpose |
//! |------|---------|
//! | `static_text` | Fixed lines from configuration |
//! | `http_json` | Fields picked from a JSON HTTP endpoint |

mod http_json;
mod static_text;

use std::sync::Arc;

use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::registry::SourceConstructor;
use crate::source::Source;

pub use http_json::HttpJsonSource;
pub use static_text::StaticTextSource;

pub const STATIC_TEXT: &str = "static_text";
pub const HTTP_JSON: &str = "http_json";

/// Constructors registered by [`crate::SourceRegistry::with_builtin_providers`].
pub fn builtin_constructors() -> Vec<(&'static str, SourceConstructor)> {
    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    vec![
        (
            STATIC_TEXT,
            Arc::new(|_: &str, _: &crate::Parameters| {
                Arc::new(StaticTextSource) as Arc<dyn Source>
            }) as SourceConstructor,
        ),
        (
            HTTP_JSON,
            Arc::new(move |_: &str, parameters: &crate::Parameters| {
                Arc::new(HttpJsonSource::from_parameters(
                    Arc::clone(&client),
                    parameters,
                )) as Arc<dyn Source>
            }) as SourceConstructor,
        ),
    ]
}
