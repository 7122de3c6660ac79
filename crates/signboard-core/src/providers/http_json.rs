use std::sync::Arc;

use serde_json::{Map, Value};

use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::source::{Parameters, Source, SourceError, SourceFuture};
use crate::ContentUnit;

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";
const RESOLVED_FIELDS: &str = "resolved_fields";

/// Fetches a JSON document and renders selected fields as lines.
///
/// Parameters:
///
/// - `url` (required): `http://` or `https://` endpoint
/// - `title`: first line of the output
/// - `fields`: JSON pointers such as `/current/temp`; each resolved pointer
///   becomes a `temp: 12.5` line. Without `fields`, top-level scalars are
///   rendered.
/// - `query`: map of query parameters
/// - `api_key`, `api_key_header` (default `x-api-key`)
/// - `skip_empty`: decline emission when no field resolved
pub struct HttpJsonSource {
    client: Arc<dyn HttpClient>,
    skip_empty: bool,
}

impl HttpJsonSource {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            skip_empty: false,
        }
    }

    pub fn from_parameters(client: Arc<dyn HttpClient>, parameters: &Parameters) -> Self {
        Self {
            client,
            skip_empty: parameters.get_bool("skip_empty").unwrap_or(false),
        }
    }

    fn request(parameters: &Parameters) -> Result<HttpRequest, SourceError> {
        let url = parameters.require_str("url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SourceError::configuration(format!(
                "parameter 'url' must be an http(s) URL, got '{url}'"
            )));
        }

        let mut request = HttpRequest::get(url);
        match parameters.get("query") {
            None => {}
            Some(Value::Object(query)) => {
                for (name, value) in query {
                    let value = match value {
                        Value::String(text) => text.clone(),
                        Value::Number(_) | Value::Bool(_) => value.to_string(),
                        _ => {
                            return Err(SourceError::configuration(format!(
                                "query parameter '{name}' must be a scalar"
                            )))
                        }
                    };
                    request = request.with_query(name.clone(), value);
                }
            }
            Some(_) => {
                return Err(SourceError::configuration(
                    "parameter 'query' must be a map",
                ))
            }
        }

        if parameters.contains("api_key") {
            let api_key = parameters.require_str("api_key")?;
            let header = if parameters.contains("api_key_header") {
                parameters.require_str("api_key_header")?
            } else {
                DEFAULT_API_KEY_HEADER
            };
            request = request.with_auth(&HttpAuth::Header {
                name: header.to_owned(),
                value: api_key.to_owned(),
            });
        }

        Ok(request)
    }

    fn fields(parameters: &Parameters) -> Result<Option<Vec<String>>, SourceError> {
        let fields = parameters.get_str_list("fields")?;
        if let Some(fields) = &fields {
            if let Some(bad) = fields
                .iter()
                .find(|field| !field.is_empty() && !field.starts_with('/'))
            {
                return Err(SourceError::configuration(format!(
                    "field '{bad}' is not a JSON pointer"
                )));
            }
        }
        Ok(fields)
    }

    fn render(document: &Value, fields: Option<&[String]>, title: Option<&str>) -> ContentUnit {
        let mut lines: Vec<String> = title.map(str::to_owned).into_iter().collect();
        let mut resolved = 0_usize;

        match fields {
            Some(fields) => {
                for pointer in fields {
                    if let Some(value) = document.pointer(pointer) {
                        lines.push(format!("{}: {}", label(pointer), scalar_text(value)));
                        resolved += 1;
                    }
                }
            }
            None => {
                if let Value::Object(map) = document {
                    for (key, value) in map {
                        if !matches!(value, Value::Object(_) | Value::Array(_)) {
                            lines.push(format!("{key}: {}", scalar_text(value)));
                            resolved += 1;
                        }
                    }
                }
            }
        }

        let mut metadata = Map::new();
        metadata.insert(RESOLVED_FIELDS.to_owned(), Value::from(resolved));
        ContentUnit {
            lines,
            layout: None,
            metadata,
        }
    }
}

impl Source for HttpJsonSource {
    fn validate_configuration(&self, parameters: &Parameters) -> Result<(), SourceError> {
        Self::request(parameters)?;
        Self::fields(parameters)?;
        if parameters.contains("title") {
            parameters.require_str("title")?;
        }
        Ok(())
    }

    fn fetch<'a>(&'a self, parameters: &'a Parameters) -> SourceFuture<'a> {
        Box::pin(async move {
            let request = Self::request(parameters)?;
            let fields = Self::fields(parameters)?;

            let response = self.client.get(request).await?.error_for_status()?;
            let document: Value = serde_json::from_str(&response.body).map_err(|error| {
                SourceError::invalid_response(format!("response is not valid JSON: {error}"))
            })?;

            Ok(Self::render(
                &document,
                fields.as_deref(),
                parameters.get_str("title"),
            ))
        })
    }

    fn should_emit(&self, content: &ContentUnit) -> bool {
        if !self.skip_empty {
            return true;
        }
        content
            .metadata
            .get(RESOLVED_FIELDS)
            .and_then(Value::as_u64)
            .is_some_and(|resolved| resolved > 0)
    }
}

fn label(pointer: &str) -> String {
    pointer
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .unwrap_or_else(|| String::from("value"))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
