use crate::source::{Parameters, Source, SourceError, SourceFuture};
use crate::ContentUnit;

/// Emits lines taken verbatim from parameters: `lines` (list) or `text`
/// (split on newlines), plus an optional `layout` hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticTextSource;

impl StaticTextSource {
    fn lines(parameters: &Parameters) -> Result<Vec<String>, SourceError> {
        if let Some(lines) = parameters.get_str_list("lines")? {
            if lines.is_empty() {
                return Err(SourceError::configuration("'lines' must not be empty"));
            }
            return Ok(lines);
        }
        if parameters.contains("text") {
            let text = parameters.require_str("text")?;
            return Ok(text.lines().map(str::to_owned).collect());
        }
        Err(SourceError::configuration(
            "either 'lines' or 'text' is required",
        ))
    }
}

impl Source for StaticTextSource {
    fn validate_configuration(&self, parameters: &Parameters) -> Result<(), SourceError> {
        Self::lines(parameters)?;
        if parameters.contains("layout") && parameters.get_str("layout").is_none() {
            return Err(SourceError::configuration("'layout' must be a string"));
        }
        Ok(())
    }

    fn fetch<'a>(&'a self, parameters: &'a Parameters) -> SourceFuture<'a> {
        Box::pin(async move {
            let content = ContentUnit::new(Self::lines(parameters)?);
            Ok(match parameters.get_str("layout") {
                Some(layout) => content.with_layout(layout),
                None => content,
            })
        })
    }
}
