use std::collections::BTreeMap;
use std::time::Duration;

use crate::registry::SourceRegistry;
use crate::retry::{Backoff, RetryPolicy};
use crate::source::Parameters;

use super::error::{ConfigError, ConfigIssue};
use super::model::{
    FallbackPolicy, RawSource, SourceInstanceConfig, SourcesConfig, MAX_AGE_HOURS_LIMIT,
    MAX_ATTEMPTS_LIMIT, MAX_TIMEOUT,
};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Converts one raw document entry, pushing every structural problem found.
pub(crate) fn convert_raw(
    index: usize,
    raw: RawSource,
    issues: &mut Vec<ConfigIssue>,
) -> SourceInstanceConfig {
    check_identity(index, &raw.id, &raw.source_type, &raw.schedule, issues);

    let timeout = match seconds(raw.timeout) {
        Some(timeout) if !timeout.is_zero() => {
            check_timeout_limit(index, &raw.id, timeout, issues);
            timeout
        }
        _ => {
            issues.push(ConfigIssue::new(
                index,
                &raw.id,
                "timeout",
                format!("must be a positive number of seconds, got {}", raw.timeout),
            ));
            Duration::ZERO
        }
    };

    let max_attempts = match u32::try_from(raw.retry.max_attempts) {
        Ok(attempts) if (1..=MAX_ATTEMPTS_LIMIT).contains(&attempts) => attempts,
        _ => {
            issues.push(ConfigIssue::new(
                index,
                &raw.id,
                "retry.max_attempts",
                format!(
                    "must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {}",
                    raw.retry.max_attempts
                ),
            ));
            1
        }
    };

    let mut delays = Vec::with_capacity(raw.retry.backoff_seconds.len());
    for (position, value) in raw.retry.backoff_seconds.iter().enumerate() {
        match seconds(*value) {
            Some(delay) => delays.push(delay),
            None => issues.push(ConfigIssue::new(
                index,
                &raw.id,
                "retry.backoff_seconds",
                format!("entry {position} must be a non-negative number, got {value}"),
            )),
        }
    }

    let max_age_hours = raw.fallback.max_age_hours;
    let max_age = if max_age_hours.is_finite()
        && (1.0..=f64::from(MAX_AGE_HOURS_LIMIT)).contains(&max_age_hours)
    {
        Duration::from_secs_f64(max_age_hours * SECONDS_PER_HOUR)
    } else {
        issues.push(ConfigIssue::new(
            index,
            &raw.id,
            "fallback.max_age_hours",
            format!("must be between 1 and {MAX_AGE_HOURS_LIMIT}, got {max_age_hours}"),
        ));
        Duration::ZERO
    };

    SourceInstanceConfig {
        id: raw.id,
        source_type: raw.source_type,
        enabled: raw.enabled,
        schedule: raw.schedule,
        timeout,
        parameters: Parameters::from_map(raw.parameters),
        retry: RetryPolicy {
            enabled: raw.retry.enabled,
            max_attempts,
            backoff: Backoff::Schedule(delays),
        },
        fallback: FallbackPolicy {
            use_cached: raw.fallback.use_cached,
            max_age,
        },
        rendering: raw.rendering,
    }
}

/// Structural checks for instances assembled in code rather than parsed.
pub(crate) fn check_instance(
    index: usize,
    instance: &SourceInstanceConfig,
    issues: &mut Vec<ConfigIssue>,
) {
    check_identity(
        index,
        &instance.id,
        &instance.source_type,
        &instance.schedule,
        issues,
    );

    if instance.timeout.is_zero() {
        issues.push(ConfigIssue::new(
            index,
            &instance.id,
            "timeout",
            "must be a positive number of seconds",
        ));
    } else {
        check_timeout_limit(index, &instance.id, instance.timeout, issues);
    }

    if !(1..=MAX_ATTEMPTS_LIMIT).contains(&instance.retry.max_attempts) {
        issues.push(ConfigIssue::new(
            index,
            &instance.id,
            "retry.max_attempts",
            format!(
                "must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {}",
                instance.retry.max_attempts
            ),
        ));
    }

    let hours = instance.fallback.max_age.as_secs_f64() / SECONDS_PER_HOUR;
    if !(1.0..=f64::from(MAX_AGE_HOURS_LIMIT)).contains(&hours) {
        issues.push(ConfigIssue::new(
            index,
            &instance.id,
            "fallback.max_age_hours",
            format!("must be between 1 and {MAX_AGE_HOURS_LIMIT}, got {hours}"),
        ));
    }
}

/// Uniqueness then type references, over instances that passed structural checks.
pub(crate) fn check_collection(
    instances: &[SourceInstanceConfig],
    registry: &SourceRegistry,
) -> Result<(), ConfigError> {
    let mut positions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, instance) in instances.iter().enumerate() {
        positions.entry(instance.id.as_str()).or_default().push(index);
    }

    let mut duplicates: Vec<(usize, String)> = positions
        .into_iter()
        .filter(|(_, indexes)| indexes.len() > 1)
        .map(|(id, indexes)| {
            let listed = indexes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            (indexes[0], format!("'{id}' (entries {listed})"))
        })
        .collect();
    if !duplicates.is_empty() {
        duplicates.sort_by_key(|(first, _)| *first);
        return Err(ConfigError::DuplicateIds {
            ids: duplicates.into_iter().map(|(_, id)| id).collect(),
        });
    }

    for instance in instances {
        registry
            .ensure_known(&instance.source_type)
            .map_err(|source| ConfigError::UnknownSourceType {
                source_id: instance.id.clone(),
                source,
            })?;
    }

    Ok(())
}

impl SourcesConfig {
    /// Validates instances assembled in code with the same rules a loaded
    /// document goes through, minus placeholder resolution.
    pub fn build(
        instances: Vec<SourceInstanceConfig>,
        registry: &SourceRegistry,
    ) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();
        for (index, instance) in instances.iter().enumerate() {
            check_instance(index, instance, &mut issues);
        }
        if !issues.is_empty() {
            return Err(ConfigError::Invalid { issues });
        }
        check_collection(&instances, registry)?;
        Ok(Self::from_validated(instances))
    }
}

fn check_identity(
    index: usize,
    id: &str,
    source_type: &str,
    schedule: &str,
    issues: &mut Vec<ConfigIssue>,
) {
    if id.is_empty() {
        issues.push(ConfigIssue::new(index, id, "id", "must not be empty"));
    } else if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        issues.push(ConfigIssue::new(
            index,
            id,
            "id",
            "may only contain letters, digits, '_' and '-'",
        ));
    }
    if source_type.trim().is_empty() {
        issues.push(ConfigIssue::new(index, id, "type", "must not be empty"));
    }
    if schedule.trim().is_empty() {
        issues.push(ConfigIssue::new(index, id, "schedule", "must not be empty"));
    }
}

fn check_timeout_limit(index: usize, id: &str, timeout: Duration, issues: &mut Vec<ConfigIssue>) {
    if timeout > MAX_TIMEOUT {
        issues.push(ConfigIssue::new(
            index,
            id,
            "timeout",
            format!(
                "must not exceed {} seconds, got {}",
                MAX_TIMEOUT.as_secs(),
                timeout.as_secs_f64()
            ),
        ));
    }
}

fn seconds(value: f64) -> Option<Duration> {
    if value.is_finite() && value >= 0.0 {
        Duration::try_from_secs_f64(value).ok()
    } else {
        None
    }
}
