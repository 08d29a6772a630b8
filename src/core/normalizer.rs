use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::IngestError;
use crate::core::models::event::{ModelTier, Source, UsageEvent};

/// Token counts as producers report them, possibly nested under `usage`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsage {
    #[serde(default, alias = "inputTokens", alias = "prompt_tokens")]
    pub input_tokens: Option<i64>,
    #[serde(default, alias = "outputTokens", alias = "completion_tokens")]
    pub output_tokens: Option<i64>,
    #[serde(
        default,
        alias = "cache_read_input_tokens",
        alias = "cached_input_tokens",
        alias = "cacheReadTokens"
    )]
    pub cache_read_tokens: Option<i64>,
    #[serde(
        default,
        alias = "cache_creation_input_tokens",
        alias = "cacheCreationTokens"
    )]
    pub cache_creation_tokens: Option<i64>,
}

/// Loosely-typed producer payload, prior to validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub source: Option<String>,
    /// Tier id (`standard`, `tier-2`, ...) or a model name
    #[serde(default, alias = "model", alias = "modelTier")]
    pub model_tier: Option<String>,
    #[serde(flatten)]
    pub tokens: RawUsage,
    /// Nested usage block (Claude log style); top-level counts take precedence
    #[serde(default)]
    pub usage: Option<RawUsage>,
    /// RFC 3339 timestamp
    #[serde(default, alias = "timestamp", alias = "occurredAt")]
    pub occurred_at: Option<String>,
}

/// A validated event plus how far its timestamp was pulled back, if at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub event: UsageEvent,
    pub clock_skew: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    clock_skew_tolerance: Duration,
}

impl Normalizer {
    pub fn new(clock_skew_tolerance: Duration) -> Self {
        Self {
            clock_skew_tolerance,
        }
    }

    /// Validate `raw` against the ingest clock `now`.
    pub fn normalize(&self, raw: &RawEvent, now: DateTime<Utc>) -> Result<Normalized, IngestError> {
        let source_id = raw
            .source
            .as_deref()
            .ok_or_else(|| IngestError::Malformed("missing source".into()))?;
        let source = Source::from_id(source_id).ok_or_else(|| IngestError::UnknownSource {
            kind: "source",
            value: source_id.to_string(),
        })?;

        let tier_id = raw
            .model_tier
            .as_deref()
            .ok_or_else(|| IngestError::Malformed("missing model tier".into()))?;
        let model_tier = ModelTier::from_id(tier_id).ok_or_else(|| IngestError::UnknownSource {
            kind: "model tier",
            value: tier_id.to_string(),
        })?;

        let nested = raw.usage.clone().unwrap_or_default();
        let input_tokens = token_field("input_tokens", raw.tokens.input_tokens.or(nested.input_tokens))?;
        let output_tokens =
            token_field("output_tokens", raw.tokens.output_tokens.or(nested.output_tokens))?;
        let cache_read_tokens = token_field(
            "cache_read_tokens",
            raw.tokens.cache_read_tokens.or(nested.cache_read_tokens),
        )?;
        let cache_creation = raw
            .tokens
            .cache_creation_tokens
            .or(nested.cache_creation_tokens);
        let cache_creation_tokens = match cache_creation {
            None if !source.reports_cache_creation() => 0,
            value => token_field("cache_creation_tokens", value)?,
        };

        let ts = raw
            .occurred_at
            .as_deref()
            .ok_or_else(|| IngestError::Malformed("missing timestamp".into()))?;
        let occurred_at = DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| IngestError::Malformed(format!("invalid timestamp '{}': {}", ts, e)))?;

        let (occurred_at, clock_skew) = if occurred_at > now + self.clock_skew_tolerance {
            (now, Some(occurred_at - now))
        } else {
            (occurred_at, None)
        };

        Ok(Normalized {
            event: UsageEvent {
                source,
                model_tier,
                input_tokens,
                output_tokens,
                cache_read_tokens,
                cache_creation_tokens,
                occurred_at,
            },
            clock_skew,
        })
    }
}

fn token_field(name: &str, value: Option<i64>) -> Result<u64, IngestError> {
    match value {
        None => Err(IngestError::Malformed(format!("missing {}", name))),
        Some(v) if v < 0 => Err(IngestError::Malformed(format!("negative {}: {}", name, v))),
        Some(v) => Ok(v as u64),
    }
}
