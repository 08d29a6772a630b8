use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application that produced a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Claude,
    Codex,
    VertexAi,
}

impl Source {
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "claude" | "claude_code" | "claude-code" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "vertex_ai" | "vertex-ai" | "vertexai" => Some(Self::VertexAi),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::VertexAi => "vertex_ai",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::VertexAi => "Vertex AI",
        }
    }

    /// Whether this producer reports cache-creation tokens at all.
    pub fn reports_cache_creation(&self) -> bool {
        !matches!(self, Self::Codex)
    }

    pub fn all() -> &'static [Source] {
        &[Source::Claude, Source::Codex, Source::VertexAi]
    }
}

/// Model tier a weekly quota is tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Lower-cost tier (tier-1), e.g. Sonnet or Haiku.
    Standard,
    /// Higher-cost tier (tier-2), e.g. Opus.
    Premium,
}

impl ModelTier {
    /// Resolve a tier from its id or from a model name.
    ///
    /// Model names are matched by family: `opus` maps to premium, `sonnet` and
    /// `haiku` to standard. Anything else is unknown.
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.to_lowercase();
        match id.as_str() {
            "standard" | "tier-1" | "tier1" | "tier_1" => return Some(Self::Standard),
            "premium" | "tier-2" | "tier2" | "tier_2" => return Some(Self::Premium),
            _ => {}
        }
        if id.contains("opus") {
            Some(Self::Premium)
        } else if id.contains("sonnet") || id.contains("haiku") {
            Some(Self::Standard)
        } else {
            None
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::Premium => "Premium",
        }
    }

    pub fn all() -> &'static [ModelTier] {
        &[ModelTier::Standard, ModelTier::Premium]
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Canonical, validated token-usage event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub source: Source,
    pub model_tier: ModelTier,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub occurred_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }
}
