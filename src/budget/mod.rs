pub mod compress;

pub use compress::{compress, Compressed, CompressionStrategy};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Token budget exceeded: requested {requested}, remaining {remaining} of {limit}")]
    Exceeded {
        requested: usize,
        remaining: usize,
        limit: usize,
    },

    #[error("Cannot fit {path} into {budget} tokens")]
    CompressionRejected { path: String, budget: usize },
}

/// Text-generation provider; drives token estimation and context size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
    /// Small self-hosted models
    Local,
}

impl Provider {
    /// Tokens per character of text. Stricter providers get a more
    /// conservative (larger) ratio so estimates overshoot rather than undershoot.
    pub fn tokens_per_char(&self) -> f64 {
        match self {
            Provider::OpenAi => 0.25,
            Provider::Anthropic => 0.3,
            Provider::Gemini => 0.25,
            Provider::Local => 0.35,
        }
    }

    /// Total context window in tokens (input + output).
    pub fn context_window(&self) -> usize {
        match self {
            Provider::OpenAi => 128_000,
            Provider::Anthropic => 200_000,
            Provider::Gemini => 1_000_000,
            Provider::Local => 8_192,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
            Provider::Gemini => write!(f, "gemini"),
            Provider::Local => write!(f, "local"),
        }
    }
}

/// Estimated model tokens for `text`:
/// `ceil(max(words * 1.3, chars * tokens_per_char))`.
pub fn estimate_tokens(text: &str, provider: Provider) -> usize {
    if text.is_empty() {
        return 0;
    }
    let words = text.split_whitespace().count() as f64 * 1.3;
    let chars = text.chars().count() as f64 * provider.tokens_per_char();
    words.max(chars).ceil() as usize
}

/// A spend-only token allowance. `used` never exceeds `limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBudget {
    limit: usize,
    used: usize,
}

impl TokenBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }

    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.remaining()
    }

    /// Spend `tokens`, or leave the budget untouched and fail.
    pub fn consume(&mut self, tokens: usize) -> Result<(), BudgetError> {
        if !self.fits(tokens) {
            return Err(BudgetError::Exceeded {
                requested: tokens,
                remaining: self.remaining(),
                limit: self.limit,
            });
        }
        self.used += tokens;
        Ok(())
    }
}
