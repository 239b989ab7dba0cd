//! Heuristics that catch full-file rewrites which are not really the file.
//!
//! A large existing file replaced by something much shorter is suspicious
//! when the new text is generic boilerplate, elides the original with
//! "rest of code" markers, or drops most of the original's declared names.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::HallucinationConfig;
use crate::source::extract_identifiers;

static LAZY_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(?://|#|/\*|<!--|\{/\*)\s*\.\.\.?\s*(?:rest|existing|remaining|previous|other|unchanged)\b|(?://|#)\s*(?:rest of (?:the )?(?:code|file)|existing code|unchanged|same as before)\b|^\s*\.\.\.\s*$",
    )
    .expect("LAZY_MARKER_RE regex should compile")
});

static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)hello,?\s+world|lorem ipsum|your (?:code|content) here|todo:?\s*implement|placeholder (?:text|content|component)|welcome to (?:react|next\.js|vue|your)|edit src/app",
    )
    .expect("BOILERPLATE_RE regex should compile")
});

/// Measurements taken for one rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteStats {
    pub original_lines: usize,
    pub new_lines: usize,
    /// Fraction of the original's identifiers still present (1.0 when it had none)
    pub preserved: f64,
    pub boilerplate: bool,
    pub elided: bool,
}

impl RewriteStats {
    pub fn measure(original: &str, proposed: &str) -> Self {
        let before = extract_identifiers(original);
        let after = extract_identifiers(proposed);
        let preserved = if before.is_empty() {
            1.0
        } else {
            before.intersection(&after).count() as f64 / before.len() as f64
        };
        Self {
            original_lines: original.lines().count(),
            new_lines: proposed.lines().count(),
            preserved,
            boilerplate: BOILERPLATE_RE.is_match(proposed) && !BOILERPLATE_RE.is_match(original),
            elided: LAZY_MARKER_RE.is_match(proposed) && !LAZY_MARKER_RE.is_match(original),
        }
    }

    /// New line count over old line count.
    pub fn size_ratio(&self) -> f64 {
        if self.original_lines == 0 {
            return 1.0;
        }
        self.new_lines as f64 / self.original_lines as f64
    }
}

/// Thresholds for rejecting full-content rewrites of existing files.
#[derive(Debug, Clone, PartialEq)]
pub struct HallucinationCheck {
    /// Files at or below this many lines are never judged
    pub min_lines: usize,
    /// Minimum identifier preservation for a shrinking rewrite
    pub identifier_preservation: f64,
    /// A rewrite whose size ratio falls below this counts as shrinking
    pub shrink_ratio: f64,
}

impl Default for HallucinationCheck {
    fn default() -> Self {
        Self::from(&HallucinationConfig::default())
    }
}

impl From<&HallucinationConfig> for HallucinationCheck {
    fn from(config: &HallucinationConfig) -> Self {
        Self {
            min_lines: config.min_lines,
            identifier_preservation: config.identifier_preservation,
            shrink_ratio: config.shrink_ratio,
        }
    }
}

impl HallucinationCheck {
    /// `Err(reason)` when the rewrite looks fabricated.
    pub fn check(&self, original: &str, proposed: &str) -> Result<RewriteStats, String> {
        let stats = RewriteStats::measure(original, proposed);
        if stats.original_lines <= self.min_lines {
            return Ok(stats);
        }
        let shrinking = stats.size_ratio() < self.shrink_ratio;
        if stats.elided {
            return Err(format!(
                "rewrite elides original content with placeholder markers ({} → {} lines)",
                stats.original_lines, stats.new_lines
            ));
        }
        if shrinking && stats.boilerplate {
            return Err(format!(
                "rewrite replaces {} lines with {} lines of generic boilerplate",
                stats.original_lines, stats.new_lines
            ));
        }
        if shrinking && stats.preserved < self.identifier_preservation {
            return Err(format!(
                "rewrite keeps {:.0}% of the original identifiers and shrinks {} → {} lines",
                stats.preserved * 100.0,
                stats.original_lines,
                stats.new_lines
            ));
        }
        Ok(stats)
    }
}
