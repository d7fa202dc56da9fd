//! Deny/allow URL patterns and priority scoring

use crate::ConfigError;
use regex::{Regex, RegexSet};
use url::Url;

/// Priority given to seeds and to links that match no allow pattern
pub const NEUTRAL_SCORE: f64 = 0.5;

const ALLOW_BOOST: f64 = 0.3;
const DEPTH_PENALTY: f64 = 0.05;
const MIN_SCORE: f64 = 0.1;

/// Path shapes that are never fetched
///
/// People/bio pages, blog/news, careers, events, legal/policy, support,
/// individual case studies and bulk downloads are the pages sites use as
/// bot traps and that rarely carry the content a crawl is after.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"/(team|our-team|people|leadership|management|board|staff|bios?|authors?)(/|$)",
    r"/(blog|blogs|news|newsroom|press|press-releases|media|articles)(/|$)",
    r"/(careers?|jobs|vacancies|join-us|hiring)(/|$)",
    r"/(events?|webinars?|conferences?)(/|$)",
    r"/(legal|privacy|privacy-policy|terms|terms-of-service|terms-and-conditions|cookies?|cookie-policy|imprint|disclaimer|gdpr)(/|$)",
    r"/(support|help|faqs?|knowledge-base|kb)(/|$)",
    r"/(case-studies|case-study|customer-stories|success-stories)/[^/]+",
    r"/(downloads?)(/|$)",
    r"\.(zip|pdf|tar|gz|tgz|rar|7z|exe|dmg|iso|csv|xlsx?|docx?|pptx?)$",
];

/// Path shapes that raise a link's priority
pub const DEFAULT_ALLOW_PATTERNS: &[&str] = &[
    r"/(products?|services?|solutions?|offerings?|capabilities)(/|$)",
    r"/(industries|industry|sectors?|markets?)(/|$)",
    r"/(about|about-us|company|who-we-are)(/|$)",
    r"/(platform|features?|technology|pricing)(/|$)",
];

/// Outcome of scoring a URL
#[derive(Debug, Clone, PartialEq)]
pub enum UrlVerdict {
    /// Matched a deny pattern; excluded from the frontier
    Denied { pattern: String },
    /// Admissible with the given priority (higher is fetched first)
    Admit { score: f64 },
}

impl UrlVerdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Admit { score } => Some(*score),
            Self::Denied { .. } => None,
        }
    }
}

/// Compiled deny and allow pattern lists
#[derive(Debug, Clone)]
pub struct UrlFilter {
    deny: RegexSet,
    deny_sources: Vec<String>,
    allow: Vec<Regex>,
}

impl UrlFilter {
    /// Compiles the given pattern lists
    pub fn new<D, A>(deny: D, allow: A) -> Result<Self, ConfigError>
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        let deny_sources: Vec<String> = deny.into_iter().map(|p| p.as_ref().to_string()).collect();
        let deny = RegexSet::new(&deny_sources)
            .map_err(|e| ConfigError::InvalidPattern(format!("deny pattern: {}", e)))?;

        let allow = allow
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    ConfigError::InvalidPattern(format!("allow pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            deny,
            deny_sources,
            allow,
        })
    }

    /// Builds a filter from optional overrides, falling back to the built-in lists
    pub fn from_config(
        deny: Option<&[String]>,
        allow: Option<&[String]>,
    ) -> Result<Self, ConfigError> {
        match (deny, allow) {
            (Some(d), Some(a)) => Self::new(d, a),
            (Some(d), None) => Self::new(d, DEFAULT_ALLOW_PATTERNS),
            (None, Some(a)) => Self::new(DEFAULT_DENY_PATTERNS, a),
            (None, None) => Self::new(DEFAULT_DENY_PATTERNS, DEFAULT_ALLOW_PATTERNS),
        }
    }

    /// Returns the first deny pattern the URL's path matches
    pub fn denied_by(&self, url: &Url) -> Option<&str> {
        let path = url.path().to_lowercase();
        self.deny
            .matches(&path)
            .iter()
            .next()
            .map(|i| self.deny_sources[i].as_str())
    }

    /// Scores a URL found at `depth`
    ///
    /// Deny is checked first and wins over any allow match.
    pub fn score(&self, url: &Url, depth: u32) -> UrlVerdict {
        if let Some(pattern) = self.denied_by(url) {
            return UrlVerdict::Denied {
                pattern: pattern.to_string(),
            };
        }

        let path = url.path().to_lowercase();
        let hits = self.allow.iter().filter(|re| re.is_match(&path)).count();

        let boosted = (NEUTRAL_SCORE + ALLOW_BOOST * hits as f64).min(1.0);
        let score = (boosted - DEPTH_PENALTY * depth as f64).max(MIN_SCORE);

        UrlVerdict::Admit { score }
    }
}

impl Default for UrlFilter {
    fn default() -> Self {
        // The built-in lists are static and covered by tests
        Self::from_config(None, None).unwrap_or_else(|_| Self {
            deny: RegexSet::empty(),
            deny_sources: Vec::new(),
            allow: Vec::new(),
        })
    }
}
