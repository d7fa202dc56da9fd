//! URL handling module for Gleaner
//!
//! This module provides URL normalization, site scoping, and the deny/allow
//! pattern filter that decides which discovered links reach the frontier.

mod normalize;
mod patterns;
mod scope;

pub use normalize::normalize_url;
pub use patterns::{
    UrlFilter, UrlVerdict, DEFAULT_ALLOW_PATTERNS, DEFAULT_DENY_PATTERNS, NEUTRAL_SCORE,
};
pub use scope::{extract_domain, matches_wildcard, SiteScope};
