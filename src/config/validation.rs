use crate::config::types::{BrowserConfig, CheckpointConfig, Config, CrawlBudget, PatternConfig};
use crate::session::ProxyProfile;
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
///
/// Runs once before a crawl starts; any error here means no fetch happens.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_budget(&config.budget)?;
    validate_patterns(&config.patterns)?;
    validate_browser(&config.browser)?;
    if let Some(proxy) = &config.proxy {
        validate_proxy(proxy)?;
    }
    validate_checkpoint(&config.checkpoint)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates a crawl budget
pub fn validate_budget(budget: &CrawlBudget) -> Result<(), ConfigError> {
    if budget.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            budget.max_pages
        )));
    }

    if budget.workers < 1 || budget.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            budget.workers
        )));
    }

    if budget.retry_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "retry_delay_ms must be > 0".to_string(),
        ));
    }

    // 2^attempt overflows long before this in any sane configuration
    if budget.max_retries > 16 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 16, got {}",
            budget.max_retries
        )));
    }

    if budget.page_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "page_timeout_ms must be > 0".to_string(),
        ));
    }

    let thresholds = &budget.stop_thresholds;
    for (name, value) in [
        ("bot_detection", thresholds.bot_detection),
        ("rate_limit", thresholds.rate_limit),
        ("network", thresholds.network),
        ("total", thresholds.total),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "stop threshold '{}' must be >= 1",
                name
            )));
        }
    }

    Ok(())
}

/// Validates deny/allow regexes and domain patterns
fn validate_patterns(patterns: &PatternConfig) -> Result<(), ConfigError> {
    let lists = patterns.deny.iter().chain(patterns.allow.iter());
    for pattern in lists.flatten() {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid regex '{}': {}", pattern, e))
        })?;
    }

    for domain in &patterns.allowed_domains {
        validate_domain_pattern(domain)?;
    }

    Ok(())
}

/// Validates browser launch settings
fn validate_browser(browser: &BrowserConfig) -> Result<(), ConfigError> {
    if browser.debug_port == 0 {
        return Err(ConfigError::Validation(
            "debug_port must be a fixed, non-zero port".to_string(),
        ));
    }

    if browser.startup_checks_ms.is_empty() {
        return Err(ConfigError::Validation(
            "startup_checks_ms must contain at least one offset".to_string(),
        ));
    }

    if browser
        .startup_checks_ms
        .windows(2)
        .any(|pair| pair[0] >= pair[1])
    {
        return Err(ConfigError::Validation(format!(
            "startup_checks_ms must be strictly increasing, got {:?}",
            browser.startup_checks_ms
        )));
    }

    for flag in &browser.flags {
        if !flag.starts_with("--") {
            return Err(ConfigError::Validation(format!(
                "browser flag '{}' must start with '--'",
                flag
            )));
        }
    }

    Ok(())
}

/// Validates the proxy server address
fn validate_proxy(proxy: &ProxyProfile) -> Result<(), ConfigError> {
    let url = Url::parse(&proxy.server)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy server: {}", e)))?;

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Proxy server '{}' has no host",
            proxy.server
        )));
    }

    if proxy.password.is_some() && proxy.username.is_none() {
        return Err(ConfigError::Validation(
            "proxy password given without a username".to_string(),
        ));
    }

    Ok(())
}

fn validate_checkpoint(checkpoint: &CheckpointConfig) -> Result<(), ConfigError> {
    if checkpoint.enabled && checkpoint.path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }
    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    Ok(())
}
