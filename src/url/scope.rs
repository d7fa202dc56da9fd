use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use gleaner::url::extract_domain;
///
/// let url = Url::parse("https://Shop.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("shop.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks if a domain matches a pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any subdomain at any depth.
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || (candidate.len() > base.len()
                    && candidate.ends_with(base)
                    && candidate.as_bytes()[candidate.len() - base.len() - 1] == b'.')
        }
        None => candidate == pattern,
    }
}

/// The set of domains discovered links are allowed to stay within
#[derive(Debug, Clone, Default)]
pub struct SiteScope {
    patterns: Vec<String>,
}

impl SiteScope {
    /// A scope that admits every domain
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// A scope built from explicit domain patterns
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(|p| p.into().to_lowercase()).collect(),
        }
    }

    /// Adds the exact domain of a seed URL to the scope
    pub fn include_seed(&mut self, seed: &Url) {
        if let Some(domain) = extract_domain(seed) {
            if !self.patterns.contains(&domain) {
                self.patterns.push(domain);
            }
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if the URL's domain is inside the scope
    pub fn contains(&self, url: &Url) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        match extract_domain(url) {
            Some(domain) => self.patterns.iter().any(|p| matches_wildcard(p, &domain)),
            None => false,
        }
    }
}
