//! Proxy and fingerprint profiles applied to page sessions

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User agent used when no stealth profile supplies one
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// An upstream proxy
///
/// Only `server` is ever placed on the browser command line. The credentials
/// reach the browser as answers to `Fetch.authRequired` challenges on each
/// page, or as basic auth on the plain-HTTP client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyProfile {
    /// Proxy address, e.g. `http://proxy.internal:8080`
    pub server: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyProfile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// The `--proxy-server` launch flag, carrying the address only
    pub fn server_flag(&self) -> String {
        format!("--proxy-server={}", self.server)
    }

    /// Username and password, if a username is set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }
}

impl fmt::Debug for ProxyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyProfile")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Browser window dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

/// Fingerprint settings for a page session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthProfile {
    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub viewport: Option<Viewport>,
}

impl StealthProfile {
    /// Picks one profile uniformly at random
    pub fn pick(profiles: &[StealthProfile]) -> Option<&StealthProfile> {
        profiles.choose(&mut rand::rng())
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport.unwrap_or_default()
    }
}
