//! Lifecycle observers for page sessions

use crate::session::PageSession;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use url::Url;

/// Error reported by an observer hook
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Points in a page session's life at which observers run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePoint {
    Create,
    BeforeNavigate,
    AfterNavigate,
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "on_create",
            Self::BeforeNavigate => "before_navigate",
            Self::AfterNavigate => "after_navigate",
        };
        f.write_str(name)
    }
}

/// Hooks invoked synchronously at session lifecycle points
///
/// Every hook defaults to a no-op, so implementors override only what they
/// need. A hook's failure, or a panic inside it, is reported back but never
/// stops later observers.
pub trait SessionObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_create(&self, _session: &PageSession) -> Result<(), ObserverError> {
        Ok(())
    }

    fn before_navigate(&self, _session: &PageSession, _url: &Url) -> Result<(), ObserverError> {
        Ok(())
    }

    fn after_navigate(
        &self,
        _session: &PageSession,
        _url: &Url,
        _succeeded: bool,
    ) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// What one observer reported at one lifecycle point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverOutcome {
    pub observer: String,
    pub point: LifecyclePoint,
    /// `None` on success, otherwise the error message
    pub error: Option<String>,
}

impl ObserverOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Observers in registration order
#[derive(Clone, Default)]
pub struct ObserverList {
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer; it runs after every observer registered before it
    pub fn register(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Runs every observer's hook for `point`, in order
    ///
    /// # Arguments
    ///
    /// * `point` - Which hook to run
    /// * `session` - The session the hook is about
    /// * `navigation` - Target URL and outcome; required by the navigate hooks
    ///
    /// # Returns
    ///
    /// One outcome per registered observer, in registration order
    pub fn notify(
        &self,
        point: LifecyclePoint,
        session: &PageSession,
        navigation: Option<(&Url, bool)>,
    ) -> Vec<ObserverOutcome> {
        self.observers
            .iter()
            .map(|observer| {
                let result = catch_unwind(AssertUnwindSafe(|| match (point, navigation) {
                    (LifecyclePoint::Create, _) => observer.on_create(session),
                    (LifecyclePoint::BeforeNavigate, Some((url, _))) => {
                        observer.before_navigate(session, url)
                    }
                    (LifecyclePoint::AfterNavigate, Some((url, succeeded))) => {
                        observer.after_navigate(session, url, succeeded)
                    }
                    (_, None) => Ok(()),
                }));

                let error = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
                };
                if let Some(message) = &error {
                    tracing::warn!(
                        "Observer '{}' failed at {} for session {}: {}",
                        observer.name(),
                        point,
                        session.id,
                        message
                    );
                }

                ObserverOutcome {
                    observer: observer.name().to_string(),
                    point,
                    error,
                }
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Traces every lifecycle hook
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_create(&self, session: &PageSession) -> Result<(), ObserverError> {
        tracing::debug!(
            "Session {} created on target {} ({}x{})",
            session.id,
            session.target_id,
            session.viewport.width,
            session.viewport.height
        );
        Ok(())
    }

    fn before_navigate(&self, session: &PageSession, url: &Url) -> Result<(), ObserverError> {
        tracing::debug!("Session {} navigating to {}", session.id, url);
        Ok(())
    }

    fn after_navigate(
        &self,
        session: &PageSession,
        url: &Url,
        succeeded: bool,
    ) -> Result<(), ObserverError> {
        tracing::debug!(
            "Session {} finished {} ({})",
            session.id,
            url,
            if succeeded { "ok" } else { "failed" }
        );
        Ok(())
    }
}
