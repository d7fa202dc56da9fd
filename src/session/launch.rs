//! Launch flag assembly and staged startup checks

use crate::config::BrowserConfig;
use crate::session::driver::{BrowserDriver, ProcessHandle};
use crate::session::{ProxyProfile, SessionError};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum characters of process output carried by a startup diagnostic
pub const DIAGNOSTIC_LIMIT: usize = 200;

/// Flags every launched browser starts with
pub const BASE_FLAGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-dev-shm-usage",
    "--disable-popup-blocking",
    "--disable-blink-features=AutomationControlled",
    "--mute-audio",
];

/// Builds the launch flags: base, then proxy, then user flags
///
/// Later duplicates of a flag are dropped, so a user flag cannot override
/// a base or proxy flag of the same name.
pub fn assemble_flags(browser: &BrowserConfig, proxy: Option<&ProxyProfile>) -> Vec<String> {
    let mut flags: Vec<String> = BASE_FLAGS.iter().map(|f| f.to_string()).collect();

    if browser.headless {
        flags.push("--headless=new".to_string());
    }
    flags.push(format!("--remote-debugging-port={}", browser.debug_port));
    if let Some(dir) = &browser.user_data_dir {
        flags.push(format!("--user-data-dir={}", dir.display()));
    }

    if let Some(proxy) = proxy {
        flags.push(proxy.server_flag());
    }

    flags.extend(browser.flags.iter().cloned());

    dedupe_flags(flags)
}

/// Removes repeated flags, keeping the first occurrence in order
///
/// Two flags are the same if their names (the part before any `=`) match.
pub fn dedupe_flags<I>(flags: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    flags
        .into_iter()
        .filter(|flag| seen.insert(flag_name(flag).to_string()))
        .collect()
}

fn flag_name(flag: &str) -> &str {
    flag.split_once('=').map_or(flag, |(name, _)| name)
}

/// Truncates captured output to [`DIAGNOSTIC_LIMIT`] characters
pub fn truncate_diagnostic(output: &str) -> String {
    output.trim().chars().take(DIAGNOSTIC_LIMIT).collect()
}

/// Checks the freshly spawned process at each offset after `spawned_at`
///
/// At every stage the process must still be alive. The run is ready as soon
/// as the control socket answers; if it never does within the window, or the
/// process dies first, the captured output becomes the failure diagnostic.
pub async fn run_startup_checks(
    process: &mut dyn ProcessHandle,
    driver: &dyn BrowserDriver,
    debug_port: u16,
    spawned_at: Instant,
    offsets_ms: &[u64],
) -> Result<(), SessionError> {
    for &offset in offsets_ms {
        tokio::time::sleep_until(spawned_at + Duration::from_millis(offset)).await;

        if !process.is_alive() {
            tracing::error!("Browser exited {}ms after spawn", offset);
            return Err(SessionError::BrowserStartupFailed {
                diagnostic: truncate_diagnostic(&process.captured_output()),
            });
        }

        match driver.check_endpoint(debug_port).await {
            Ok(()) => {
                tracing::debug!("Control socket on port {} ready after {}ms", debug_port, offset);
                return Ok(());
            }
            Err(e) => {
                tracing::debug!("Startup check at {}ms: control socket not ready: {}", offset, e);
            }
        }
    }

    tracing::error!(
        "Control socket on port {} did not answer within the startup window",
        debug_port
    );
    Err(SessionError::BrowserStartupFailed {
        diagnostic: truncate_diagnostic(&process.captured_output()),
    })
}
