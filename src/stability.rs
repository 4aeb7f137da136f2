//! Waits for a page to stop mutating.

use std::time::Duration;
use tracing::{debug, trace};

use crate::error::Result;
use crate::surface::Surface;

/// blake3 digest of the full markup, hex encoded.
pub fn fingerprint(markup: &str) -> String {
    blake3::hash(markup.as_bytes()).to_hex().to_string()
}

/// Polls `surface` until `required_matches` consecutive polls return the same
/// fingerprint as the poll before them.
///
/// There is no upper bound on how long this runs. The first poll never counts
/// as a match, so the best case is `required_matches + 1` fetches. Use
/// [`await_stability_within`] when a deadline is needed.
pub async fn await_stability(
    surface: &dyn Surface,
    poll_interval_ms: u64,
    required_matches: u32,
) -> Result<bool> {
    let interval = Duration::from_millis(poll_interval_ms);
    let mut last: Option<String> = None;
    let mut matches = 0u32;
    let mut polls = 0u64;

    while matches < required_matches {
        tokio::time::sleep(interval).await;
        let current = fingerprint(&surface.content().await?);
        polls += 1;
        if last.as_deref() == Some(current.as_str()) {
            matches += 1;
        } else {
            matches = 0;
        }
        trace!(polls, matches, "stability poll");
        last = Some(current);
    }

    debug!(polls, "page content stable");
    Ok(true)
}

/// Like [`await_stability`] but gives up after `deadline`, returning `false`.
pub async fn await_stability_within(
    surface: &dyn Surface,
    poll_interval_ms: u64,
    required_matches: u32,
    deadline: Duration,
) -> Result<bool> {
    match tokio::time::timeout(
        deadline,
        await_stability(surface, poll_interval_ms, required_matches),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            debug!(?deadline, "page did not stabilize before deadline");
            Ok(false)
        }
    }
}
