//! Browser selection and launching.

use std::collections::BTreeMap;

/// Pick the browser for `os` (as in `std::env::consts::OS`).
///
/// An entry keyed by the OS name wins over the `default` entry.
pub fn select_browser<'a>(browsers: &'a BTreeMap<String, String>, os: &str) -> Option<&'a str> {
    browsers
        .get(os)
        .or_else(|| browsers.get("default"))
        .map(String::as_str)
        .filter(|name| !name.trim().is_empty())
}

/// Open `url`, in `browser` when given.
///
/// Failures are logged; a missing browser never stops the caller.
pub fn open_browser(url: &str, browser: Option<&str>) {
    let result = match browser {
        Some(app) => open::with(url, app),
        None => open::that(url),
    };

    match result {
        Ok(()) => tracing::debug!("Opened {} in {}", url, browser.unwrap_or("default browser")),
        Err(e) => tracing::warn!("Could not open {}: {}", url, e),
    }
}
