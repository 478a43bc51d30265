use std::time::Duration;

use anyhow::{Context, Result};

/// Build the client used for completion calls.
///
/// `CODER_BUDDY_ENABLE_SYSTEM_PROXY=1` opts into system proxy discovery; the
/// default is a direct connection.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("CODER_BUDDY_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        match attempt_build(timeout, false) {
            Ok(client) => return Ok(client),
            Err(error) => tracing::warn!(
                "HTTP client initialization with system proxy failed ({}); retrying with no_proxy",
                error
            ),
        }
    }

    attempt_build(timeout, true).context("Failed to initialize HTTP client")
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
