/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Sends the request built by `build`, retrying transport errors, 429 and 5xx with jittered
/// exponential backoff. The last response (whatever its status) or the last error is returned.
pub async fn send_with_retry<F>(mut build: F, attempts: u32) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = attempts.clamp(1, 5);
    let mut backoff = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match build().send().await {
            Ok(resp) => {
                if should_retry_status(resp.status()) && attempt < max_attempts {
                    sleep_with_jitter(backoff).await;
                    backoff = backoff.saturating_mul(2).min(Duration::from_secs(5));
                    continue;
                }
                return Ok(resp);
            }
            Err(e) => {
                // A request that cannot be built (e.g. unsupported scheme) will never succeed.
                if e.is_builder() || attempt >= max_attempts {
                    return Err(e);
                }
                sleep_with_jitter(backoff).await;
                backoff = backoff.saturating_mul(2).min(Duration::from_secs(5));
            }
        }
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}
