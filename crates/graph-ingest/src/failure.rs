//! Provider failure classification.
//!
//! The graph engine surfaces provider errors as opaque strings. We sort them
//! into three buckets: rate limits (the sync should pause and resume later),
//! infrastructure failures (HTML error pages, exhausted workers; the whole
//! sync should stop), and everything else (surfaced verbatim).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Fallback pause when the provider gives no reset information.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

static ACCESS_RESET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"You will regain access on (\d{4}-\d{2}-\d{2}) at (\d{2}:\d{2}) UTC").unwrap()
});
static RETRY_AFTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry[- ]?after[:\s]+(\d+)").unwrap());
static HTML_ERROR_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Error (\d+)").unwrap());

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited {
        retry_after_secs: u64,
        /// ISO 8601 reset instant when the provider named one.
        reset_time: Option<String>,
        /// Leading line of the provider message, unmodified.
        provider_message: String,
    },
    /// Non-JSON (HTML) reply or explicit resource exhaustion; never retried.
    Infrastructure { provider_message: String },
    Other,
}

/// Classify a provider error message against the current clock.
pub fn classify_provider_error(message: &str) -> FailureKind {
    classify_provider_error_at(message, Utc::now())
}

/// Clock-injected variant for deterministic tests.
pub fn classify_provider_error_at(message: &str, now: DateTime<Utc>) -> FailureKind {
    if is_infrastructure(message) {
        return FailureKind::Infrastructure {
            provider_message: infrastructure_summary(message),
        };
    }

    let lowered = message.to_lowercase();
    let rate_limited = lowered.contains("http/1.1 400 bad request")
        || lowered.contains("rate limit")
        || lowered.contains("too many requests")
        || lowered.contains("usage limits");
    if !rate_limited {
        return FailureKind::Other;
    }

    let mut retry_after_secs = DEFAULT_RETRY_AFTER_SECS;
    let mut reset_time = None;

    if let Some(caps) = ACCESS_RESET.captures(message) {
        let stamp = format!("{} {}", &caps[1], &caps[2]);
        if let Ok(naive) = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M") {
            let reset = Utc.from_utc_datetime(&naive);
            if reset > now {
                retry_after_secs = (reset - now).num_seconds().max(0) as u64;
                reset_time = Some(reset.to_rfc3339());
            }
        }
    }

    if retry_after_secs == DEFAULT_RETRY_AFTER_SECS {
        if let Some(caps) = RETRY_AFTER.captures(message) {
            if let Ok(seconds) = caps[1].parse::<u64>() {
                retry_after_secs = seconds;
            }
        }
    }

    FailureKind::RateLimited {
        retry_after_secs,
        reset_time,
        provider_message: message.lines().next().unwrap_or_default().to_string(),
    }
}

fn is_infrastructure(message: &str) -> bool {
    let trimmed = message.trim_start();
    trimmed.starts_with("<!DOCTYPE html>")
        || trimmed.starts_with("<html")
        || message.contains("<!DOCTYPE html>")
        || message.contains("<html")
        || message.to_lowercase().contains("worker exceeded resource limits")
}

/// Reduce an HTML error page to a one-line summary.
fn infrastructure_summary(message: &str) -> String {
    let exceeded = message.to_lowercase().contains("worker exceeded resource limits");
    let code = HTML_ERROR_CODE.captures(message).map(|caps| caps[1].to_string());
    match (code, exceeded) {
        (Some(code), true) => {
            format!("Provider infrastructure error: Error {code} - Worker exceeded resource limits")
        }
        (Some(code), false) => format!("Provider infrastructure error: Error {code}"),
        (None, true) => "Provider infrastructure error: Worker exceeded resource limits".to_string(),
        (None, false) => {
            "Provider infrastructure error: HTML error page detected - Service temporarily unavailable"
                .to_string()
        }
    }
}
