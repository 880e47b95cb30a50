//! Logging setup and secret redaction.

use lazy_static::lazy_static;
use regex::Regex;
use tracing_subscriber::EnvFilter;

lazy_static! {
    static ref SECRET_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"sk-[A-Za-z0-9_-]+").expect("valid regex"),
        Regex::new(r"AIza[0-9A-Za-z_-]+").expect("valid regex"),
        Regex::new(r"ya29\.[0-9A-Za-z_.-]+").expect("valid regex"),
        Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+").expect("valid regex"),
    ];
    static ref URL_PASSWORD: Regex =
        Regex::new(r"(://[^:/@\s]+:)[^@\s]+@").expect("valid regex");
}

/// Mask API keys, OAuth tokens and URL passwords in text bound for logs
/// or error payloads.
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        out = pattern
            .replace_all(&out, |caps: &regex::Captures| match caps.get(1) {
                Some(prefix) => format!("{}[REDACTED]", prefix.as_str()),
                None => "[REDACTED]".to_string(),
            })
            .into_owned();
    }
    URL_PASSWORD.replace_all(&out, "${1}***@").into_owned()
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
