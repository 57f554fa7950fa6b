use reqwest::header::HeaderMap;

use crate::RetryPolicy;

/// Configures transport timeouts, retry behavior and logging.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Time allowed to send the request and receive response headers.
    pub send_timeout_ms: u64,
    /// Maximum gap between response body chunks.
    pub receive_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Emit request/response/error logs. Defaults to on in debug builds only.
    pub debug_logging: bool,
    /// Headers sent with every request.
    pub default_headers: HeaderMap,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            send_timeout_ms: 30_000,
            receive_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            debug_logging: cfg!(debug_assertions),
            default_headers: HeaderMap::new(),
        }
    }
}

impl ClientOptions {
    /// Sets connect, send and receive timeouts to the same value.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self.send_timeout_ms = timeout_ms;
        self.receive_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Applies `API_TIMEOUT_MS`, `API_MAX_RETRIES` and `API_DEBUG_LOGGING`
    /// from the environment on top of `self`.
    ///
    /// Unset variables leave the current value; malformed ones are errors.
    pub fn apply_env(self) -> std::result::Result<Self, String> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> std::result::Result<Self, String> {
        if let Some(value) = lookup("API_TIMEOUT_MS") {
            let timeout_ms = value
                .trim()
                .parse::<u64>()
                .map_err(|err| format!("invalid API_TIMEOUT_MS '{value}': {err}"))?;
            self = self.with_timeout_ms(timeout_ms);
        }
        if let Some(value) = lookup("API_MAX_RETRIES") {
            self.retry.max_attempts = value
                .trim()
                .parse::<u32>()
                .map_err(|err| format!("invalid API_MAX_RETRIES '{value}': {err}"))?;
        }
        if let Some(value) = lookup("API_DEBUG_LOGGING") {
            self.debug_logging = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(format!("invalid API_DEBUG_LOGGING '{value}'")),
            };
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::ClientOptions;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_transport_defaults() {
        let opts = ClientOptions::default();
        assert_eq!(opts.connect_timeout_ms, 30_000);
        assert_eq!(opts.send_timeout_ms, 30_000);
        assert_eq!(opts.receive_timeout_ms, 30_000);
        assert_eq!(opts.retry.max_attempts, 3);
    }

    #[test]
    fn env_overrides_are_applied() {
        let opts = ClientOptions::default()
            .apply_vars(vars(&[
                ("API_TIMEOUT_MS", "500"),
                ("API_MAX_RETRIES", "5"),
                ("API_DEBUG_LOGGING", "off"),
            ]))
            .expect("must apply");
        assert_eq!(opts.send_timeout_ms, 500);
        assert_eq!(opts.retry.max_attempts, 5);
        assert!(!opts.debug_logging);
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let err = ClientOptions::default()
            .apply_vars(vars(&[("API_MAX_RETRIES", "many")]))
            .expect_err("must fail");
        assert!(err.contains("API_MAX_RETRIES"));
    }
}
