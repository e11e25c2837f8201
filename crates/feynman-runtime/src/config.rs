//! Session configuration: TOML file, then `FEYNMAN_*` environment overrides.
//!
//! ```toml
//! addr = "127.0.0.1:5678"
//! flush_interval_ms = 50
//! grace_period_ms = 2000
//! launch_viewer = true
//! viewer = "file:///opt/feynman/index.html?ws={ws}"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use feynman_server::{DEFAULT_ADDR, DEFAULT_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Viewer endpoint. Port 0 picks an ephemeral port.
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// Run the WebSocket endpoint. When false, events stay in the channel
    /// for whoever called [`Session::take_receiver`](crate::Session::take_receiver).
    #[serde(default = "default_true")]
    pub serve: bool,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Upper bound on how long closing waits for queued events to go out.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Event buffer size, rounded up to a power of two.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_true")]
    pub launch_viewer: bool,
    /// URL or path opened on activation; `{ws}` expands to the endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
    /// Exit the process once the session has terminated.
    #[serde(default = "default_true")]
    pub exit_on_close: bool,
    /// Send the bundled stylesheet and script on activation.
    #[serde(default = "default_true")]
    pub bootstrap: bool,
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5678))
}

fn default_true() -> bool {
    true
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_grace_period_ms() -> u64 {
    2_000
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.parse().unwrap_or_else(|_| default_addr()),
            serve: true,
            flush_interval_ms: default_flush_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            channel_capacity: default_channel_capacity(),
            launch_viewer: true,
            viewer: None,
            exit_on_close: true,
            bootstrap: true,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, SessionError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path).map_err(|source| SessionError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults with the process environment applied.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::default().with_env(|var| std::env::var(var).ok())
    }

    /// Apply `FEYNMAN_ADDR`, `FEYNMAN_VIEWER`, `FEYNMAN_NO_VIEWER` and
    /// `FEYNMAN_FLUSH_MS` read through `lookup`.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SessionError> {
        if let Some(value) = lookup("FEYNMAN_ADDR") {
            self.addr = value.parse().map_err(|_| SessionError::InvalidEnv {
                var: "FEYNMAN_ADDR",
                value,
            })?;
        }
        if let Some(value) = lookup("FEYNMAN_VIEWER") {
            self.viewer = Some(value);
        }
        if let Some(value) = lookup("FEYNMAN_NO_VIEWER") {
            self.launch_viewer = !parse_flag("FEYNMAN_NO_VIEWER", value)?;
        }
        if let Some(value) = lookup("FEYNMAN_FLUSH_MS") {
            self.flush_interval_ms = value.parse().map_err(|_| SessionError::InvalidEnv {
                var: "FEYNMAN_FLUSH_MS",
                value,
            })?;
        }
        Ok(self)
    }

    pub fn to_toml(&self) -> Result<String, SessionError> {
        Ok(toml::to_string(self)?)
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Settings for running inside tests and embedders that consume events
    /// themselves: no server, no viewer, no bootstrap content, no exit.
    pub fn headless() -> Self {
        Self {
            serve: false,
            launch_viewer: false,
            exit_on_close: false,
            bootstrap: false,
            ..Self::default()
        }
    }
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, SessionError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SessionError::InvalidEnv { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, SessionConfig::default());
        assert_eq!(cfg.addr.port(), 5678);
        assert_eq!(cfg.flush_interval(), Duration::from_millis(50));
        assert_eq!(cfg.grace_period(), Duration::from_secs(2));
        assert!(cfg.exit_on_close);
        // Launching is on, but there is nothing to open until one is set.
        assert!(cfg.launch_viewer);
        assert_eq!(cfg.viewer, None);
    }

    #[test]
    fn toml_overrides_fields() {
        let cfg = SessionConfig::from_toml_str(
            r#"
            addr = "127.0.0.1:0"
            flush_interval_ms = 10
            viewer = "http://localhost:8000/?ws={ws}"
            exit_on_close = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.addr.port(), 0);
        assert_eq!(cfg.flush_interval_ms, 10);
        assert_eq!(cfg.viewer.as_deref(), Some("http://localhost:8000/?ws={ws}"));
        assert!(!cfg.exit_on_close);
        assert!(cfg.serve);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SessionConfig::from_toml_str("port = 5678").unwrap_err();
        assert!(matches!(err, SessionError::ConfigParse(_)));
    }

    #[test]
    fn env_overlay() {
        let cfg = SessionConfig::default()
            .with_env(env(&[
                ("FEYNMAN_ADDR", "0.0.0.0:9000"),
                ("FEYNMAN_NO_VIEWER", "1"),
                ("FEYNMAN_FLUSH_MS", "5"),
            ]))
            .unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:9000".parse().unwrap());
        assert!(!cfg.launch_viewer);
        assert_eq!(cfg.flush_interval_ms, 5);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let err = SessionConfig::default()
            .with_env(env(&[("FEYNMAN_FLUSH_MS", "soon")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value \"soon\" for FEYNMAN_FLUSH_MS");
    }

    #[test]
    fn renders_back_to_toml() {
        let cfg = SessionConfig::headless();
        let text = cfg.to_toml().unwrap();
        assert!(text.contains("serve = false"));
        assert!(!text.lines().any(|l| l.starts_with("viewer")));
        assert_eq!(SessionConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feynman.toml");
        std::fs::write(&path, "grace_period_ms = 100\n").unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap().grace_period_ms, 100);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            SessionConfig::load(&missing),
            Err(SessionError::ConfigRead { .. })
        ));
    }
}
