//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client can start with zero
//! configuration against a coordinator on localhost.

use std::path::PathBuf;
use std::time::Duration;

use canopy_net::LinkConfig;
use canopy_shared::constants::DEFAULT_COORDINATOR_PORT;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the coordinator.
    /// Env: `COORDINATOR_ADDR`
    /// Default: `127.0.0.1:7300`
    pub coordinator_addr: String,

    /// Identity of this client process; scopes `is_current` in the registry.
    /// Env: `CLIENT_ID`
    /// Default: a fresh UUID per process.
    pub client_id: String,

    /// Registry database file.
    /// Env: `DB_PATH`
    /// Default: `None` (platform data directory).
    pub db_path: Option<PathBuf>,

    /// User registered and made current at startup, if any.
    /// Env: `CANOPY_USER_ID`, `CANOPY_USERNAME`
    pub startup_user: Option<(String, String)>,

    /// Repeated logouts for the same user within this window are no-ops.
    /// Env: `LOGOUT_DEDUP_WINDOW_SECS`
    pub logout_dedup_window: Duration,

    /// Crude barrier after writing a cookie before navigating.
    /// Env: `COOKIE_COMMIT_GRACE_MS`
    pub cookie_commit_grace: Duration,

    /// Crude barrier after opening a surface before re-applying the cookie.
    /// Env: `SURFACE_READY_GRACE_MS`
    pub surface_ready_grace: Duration,

    /// Crude barrier between sending logout feedback and resetting the link.
    /// Env: `FEEDBACK_FLUSH_GRACE_MS`
    pub feedback_flush_grace: Duration,

    /// Upper bound on the best-effort logout API call.
    /// Env: `LOGOUT_API_TIMEOUT_SECS`
    pub logout_api_timeout: Duration,

    /// How long the validation notice stays on screen.
    pub notice_duration: Duration,

    /// Name of the cookie carrying the handed-off session.
    /// Env: `SESSION_COOKIE_NAME`
    pub session_cookie_name: String,

    /// Path fragments that mark a surface as logged in.
    /// Env: `AUTHENTICATED_PATH_MARKERS` (comma separated)
    pub authenticated_path_markers: Vec<String>,

    /// Path fragments that mark a login page; these win over the above.
    /// Env: `LOGIN_PATH_MARKERS` (comma separated)
    pub login_path_markers: Vec<String>,

    /// Pause between coordinator reconnect attempts.
    /// Env: `RECONNECT_DELAY_SECS`
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: format!("127.0.0.1:{DEFAULT_COORDINATOR_PORT}"),
            client_id: uuid::Uuid::new_v4().to_string(),
            db_path: None,
            startup_user: None,
            logout_dedup_window: Duration::from_secs(10),
            cookie_commit_grace: Duration::from_millis(200),
            surface_ready_grace: Duration::from_millis(500),
            feedback_flush_grace: Duration::from_millis(100),
            logout_api_timeout: Duration::from_secs(5),
            notice_duration: Duration::from_secs(3),
            session_cookie_name: "session".to_string(),
            authenticated_path_markers: ["/dashboard", "/home", "/workspace", "/account", "/app"]
                .map(String::from)
                .to_vec(),
            login_path_markers: ["/login", "/signin", "/sign-in", "/auth"]
                .map(String::from)
                .to_vec(),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("COORDINATOR_ADDR") {
            config.coordinator_addr = addr;
        }

        if let Some(id) = lookup("CLIENT_ID").filter(|id| !id.is_empty()) {
            config.client_id = id;
        }

        if let Some(path) = lookup("DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(user_id) = lookup("CANOPY_USER_ID").filter(|id| !id.is_empty()) {
            let username = lookup("CANOPY_USERNAME").unwrap_or_else(|| user_id.clone());
            config.startup_user = Some((user_id, username));
        }

        // -- Session flow timings --

        if let Some(secs) = parse_u64(&lookup, "LOGOUT_DEDUP_WINDOW_SECS") {
            config.logout_dedup_window = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&lookup, "COOKIE_COMMIT_GRACE_MS") {
            config.cookie_commit_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "SURFACE_READY_GRACE_MS") {
            config.surface_ready_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "FEEDBACK_FLUSH_GRACE_MS") {
            config.feedback_flush_grace = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64(&lookup, "LOGOUT_API_TIMEOUT_SECS") {
            config.logout_api_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "RECONNECT_DELAY_SECS") {
            config.reconnect_delay = Duration::from_secs(secs);
        }

        // -- Surface heuristics --

        if let Some(name) = lookup("SESSION_COOKIE_NAME").filter(|n| !n.is_empty()) {
            config.session_cookie_name = name;
        }
        if let Some(list) = lookup("AUTHENTICATED_PATH_MARKERS") {
            config.authenticated_path_markers = parse_list(&list);
        }
        if let Some(list) = lookup("LOGIN_PATH_MARKERS") {
            config.login_path_markers = parse_list(&list);
        }

        config
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            coordinator_addr: self.coordinator_addr.clone(),
            reconnect_delay: self.reconnect_delay,
        }
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            None
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
