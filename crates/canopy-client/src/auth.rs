//! Auto-login and logout handoff between the coordinator and target sites.
//!
//! Both flows always answer with a feedback envelope that echoes the user,
//! site and original timestamp. Logout steps are isolated from each other:
//! a failing step is logged and the rest still run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use canopy_shared::constants::{
    REASON_ALREADY_LOGGED_IN, REASON_LOGIN_APPLIED, REASON_LOGOUT_COMPLETED,
    REASON_LOGOUT_DUPLICATE, REASON_NO_SESSION_DATA, REASON_USER_LOGGED_OUT,
};
use canopy_shared::protocol::{AuthMessage, AutoLogin, Feedback, FeedbackKind, LogoutNotification};

use crate::browser::{BrowsingContext, SurfaceId};
use crate::config::ClientConfig;
use crate::dedup::{DedupDecision, LogoutDedup};
use crate::error::RegistryError;
use crate::outbound::Outbound;
use crate::registry::NodeRegistry;
use crate::session::SessionApplier;
use crate::state::ClientState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The user logged out; replayed sessions are refused.
    LoggedOut,
    AlreadyLoggedIn,
    NoSessionData,
    Applied { surface: SurfaceId },
    Failed(String),
}

impl LoginOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::AlreadyLoggedIn | Self::Applied { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            Self::LoggedOut => REASON_USER_LOGGED_OUT.to_string(),
            Self::AlreadyLoggedIn => REASON_ALREADY_LOGGED_IN.to_string(),
            Self::NoSessionData => REASON_NO_SESSION_DATA.to_string(),
            Self::Applied { .. } => REASON_LOGIN_APPLIED.to_string(),
            Self::Failed(reason) => reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    Completed { failed_steps: Vec<&'static str> },
    Duplicate,
}

pub struct AuthSessionCoordinator<B, O> {
    registry: NodeRegistry,
    state: Arc<ClientState>,
    applier: SessionApplier<B>,
    outbound: O,
    dedup: LogoutDedup,
    http: reqwest::Client,
    feedback_flush_grace: Duration,
    notice_duration: Duration,
}

impl<B: BrowsingContext, O: Outbound> AuthSessionCoordinator<B, O> {
    pub fn new(
        registry: NodeRegistry,
        state: Arc<ClientState>,
        browser: Arc<B>,
        outbound: O,
        config: &ClientConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.logout_api_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "HTTP client setup failed, using defaults");
                reqwest::Client::new()
            });

        Self {
            registry,
            state,
            applier: SessionApplier::new(browser, config),
            outbound,
            dedup: LogoutDedup::new(config.logout_dedup_window),
            http,
            feedback_flush_grace: config.feedback_flush_grace,
            notice_duration: config.notice_duration,
        }
    }

    pub async fn handle(&self, request_id: Option<String>, message: AuthMessage) {
        match message {
            AuthMessage::AutoLogin(msg) => {
                self.handle_auto_login(request_id, &msg).await;
            }
            AuthMessage::LogoutNotification(msg) => {
                self.handle_logout(request_id, &msg).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Auto-login
    // ------------------------------------------------------------------

    pub async fn handle_auto_login(&self, request_id: Option<String>, msg: &AutoLogin) -> LoginOutcome {
        let site = &msg.website_config.name;
        if let Some(verification) = &msg.cluster_verification {
            debug!(user_id = %msg.user_id, %verification, "Auto-login carries cluster verification");
        }

        let outcome = self.run_auto_login(msg).await;
        if outcome.success() {
            info!(user_id = %msg.user_id, site = %site, outcome = ?outcome, "Auto-login handled");
        } else {
            warn!(user_id = %msg.user_id, site = %site, reason = %outcome.reason(), "Auto-login refused");
        }

        let feedback = Feedback {
            user_id: msg.user_id.clone(),
            username: msg.username.clone(),
            website: site.clone(),
            client_id: self.state.client_id().to_string(),
            success: outcome.success(),
            reason: outcome.reason(),
            original_timestamp: msg.timestamp.clone(),
            timestamp: Utc::now(),
        };
        self.emit(FeedbackKind::Session, request_id, feedback).await;

        if outcome.success() {
            self.show_validation_notice(msg).await;
        }
        outcome
    }

    async fn run_auto_login(&self, msg: &AutoLogin) -> LoginOutcome {
        let site = &msg.website_config;

        match self.registry.with(|db| db.has_logout_flag(&msg.user_id)) {
            Ok(true) => return LoginOutcome::LoggedOut,
            Ok(false) => {}
            Err(e) => {
                warn!(user_id = %msg.user_id, error = %e, "Logout flag check failed");
                return LoginOutcome::Failed(format!("logout flag check failed: {e}"));
            }
        }

        if let Some(surface) = self.applier.authenticated_surface(site).await {
            debug!(surface = surface.id, url = %surface.url, "Site already shows an authenticated page");
            return LoginOutcome::AlreadyLoggedIn;
        }

        let Some(cookie) = msg.session_cookie() else {
            return LoginOutcome::NoSessionData;
        };

        if let Err(e) = self.applier.apply_cookie(site, cookie).await {
            return LoginOutcome::Failed(e.to_string());
        }

        match self.applier.navigate_with_session(site, cookie).await {
            Ok(surface) => {
                if let Err(e) = self
                    .registry
                    .with(|db| db.record_user_activity(&msg.user_id, &site.name, "auto_login"))
                {
                    warn!(user_id = %msg.user_id, error = %e, "Failed to record activity");
                }
                LoginOutcome::Applied { surface: surface.id }
            }
            Err(e) => LoginOutcome::Failed(e.to_string()),
        }
    }

    /// Short notice for a coordinator-side validation, when sync data exists.
    async fn show_validation_notice(&self, msg: &AutoLogin) {
        let Some(text) = msg.message.as_deref() else {
            return;
        };
        if !is_validation_message(text) {
            return;
        }

        match self.registry.with(|db| db.count_sync_data()) {
            Ok(count) if count > 0 => {
                let notice = format!("{}: session validated", msg.website_config.name);
                self.applier
                    .browser()
                    .show_notice(&notice, self.notice_duration)
                    .await;
            }
            Ok(_) => debug!("No sync data, validation notice skipped"),
            Err(e) => warn!(error = %e, "Sync data check failed"),
        }
    }

    /// A user logging in by hand lifts the auto-login block.
    pub fn on_manual_login(&self, user_id: &str) -> Result<bool, RegistryError> {
        let cleared = self.registry.with(|db| db.clear_logout_flag(user_id))?;
        if cleared {
            info!(user_id, "Logout flag cleared by manual login");
        }
        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Logout
    // ------------------------------------------------------------------

    pub async fn handle_logout(
        &self,
        request_id: Option<String>,
        msg: &LogoutNotification,
    ) -> LogoutOutcome {
        let client_id = msg
            .client_id
            .clone()
            .unwrap_or_else(|| self.state.client_id().to_string());
        let site = &msg.website_config;

        if let DedupDecision::Duplicate { since, completed } = self.dedup.try_begin(&client_id, &msg.user_id) {
            info!(
                user_id = %msg.user_id,
                since_ms = since.as_millis() as u64,
                completed,
                "Duplicate logout ignored"
            );
            self.emit(
                FeedbackKind::Logout,
                request_id,
                self.logout_feedback(msg, &client_id, REASON_LOGOUT_DUPLICATE.to_string()),
            )
            .await;
            return LogoutOutcome::Duplicate;
        }

        info!(user_id = %msg.user_id, site = %site.name, "Logging out");
        let mut failed_steps = Vec::new();

        if let Err(e) = self.applier.clear_site(site).await {
            warn!(site = %site.name, error = %e, "Clearing site storage failed");
            failed_steps.push("clear_site_storage");
        }

        match self.applier.close_site_surfaces(site).await {
            Ok(closed) => debug!(site = %site.name, closed, "Site surfaces closed"),
            Err(e) => {
                warn!(site = %site.name, error = %e, "Closing site surfaces failed");
                failed_steps.push("close_surfaces");
            }
        }

        let marked = self.registry.with(|db| {
            db.clear_user_activity(&msg.user_id)?;
            db.set_logout_flag(&msg.user_id, &client_id)
        });
        if let Err(e) = marked {
            warn!(user_id = %msg.user_id, error = %e, "Recording logout failed");
            failed_steps.push("mark_logged_out");
        }

        // Feedback goes out before the connection is torn down.
        let reason = if failed_steps.is_empty() {
            REASON_LOGOUT_COMPLETED.to_string()
        } else {
            format!("{REASON_LOGOUT_COMPLETED} (failed: {})", failed_steps.join(", "))
        };
        self.emit(
            FeedbackKind::Logout,
            request_id,
            self.logout_feedback(msg, &client_id, reason),
        )
        .await;
        tokio::time::sleep(self.feedback_flush_grace).await;

        if let Some(api) = &msg.logout_api {
            if let Err(e) = self.call_logout_api(&api.url, msg, &client_id).await {
                warn!(url = %api.url, error = %e, "Logout API call failed");
                failed_steps.push("logout_api");
            }
        }

        if let Err(e) = self.outbound.reset_connection().await {
            warn!(error = %e, "Connection reset failed");
            failed_steps.push("reset_connection");
        }
        self.state.reset_registration();

        self.dedup.complete(&client_id, &msg.user_id);
        info!(user_id = %msg.user_id, failed = failed_steps.len(), "Logout finished");
        LogoutOutcome::Completed { failed_steps }
    }

    async fn call_logout_api(
        &self,
        url: &str,
        msg: &LogoutNotification,
        client_id: &str,
    ) -> Result<(), reqwest::Error> {
        let response = self
            .http
            .post(url)
            .json(&json!({
                "user_id": msg.user_id,
                "username": msg.username,
                "client_id": client_id,
            }))
            .send()
            .await?;
        response.error_for_status()?;
        debug!(url, "Logout API acknowledged");
        Ok(())
    }

    fn logout_feedback(&self, msg: &LogoutNotification, client_id: &str, reason: String) -> Feedback {
        Feedback {
            user_id: msg.user_id.clone(),
            username: msg.username.clone(),
            website: msg.website_config.name.clone(),
            client_id: client_id.to_string(),
            success: true,
            reason,
            original_timestamp: msg.timestamp.clone(),
            timestamp: Utc::now(),
        }
    }

    async fn emit(&self, kind: FeedbackKind, request_id: Option<String>, feedback: Feedback) {
        let envelope = match feedback.into_envelope(kind, request_id) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to encode feedback");
                return;
            }
        };
        if let Err(e) = self.outbound.send_envelope(envelope).await {
            warn!(kind = kind.message_type(), error = %e, "Failed to send feedback");
        }
    }
}

/// "login success" plus a validation word, and not an auto-login echo.
fn is_validation_message(text: &str) -> bool {
    let text = text.to_lowercase();
    let success = text.contains("login success") || text.contains("logged in successfully");
    let validated = text.contains("validat") || text.contains("verif");
    let auto = text.contains("auto-login") || text.contains("auto login");
    success && validated && !auto
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_shared::protocol::{LogoutApi, SessionData, WebsiteConfig};
    use canopy_shared::types::RegistrationState;
    use canopy_store::Database;
    use serde_json::Value;

    use crate::browser::{BrowserEvent, MemoryBrowser};
    use crate::outbound::testing::{RecordingOutbound, Sent};
    use crate::session::partition_for;

    const CLIENT: &str = "client-1";

    struct Harness {
        coord: AuthSessionCoordinator<MemoryBrowser, RecordingOutbound>,
        browser: Arc<MemoryBrowser>,
        outbound: RecordingOutbound,
        registry: NodeRegistry,
        state: Arc<ClientState>,
    }

    fn harness() -> Harness {
        let registry = NodeRegistry::new(Database::open_in_memory().unwrap());
        let state = Arc::new(ClientState::new(CLIENT));
        let browser = Arc::new(MemoryBrowser::new());
        let outbound = RecordingOutbound::default();
        let coord = AuthSessionCoordinator::new(
            registry.clone(),
            state.clone(),
            browser.clone(),
            outbound.clone(),
            &ClientConfig::default(),
        );
        Harness {
            coord,
            browser,
            outbound,
            registry,
            state,
        }
    }

    fn site() -> WebsiteConfig {
        WebsiteConfig {
            name: "Site".into(),
            root_url: "https://site.example".into(),
            root_path: "/home".into(),
        }
    }

    fn auto_login(cookie: Option<&str>) -> AutoLogin {
        AutoLogin {
            user_id: "u1".into(),
            username: Some("alice".into()),
            session_data: Some(SessionData {
                session_cookie: cookie.map(String::from),
            }),
            website_config: site(),
            message: None,
            cluster_verification: None,
            timestamp: Some(json!(1_700_000_000)),
        }
    }

    fn logout() -> LogoutNotification {
        LogoutNotification {
            user_id: "u1".into(),
            username: Some("alice".into()),
            website_config: site(),
            logout_api: None,
            client_id: None,
            timestamp: Some(json!("2024-01-01T00:00:00Z")),
        }
    }

    fn feedback_data(env: &canopy_shared::protocol::Envelope) -> (bool, String) {
        (
            env.data["success"].as_bool().unwrap(),
            env.data["reason"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_user_is_not_replayed() {
        let h = harness();
        h.registry.with(|db| db.set_logout_flag("u1", CLIENT)).unwrap();

        let outcome = h.coord.handle_auto_login(Some("r1".into()), &auto_login(Some("abc"))).await;
        assert_eq!(outcome, LoginOutcome::LoggedOut);

        let feedback = h.outbound.envelopes("session_feedback");
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback_data(&feedback[0]), (false, "user has logged out".to_string()));
        assert_eq!(feedback[0].request_id.as_deref(), Some("r1"));
        assert!(h.browser.cookies_in(&partition_for(&site())).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_login_lifts_logout_flag() {
        let h = harness();
        h.registry.with(|db| db.set_logout_flag("u1", CLIENT)).unwrap();
        assert!(h.coord.on_manual_login("u1").unwrap());

        let outcome = h.coord.handle_auto_login(None, &auto_login(Some("abc"))).await;
        assert!(outcome.success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_logged_in_surface_wins() {
        let h = harness();
        h.browser.add_surface(&partition_for(&site()), "https://site.example/dashboard");

        let outcome = h.coord.handle_auto_login(None, &auto_login(Some("abc"))).await;
        assert_eq!(outcome, LoginOutcome::AlreadyLoggedIn);

        let feedback = h.outbound.envelopes("session_feedback");
        assert_eq!(feedback_data(&feedback[0]), (true, "already logged in".to_string()));
        assert!(h.browser.cookies_in(&partition_for(&site())).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cookie_is_reported() {
        let h = harness();
        let outcome = h.coord.handle_auto_login(None, &auto_login(Some(""))).await;
        assert_eq!(outcome, LoginOutcome::NoSessionData);

        let feedback = h.outbound.envelopes("session_feedback");
        assert_eq!(feedback_data(&feedback[0]), (false, "no session data".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_login_opens_new_surface() {
        let h = harness();
        let outcome = h.coord.handle_auto_login(None, &auto_login(Some("abc"))).await;
        let LoginOutcome::Applied { surface } = outcome else {
            panic!("expected the session to be applied, got {outcome:?}");
        };

        let opened = h.browser.surface(surface).unwrap();
        assert_eq!(opened.url, "https://site.example/home");
        assert!(h
            .browser
            .cookies_for_surface(surface)
            .iter()
            .any(|c| c.value == "abc" && c.name == "session"));

        let feedback = h.outbound.envelopes("session_feedback");
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].data["success"], json!(true));
        assert_eq!(feedback[0].data["original_timestamp"], json!(1_700_000_000));
        assert_eq!(h.registry.with(|db| db.list_user_activity("u1")).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_login_falls_back_to_active_surface() {
        let h = harness();
        let active = h.browser.add_surface("persist:default", "https://news.example/");
        h.browser.refuse_new_surfaces(true);

        let outcome = h.coord.handle_auto_login(None, &auto_login(Some("abc"))).await;
        assert_eq!(outcome, LoginOutcome::Applied { surface: active });
        assert_eq!(h.browser.surface(active).unwrap().url, "https://site.example/home");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_login_without_any_surface_fails() {
        let h = harness();
        h.browser.refuse_new_surfaces(true);

        let outcome = h.coord.handle_auto_login(None, &auto_login(Some("abc"))).await;
        assert!(!outcome.success());
        let feedback = h.outbound.envelopes("session_feedback");
        assert_eq!(feedback[0].data["success"], json!(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_notice_needs_sync_data() {
        let h = harness();
        let mut msg = auto_login(Some("abc"));
        msg.message = Some("Login success, validation passed".into());

        h.coord.handle_auto_login(None, &msg).await;
        assert!(!h.browser.events().iter().any(|e| matches!(e, BrowserEvent::Notice(_))));

        h.registry
            .with(|db| db.insert_sync_data("profile", &json!({"v": 1})))
            .unwrap();
        h.coord.handle_auto_login(None, &msg).await;
        assert!(h.browser.events().iter().any(|e| matches!(e, BrowserEvent::Notice(_))));
    }

    #[test]
    fn test_validation_message_pattern() {
        assert!(is_validation_message("Login success: account verified"));
        assert!(!is_validation_message("Auto-login success, validated"));
        assert!(!is_validation_message("Login success"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_closes_site_surfaces_and_reports_before_reset() {
        let h = harness();
        let partition = partition_for(&site());
        let first = h.browser.add_surface(&partition, "https://site.example/home");
        let second = h.browser.add_surface("persist:default", "https://site.example/inbox");
        let other = h.browser.add_surface("persist:default", "https://other.example/");
        h.state.set_registration(RegistrationState::Registered);
        h.registry
            .with(|db| db.record_user_activity("u1", "Site", "auto_login"))
            .unwrap();

        let outcome = h.coord.handle_logout(Some("r9".into()), &logout()).await;
        assert_eq!(outcome, LogoutOutcome::Completed { failed_steps: vec![] });

        assert!(h.browser.surface(first).is_none());
        assert!(h.browser.surface(second).is_none());
        assert!(h.browser.surface(other).is_some());

        let log = h.outbound.log();
        let feedback_at = log
            .iter()
            .position(|s| matches!(s, Sent::Envelope(env) if env.kind == "logout_feedback"))
            .unwrap();
        let reset_at = log.iter().position(|s| *s == Sent::Reset).unwrap();
        assert!(feedback_at < reset_at);

        let Sent::Envelope(feedback) = &log[feedback_at] else { unreachable!() };
        assert_eq!(feedback.data["success"], json!(true));
        assert_eq!(feedback.request_id.as_deref(), Some("r9"));

        assert_eq!(h.state.registration(), RegistrationState::Unregistered);
        assert!(h.registry.with(|db| db.has_logout_flag("u1")).unwrap());
        assert!(h.registry.with(|db| db.list_user_activity("u1")).unwrap().is_empty());
    }

    fn feedback_then_reset(log: &[Sent]) -> bool {
        let feedback_at = log
            .iter()
            .position(|s| matches!(s, Sent::Envelope(env) if env.kind == "logout_feedback"));
        let reset_at = log.iter().position(|s| *s == Sent::Reset);
        matches!((feedback_at, reset_at), (Some(f), Some(r)) if f < r)
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_leaves_lookalike_site_open() {
        let h = harness();
        let lookalike = h.browser.add_surface("persist:default", "https://site.example.org/inbox");

        h.coord.handle_logout(None, &logout()).await;
        assert!(h.browser.surface(lookalike).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_continues_past_storage_failure() {
        let h = harness();
        let surface = h.browser.add_surface(&partition_for(&site()), "https://site.example/home");
        h.state.set_registration(RegistrationState::Registered);
        h.browser.fail_storage_clears(true);

        let outcome = h.coord.handle_logout(None, &logout()).await;
        assert_eq!(
            outcome,
            LogoutOutcome::Completed {
                failed_steps: vec!["clear_site_storage"]
            }
        );

        assert!(h.browser.surface(surface).is_none());
        assert!(h.registry.with(|db| db.has_logout_flag("u1")).unwrap());
        assert!(feedback_then_reset(&h.outbound.log()));
        assert_eq!(h.outbound.resets(), 1);
        assert_eq!(h.state.registration(), RegistrationState::Unregistered);

        let feedback = h.outbound.envelopes("logout_feedback");
        let (success, reason) = feedback_data(&feedback[0]);
        assert!(success);
        assert!(reason.contains("clear_site_storage"));
    }

    #[tokio::test]
    async fn test_unreachable_logout_api_does_not_fail_logout() {
        let h = harness();
        let mut msg = logout();
        msg.logout_api = Some(LogoutApi {
            url: "http://127.0.0.1:1/logout".into(),
        });

        let outcome = h.coord.handle_logout(None, &msg).await;
        assert_eq!(
            outcome,
            LogoutOutcome::Completed {
                failed_steps: vec!["logout_api"]
            }
        );
        assert!(feedback_then_reset(&h.outbound.log()));
        assert_eq!(h.outbound.resets(), 1);
    }

    fn storage_clears(browser: &MemoryBrowser) -> usize {
        browser
            .events()
            .iter()
            .filter(|e| matches!(e, BrowserEvent::StorageCleared { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_logout_runs_cleanup_once() {
        let h = harness();

        assert!(matches!(
            h.coord.handle_logout(None, &logout()).await,
            LogoutOutcome::Completed { .. }
        ));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(h.coord.handle_logout(None, &logout()).await, LogoutOutcome::Duplicate);

        assert_eq!(storage_clears(&h.browser), 1);
        assert_eq!(h.outbound.resets(), 1);

        let feedback = h.outbound.envelopes("logout_feedback");
        assert_eq!(feedback.len(), 2);
        assert!(feedback.iter().all(|f| f.data["success"] == Value::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_rearms_after_window() {
        let h = harness();

        h.coord.handle_logout(None, &logout()).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(matches!(
            h.coord.handle_logout(None, &logout()).await,
            LogoutOutcome::Completed { .. }
        ));

        assert_eq!(storage_clears(&h.browser), 2);
        assert_eq!(h.outbound.resets(), 2);
    }
}
