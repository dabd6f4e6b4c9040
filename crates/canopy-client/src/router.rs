//! Routes coordinator envelopes to the coordinator that owns them.
//!
//! Messages are handled one at a time in arrival order. Hierarchy commands
//! always get a `command_response`; malformed session messages get a
//! `protocol_error` so the coordinator is never left waiting silently.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use canopy_net::LinkNotification;
use canopy_shared::constants::{COMMAND_NAMES, MSG_PROTOCOL_ERROR};
use canopy_shared::protocol::{ClientHello, CommandResponse, Envelope, Inbound};
use canopy_shared::ProtocolError;

use crate::auth::AuthSessionCoordinator;
use crate::browser::BrowsingContext;
use crate::config::ClientConfig;
use crate::hierarchy::NodeHierarchyCoordinator;
use crate::outbound::Outbound;
use crate::registry::NodeRegistry;
use crate::state::ClientState;

pub struct Router<B, O> {
    hierarchy: NodeHierarchyCoordinator,
    auth: AuthSessionCoordinator<B, O>,
    outbound: O,
    registry: NodeRegistry,
    state: Arc<ClientState>,
}

impl<B: BrowsingContext, O: Outbound> Router<B, O> {
    pub fn new(
        registry: NodeRegistry,
        state: Arc<ClientState>,
        browser: Arc<B>,
        outbound: O,
        config: &ClientConfig,
    ) -> Self {
        Self {
            hierarchy: NodeHierarchyCoordinator::new(registry.clone(), state.clone()),
            auth: AuthSessionCoordinator::new(
                registry.clone(),
                state.clone(),
                browser,
                outbound.clone(),
                config,
            ),
            outbound,
            registry,
            state,
        }
    }

    pub fn auth(&self) -> &AuthSessionCoordinator<B, O> {
        &self.auth
    }

    /// Drain link notifications until the link task goes away.
    pub async fn run(&self, mut notifications: mpsc::Receiver<LinkNotification>) {
        while let Some(notification) = notifications.recv().await {
            self.handle_notification(notification).await;
        }
        info!("Link notifications closed, router stopping");
    }

    pub async fn handle_notification(&self, notification: LinkNotification) {
        match notification {
            LinkNotification::Connected => self.send_hello().await,
            LinkNotification::Disconnected { reason } => {
                info!(reason = %reason, registration = ?self.state.registration(), "Coordinator disconnected");
            }
            LinkNotification::Message(envelope) => self.route(envelope).await,
        }
    }

    pub async fn route(&self, envelope: Envelope) {
        match Inbound::from_envelope(&envelope) {
            Ok(Inbound::Command { request_id, command }) => {
                let response = self.hierarchy.execute(&request_id, &command);
                self.send(response.into_envelope()).await;
            }
            Ok(Inbound::Auth { request_id, message }) => {
                self.auth.handle(request_id, message).await;
            }
            Err(e) if COMMAND_NAMES.contains(&envelope.kind.as_str()) => {
                warn!(kind = %envelope.kind, error = %e, "Malformed command");
                let request_id = envelope.request_id.clone().unwrap_or_default();
                let response = CommandResponse::failure(&request_id, &envelope.kind, e.to_string());
                self.send(response.into_envelope()).await;
            }
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "Unroutable message");
                let reply = Envelope::new(
                    MSG_PROTOCOL_ERROR,
                    json!({ "error": e.to_string(), "type": envelope.kind }),
                )
                .with_request_id(envelope.request_id.clone());
                self.send(Ok(reply)).await;
            }
        }
    }

    async fn send_hello(&self) {
        let node_id = match self.registry.current_node_id(self.state.client_id()) {
            Ok(node_id) => node_id,
            Err(e) => {
                warn!(error = %e, "Could not read node id for hello");
                None
            }
        };
        debug!(client_id = %self.state.client_id(), node_id = ?node_id, "Sending hello");
        self.state.begin_handshake();
        self.send(ClientHello::new(self.state.client_id(), node_id).into_envelope())
            .await;
    }

    async fn send(&self, envelope: Result<Envelope, ProtocolError>) {
        match envelope {
            Ok(envelope) => {
                let kind = envelope.kind.clone();
                if let Err(e) = self.outbound.send_envelope(envelope).await {
                    warn!(kind = %kind, error = %e, "Failed to send envelope");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode envelope"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_shared::types::RegistrationState;
    use canopy_store::Database;

    use crate::browser::MemoryBrowser;
    use crate::outbound::testing::RecordingOutbound;

    fn router() -> (Router<MemoryBrowser, RecordingOutbound>, RecordingOutbound, NodeRegistry) {
        let registry = NodeRegistry::new(Database::open_in_memory().unwrap());
        let outbound = RecordingOutbound::default();
        let router = Router::new(
            registry.clone(),
            Arc::new(ClientState::new("client-1")),
            Arc::new(MemoryBrowser::new()),
            outbound.clone(),
            &ClientConfig::default(),
        );
        (router, outbound, registry)
    }

    #[tokio::test]
    async fn test_hello_on_connect() {
        let (router, outbound, registry) = router();
        let user = registry.register_user("client-1", "u1", "alice").unwrap();

        router.handle_notification(LinkNotification::Connected).await;

        let hello = outbound.envelopes("client_hello");
        assert_eq!(hello.len(), 1);
        assert_eq!(hello[0].data["node_id"], json!(user.node_id));
        assert_eq!(hello[0].data["client_id"], json!("client-1"));
        assert_eq!(
            router.state.registration(),
            RegistrationState::AwaitingDomainConfirm
        );
    }

    #[tokio::test]
    async fn test_command_gets_response_with_request_id() {
        let (router, outbound, _) = router();
        router
            .route(
                Envelope::new("get_node_status", json!({"node_id": "N1"}))
                    .with_request_id(Some("r7".into())),
            )
            .await;

        let responses = outbound.envelopes("command_response");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].request_id.as_deref(), Some("r7"));
        assert_eq!(responses[0].data["requestId"], json!("r7"));
        assert_eq!(responses[0].data["success"], json!(true));
        assert_eq!(responses[0].data["commandType"], json!("get_node_status"));
    }

    #[tokio::test]
    async fn test_malformed_command_still_answered() {
        let (router, outbound, _) = router();
        router
            .route(Envelope::new("register_to_domain", json!({})).with_request_id(Some("r8".into())))
            .await;

        let responses = outbound.envelopes("command_response");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].data["success"], json!(false));
        assert!(responses[0].data["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_type_gets_protocol_error() {
        let (router, outbound, _) = router();
        router.route(Envelope::new("teleport", json!({}))).await;

        let errors = outbound.envelopes("protocol_error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["type"], json!("teleport"));
        assert!(outbound.envelopes("command_response").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_messages_reach_auth_coordinator() {
        let (router, outbound, _) = router();
        router
            .route(Envelope::new(
                "auto_login",
                json!({
                    "user_id": "u1",
                    "session_data": {},
                    "website_config": {"name": "Site", "root_url": "https://site.example"}
                }),
            ))
            .await;

        let feedback = outbound.envelopes("session_feedback");
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].data["reason"], json!("no session data"));
    }
}
