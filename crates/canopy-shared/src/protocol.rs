use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::*;
use crate::error::ProtocolError;
use crate::types::GroupLevel;

/// Outer frame of every message exchanged with the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ---------------------------------------------------------------------------
// Node hierarchy commands
// ---------------------------------------------------------------------------

/// All commands the coordinator may issue against the node hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeCommand {
    CreateDomainNode(CreateDomainNode),
    CreateClusterNode(NodeRef),
    CreateChannelNode(NodeRef),
    RegisterToDomain(RegisterToDomain),
    RegisterToCluster(RegisterToCluster),
    RegisterToChannel(RegisterToChannel),
    AddNodeToChannel(AddNodeToChannel),
    ConfirmRegistration(ConfirmRegistration),
    GetNodeStatus(NodeRef),
    UpdateNodeInfo(NodeRef),
}

impl NodeCommand {
    /// Parse a command from its envelope type and data.
    ///
    /// Unknown names and malformed payloads come back as distinct
    /// [`ProtocolError`] variants so the caller can answer with a structured
    /// failure instead of dropping the request.
    pub fn parse(kind: &str, data: &Value) -> Result<Self, ProtocolError> {
        if !COMMAND_NAMES.contains(&kind) {
            return Err(ProtocolError::UnknownMessageType(kind.to_string()));
        }
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data.clone()
        };
        serde_json::from_value(json!({ "type": kind, "data": data })).map_err(|e| {
            ProtocolError::InvalidPayload {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateDomainNode(_) => CMD_CREATE_DOMAIN_NODE,
            Self::CreateClusterNode(_) => CMD_CREATE_CLUSTER_NODE,
            Self::CreateChannelNode(_) => CMD_CREATE_CHANNEL_NODE,
            Self::RegisterToDomain(_) => CMD_REGISTER_TO_DOMAIN,
            Self::RegisterToCluster(_) => CMD_REGISTER_TO_CLUSTER,
            Self::RegisterToChannel(_) => CMD_REGISTER_TO_CHANNEL,
            Self::AddNodeToChannel(_) => CMD_ADD_NODE_TO_CHANNEL,
            Self::ConfirmRegistration(_) => CMD_CONFIRM_REGISTRATION,
            Self::GetNodeStatus(_) => CMD_GET_NODE_STATUS,
            Self::UpdateNodeInfo(_) => CMD_UPDATE_NODE_INFO,
        }
    }
}

/// `create_domain_node` carries no fields; the node id comes from the current user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateDomainNode {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRef {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterToDomain {
    pub domain_id: String,
    /// Must equal the domain's recorded main node.
    pub node_id: String,
    /// The node asking to join, echoed back for routing.
    #[serde(default)]
    pub target_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterToCluster {
    pub cluster_id: String,
    pub node_id: String,
    #[serde(default)]
    pub target_node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterToChannel {
    pub channel_id: String,
    pub node_id: String,
    pub target_node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddNodeToChannel {
    pub target_node_id: String,
    pub domain_id: String,
    pub cluster_id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmRegistration {
    pub confirmed_by: GroupLevel,
    /// The node being confirmed (this client).
    pub node_id: String,
    /// Main node of the confirming group; defaults to `node_id`.
    #[serde(default)]
    pub main_node_id: Option<String>,
    pub domain_id: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub member_count: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Reply to a [`NodeCommand`].
///
/// `extra` is flattened next to the fixed keys, so a successful
/// `create_domain_node` serializes as
/// `{"success":true,"requestId":..,"commandType":..,"domain_id":..,"node_id":..}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub request_id: String,
    pub command_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandResponse {
    pub fn ok(request_id: &str, command_type: &str, extra: Map<String, Value>) -> Self {
        Self {
            success: true,
            error: None,
            request_id: request_id.to_string(),
            command_type: command_type.to_string(),
            extra,
        }
    }

    pub fn failure(request_id: &str, command_type: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            request_id: request_id.to_string(),
            command_type: command_type.to_string(),
            extra: Map::new(),
        }
    }

    /// `success:false` without an error: a control signal such as `requiresNewCluster`.
    pub fn signal(request_id: &str, command_type: &str, extra: Map<String, Value>) -> Self {
        Self {
            success: false,
            error: None,
            request_id: request_id.to_string(),
            command_type: command_type.to_string(),
            extra,
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        let request_id = Some(self.request_id.clone());
        Ok(Envelope::new(MSG_COMMAND_RESPONSE, serde_json::to_value(self)?).with_request_id(request_id))
    }
}

// ---------------------------------------------------------------------------
// Session handoff messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebsiteConfig {
    pub name: String,
    #[serde(default)]
    pub root_url: String,
    #[serde(default = "default_root_path")]
    pub root_path: String,
}

fn default_root_path() -> String {
    "/".to_string()
}

impl WebsiteConfig {
    /// `root_url` joined with `root_path`, with exactly one slash between them.
    pub fn root_location(&self) -> String {
        let base = self.root_url.trim_end_matches('/');
        let path = self.root_path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    #[serde(default)]
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoLogin {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub session_data: Option<SessionData>,
    pub website_config: WebsiteConfig,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub cluster_verification: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl AutoLogin {
    pub fn session_cookie(&self) -> Option<&str> {
        self.session_data
            .as_ref()
            .and_then(|s| s.session_cookie.as_deref())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogoutApi {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogoutNotification {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub website_config: WebsiteConfig,
    #[serde(default)]
    pub logout_api: Option<LogoutApi>,
    /// Client the logout targets; defaults to the receiving client.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AuthMessage {
    AutoLogin(AutoLogin),
    LogoutNotification(LogoutNotification),
}

impl AuthMessage {
    pub fn parse(kind: &str, data: &Value) -> Result<Self, ProtocolError> {
        if kind != MSG_AUTO_LOGIN && kind != MSG_LOGOUT_NOTIFICATION {
            return Err(ProtocolError::UnknownMessageType(kind.to_string()));
        }
        serde_json::from_value(json!({ "type": kind, "data": data })).map_err(|e| {
            ProtocolError::InvalidPayload {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Which feedback stream a [`Feedback`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Session,
    Logout,
}

impl FeedbackKind {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Session => MSG_SESSION_FEEDBACK,
            Self::Logout => MSG_LOGOUT_FEEDBACK,
        }
    }
}

/// Outcome report for an auto-login or logout flow.
///
/// Echoes the user, site and original timestamp so the coordinator can
/// correlate it with the message it sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub website: String,
    pub client_id: String,
    pub success: bool,
    pub reason: String,
    #[serde(default)]
    pub original_timestamp: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn into_envelope(
        self,
        kind: FeedbackKind,
        request_id: Option<String>,
    ) -> Result<Envelope, ProtocolError> {
        Ok(Envelope::new(kind.message_type(), serde_json::to_value(self)?)
            .with_request_id(request_id))
    }
}

/// Sent on every (re)connect so the coordinator can re-register the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientHello {
    pub client_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    pub protocol: String,
}

impl ClientHello {
    pub fn new(client_id: &str, node_id: Option<String>) -> Self {
        Self {
            client_id: client_id.to_string(),
            node_id,
            protocol: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        Ok(Envelope::new(MSG_CLIENT_HELLO, serde_json::to_value(self)?))
    }
}

// ---------------------------------------------------------------------------
// Inbound routing
// ---------------------------------------------------------------------------

/// A typed inbound message, split by protocol namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command {
        request_id: String,
        command: NodeCommand,
    },
    Auth {
        request_id: Option<String>,
        message: AuthMessage,
    },
}

impl Inbound {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let kind = envelope.kind.as_str();
        if COMMAND_NAMES.contains(&kind) {
            let command = NodeCommand::parse(kind, &envelope.data)?;
            return Ok(Self::Command {
                request_id: envelope.request_id.clone().unwrap_or_default(),
                command,
            });
        }
        let message = AuthMessage::parse(kind, &envelope.data)?;
        Ok(Self::Auth {
            request_id: envelope.request_id.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: &str, data: Value) -> Envelope {
        Envelope::new(kind, data).with_request_id(Some("req-1".into()))
    }

    #[test]
    fn test_parse_register_to_domain() {
        let env = envelope(
            CMD_REGISTER_TO_DOMAIN,
            json!({"domain_id": "D1", "node_id": "N1", "target_node_id": "N9"}),
        );
        match Inbound::from_envelope(&env).unwrap() {
            Inbound::Command {
                request_id,
                command: NodeCommand::RegisterToDomain(cmd),
            } => {
                assert_eq!(request_id, "req-1");
                assert_eq!(cmd.domain_id, "D1");
                assert_eq!(cmd.target_node_id.as_deref(), Some("N9"));
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_create_domain_node_accepts_missing_data() {
        let env = Envelope::new(CMD_CREATE_DOMAIN_NODE, Value::Null);
        let parsed = Inbound::from_envelope(&env).unwrap();
        assert!(matches!(
            parsed,
            Inbound::Command {
                command: NodeCommand::CreateDomainNode(_),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let env = envelope("launch_rocket", json!({}));
        assert_eq!(
            Inbound::from_envelope(&env),
            Err(ProtocolError::UnknownMessageType("launch_rocket".into()))
        );
    }

    #[test]
    fn test_missing_field_is_invalid_payload() {
        let err = NodeCommand::parse(CMD_CREATE_CLUSTER_NODE, &json!({})).unwrap_err();
        match err {
            ProtocolError::InvalidPayload { kind, reason } => {
                assert_eq!(kind, CMD_CREATE_CLUSTER_NODE);
                assert!(reason.contains("node_id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_confirmed_by_is_invalid_payload() {
        let err = NodeCommand::parse(
            CMD_CONFIRM_REGISTRATION,
            &json!({"confirmed_by": "galaxy", "node_id": "N1", "domain_id": "D1"}),
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_auth_messages_parse() {
        let env = envelope(
            MSG_AUTO_LOGIN,
            json!({
                "user_id": "u1",
                "session_data": {"session_cookie": "abc"},
                "website_config": {"name": "Site", "root_url": "https://site.test"},
                "timestamp": 1700000000
            }),
        );
        match Inbound::from_envelope(&env).unwrap() {
            Inbound::Auth {
                message: AuthMessage::AutoLogin(msg),
                ..
            } => {
                assert_eq!(msg.session_cookie(), Some("abc"));
                assert_eq!(msg.website_config.root_path, "/");
            }
            other => panic!("unexpected parse result: {other:?}"),
        }

        let env = envelope(
            MSG_LOGOUT_NOTIFICATION,
            json!({
                "user_id": "u1",
                "website_config": {"name": "Site"},
                "logout_api": {"url": "https://site.test/logout"}
            }),
        );
        assert!(matches!(
            Inbound::from_envelope(&env).unwrap(),
            Inbound::Auth {
                message: AuthMessage::LogoutNotification(_),
                ..
            }
        ));
    }

    #[test]
    fn test_empty_cookie_counts_as_absent() {
        let msg: AutoLogin = serde_json::from_value(json!({
            "user_id": "u1",
            "session_data": {"session_cookie": ""},
            "website_config": {"name": "Site"}
        }))
        .unwrap();
        assert_eq!(msg.session_cookie(), None);
    }

    #[test]
    fn test_response_flattens_extra_fields() {
        let mut extra = Map::new();
        extra.insert("requiresNewCluster".into(), json!(true));
        extra.insert("domainId".into(), json!("D1"));
        let resp = CommandResponse::signal("req-1", CMD_REGISTER_TO_DOMAIN, extra);

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["requestId"], json!("req-1"));
        assert_eq!(value["commandType"], json!(CMD_REGISTER_TO_DOMAIN));
        assert_eq!(value["requiresNewCluster"], json!(true));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_root_location_joins_cleanly() {
        let site = WebsiteConfig {
            name: "Site".into(),
            root_url: "https://site.test/".into(),
            root_path: "/app".into(),
        };
        assert_eq!(site.root_location(), "https://site.test/app");
    }
}
