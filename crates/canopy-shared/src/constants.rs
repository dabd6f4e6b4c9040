/// Protocol version announced in `client_hello`
pub const PROTOCOL_VERSION: &str = "canopy/1.0";

/// Application name
pub const APP_NAME: &str = "Canopy";

/// A cluster or channel accepts new members only while `member_count` is below this
pub const MAX_GROUP_MEMBERS: i64 = 1000;

/// Default coordinator port (JSON-lines over TCP)
pub const DEFAULT_COORDINATOR_PORT: u16 = 7300;

/// Maximum size of one framed message in bytes (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Node hierarchy command names
pub const CMD_CREATE_DOMAIN_NODE: &str = "create_domain_node";
pub const CMD_CREATE_CLUSTER_NODE: &str = "create_cluster_node";
pub const CMD_CREATE_CHANNEL_NODE: &str = "create_channel_node";
pub const CMD_REGISTER_TO_DOMAIN: &str = "register_to_domain";
pub const CMD_REGISTER_TO_CLUSTER: &str = "register_to_cluster";
pub const CMD_REGISTER_TO_CHANNEL: &str = "register_to_channel";
pub const CMD_ADD_NODE_TO_CHANNEL: &str = "add_node_to_channel";
pub const CMD_CONFIRM_REGISTRATION: &str = "confirm_registration";
pub const CMD_GET_NODE_STATUS: &str = "get_node_status";
pub const CMD_UPDATE_NODE_INFO: &str = "update_node_info";

pub const COMMAND_NAMES: [&str; 10] = [
    CMD_CREATE_DOMAIN_NODE,
    CMD_CREATE_CLUSTER_NODE,
    CMD_CREATE_CHANNEL_NODE,
    CMD_REGISTER_TO_DOMAIN,
    CMD_REGISTER_TO_CLUSTER,
    CMD_REGISTER_TO_CHANNEL,
    CMD_ADD_NODE_TO_CHANNEL,
    CMD_CONFIRM_REGISTRATION,
    CMD_GET_NODE_STATUS,
    CMD_UPDATE_NODE_INFO,
];

/// Session handoff message types (disjoint from the command names)
pub const MSG_AUTO_LOGIN: &str = "auto_login";
pub const MSG_LOGOUT_NOTIFICATION: &str = "logout_notification";
pub const MSG_SESSION_FEEDBACK: &str = "session_feedback";
pub const MSG_LOGOUT_FEEDBACK: &str = "logout_feedback";

/// Envelope types emitted by the client outside the two protocols
pub const MSG_COMMAND_RESPONSE: &str = "command_response";
pub const MSG_CLIENT_HELLO: &str = "client_hello";
pub const MSG_PROTOCOL_ERROR: &str = "protocol_error";

/// Feedback reason strings
pub const REASON_USER_LOGGED_OUT: &str = "user has logged out";
pub const REASON_ALREADY_LOGGED_IN: &str = "already logged in";
pub const REASON_NO_SESSION_DATA: &str = "no session data";
pub const REASON_LOGIN_APPLIED: &str = "session applied";
pub const REASON_LOGOUT_COMPLETED: &str = "logout completed";
pub const REASON_LOGOUT_DUPLICATE: &str = "duplicate logout notification ignored";
