//! Drives the registration handshake through a real coordinator link.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use canopy_client::browser::MemoryBrowser;
use canopy_client::{ClientConfig, ClientState, NodeRegistry, Router};
use canopy_net::spawn_link;
use canopy_store::Database;

/// The coordinator end of the connection.
struct Coordinator {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Coordinator {
    fn new(socket: TcpStream) -> Self {
        let (read_half, writer) = socket.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send(&mut self, kind: &str, request_id: &str, data: Value) {
        let mut line = json!({ "type": kind, "data": data, "requestId": request_id }).to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("client did not answer in time")
            .unwrap()
            .expect("client closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// Send a command and return the `data` of its response.
    async fn command(&mut self, kind: &str, request_id: &str, data: Value) -> Value {
        self.send(kind, request_id, data).await;
        let reply = self.recv().await;
        assert_eq!(reply["type"], "command_response");
        assert_eq!(reply["requestId"], request_id);
        reply["data"].clone()
    }
}

#[tokio::test]
async fn test_founding_node_builds_and_confirms_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let registry = NodeRegistry::new(Database::open_at(&dir.path().join("registry.db")).unwrap());
    let node_id = registry
        .register_user("client-a", "u1", "alice")
        .unwrap()
        .node_id
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ClientConfig {
        coordinator_addr: listener.local_addr().unwrap().to_string(),
        client_id: "client-a".into(),
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let state = Arc::new(ClientState::new("client-a"));
    let (link, notifications) = spawn_link(config.link_config());
    let router = Router::new(
        registry.clone(),
        state.clone(),
        Arc::new(MemoryBrowser::new()),
        link.clone(),
        &config,
    );
    let router_task = tokio::spawn(async move { router.run(notifications).await });

    let (socket, _) = listener.accept().await.unwrap();
    let mut coord = Coordinator::new(socket);

    let hello = coord.recv().await;
    assert_eq!(hello["type"], "client_hello");
    assert_eq!(hello["data"]["node_id"], json!(node_id));

    // The first node founds every level itself.
    let domain = coord.command("create_domain_node", "r1", json!({})).await;
    assert_eq!(domain["success"], true);
    let domain_id = domain["domain_id"].as_str().unwrap().to_string();

    let cluster = coord
        .command("create_cluster_node", "r2", json!({ "node_id": node_id }))
        .await;
    let cluster_id = cluster["cluster_id"].as_str().unwrap().to_string();

    let channel = coord
        .command("create_channel_node", "r3", json!({ "node_id": node_id }))
        .await;
    let channel_id = channel["channel_id"].as_str().unwrap().to_string();

    // A newcomer is placed through this node.
    let placed = coord
        .command(
            "register_to_domain",
            "r4",
            json!({ "domain_id": domain_id, "node_id": node_id, "target_node_id": "node_remote" }),
        )
        .await;
    assert_eq!(placed["clusterId"], json!(cluster_id));
    assert_eq!(placed["nextStep"], "register_to_cluster");

    let placed = coord
        .command(
            "register_to_cluster",
            "r5",
            json!({ "cluster_id": cluster_id, "node_id": node_id, "target_node_id": "node_remote" }),
        )
        .await;
    assert_eq!(placed["channelId"], json!(channel_id));

    let joined = coord
        .command(
            "register_to_channel",
            "r6",
            json!({ "channel_id": channel_id, "node_id": node_id, "target_node_id": "node_remote" }),
        )
        .await;
    assert_eq!(joined["confirmation"]["targetNodeId"], "node_remote");

    let forwarded = coord
        .command(
            "add_node_to_channel",
            "r7",
            json!({
                "target_node_id": "node_remote", "domain_id": domain_id,
                "cluster_id": cluster_id, "channel_id": channel_id
            }),
        )
        .await;
    assert_eq!(forwarded["reflexive"], false);

    // Confirmations addressed to this node walk the handshake to the end.
    let mut last = Value::Null;
    for (level, request_id) in [("domain", "r8"), ("cluster", "r9"), ("channel", "r10")] {
        last = coord
            .command(
                "confirm_registration",
                request_id,
                json!({
                    "confirmed_by": level, "node_id": node_id,
                    "domain_id": domain_id, "cluster_id": cluster_id, "channel_id": channel_id,
                    "member_count": 2
                }),
            )
            .await;
        assert_eq!(last["success"], true);
    }
    assert_eq!(last["nextStep"], "complete");
    assert!(state.registration().is_registered());

    let status = coord
        .command("get_node_status", "r11", json!({ "node_id": node_id }))
        .await;
    assert_eq!(status["isLocal"], true);
    assert_eq!(status["registrationState"], "registered");
    assert_eq!(status["channels"][0]["member_count"], 2);

    coord.send("bogus_message", "r12", json!({})).await;
    let error = coord.recv().await;
    assert_eq!(error["type"], "protocol_error");
    assert_eq!(error["requestId"], "r12");

    link.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), router_task)
        .await
        .expect("router did not stop")
        .unwrap();
}
