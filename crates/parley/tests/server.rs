//! Integration tests for the Parley server, driven by raw WebSocket
//! clients speaking JSON, so the wire shapes are checked as-is.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley::prelude::*;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port with `alice`, `bob` and `carol`
/// registered (password `pw`).
async fn start_server(connect_timeout: Duration) -> (String, std::sync::Arc<Directory>) {
    let credentials = MemoryCredentials::new();
    for name in ["alice", "bob", "carol"] {
        credentials.create(name, "pw").await;
    }

    let server = ParleyServerBuilder::new()
        .bind("127.0.0.1:0")
        .rendezvous_config(RendezvousConfig { connect_timeout })
        .build(credentials)
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let directory = server.directory();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, directory)
}

/// A hand-rolled client: correlates by `ID`, parks pushes for later.
struct RawClient {
    ws: ClientWs,
    next_id: u64,
    pushes: VecDeque<Value>,
}

impl RawClient {
    async fn connect(addr: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("should connect");
        Self {
            ws,
            next_id: 1,
            pushes: VecDeque::new(),
        }
    }

    async fn send_raw(&mut self, value: &Value) {
        let bytes = serde_json::to_vec(value).expect("encode");
        self.ws
            .send(Message::Binary(bytes.into()))
            .await
            .expect("send");
    }

    async fn read(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("server should answer in time")
                .expect("stream open")
                .expect("read ok");
            if msg.is_binary() || msg.is_text() {
                return serde_json::from_slice(&msg.into_data()).expect("json");
            }
        }
    }

    /// Sends `body` with a fresh `ID` and waits for the matching response.
    async fn request(&mut self, mut body: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        body["ID"] = json!(id);
        self.send_raw(&body).await;

        loop {
            let record = self.read().await;
            if record["ID"] == json!(id) {
                return record;
            }
            self.pushes.push_back(record);
        }
    }

    async fn push(&mut self) -> Value {
        match self.pushes.pop_front() {
            Some(record) => record,
            None => self.read().await,
        }
    }

    /// True once the server has closed the stream.
    async fn closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), self.ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => {
                    return true;
                }
                Ok(Some(Ok(_))) => continue,
            }
        }
    }
}

fn creds(name: &str) -> Value {
    json!({"username": name, "password": "pw"})
}

fn with(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    base
}

async fn logged_in(addr: &str, name: &str) -> RawClient {
    let mut client = RawClient::connect(addr).await;
    let resp = client
        .request(with(json!({"command": "login"}), creds(name)))
        .await;
    assert_eq!(resp["status"], "success", "login {name}: {resp}");
    client
}

async fn pair(addr: &str) -> (RawClient, RawClient) {
    let mut alice = logged_in(addr, "alice").await;
    let mut bob = logged_in(addr, "bob").await;
    let (a, b) = tokio::join!(
        alice.request(with(json!({"command": "connect", "target": "bob"}), creds("alice"))),
        bob.request(with(json!({"command": "connect", "target": "alice"}), creds("bob"))),
    );
    assert_eq!(a["status"], "success");
    assert_eq!(b["status"], "success");
    (alice, bob)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_register_then_login_succeeds() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let mut client = RawClient::connect(&addr).await;

    let reg = client
        .request(json!({"command": "register", "username": "dave", "password": "s3cret"}))
        .await;
    let login = client
        .request(json!({"command": "login", "username": "dave", "password": "s3cret"}))
        .await;

    assert_eq!(reg["status"], "success");
    assert_eq!(login["status"], "success");
    assert!(directory.contains("dave"));
}

#[tokio::test]
async fn test_register_existing_user_returns_account_exists() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let mut client = RawClient::connect(&addr).await;

    let resp = client
        .request(with(json!({"command": "register"}), creds("alice")))
        .await;

    assert_eq!(resp["status"], "failure");
    assert_eq!(resp["error"], "account_exists");
    assert!(resp["message"].is_string());
}

#[tokio::test]
async fn test_login_wrong_password_returns_invalid_credentials() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let mut client = RawClient::connect(&addr).await;

    let resp = client
        .request(json!({"command": "login", "username": "alice", "password": "nope"}))
        .await;

    assert_eq!(resp["status"], "failure");
    assert_eq!(resp["error"], "invalid_credentials");
    assert!(!directory.contains("alice"));
}

#[tokio::test]
async fn test_login_second_connection_same_user_rejected() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let _first = logged_in(&addr, "alice").await;
    let mut second = RawClient::connect(&addr).await;

    let resp = second
        .request(with(json!({"command": "login"}), creds("alice")))
        .await;

    assert_eq!(resp["error"], "already_logged_in");
}

#[tokio::test]
async fn test_advertise_with_other_users_credentials_not_authorized() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let mut alice = logged_in(&addr, "alice").await;

    let resp = alice
        .request(with(json!({"command": "advertise"}), creds("bob")))
        .await;

    assert_eq!(resp["status"], "failure");
    assert_eq!(resp["error"], "not_authorized");
}

#[tokio::test]
async fn test_advertise_lists_other_advertised_users() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let mut alice = logged_in(&addr, "alice").await;
    let mut bob = logged_in(&addr, "bob").await;
    let _carol = logged_in(&addr, "carol").await;

    let first = bob
        .request(with(json!({"command": "advertise"}), creds("bob")))
        .await;
    let second = alice
        .request(with(json!({"command": "advertise"}), creds("alice")))
        .await;

    assert_eq!(first["users"], json!([]));
    // carol never advertised; alice doesn't see herself.
    assert_eq!(second["users"], json!(["bob"]));
}

#[tokio::test]
async fn test_connect_mutual_assigns_opener_and_listener() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let mut alice = logged_in(&addr, "alice").await;
    let mut bob = logged_in(&addr, "bob").await;

    let (a, b) = tokio::join!(
        alice.request(json!({
            "command": "connect", "username": "alice", "password": "pw",
            "target": "bob", "port": 7001
        })),
        bob.request(json!({
            "command": "connect", "username": "bob", "password": "pw",
            "target": "alice", "port": 7002
        })),
    );

    assert_eq!(a["status"], "success");
    assert_eq!(b["status"], "success");
    assert_ne!(a["is_client"], b["is_client"]);
    let (opener, listener) = if a["is_client"] == json!(true) { (&a, &b) } else { (&b, &a) };
    assert_eq!(opener["address"], "127.0.0.1");
    assert_eq!(listener["address"], "");
    assert_eq!(listener["port"], opener["port"]);
    assert_eq!(a["username"], "alice");
    assert_eq!(b["username"], "bob");

    assert_eq!(directory.partner_of("alice").as_deref(), Some("bob"));
    assert_eq!(directory.partner_of("bob").as_deref(), Some("alice"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_parallel_races_pick_one_opener_each_time() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;

    for round in 0..20 {
        let (a, b) = {
            let mut alice = logged_in(&addr, "alice").await;
            let mut bob = logged_in(&addr, "bob").await;
            let a = tokio::spawn(async move {
                let resp = alice
                    .request(with(json!({"command": "connect", "target": "bob"}), creds("alice")))
                    .await;
                (resp, alice)
            });
            let b = tokio::spawn(async move {
                let resp = bob
                    .request(with(json!({"command": "connect", "target": "alice"}), creds("bob")))
                    .await;
                (resp, bob)
            });
            (a.await.unwrap(), b.await.unwrap())
        };
        let ((a, alice), (b, bob)) = (a, b);

        assert_eq!(a["status"], "success", "round {round}: {a}");
        assert_eq!(b["status"], "success", "round {round}: {b}");
        assert_ne!(a["is_client"], b["is_client"], "round {round}");
        assert_eq!(directory.partner_of("alice").as_deref(), Some("bob"));
        assert_eq!(directory.partner_of("bob").as_deref(), Some("alice"));

        drop((alice, bob));
        tokio::time::timeout(Duration::from_secs(5), async {
            while directory.contains("alice") || directory.contains("bob") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sessions should be purged between rounds");
    }
}

#[tokio::test]
async fn test_connect_without_reciprocation_returns_target_unavailable() {
    let (addr, directory) = start_server(Duration::from_millis(100)).await;
    let mut alice = logged_in(&addr, "alice").await;
    let _bob = logged_in(&addr, "bob").await;

    let resp = alice
        .request(with(json!({"command": "connect", "target": "bob"}), creds("alice")))
        .await;

    assert_eq!(resp["status"], "failure");
    assert_eq!(resp["error"], "target_unavailable");
    assert_eq!(directory.pending_target_of("alice"), None);
}

#[tokio::test]
async fn test_message_relayed_to_partner() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let (mut alice, mut bob) = pair(&addr).await;

    let resp = alice
        .request(with(
            json!({"command": "message", "message": "hello, bob"}),
            creds("alice"),
        ))
        .await;
    let push = bob.push().await;

    assert_eq!(resp["status"], "success");
    assert_eq!(
        push,
        json!({"command": "message", "username": "alice", "message": "hello, bob"})
    );
}

#[tokio::test]
async fn test_message_without_partner_returns_no_partner() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let mut alice = logged_in(&addr, "alice").await;

    let resp = alice
        .request(with(json!({"command": "message", "message": "hi"}), creds("alice")))
        .await;

    assert_eq!(resp["error"], "no_partner");
}

#[tokio::test]
async fn test_quit_unpairs_both_and_notifies_partner() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let (mut alice, mut bob) = pair(&addr).await;

    let resp = alice
        .request(with(json!({"command": "message", "quit": true}), creds("alice")))
        .await;
    let notice = bob.push().await;
    let after = bob
        .request(with(json!({"command": "message", "message": "still there?"}), creds("bob")))
        .await;

    assert_eq!(resp["status"], "success");
    assert_eq!(notice["command"], "message");
    assert_eq!(notice["username"], "");
    assert_eq!(after["error"], "no_partner");
    assert_eq!(directory.partner_of("alice"), None);

    let mine = alice
        .request(with(json!({"command": "message", "message": "hello?"}), creds("alice")))
        .await;
    assert_eq!(mine["status"], "failure");
    assert_eq!(mine["error"], "no_partner");
}

#[tokio::test]
async fn test_malformed_frame_closes_and_purges_session() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let mut alice = logged_in(&addr, "alice").await;

    alice
        .ws
        .send(Message::Binary(b"{not json".to_vec().into()))
        .await
        .unwrap();

    assert!(alice.closed().await, "server should close the connection");
    // The identity is free again.
    let mut again = RawClient::connect(&addr).await;
    let resp = again
        .request(with(json!({"command": "login"}), creds("alice")))
        .await;
    assert_eq!(resp["status"], "success");
    assert!(directory.contains("alice"));
}

#[tokio::test]
async fn test_unknown_command_closes_connection() {
    let (addr, _) = start_server(Duration::from_secs(5)).await;
    let mut client = RawClient::connect(&addr).await;

    client.send_raw(&json!({"command": "teleport", "ID": 1})).await;

    assert!(client.closed().await);
}

#[tokio::test]
async fn test_close_command_ends_session() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let mut alice = logged_in(&addr, "alice").await;

    alice.send_raw(&json!({"command": "close"})).await;

    assert!(alice.closed().await);
    assert!(!directory.contains("alice"));
}

#[tokio::test]
async fn test_partner_disconnect_sends_notice_and_unpairs() {
    let (addr, directory) = start_server(Duration::from_secs(5)).await;
    let (alice, mut bob) = pair(&addr).await;

    drop(alice);
    let notice = bob.push().await;

    assert_eq!(notice["username"], "");
    assert!(notice["message"].as_str().unwrap().contains("alice"));
    assert_eq!(directory.partner_of("bob"), None);
}
