//! End-to-end chats between two clients through a real server.

use std::sync::Arc;
use std::time::Duration;

use parley::prelude::*;
use parley_client::{Client, ClientConfig, ClientError, HandoffMode, PushEvent};
use parley_protocol::FailureKind;
use tokio::sync::mpsc::UnboundedReceiver;

async fn start_server() -> String {
    start_server_with_directory().await.0
}

async fn start_server_with_directory() -> (String, Arc<Directory>) {
    let credentials = MemoryCredentials::new();
    for name in ["alice", "bob"] {
        credentials.create(name, "pw").await;
    }
    let server = ParleyServerBuilder::new()
        .bind("127.0.0.1:0")
        .rendezvous_config(RendezvousConfig {
            connect_timeout: Duration::from_secs(5),
        })
        .build(credentials)
        .await
        .expect("server should build");
    let addr = server.local_addr().unwrap().to_string();
    let directory = server.directory();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, directory)
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn client(
    addr: &str,
    name: &str,
    config: ClientConfig,
) -> (Client, UnboundedReceiver<PushEvent>) {
    let (mut client, events) = Client::dial(addr, config).await.expect("dial");
    client.login(name, "pw").await.expect("login");
    (client, events)
}

async fn next_event(events: &mut UnboundedReceiver<PushEvent>) -> PushEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

fn relay_config() -> ClientConfig {
    ClientConfig {
        handoff: HandoffMode::Relay,
        request_timeout: Duration::from_secs(10),
        ..ClientConfig::default()
    }
}

async fn direct_config() -> ClientConfig {
    ClientConfig {
        handoff: HandoffMode::Direct,
        peer_port: Some(free_port().await),
        request_timeout: Duration::from_secs(10),
        handoff_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_login_wrong_password_is_rejected() {
    let addr = start_server().await;
    let (mut client, _events) = Client::dial(&addr, relay_config()).await.unwrap();

    let err = client.login("alice", "wrong").await.unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::InvalidCredentials));
    assert_eq!(client.username(), None);
}

#[tokio::test]
async fn test_advertise_before_login_is_refused_locally() {
    let addr = start_server().await;
    let (mut client, _events) = Client::dial(&addr, relay_config()).await.unwrap();

    assert!(matches!(client.advertise().await, Err(ClientError::NotLoggedIn)));
}

#[tokio::test]
async fn test_relay_chat_delivers_and_quits() {
    let addr = start_server().await;
    let (mut alice, mut alice_events) = client(&addr, "alice", relay_config()).await;
    let (mut bob, mut bob_events) = client(&addr, "bob", relay_config()).await;

    let (a, b) = tokio::join!(alice.connect("bob"), bob.connect("alice"));
    a.unwrap();
    b.unwrap();
    assert_eq!(alice.partner(), Some("bob"));
    assert!(!alice.is_direct());

    alice.send("hi bob").await.unwrap();
    assert_eq!(
        next_event(&mut bob_events).await,
        PushEvent::Message {
            username: "alice".into(),
            message: "hi bob".into()
        }
    );

    bob.quit().await.unwrap();
    match next_event(&mut alice_events).await {
        PushEvent::Message { username, .. } => assert_eq!(username, ""),
        other => panic!("expected notice, got {other:?}"),
    }
    assert_eq!(alice.partner(), None);
    assert!(matches!(alice.send("still there?").await, Err(ClientError::NoChat)));
}

#[tokio::test]
async fn test_relay_partner_quit_frees_client_to_pair_again() {
    let addr = start_server().await;
    let (mut alice, mut alice_events) = client(&addr, "alice", relay_config()).await;
    let (mut bob, _bob_events) = client(&addr, "bob", relay_config()).await;
    let (a, b) = tokio::join!(alice.connect("bob"), bob.connect("alice"));
    a.unwrap();
    b.unwrap();

    bob.quit().await.unwrap();
    next_event(&mut alice_events).await;

    let (a, b) = tokio::join!(alice.connect("bob"), bob.connect("alice"));
    a.expect("alice should be free to connect again");
    b.expect("bob should be free to connect again");
    assert_eq!(alice.partner(), Some("bob"));
    assert_eq!(bob.partner(), Some("alice"));
}

#[tokio::test]
async fn test_direct_chat_with_default_config_hands_off() {
    let addr = start_server().await;
    let (mut alice, _alice_events) =
        client(&addr, "alice", ClientConfig::default()).await;
    let (mut bob, mut bob_events) =
        client(&addr, "bob", ClientConfig::default()).await;

    let (a, b) = tokio::join!(alice.connect("bob"), bob.connect("alice"));
    let (a, b) = (a.expect("alice"), b.expect("bob"));
    assert_ne!(a.is_client, b.is_client);
    assert!(alice.is_direct());
    assert!(bob.is_direct());

    alice.send("no ports configured").await.unwrap();
    assert_eq!(
        next_event(&mut bob_events).await,
        PushEvent::Message {
            username: "alice".into(),
            message: "no ports configured".into()
        }
    );
    alice.quit().await.unwrap();
}

#[tokio::test]
async fn test_direct_chat_hands_off_and_returns_to_server() {
    let addr = start_server().await;
    let (mut alice, mut alice_events) =
        client(&addr, "alice", direct_config().await).await;
    let (mut bob, mut bob_events) = client(&addr, "bob", direct_config().await).await;

    let (a, b) = tokio::join!(alice.connect("bob"), bob.connect("alice"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.is_client, b.is_client);
    assert!(alice.is_direct());
    assert!(bob.is_direct());

    alice.send("hello over the wire").await.unwrap();
    assert_eq!(
        next_event(&mut bob_events).await,
        PushEvent::Message {
            username: "alice".into(),
            message: "hello over the wire".into()
        }
    );
    bob.send("hi alice").await.unwrap();
    assert_eq!(
        next_event(&mut alice_events).await,
        PushEvent::Message {
            username: "bob".into(),
            message: "hi alice".into()
        }
    );

    alice.quit().await.unwrap();
    assert!(!alice.is_direct());
    assert_eq!(next_event(&mut bob_events).await, PushEvent::PeerQuit);

    // Both are back on the server connection and free to pair again.
    let listed = alice.advertise().await.unwrap();
    assert!(listed.is_empty());
    let listed = bob.advertise().await.unwrap();
    assert_eq!(listed, vec!["alice".to_string()]);
    assert_eq!(bob.partner(), None);
}

#[tokio::test]
async fn test_close_removes_client_from_directory() {
    let (addr, directory) = start_server_with_directory().await;
    let (alice, _events) = client(&addr, "alice", relay_config()).await;
    assert!(directory.contains("alice"));

    alice.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while directory.contains("alice") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server should drop the session");
}
