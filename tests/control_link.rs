//! Control link integration tests
//!
//! Exercises real sockets end to end: server lifecycle, client connection,
//! message receipt, and the robot facade replying through its handler.
//! Every test binds its own loopback alias because the control port is
//! fixed protocol-wide.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use robolink::link::codec;
use robolink::link::notify::Property;
use robolink::link::server::ServerConfig;
use robolink::{
    ConnectedRobot, LinkError, Message, MessageHandler, RobotClient, RobotMessage, RobotServer,
    Sender,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TelemetryMessage {
    sender: Sender,
    reading: i32,
}

impl Message for TelemetryMessage {
    const KIND: &'static str = "TelemetryMessage";
}

/// Poll until `cond` holds, failing after two seconds.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Integration test: is_running tracks repeated start/stop cycles.
#[tokio::test]
async fn test_server_start_stop_cycles() {
    let server = RobotServer::with_address(Ipv4Addr::new(127, 0, 0, 101));
    assert!(!server.is_running());

    for _ in 0..2 {
        server.start().await.unwrap();
        assert!(server.is_running());

        // A second start while listening is rejected.
        assert!(matches!(
            server.start().await,
            Err(LinkError::AlreadyRunning)
        ));

        server.stop().await;
        assert!(!server.is_running());
    }
}

/// Integration test: a client connects while the server runs and fails
/// gracefully once it is gone.
#[tokio::test]
async fn test_client_connect_and_graceful_failure() {
    let address = Ipv4Addr::new(127, 0, 0, 102);
    let server = RobotServer::with_address(address);
    server.start().await.unwrap();

    let client = RobotClient::new(address);
    assert!(!client.is_connected());
    client.connect().await;
    assert!(client.is_connected());

    client.disconnect().await;
    assert!(!client.is_connected());
    server.stop().await;

    // The server is gone now; a fresh attempt reports failure through
    // state and log line, not an error.
    let late_client = RobotClient::new(address);
    late_client.connect().await;
    assert!(!late_client.is_connected());
    assert!(late_client.log_line().contains("Connection failed"));
}

/// Integration test: one received message updates last_message and fires
/// exactly one LastMessage notification.
#[tokio::test]
async fn test_received_message_updates_last_message() {
    let address = Ipv4Addr::new(127, 0, 0, 103);
    let server = RobotServer::with_address(address);
    let mut rx = server.subscribe();
    server.start().await.unwrap();

    let client = RobotClient::new(address);
    client.connect().await;
    assert!(client.is_connected());

    client.send(&RobotMessage::from_client()).await.unwrap();
    wait_for("last_message", || server.last_message().is_some()).await;

    let raw = server.last_message().unwrap();
    let received: RobotMessage = codec::decode(&raw).unwrap();
    assert_eq!(received.sender, Sender::FromClient);

    // Give any stray notification time to land, then count.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut last_message_changes = 0;
    while let Ok(change) = rx.try_recv() {
        if change.property == Property::LastMessage {
            last_message_changes += 1;
        }
    }
    assert_eq!(last_message_changes, 1);

    server.stop().await;
}

/// Handler that answers every valid request with a fixed reading.
struct FixedReplyHandler;

impl MessageHandler for FixedReplyHandler {
    fn on_message(&self, server: &RobotServer) -> impl std::future::Future<Output = ()> + Send {
        async move {
            let Some(raw) = server.last_message() else {
                return;
            };
            if codec::decode::<RobotMessage>(&raw).is_ok() {
                let reply = TelemetryMessage {
                    sender: Sender::FromRobot,
                    reading: 150,
                };
                let _ = server.send_message(&reply).await;
            }
        }
    }
}

/// Integration test: a robot whose handler replies with reading 150 is
/// observed by the client through receive().
#[tokio::test]
async fn test_robot_replies_through_handler() {
    let address = Ipv4Addr::new(127, 0, 0, 104);
    let robot =
        ConnectedRobot::with_handler(ServerConfig::default().with_address(address), FixedReplyHandler);
    assert!(!robot.is_server_running());
    robot.start().await.unwrap();
    assert!(robot.is_server_running());

    let client = RobotClient::new(address);
    client.connect().await;
    assert!(client.is_connected());

    client.send(&RobotMessage::from_client()).await.unwrap();
    let answer: TelemetryMessage = client.receive().await.unwrap();
    assert_eq!(answer.sender, Sender::FromRobot);
    assert_eq!(answer.reading, 150);

    robot.stop().await;
    assert!(!robot.is_server_running());
}

/// Integration test: send with no accepted session ever fails cleanly and
/// leaves the accept loop alive.
#[tokio::test]
async fn test_send_without_session() {
    let address = Ipv4Addr::new(127, 0, 0, 105);
    let server = RobotServer::with_address(address);
    server.start().await.unwrap();

    let result = server.send_message(&RobotMessage::from_robot()).await;
    assert!(matches!(result, Err(LinkError::NoActiveSession)));
    assert!(server.is_running());

    // The loop still accepts after the failed send.
    let client = RobotClient::new(address);
    client.connect().await;
    assert!(client.is_connected());

    server.stop().await;
}

/// Integration test: connecting with nothing listening never throws.
#[tokio::test]
async fn test_connect_to_absent_robot() {
    let client = RobotClient::new(Ipv4Addr::new(127, 0, 0, 106));
    client.connect().await;
    assert!(!client.is_connected());
    assert!(!client.is_attempting_connection());
    assert!(client.log_line().contains("Connection failed"));
}

/// Integration test: a new caller supersedes an idle session immediately,
/// both as the source of last_message and as the target of replies.
#[tokio::test]
async fn test_new_caller_supersedes_idle_session() {
    let address = Ipv4Addr::new(127, 0, 0, 108);
    let server = RobotServer::with_address(address);
    server.start().await.unwrap();

    // First caller connects and goes quiet.
    let idle = RobotClient::new(address);
    idle.connect().await;
    assert!(idle.is_connected());

    // Second caller must get through while the first one idles.
    let active = RobotClient::new(address);
    active.connect().await;
    assert!(active.is_connected());
    active.send(&RobotMessage::from_client()).await.unwrap();

    wait_for("last_message", || server.last_message().is_some()).await;
    let received: RobotMessage = codec::decode(&server.last_message().unwrap()).unwrap();
    assert_eq!(received.sender, Sender::FromClient);

    // Replies go to the newest caller, not the idle one.
    server.send_message(&RobotMessage::from_robot()).await.unwrap();
    let answer: RobotMessage = active.receive().await.unwrap();
    assert_eq!(answer.sender, Sender::FromRobot);

    server.stop().await;
}

/// Integration test: sending to a departed caller reports ConnectionClosed
/// and drops the dead session, so the next send sees no session at all.
#[tokio::test]
async fn test_send_to_departed_caller() {
    let address = Ipv4Addr::new(127, 0, 0, 109);
    let server = RobotServer::with_address(address);
    server.start().await.unwrap();

    let client = RobotClient::new(address);
    client.connect().await;
    assert!(client.is_connected());
    client.disconnect().await;

    // The first write after the peer leaves can still land in the socket
    // buffer, so keep sending until the failure surfaces.
    let mut closed = None;
    for _ in 0..200 {
        match server.send_message(&RobotMessage::from_robot()).await {
            Ok(()) => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => {
                closed = Some(e);
                break;
            }
        }
    }
    assert!(matches!(closed, Some(LinkError::ConnectionClosed)));

    // The dead session was discarded along with the error.
    assert!(matches!(
        server.send_message(&RobotMessage::from_robot()).await,
        Err(LinkError::NoActiveSession)
    ));

    server.stop().await;
}

/// Integration test: the client reports ConnectionClosed and clears its
/// connected flag when the robot side drops the socket.
#[tokio::test]
async fn test_client_receive_after_peer_drops() {
    let address = Ipv4Addr::new(127, 0, 0, 110);
    let listener = tokio::net::TcpListener::bind((address, robolink::CONTROL_PORT))
        .await
        .unwrap();

    let client = RobotClient::new(address);
    client.connect().await;
    assert!(client.is_connected());

    let (session, _) = listener.accept().await.unwrap();
    drop(session);

    let result = client.receive::<RobotMessage>().await;
    assert!(matches!(result, Err(LinkError::ConnectionClosed)));
    assert!(!client.is_connected());

    // The stream is gone, so further sends fail the connected check.
    assert!(matches!(
        client.send(&RobotMessage::from_client()).await,
        Err(LinkError::NotConnected)
    ));
}

/// Integration test: a legacy sentinel-framed payload still decodes on the
/// server side. Uses a raw socket because the client only sends the current
/// framing.
#[tokio::test]
async fn test_sentinel_framed_message_is_accepted() {
    use tokio::io::AsyncWriteExt;

    let address = Ipv4Addr::new(127, 0, 0, 107);
    let server = RobotServer::with_address(address);
    server.start().await.unwrap();

    let framed = format!(
        "{}{}",
        codec::encode(&RobotMessage::from_client()).unwrap(),
        codec::EOF_SENTINEL
    );
    let mut stream = tokio::net::TcpStream::connect((address, robolink::CONTROL_PORT))
        .await
        .unwrap();
    stream.write_all(framed.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();

    wait_for("last_message", || server.last_message().is_some()).await;
    let received: RobotMessage = codec::decode(&server.last_message().unwrap()).unwrap();
    assert_eq!(received.sender, Sender::FromClient);

    server.stop().await;
}
