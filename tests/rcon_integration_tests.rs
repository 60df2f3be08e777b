//! Integration tests for the RCON client against an in-process TCP server
//!
//! These tests verify:
//! - Authentication success and rejection
//! - Command execution and response parsing
//! - Reassembly of responses delivered in small fragments
//! - The single reconnect-and-retry after a dropped connection
//! - Fire-and-forget commands and unreachable servers

use pzkeeper::services::rcon::{
    Packet, RconClient, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND, SessionState, read_packet,
    write_packet,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const PASSWORD: &str = "s3cret";
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behavior {
    Normal,
    /// Close the first connection right after reading its first command.
    DropFirstCommand,
    /// Deliver every response a few bytes at a time.
    Fragmented,
}

type Received = Arc<Mutex<Vec<String>>>;

async fn spawn_server(behavior: Behavior) -> (SocketAddr, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Received::default();

    let log = Arc::clone(&received);
    tokio::spawn(async move {
        let mut connection = 0usize;
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, behavior, connection, Arc::clone(&log)));
            connection += 1;
        }
    });

    (addr, received)
}

async fn serve(mut stream: TcpStream, behavior: Behavior, connection: usize, log: Received) {
    let Ok(auth) = read_packet(&mut stream).await else {
        return;
    };
    assert_eq!(auth.kind, SERVERDATA_AUTH);
    let id = if auth.body == PASSWORD { auth.id } else { -1 };
    if write_packet(&mut stream, &Packet::new(id, SERVERDATA_AUTH_RESPONSE, ""))
        .await
        .is_err()
        || id < 0
    {
        return;
    }

    while let Ok(request) = read_packet(&mut stream).await {
        assert_eq!(request.kind, SERVERDATA_EXECCOMMAND);
        log.lock().unwrap().push(request.body.clone());

        if behavior == Behavior::DropFirstCommand && connection == 0 {
            return;
        }

        let reply = Packet::new(request.id, SERVERDATA_RESPONSE_VALUE, respond(&request.body));
        if behavior == Behavior::Fragmented {
            for piece in reply.encode().chunks(5) {
                if stream.write_all(piece).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        } else if write_packet(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}

fn respond(command: &str) -> String {
    match command {
        "players" => "Players connected (3):\n-admin\n-Alice\n- Bob\n".to_string(),
        other => format!("ok: {}", other),
    }
}

fn client(addr: SocketAddr, password: &str) -> RconClient {
    RconClient::new(addr.ip().to_string(), addr.port(), password)
}

#[tokio::test]
async fn test_connect_and_execute() {
    let (addr, received) = spawn_server(Behavior::Normal).await;
    let mut rcon = client(addr, PASSWORD);

    assert!(rcon.connect().await);
    assert_eq!(rcon.state(), SessionState::Connected);

    assert_eq!(rcon.execute("showoptions").await, "ok: showoptions");
    assert_eq!(rcon.state(), SessionState::Connected);
    assert_eq!(*received.lock().unwrap(), vec!["showoptions"]);
}

#[tokio::test]
async fn test_wrong_password_fails_closed() {
    let (addr, received) = spawn_server(Behavior::Normal).await;
    let mut rcon = client(addr, "wrong");

    assert!(!rcon.connect().await);
    assert_eq!(rcon.state(), SessionState::Disconnected);

    // Both attempts re-authenticate and are rejected.
    assert_eq!(rcon.execute("players").await, "");
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_players_and_admin_presence() {
    let (addr, _received) = spawn_server(Behavior::Normal).await;
    let mut rcon = client(addr, PASSWORD);
    assert!(rcon.connect().await);

    let names: Vec<String> = rcon
        .list_players()
        .await
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["admin", "Alice", "Bob"]);
    assert!(rcon.is_admin_online().await);
}

#[tokio::test]
async fn test_command_formatting() {
    let (addr, received) = spawn_server(Behavior::Normal).await;
    let mut rcon = client(addr, PASSWORD);
    assert!(rcon.connect().await);

    rcon.kick("griefer", "spawn \"camping\"").await;
    rcon.ban("cheater", "speedhack").await;
    rcon.broadcast("Restart in 5 minutes").await;

    assert_eq!(
        *received.lock().unwrap(),
        vec![
            "kickuser \"griefer\" -r \"spawn 'camping'\"",
            "banuser \"cheater\" -r \"speedhack\"",
            "servermsg \"Restart in 5 minutes\"",
        ]
    );
}

#[tokio::test]
async fn test_fragmented_response_is_reassembled() {
    let (addr, _received) = spawn_server(Behavior::Fragmented).await;
    let mut rcon = client(addr, PASSWORD);
    assert!(rcon.connect().await);

    let long = "x".repeat(600);
    assert_eq!(rcon.execute(&long).await, format!("ok: {}", long));
}

#[tokio::test]
async fn test_reconnects_once_after_dropped_connection() {
    let (addr, received) = spawn_server(Behavior::DropFirstCommand).await;
    let mut rcon = client(addr, PASSWORD);
    assert!(rcon.connect().await);

    assert_eq!(rcon.execute("save").await, "ok: save");
    assert_eq!(*received.lock().unwrap(), vec!["save", "save"]);
    assert_eq!(rcon.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_execute_connects_lazily() {
    let (addr, _received) = spawn_server(Behavior::Normal).await;
    let mut rcon = client(addr, PASSWORD);

    assert_eq!(rcon.state(), SessionState::Disconnected);
    assert_eq!(rcon.execute("help").await, "ok: help");
}

#[tokio::test]
async fn test_quit_sends_without_reading() {
    let (addr, received) = spawn_server(Behavior::Normal).await;
    let mut rcon = client(addr, PASSWORD);
    assert!(rcon.connect().await);

    rcon.quit().await;
    rcon.disconnect();
    assert_eq!(rcon.state(), SessionState::Disconnected);

    // Give the server a moment to read both packets.
    for _ in 0..50 {
        if received.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*received.lock().unwrap(), vec!["quit", "save"]);
}

#[tokio::test]
async fn test_unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut rcon = client(addr, PASSWORD);
    assert!(!rcon.connect().await);
    assert_eq!(rcon.execute("players").await, "");
    assert!(!rcon.send("save").await);
    assert_eq!(rcon.state(), SessionState::Disconnected);
}
