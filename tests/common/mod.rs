//! Shared helpers for the wire-level integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rudis::connection::handle_primary_connection;
use rudis::replication::{PrimaryState, ReplicaState, ReplicationState, perform_handshake};
use rudis::server::{ServerConfig, ServerContext, serve};
use rudis::store::Store;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds an ephemeral port and serves a primary with an empty keyspace.
pub async fn start_primary() -> (SocketAddr, Arc<ServerContext>) {
    start_primary_with_store(Store::new()).await
}

pub async fn start_primary_with_store(store: Store) -> (SocketAddr, Arc<ServerContext>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let ctx = Arc::new(ServerContext {
        config: ServerConfig {
            port: address.port(),
            rdb_dir: "/tmp/redis-files".to_string(),
            rdb_filename: "dump.rdb".to_string(),
            replica_of: None,
        },
        store,
        replication: ReplicationState::Primary(PrimaryState::new()),
    });

    let serve_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        let _ = serve(listener, serve_ctx).await;
    });

    (address, ctx)
}

/// Performs a real handshake against `primary`, then serves the replica on
/// its own ephemeral port with the primary connection running.
pub async fn start_replica(primary: SocketAddr) -> (SocketAddr, Arc<ServerContext>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let (primary_conn, snapshot) =
        perform_handshake("127.0.0.1", primary.port(), address.port())
            .await
            .unwrap();

    let ctx = Arc::new(ServerContext {
        config: ServerConfig {
            port: address.port(),
            rdb_dir: "/tmp/redis-files".to_string(),
            rdb_filename: "dump.rdb".to_string(),
            replica_of: Some(("127.0.0.1".to_string(), primary.port())),
        },
        store: Store::from_entries(snapshot),
        replication: ReplicationState::Replica(ReplicaState::new(
            "127.0.0.1".to_string(),
            primary.port(),
        )),
    });

    let primary_conn_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        handle_primary_connection(primary_conn_ctx, primary_conn).await;
    });

    let serve_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        let _ = serve(listener, serve_ctx).await;
    });

    (address, ctx)
}

pub async fn connect(address: SocketAddr) -> TcpStream {
    TcpStream::connect(address).await.unwrap()
}

/// Reads exactly `len` bytes, failing the test on a timeout.
pub async fn recv_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];

    tokio::time::timeout(REPLY_TIMEOUT, stream.read_exact(&mut buffer))
        .await
        .expect("timed out waiting for reply")
        .expect("connection closed while waiting for reply");

    buffer
}

/// Sends `command` and asserts the server answers exactly `expected`.
pub async fn assert_reply(stream: &mut TcpStream, command: &[u8], expected: &[u8]) {
    stream.write_all(command).await.unwrap();

    let reply = recv_exact(stream, expected.len()).await;
    assert_eq!(
        String::from_utf8_lossy(&reply),
        String::from_utf8_lossy(expected),
        "reply to {:?}",
        String::from_utf8_lossy(command)
    );
}

pub async fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
}
