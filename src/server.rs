//! Server configuration and lifecycle: command-line parsing, role
//! initialization, snapshot load, and the accept loop.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::connection::{handle_client_connection, handle_primary_connection};
use crate::rdb::{self, RdbError};
use crate::replication::{
    HandshakeError, PrimaryState, ReplicaState, ReplicationState, perform_handshake,
};
use crate::store::Store;

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_RDB_DIR: &str = "/tmp/redis-files";
const DEFAULT_RDB_FILENAME: &str = "dump.rdb";

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Errors from command-line argument parsing.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum CliError {
    #[error("invalid command line flag '{0}'")]
    InvalidFlag(String),
    #[error("missing value for flag '{0}'")]
    MissingFlagValue(String),
    #[error("invalid port value")]
    InvalidPort,
    #[error("invalid primary address")]
    InvalidPrimaryAddress,
    #[error("invalid primary port")]
    InvalidPrimaryPort,
}

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to load snapshot: {0}")]
    Snapshot(#[from] RdbError),
    #[error("failed to sync with primary: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
}

/// Startup configuration, also served back by `CONFIG GET`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub rdb_dir: String,
    pub rdb_filename: String,
    /// `Some((host, port))` configures replica mode.
    pub replica_of: Option<(String, u16)>,
}

/// The single bundle of shared state passed by reference to every handler:
/// no ambient singletons.
pub struct ServerContext {
    pub config: ServerConfig,
    pub store: Store,
    pub replication: ReplicationState,
}

pub struct RedisServer {
    config: ServerConfig,
}

impl RedisServer {
    /// Parses command-line arguments.
    ///
    /// Supported flags: `--port <n>`, `--dir <path>`, `--dbfilename <name>`,
    /// and `--replicaof "<host> <port>"`.
    pub fn new<I: IntoIterator<Item = String>>(command_line_args: I) -> Result<Self, CliError> {
        let mut args = command_line_args.into_iter().skip(1);

        let mut port = DEFAULT_PORT;
        let mut rdb_dir = DEFAULT_RDB_DIR.to_string();
        let mut rdb_filename = DEFAULT_RDB_FILENAME.to_string();
        let mut replica_of = None;

        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--port" => {
                    port = validate_port(&flag_value(&mut args, &flag)?, CliError::InvalidPort)?;
                }
                "--dir" => rdb_dir = flag_value(&mut args, &flag)?,
                "--dbfilename" => rdb_filename = flag_value(&mut args, &flag)?,
                "--replicaof" => {
                    replica_of = Some(validate_primary_address(&flag_value(&mut args, &flag)?)?);
                }
                _ => return Err(CliError::InvalidFlag(flag)),
            }
        }

        Ok(RedisServer {
            config: ServerConfig {
                port,
                rdb_dir,
                rdb_filename,
                replica_of,
            },
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Boots the keyspace from the snapshot, initializes the replication
    /// role (performing the handshake when configured as a replica), spawns
    /// the expiry sweeper, binds, and serves until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        let entries = rdb::load_file(&self.config.rdb_dir, &self.config.rdb_filename).await?;
        let store = Store::from_entries(entries);

        let (replication, primary_conn) = match &self.config.replica_of {
            Some((host, port)) => {
                let (primary_conn, snapshot) =
                    perform_handshake(host, *port, self.config.port).await?;
                store.absorb(snapshot).await;

                let state = ReplicationState::Replica(ReplicaState::new(host.clone(), *port));
                (state, Some(primary_conn))
            }
            None => (
                ReplicationState::Primary(PrimaryState::new()),
                None,
            ),
        };

        let ctx = Arc::new(ServerContext {
            config: self.config,
            store,
            replication,
        });

        if let Some(primary_conn) = primary_conn {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                handle_primary_connection(ctx, primary_conn).await;
            });
        }

        spawn_expiry_sweeper(&ctx);

        let listener = TcpListener::bind(("127.0.0.1", ctx.config.port))
            .await
            .map_err(ServerError::Bind)?;

        info!(
            port = ctx.config.port,
            role = ctx.replication.role_name(),
            "listening for connections"
        );

        serve(listener, ctx).await
    }
}

/// The accept loop, split from `run` so tests can drive an ephemeral port.
pub async fn serve(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<(), ServerError> {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => {
                debug!(peer = %address, "accepted connection");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_client_connection(ctx, stream).await;
                });
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
}

fn spawn_expiry_sweeper(ctx: &Arc<ServerContext>) {
    let store = ctx.store.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let reaped = store.sweep_expired().await;
            if reaped > 0 {
                debug!(reaped, "sweeper removed expired keys");
            }
        }
    });
}

fn flag_value(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<String, CliError> {
    args.next()
        .ok_or_else(|| CliError::MissingFlagValue(flag.to_string()))
}

fn validate_port(text: &str, error: CliError) -> Result<u16, CliError> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(error),
        Ok(port) => Ok(port),
    }
}

/// Validates a `"<host> <port>"` primary address. Hosts may be IPv4
/// addresses or hostnames.
fn validate_primary_address(address: &str) -> Result<(String, u16), CliError> {
    let ipv4_pattern = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
    let hostname_pattern = Regex::new(r"^[a-zA-Z0-9\-\.]+$").unwrap();

    let parts: Vec<&str> = address.split_whitespace().collect();
    let [host, port] = parts[..] else {
        return Err(CliError::InvalidPrimaryAddress);
    };

    let valid_host = if let Some(octets) = ipv4_pattern.captures(host) {
        octets
            .iter()
            .skip(1)
            .flatten()
            .all(|octet| octet.as_str().parse::<u16>().is_ok_and(|v| v <= 255))
    } else {
        hostname_pattern.is_match(host)
    };

    if !valid_host {
        return Err(CliError::InvalidPrimaryAddress);
    }

    let port = validate_port(port, CliError::InvalidPrimaryPort)?;

    Ok((host.to_string(), port))
}
