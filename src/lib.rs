//! A Redis-compatible, single-node in-memory key-value server.
//!
//! The server speaks the RESP wire protocol over TCP and supports:
//!
//! - String operations (GET, SET with PX/EX expiry, INCR) and key
//!   introspection (TYPE, KEYS)
//! - Append-only streams (XADD, XRANGE, XREAD including blocking reads)
//! - Transaction batching (MULTI / EXEC / DISCARD)
//! - Asynchronous primary/replica replication with per-replica
//!   acknowledgement tracking and WAIT
//! - Bootstrapping the keyspace from a binary snapshot file at startup
//!
//! Concurrency is cooperative: one Tokio task per connection, with the
//! keyspace behind a reader/writer lock and per-stream locks for appends.

pub mod commands;
pub mod connection;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod server;
pub mod store;
pub mod stream;
