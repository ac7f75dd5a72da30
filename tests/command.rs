//! Wire-level command scenarios against a live server on an ephemeral port.

mod common;

use std::time::Duration;

use common::{assert_reply, connect, recv_exact, send, start_primary};

#[tokio::test]
async fn test_echo() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n",
        b"$3\r\nhey\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_ping() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_set_get_with_px_expiry() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nPX\r\n$3\r\n100\r\n",
        b"+OK\r\n",
    )
    .await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_reply(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
        b"$3\r\nbar\r\n",
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_reply(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn test_set_get_round_trips_binary_values() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    // The value is not valid UTF-8; it must store and read back untouched.
    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$3\r\nbin\r\n$4\r\n\xff\x00\xfe\x01\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$3\r\nbin\r\n",
        b"$4\r\n\xff\x00\xfe\x01\r\n",
    )
    .await;

    // ECHO is binary-safe too.
    assert_reply(
        &mut client,
        b"*2\r\n$4\r\nECHO\r\n$2\r\n\xf0\x0f\r\n",
        b"$2\r\n\xf0\x0f\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_set_with_ex_and_missing_get() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$2\r\n10\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\nv\r\n").await;

    assert_reply(&mut client, b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn test_incr() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(&mut client, b"*2\r\n$4\r\nINCR\r\n$1\r\nc\r\n", b":1\r\n").await;
    assert_reply(&mut client, b"*2\r\n$4\r\nINCR\r\n$1\r\nc\r\n", b":2\r\n").await;

    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nn\r\n$2\r\n41\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(&mut client, b"*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n", b":42\r\n").await;

    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nw\r\n$5\r\nmango\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*2\r\n$4\r\nINCR\r\n$1\r\nw\r\n",
        b"-ERR value is not an integer or out of range\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_type_reports_kind() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(&mut client, b"*2\r\n$4\r\nTYPE\r\n$1\r\nk\r\n", b"+none\r\n").await;

    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(&mut client, b"*2\r\n$4\r\nTYPE\r\n$1\r\nk\r\n", b"+string\r\n").await;

    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;
    assert_reply(&mut client, b"*2\r\n$4\r\nTYPE\r\n$1\r\ns\r\n", b"+stream\r\n").await;
}

#[tokio::test]
async fn test_keys_glob() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$1\r\n1\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$3\r\nbar\r\n$1\r\n2\r\n",
        b"+OK\r\n",
    )
    .await;

    assert_reply(
        &mut client,
        b"*2\r\n$4\r\nKEYS\r\n$2\r\nf*\r\n",
        b"*1\r\n$3\r\nfoo\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_xadd_xrange_scenario() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-2\r\n$1\r\nb\r\n$1\r\n2\r\n",
        b"$3\r\n1-2\r\n",
    )
    .await;

    assert_reply(
        &mut client,
        b"*4\r\n$6\r\nXRANGE\r\n$1\r\ns\r\n$1\r\n-\r\n$1\r\n+\r\n",
        b"*2\r\n\
          *2\r\n$3\r\n1-1\r\n*2\r\n$1\r\na\r\n$1\r\n1\r\n\
          *2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n",
    )
    .await;

    // Regressive id after the previous appends.
    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-2\r\n$1\r\nx\r\n$1\r\n1\r\n",
        b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
    )
    .await;

    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n0-0\r\n$1\r\nx\r\n$1\r\n1\r\n",
        b"-ERR The ID specified in XADD must be greater than 0-0\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_xadd_auto_sequence() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-*\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n5-0\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n5-*\r\n$1\r\na\r\n$1\r\n2\r\n",
        b"$3\r\n5-1\r\n",
    )
    .await;

    // Timestamp 0 on an empty stream starts at sequence 1.
    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\nz\r\n$3\r\n0-*\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n0-1\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_xrange_inclusive_bounds_and_bare_ms() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    for entry in [
        &b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\na\r\n$1\r\n1\r\n"[..],
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n2-5\r\n$1\r\nb\r\n$1\r\n2\r\n",
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n3-0\r\n$1\r\nc\r\n$1\r\n3\r\n",
    ] {
        send(&mut client, entry).await;
        recv_exact(&mut client, "$3\r\n1-1\r\n".len()).await;
    }

    // A bare start of "2" covers 2-5; the end bound 2 covers it too.
    assert_reply(
        &mut client,
        b"*4\r\n$6\r\nXRANGE\r\n$1\r\ns\r\n$1\r\n2\r\n$1\r\n2\r\n",
        b"*1\r\n*2\r\n$3\r\n2-5\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_xread_returns_strictly_newer_entries() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-2\r\n$1\r\nb\r\n$1\r\n2\r\n",
        b"$3\r\n1-2\r\n",
    )
    .await;

    assert_reply(
        &mut client,
        b"*4\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n1-1\r\n",
        b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_xread_bounded_block_times_out_with_null_array() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;

    assert_reply(
        &mut client,
        b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$3\r\n100\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$1\r\n$\r\n",
        b"*-1\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_xread_block_zero_wakes_on_append() {
    let (address, _ctx) = start_primary().await;
    let mut reader = connect(address).await;
    let mut writer = connect(address).await;

    assert_reply(
        &mut reader,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n1-1\r\n$1\r\na\r\n$1\r\n1\r\n",
        b"$3\r\n1-1\r\n",
    )
    .await;

    send(
        &mut reader,
        b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$1\r\n0\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$1\r\n$\r\n",
    )
    .await;

    // Give the reader time to park on the notifier before appending.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_reply(
        &mut writer,
        b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$3\r\n2-1\r\n$1\r\nb\r\n$1\r\n2\r\n",
        b"$3\r\n2-1\r\n",
    )
    .await;

    let expected = b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n2-1\r\n*2\r\n$1\r\nb\r\n$1\r\n2\r\n";
    let reply = recv_exact(&mut reader, expected.len()).await;
    assert_eq!(String::from_utf8_lossy(&reply), String::from_utf8_lossy(expected));
}

#[tokio::test]
async fn test_transaction_scenario() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(&mut client, b"*1\r\n$5\r\nMULTI\r\n", b"+OK\r\n").await;
    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n1\r\n",
        b"+QUEUED\r\n",
    )
    .await;
    assert_reply(&mut client, b"*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n", b"+QUEUED\r\n").await;
    assert_reply(&mut client, b"*1\r\n$4\r\nEXEC\r\n", b"*2\r\n+OK\r\n:2\r\n").await;

    // The writes really executed.
    assert_reply(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\n2\r\n").await;
}

#[tokio::test]
async fn test_transaction_discard_and_errors() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*1\r\n$4\r\nEXEC\r\n",
        b"-ERR EXEC without MULTI\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*1\r\n$7\r\nDISCARD\r\n",
        b"-ERR DISCARD without MULTI\r\n",
    )
    .await;

    assert_reply(&mut client, b"*1\r\n$5\r\nMULTI\r\n", b"+OK\r\n").await;
    assert_reply(
        &mut client,
        b"*1\r\n$5\r\nMULTI\r\n",
        b"-ERR MULTI calls can not be nested\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n9\r\n",
        b"+QUEUED\r\n",
    )
    .await;
    assert_reply(&mut client, b"*1\r\n$7\r\nDISCARD\r\n", b"+OK\r\n").await;

    // The discarded SET never ran.
    assert_reply(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
}

#[tokio::test]
async fn test_transaction_aborts_on_unknown_command() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(&mut client, b"*1\r\n$5\r\nMULTI\r\n", b"+OK\r\n").await;
    assert_reply(
        &mut client,
        b"*1\r\n$10\r\nFROBNICATE\r\n",
        b"-ERR unknown command 'frobnicate'\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n1\r\n",
        b"+QUEUED\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*1\r\n$4\r\nEXEC\r\n",
        b"-EXECABORT Transaction discarded because of previous errors.\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_transaction_collects_inner_errors() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*3\r\n$3\r\nSET\r\n$1\r\nw\r\n$5\r\nmango\r\n",
        b"+OK\r\n",
    )
    .await;

    assert_reply(&mut client, b"*1\r\n$5\r\nMULTI\r\n", b"+OK\r\n").await;
    assert_reply(&mut client, b"*2\r\n$4\r\nINCR\r\n$1\r\nw\r\n", b"+QUEUED\r\n").await;
    assert_reply(&mut client, b"*2\r\n$4\r\nTYPE\r\n$1\r\nw\r\n", b"+QUEUED\r\n").await;
    assert_reply(
        &mut client,
        b"*1\r\n$4\r\nEXEC\r\n",
        b"*2\r\n-ERR value is not an integer or out of range\r\n+string\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_info_reports_replication_fields() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    let body = format!(
        "role:master\r\nmaster_replid:{}\r\nmaster_repl_offset:0",
        rudis::replication::REPLICATION_ID
    );
    let expected = format!("${}\r\n{}\r\n", body.len(), body);

    assert_reply(
        &mut client,
        b"*2\r\n$4\r\nINFO\r\n$11\r\nreplication\r\n",
        expected.as_bytes(),
    )
    .await;
}

#[tokio::test]
async fn test_config_get() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$3\r\ndir\r\n",
        b"*2\r\n$3\r\ndir\r\n$16\r\n/tmp/redis-files\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$10\r\ndbfilename\r\n",
        b"*2\r\n$10\r\ndbfilename\r\n$8\r\ndump.rdb\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_arity_and_unknown_command_keep_connection_open() {
    let (address, _ctx) = start_primary().await;
    let mut client = connect(address).await;

    assert_reply(
        &mut client,
        b"*1\r\n$3\r\nGET\r\n",
        b"-ERR wrong number of arguments for 'get' command\r\n",
    )
    .await;
    assert_reply(
        &mut client,
        b"*1\r\n$7\r\nNOTACMD\r\n",
        b"-ERR unknown command 'notacmd'\r\n",
    )
    .await;

    // Still serving after both errors.
    assert_reply(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}
