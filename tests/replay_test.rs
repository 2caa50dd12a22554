//! Replay driver behavior against a scripted in-process server.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::DateTime;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pg_replay::config::ReplayConfig;
use pg_replay::replay::{await_ready_for_query, Replayer};
use pg_replay::stream::ClientMessage;
use pg_replay::Error;

fn config(port: u16, rate: f64) -> ReplayConfig {
    ReplayConfig {
        target_host: "127.0.0.1".to_string(),
        target_port: port,
        rate,
        max_retries: 3,
        print_query: false,
    }
}

fn query(sql: &str, at_ms: i64) -> ClientMessage {
    let mut payload = sql.as_bytes().to_vec();
    payload.push(0);
    ClientMessage {
        first_ts: DateTime::from_timestamp_millis(at_ms).unwrap(),
        last_ts: DateTime::from_timestamp_millis(at_ms).unwrap(),
        command_complete_ts: None,
        ready_for_query_ts: None,
        tag: b'Q',
        len: 4 + payload.len() as u32,
        payload: Bytes::from(payload),
    }
}

fn typed(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(tag);
    buf.put_u32(4 + body.len() as u32);
    buf.put(body);
    buf.to_vec()
}

fn ok_response() -> Vec<u8> {
    let mut response = typed(b'C', b"SELECT 1\0");
    response.extend_from_slice(&typed(b'Z', b"I"));
    response
}

/// Accepts one connection, reads each expected message in full, and
/// answers every one but the last with CommandComplete + ReadyForQuery.
/// Returns all bytes received.
async fn scripted_server(listener: TcpListener, sizes: Vec<usize>) -> Vec<u8> {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut received = Vec::new();
    for (index, size) in sizes.iter().enumerate() {
        let mut buf = vec![0u8; *size];
        socket.read_exact(&mut buf).await.unwrap();
        received.extend_from_slice(&buf);
        if index + 1 != sizes.len() {
            socket.write_all(&ok_response()).await.unwrap();
        }
    }
    received
}

#[tokio::test]
async fn replays_messages_in_order_and_bit_exact() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let messages = vec![
        query("SELECT 1;", 0),
        query("SELECT 2;", 0),
        query("SELECT 3;", 0),
    ];
    let expected: Vec<u8> = messages
        .iter()
        .flat_map(|message| message.to_wire().to_vec())
        .collect();
    let sizes: Vec<usize> = messages.iter().map(|message| message.wire_len()).collect();

    let server = tokio::spawn(scripted_server(listener, sizes));
    let summary = Replayer::new(config(port, 1.0), messages).run().await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(server.await.unwrap(), expected);
}

#[tokio::test]
async fn rate_scales_the_capture_schedule() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Captured at 0 s, 1 s and 3 s; at rate 2 the last write lands ~1.5 s
    // after the start.
    let messages = vec![
        query("SELECT 1;", 0),
        query("SELECT 2;", 1_000),
        query("SELECT 3;", 3_000),
    ];
    let sizes: Vec<usize> = messages.iter().map(|message| message.wire_len()).collect();

    let server = tokio::spawn(scripted_server(listener, sizes));
    let summary = Replayer::new(config(port, 2.0), messages).run().await.unwrap();
    server.await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert!(
        summary.elapsed >= Duration::from_millis(1_450),
        "elapsed {:?} is faster than the scaled schedule",
        summary.elapsed
    );
    assert!(
        summary.elapsed < Duration::from_millis(2_900),
        "elapsed {:?} suggests the rate was not applied",
        summary.elapsed
    );
}

#[tokio::test]
async fn unreachable_target_counts_every_message() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let messages = vec![query("SELECT 1;", 0), query("SELECT 2;", 0)];
    let result = Replayer::new(config(port, 1.0), messages).run().await;

    match result {
        Err(Error::Replay { errors, total }) => {
            assert_eq!(errors, 2);
            assert_eq!(total, 2);
        }
        other => panic!("expected a replay error summary, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_message_list_is_a_clean_run() {
    let summary = Replayer::new(config(1, 1.0), Vec::new()).run().await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn ready_wait_skips_other_frames_and_split_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // Noise first, then ReadyForQuery split across two writes.
        socket
            .write_all(&typed(b'S', b"server_version\016.3\0"))
            .await
            .unwrap();
        let ready = typed(b'Z', b"I");
        socket.write_all(&ready[..2]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        socket.write_all(&ready[2..]).await.unwrap();
        socket
    });

    let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    await_ready_for_query(&mut conn, Duration::from_secs(5))
        .await
        .unwrap();
    drop(server.await.unwrap());
}

#[tokio::test]
async fn ready_wait_times_out_on_a_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let result = await_ready_for_query(&mut conn, Duration::from_secs(1)).await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
    server.abort();
}

#[tokio::test]
async fn ready_wait_reports_a_closed_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(&typed(b'C', b"SELECT 1\0")).await.unwrap();
        // Close without ever sending ReadyForQuery.
    });

    let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let result = await_ready_for_query(&mut conn, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(Error::RemoteClosed)));
    server.await.unwrap();
}

#[tokio::test]
async fn ready_wait_rejects_malformed_lengths() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // Typed frame claiming a zero length.
        socket.write_all(&[b'C', 0, 0, 0, 0]).await.unwrap();
        socket
    });

    let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let result = await_ready_for_query(&mut conn, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(Error::MalformedFrame { len: 0 })));
    drop(server.await.unwrap());
}
