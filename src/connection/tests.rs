use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, OwnedFd};

use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ErrorKind;
use crate::protocol::Capabilities;
use crate::sasl::Mechanism;
use crate::value::same_open_file;
use crate::{
    connect_authenticated, loopback, Address, Message, MessageKind, ObjectPath, Transport, Value,
};

use super::transport::{SocketTransport, Stream};

const GUID: &str = "89abcdef0123456789abcdef01234567";

fn serial(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

fn tmp_fd() -> OwnedFd {
    OwnedFd::from(tempfile::tempfile().unwrap())
}

async fn next_line(stream: &mut tokio::net::UnixStream, buf: &mut Vec<u8>) -> Vec<u8> {
    loop {
        if let Some(n) = buf.iter().position(|&b| b == b'\n') {
            return buf.drain(..=n).collect();
        }

        let mut chunk = [0u8; 256];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed during handshake");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Play the server side of the handshake, returning any bytes buffered
/// past the final line.
async fn server_auth(stream: &mut tokio::net::UnixStream, agree_fds: bool) -> Vec<u8> {
    let mut buf = Vec::new();

    let first = next_line(stream, &mut buf).await;
    assert!(first.starts_with(b"\0AUTH "), "unexpected opening {first:?}");

    stream
        .write_all(format!("OK {GUID}\r\n").as_bytes())
        .await
        .unwrap();

    loop {
        let line = next_line(stream, &mut buf).await;

        match line.trim_ascii_end() {
            b"NEGOTIATE_UNIX_FD" => {
                let reply: &[u8] = if agree_fds {
                    b"AGREE_UNIX_FD\r\n"
                } else {
                    b"ERROR not here\r\n"
                };

                stream.write_all(reply).await.unwrap();
            }
            b"BEGIN" => break,
            other => panic!("unexpected handshake line {other:?}"),
        }
    }

    buf
}

/// Wrap the server half of an authenticated stream in a transport of our
/// own, so both ends of a test speak through the same machinery.
fn server_transport(
    stream: tokio::net::UnixStream,
    capabilities: Capabilities,
    leftover: Vec<u8>,
) -> Transport {
    let stream = stream.into_std().unwrap();
    stream.set_nonblocking(true).unwrap();
    let stream = AsyncFd::new(Stream::Unix(stream)).unwrap();
    Transport::socket(SocketTransport::new(stream, capabilities, leftover))
}

/// A connected pair of transports over a unix socket pair, skipping the
/// handshake.
fn transport_pair(capabilities: Capabilities) -> (Transport, Transport) {
    let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();

    let wrap = |stream: std::os::unix::net::UnixStream| {
        stream.set_nonblocking(true).unwrap();
        let stream = AsyncFd::new(Stream::Unix(stream)).unwrap();
        Transport::socket(SocketTransport::new(stream, capabilities, Vec::new()))
    };

    (wrap(a), wrap(b))
}

#[tokio::test]
async fn unix_path_echo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let leftover = server_auth(&mut stream, false).await;
        let mut transport = server_transport(stream, Capabilities::NONE, leftover);

        let call = transport.recv().await.unwrap();
        assert!(matches!(call.kind(), MessageKind::MethodCall { .. }));
        assert_eq!(
            call.body(),
            &[Value::Int32(42), Value::String("hi".into())]
        );

        let reply = call.method_return(serial(1)).with_body(call.into_body());
        transport.send(reply).await.unwrap();
    });

    let address = Address::parse(&format!("unix:path={}", path.display())).unwrap();

    let (guid, mut transport) =
        connect_authenticated(&[address], Capabilities::NONE, Mechanism::DEFAULT)
            .await
            .unwrap();

    assert_eq!(guid.as_str(), GUID);
    assert_eq!(transport.capabilities(), Capabilities::NONE);

    let call = Message::method_call(ObjectPath::new(b"/org/example/Obj").unwrap(), "Echo", serial(7))
        .with_arg(42i32)
        .with_arg("hi");

    transport.send(call).await.unwrap();

    let reply = transport.recv().await.unwrap();
    let MessageKind::MethodReturn { reply_serial } = *reply.kind() else {
        panic!("expected method return, got {:?}", reply.kind());
    };

    assert_eq!(reply_serial, serial(7));
    assert_eq!(
        reply.body(),
        &[Value::Int32(42), Value::String("hi".into())]
    );

    server.await.unwrap();
}

#[tokio::test]
async fn decodes_big_endian_peer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("be.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        server_auth(&mut stream, false).await;
        stream
            .write_all(&crate::message::tests::BE_SIGNAL)
            .await
            .unwrap();
    });

    let address = Address::parse(&format!("unix:path={}", path.display())).unwrap();

    let (_, mut transport) =
        connect_authenticated(&[address], Capabilities::NONE, Mechanism::DEFAULT)
            .await
            .unwrap();

    let signal = transport.recv().await.unwrap();
    assert!(matches!(signal.kind(), MessageKind::Signal { .. }));
    assert_eq!(signal.body(), &[Value::Double(3.14)]);

    server.await.unwrap();
}

#[tokio::test]
async fn surfaces_malformed_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        server_auth(&mut stream, false).await;

        // A fixed header declaring protocol version 2.
        let mut head = [0u8; 16];
        head[0] = b'l';
        head[1] = 4;
        head[3] = 2;
        head[8] = 1;
        stream.write_all(&head).await.unwrap();
    });

    let address = Address::parse(&format!("unix:path={}", path.display())).unwrap();

    let (_, mut transport) =
        connect_authenticated(&[address], Capabilities::NONE, Mechanism::DEFAULT)
            .await
            .unwrap();

    let err = transport.recv().await.unwrap_err();

    match err.kind() {
        ErrorKind::Decode { reason, offset } => {
            assert_eq!(reason, "invalid protocol version: 2");
            assert_eq!(*offset, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn rejects_oversized_message_without_reading_body() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        server_auth(&mut stream, false).await;

        // A fixed header declaring a 2^27 byte body, with no body to
        // follow. The client must fail from the header alone.
        let mut head = [0u8; 16];
        head[0] = b'l';
        head[1] = 4;
        head[3] = 1;
        head[4..8].copy_from_slice(&(1u32 << 27).to_le_bytes());
        head[8..12].copy_from_slice(&1u32.to_le_bytes());
        stream.write_all(&head).await.unwrap();

        // Hold the stream open: a client that tried to read the declared
        // body would hang here instead of failing.
        let mut byte = [0u8; 1];
        let _ = stream.read(&mut byte).await;
    });

    let address = Address::parse(&format!("unix:path={}", path.display())).unwrap();

    let (_, mut transport) =
        connect_authenticated(&[address], Capabilities::NONE, Mechanism::DEFAULT)
            .await
            .unwrap();

    let err = transport.recv().await.unwrap_err();

    match err.kind() {
        ErrorKind::Decode { reason, .. } => {
            assert_eq!(reason, "message size exceeds limit");
        }
        other => panic!("unexpected error {other:?}"),
    }

    server.abort();
}

#[tokio::test]
async fn falls_back_to_later_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ok.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        server_auth(&mut stream, false).await;
    });

    let list = format!(
        "unix:path={}/nonexistent.sock;unix:path={}",
        dir.path().display(),
        path.display()
    );
    let addresses = Address::parse_list(&list).unwrap();

    let (guid, _transport) =
        connect_authenticated(&addresses, Capabilities::NONE, Mechanism::DEFAULT)
            .await
            .unwrap();

    assert_eq!(guid.as_str(), GUID);
    server.await.unwrap();
}

#[tokio::test]
async fn returns_first_failure_when_all_candidates_fail() {
    let addresses = Address::parse_list(
        "unix:path=/nonexistent-minibus-first;unix:path=/nonexistent-minibus-second",
    )
    .unwrap();

    let err = connect_authenticated(&addresses, Capabilities::NONE, Mechanism::DEFAULT)
        .await
        .unwrap_err();

    match err.kind() {
        ErrorKind::Connect { address, .. } => {
            assert!(address.contains("nonexistent-minibus-first"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn rejected_authentication_fails_the_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reject.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        next_line(&mut stream, &mut buf).await;
        stream.write_all(b"REJECTED\r\n").await.unwrap();
    });

    let address = Address::parse(&format!("unix:path={}", path.display())).unwrap();

    let err = connect_authenticated(&[address], Capabilities::NONE, Mechanism::DEFAULT)
        .await
        .unwrap_err();

    match err.kind() {
        ErrorKind::Auth(reason) => assert!(reason.contains("all mechanisms rejected")),
        other => panic!("unexpected error {other:?}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn negotiates_fd_capability_end_to_end() {
    for (agree, expected) in [
        (true, Capabilities::UNIX_FD),
        (false, Capabilities::NONE),
    ] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fds.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            server_auth(&mut stream, agree).await;
        });

        let address = Address::parse(&format!("unix:path={}", path.display())).unwrap();

        let (_, transport) =
            connect_authenticated(&[address], Capabilities::UNIX_FD, Mechanism::DEFAULT)
                .await
                .unwrap();

        assert_eq!(transport.capabilities(), expected);
        server.await.unwrap();
    }
}

#[tokio::test]
async fn fds_pass_over_a_socket_pair() {
    let (mut a, mut b) = transport_pair(Capabilities::UNIX_FD);

    let one = tmp_fd();
    let two = tmp_fd();
    let keep_one = one.try_clone().unwrap();
    let keep_two = two.try_clone().unwrap();

    let call = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Pass", serial(1))
        .with_arg(one)
        .with_arg(two);

    a.send(call).await.unwrap();

    let received = b.recv().await.unwrap();
    let body = received.into_body();

    let [Value::Fd(one), Value::Fd(two)] = &body[..] else {
        panic!("expected two fds, got {body:?}");
    };

    // Fresh handles on the receiving side, referencing the same files.
    assert_ne!(one.as_raw_fd(), two.as_raw_fd());
    assert!(same_open_file(one, &keep_one));
    assert!(same_open_file(two, &keep_two));
    assert!(!same_open_file(one, &keep_two));
}

#[tokio::test]
async fn sending_fds_without_capability_fails() {
    let (mut a, _b) = transport_pair(Capabilities::NONE);

    let call = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Pass", serial(1))
        .with_arg(tmp_fd());

    let err = a.send(call).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Encode(..)));
}

#[tokio::test]
async fn loopback_duplicates_fds() {
    let mut transport = loopback();
    assert!(transport.capabilities() & Capabilities::UNIX_FD);

    let fd = tmp_fd();
    let original_raw = fd.as_raw_fd();
    let keep = fd.try_clone().unwrap();

    let call = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Echo", serial(1))
        .with_arg(fd)
        .with_arg("payload");

    transport.send(call).await.unwrap();

    let received = transport.recv().await.unwrap();
    let body = received.into_body();

    let [Value::Fd(fd), Value::String(payload)] = &body[..] else {
        panic!("expected fd and string, got {body:?}");
    };

    assert_eq!(payload, "payload");
    assert_ne!(fd.as_raw_fd(), original_raw);
    assert!(same_open_file(fd, &keep));
}

#[tokio::test]
async fn shutdown_is_idempotent_and_fatal() {
    let (mut a, mut b) = transport_pair(Capabilities::NONE);

    a.shutdown();
    a.shutdown();

    let call = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Ping", serial(1));
    let err = a.send(call).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Shutdown));

    let err = b.recv().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Io(..)));
}

#[tokio::test]
async fn loopback_shutdown_is_fatal() {
    let mut transport = loopback();
    transport.shutdown();

    let call = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Ping", serial(1));
    assert!(transport.send(call).await.is_err());
    assert!(transport.recv().await.is_err());
}

#[tokio::test]
async fn decode_errors_leave_the_stream_usable() {
    use std::io::Write;

    let (raw, peer) = std::os::unix::net::UnixStream::pair().unwrap();
    peer.set_nonblocking(true).unwrap();

    let mut b = Transport::socket(SocketTransport::new(
        AsyncFd::new(Stream::Unix(peer)).unwrap(),
        Capabilities::NONE,
        Vec::new(),
    ));

    // A malformed frame followed by a well-formed one.
    let mut bad = [0u8; 16];
    bad[0] = b'l';
    bad[1] = 4;
    bad[3] = 2;
    bad[8] = 1;

    let good = Message::signal(ObjectPath::new(b"/t").unwrap(), "a.b", "Hi", serial(2))
        .with_arg(5u32);
    let (good, _) = crate::encode_message(good).unwrap();

    let mut raw = raw;
    raw.write_all(&bad).unwrap();
    raw.write_all(&good).unwrap();

    assert!(b.recv().await.is_err());

    let m = b.recv().await.unwrap();
    assert_eq!(m.body(), &[Value::UInt32(5)]);
}
