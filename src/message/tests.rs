use std::fs::File;
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, OwnedFd};

use crate::error::ErrorKind;
use crate::protocol::Capabilities;
use crate::wire::WriteBuf;
use crate::{decode_message, encode_message, Flags, Message, MessageKind, ObjectPath, Value};

use super::codec::encode_to;

fn serial(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

fn sig(s: &str) -> crate::OwnedSignature {
    crate::Signature::new(s.as_bytes()).unwrap().to_owned()
}

/// A method return with a single `u` in the body, little endian. This is
/// the worked example from the D-Bus specification.
#[rustfmt::skip]
const LE_RETURN: [u8; 36] = [
    // marker, method return, NO_AUTO_START, protocol version 1
    b'l', 0x02, 0x02, 0x01,
    // body length = 4
    0x04, 0x00, 0x00, 0x00,
    // serial = 0x12345678
    0x78, 0x56, 0x34, 0x12,
    // header fields array, 15 bytes
    0x0f, 0x00, 0x00, 0x00,
    // REPLY_SERIAL (u) = 0xabcdef12
    0x05, 0x01, b'u', 0x00,
    0x12, 0xef, 0xcd, 0xab,
    // SIGNATURE (g) = "u"
    0x08, 0x01, b'g', 0x00,
    0x01, b'u', 0x00,
    // pad to 8 for the body
    0x00,
    // body = 0xdeadbeef
    0xef, 0xbe, 0xad, 0xde,
];

/// The same message, big endian.
#[rustfmt::skip]
const BE_RETURN: [u8; 36] = [
    b'B', 0x02, 0x02, 0x01,
    0x00, 0x00, 0x00, 0x04,
    0x12, 0x34, 0x56, 0x78,
    0x00, 0x00, 0x00, 0x0f,
    0x05, 0x01, b'u', 0x00,
    0xab, 0xcd, 0xef, 0x12,
    0x08, 0x01, b'g', 0x00,
    0x01, b'u', 0x00,
    0x00,
    0xde, 0xad, 0xbe, 0xef,
];

fn reference_return() -> Message {
    Message {
        kind: MessageKind::MethodReturn {
            reply_serial: serial(0xabcdef12),
        },
        serial: serial(0x12345678),
        flags: Flags::NO_AUTO_START,
        sender: None,
        destination: None,
        body: vec![Value::UInt32(0xdeadbeef)],
    }
}

#[test]
fn decode_reference_blobs() {
    let le = decode_message(&LE_RETURN, Vec::new()).unwrap();
    let be = decode_message(&BE_RETURN, Vec::new()).unwrap();

    assert_eq!(le, reference_return());
    assert_eq!(le, be);
}

#[test]
#[cfg(target_endian = "little")]
fn encode_reference_blob() {
    let (bytes, fds) = encode_message(reference_return()).unwrap();
    assert_eq!(bytes, LE_RETURN);
    assert!(fds.is_empty());
}

/// A big-endian signal carrying a double, as a peer on a big-endian host
/// would emit it. Also exercised by the transport tests.
#[rustfmt::skip]
pub(crate) const BE_SIGNAL: [u8; 80] = [
    // marker, signal, no flags, protocol version 1
    b'B', 0x04, 0x00, 0x01,
    // body length = 8
    0x00, 0x00, 0x00, 0x08,
    // serial = 1
    0x00, 0x00, 0x00, 0x01,
    // header fields array, 55 bytes
    0x00, 0x00, 0x00, 0x37,
    // PATH (o) = "/t"
    0x01, 0x01, b'o', 0x00,
    0x00, 0x00, 0x00, 0x02,
    b'/', b't', 0x00,
    // pad to 8
    0x00, 0x00, 0x00, 0x00, 0x00,
    // INTERFACE (s) = "a.b"
    0x02, 0x01, b's', 0x00,
    0x00, 0x00, 0x00, 0x03,
    b'a', b'.', b'b', 0x00,
    // pad to 8
    0x00, 0x00, 0x00, 0x00,
    // MEMBER (s) = "Hi"
    0x03, 0x01, b's', 0x00,
    0x00, 0x00, 0x00, 0x02,
    b'H', b'i', 0x00,
    // pad to 8
    0x00, 0x00, 0x00, 0x00, 0x00,
    // SIGNATURE (g) = "d"
    0x08, 0x01, b'g', 0x00,
    0x01, b'd', 0x00,
    // pad to 8 for the body
    0x00,
    // body = 3.14
    0x40, 0x09, 0x1e, 0xb8, 0x51, 0xeb, 0x85, 0x1f,
];

#[test]
fn decode_big_endian_signal() {
    let m = decode_message(&BE_SIGNAL, Vec::new()).unwrap();

    assert_eq!(
        *m.kind(),
        MessageKind::Signal {
            path: ObjectPath::new(b"/t").unwrap().to_owned(),
            interface: "a.b".into(),
            member: "Hi".into(),
        }
    );
    assert_eq!(m.body(), &[Value::Double(3.14)]);
}

#[test]
fn round_trip_method_call() {
    let m = Message::method_call(
        ObjectPath::new(b"/org/freedesktop/DBus").unwrap(),
        "Hello",
        serial(1),
    )
    .with_interface("org.freedesktop.DBus")
    .with_destination("org.freedesktop.DBus")
    .with_arg(42i32)
    .with_arg("hi");

    let expected = Message::method_call(
        ObjectPath::new(b"/org/freedesktop/DBus").unwrap(),
        "Hello",
        serial(1),
    )
    .with_interface("org.freedesktop.DBus")
    .with_destination("org.freedesktop.DBus")
    .with_arg(42i32)
    .with_arg("hi");

    let (bytes, fds) = encode_message(m).unwrap();
    assert!(fds.is_empty());
    assert_eq!(decode_message(&bytes, Vec::new()).unwrap(), expected);
}

#[test]
fn round_trip_containers() {
    let body = || {
        vec![
            Value::Dict(
                sig("s"),
                sig("v"),
                vec![
                    (
                        Value::String("a".into()),
                        Value::Variant(Box::new(Value::UInt64(7))),
                    ),
                    (
                        Value::String("b".into()),
                        Value::Variant(Box::new(Value::Struct(vec![
                            Value::Bool(true),
                            Value::Int16(-2),
                        ]))),
                    ),
                ],
            ),
            Value::Array(
                sig("ai"),
                vec![
                    Value::Array(sig("i"), vec![Value::Int32(1), Value::Int32(2)]),
                    Value::Array(sig("i"), vec![]),
                ],
            ),
            Value::ByteArray(vec![1, 2, 3]),
            Value::Signature(sig("a{sv}")),
        ]
    };

    let m = Message::signal(ObjectPath::new(b"/t").unwrap(), "a.b", "Hi", serial(9))
        .with_body(body());

    assert_eq!(
        m.body_signature(),
        *crate::Signature::new(b"a{sv}aaiayg").unwrap()
    );

    let expected = Message::signal(ObjectPath::new(b"/t").unwrap(), "a.b", "Hi", serial(9))
        .with_body(body());

    let (bytes, _) = encode_message(m).unwrap();
    assert_eq!(decode_message(&bytes, Vec::new()).unwrap(), expected);
}

#[test]
fn round_trip_error() {
    let m = Message {
        kind: MessageKind::Error {
            error_name: "org.freedesktop.DBus.Error.Failed".into(),
            reply_serial: serial(4),
        },
        serial: serial(5),
        flags: Flags::NO_REPLY_EXPECTED,
        sender: Some(":1.42".into()),
        destination: Some("com.example.Svc".into()),
        body: vec![Value::String("it broke".into())],
    };

    let (bytes, _) = encode_message(m).unwrap();
    let m = decode_message(&bytes, Vec::new()).unwrap();

    assert_eq!(m.sender(), Some(":1.42"));
    assert_eq!(m.destination(), Some("com.example.Svc"));
    assert!(m.flags() & Flags::NO_REPLY_EXPECTED);
    assert_eq!(m.body(), &[Value::String("it broke".into())]);
}

#[test]
fn rejects_bad_protocol_version() {
    let mut bytes = LE_RETURN;
    bytes[3] = 2;

    let err = decode_message(&bytes, Vec::new()).unwrap_err();

    match err.kind() {
        ErrorKind::Decode { reason, offset } => {
            assert_eq!(reason, "invalid protocol version: 2");
            assert_eq!(*offset, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn rejects_oversized_message() {
    let mut bytes = LE_RETURN.to_vec();
    // Declare a body of 2^27 bytes without sending one.
    bytes[4..8].copy_from_slice(&(1u32 << 27).to_le_bytes());

    let err = decode_message(&bytes, Vec::new()).unwrap_err();

    match err.kind() {
        ErrorKind::Decode { reason, .. } => {
            assert_eq!(reason, "message size exceeds limit");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn rejects_trailing_bytes() {
    let mut bytes = LE_RETURN.to_vec();
    bytes.push(0);

    assert!(decode_message(&bytes, Vec::new()).is_err());
}

#[test]
fn rejects_zero_serial() {
    let mut bytes = LE_RETURN;
    bytes[8..12].copy_from_slice(&0u32.to_le_bytes());

    assert!(decode_message(&bytes, Vec::new()).is_err());
}

#[test]
fn rejects_missing_required_field() {
    // Retype the reference method return as a method call; it has no PATH
    // or MEMBER headers.
    let mut bytes = LE_RETURN;
    bytes[1] = 1;

    let err = decode_message(&bytes, Vec::new()).unwrap_err();

    match err.kind() {
        ErrorKind::Decode { reason, .. } => {
            assert_eq!(reason, "missing required PATH header");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn rejects_invalid_boolean() {
    let m = Message::signal(ObjectPath::new(b"/t").unwrap(), "a.b", "Hi", serial(1))
        .with_arg(true);

    let (mut bytes, _) = encode_message(m).unwrap();

    // The boolean word is the last four bytes of the body.
    let at = bytes.len() - 4;
    bytes[at..].copy_from_slice(&2u32.to_ne_bytes());

    let err = decode_message(&bytes, Vec::new()).unwrap_err();

    match err.kind() {
        ErrorKind::Decode { reason, .. } => {
            assert_eq!(reason, "invalid boolean value: 2");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn rejects_invalid_member_name() {
    let m = Message::method_call(ObjectPath::new(b"/t").unwrap(), "2fast", serial(1));
    let err = encode_message(m).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidName { .. }));
}

#[test]
fn fds_round_trip_through_codec() {
    let a = OwnedFd::from(File::open("/dev/null").unwrap());
    let b = OwnedFd::from(File::open("/dev/zero").unwrap());
    let (raw_a, raw_b) = (a.as_raw_fd(), b.as_raw_fd());

    let m = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Pass", serial(1))
        .with_arg(a)
        .with_arg(b);

    let (bytes, fds) = encode_message(m).unwrap();
    assert_eq!(fds.len(), 2);
    assert_eq!(fds[0].as_raw_fd(), raw_a);
    assert_eq!(fds[1].as_raw_fd(), raw_b);

    let m = decode_message(&bytes, fds).unwrap();
    let body = m.into_body();

    let [Value::Fd(a), Value::Fd(b)] = &body[..] else {
        panic!("expected two fds");
    };

    assert_eq!(a.as_raw_fd(), raw_a);
    assert_eq!(b.as_raw_fd(), raw_b);
}

#[test]
fn rejects_fd_count_mismatch() {
    let a = OwnedFd::from(File::open("/dev/null").unwrap());

    let m = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Pass", serial(1))
        .with_arg(a);

    let (bytes, mut fds) = encode_message(m).unwrap();

    // One more descriptor than the body references.
    fds.push(OwnedFd::from(File::open("/dev/null").unwrap()));
    assert!(decode_message(&bytes, fds).is_err());

    // One fewer.
    assert!(decode_message(&bytes, Vec::new()).is_err());
}

#[test]
fn encoding_fd_without_capability_fails() {
    let fd = OwnedFd::from(File::open("/dev/null").unwrap());

    let m = Message::method_call(ObjectPath::new(b"/t").unwrap(), "Pass", serial(1))
        .with_arg(fd);

    let mut buf = WriteBuf::new();
    let err = encode_to(&mut buf, &m, Capabilities::NONE).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Encode(..)));
}

#[test]
fn write_buffer_grows_until_message_fits() {
    let m = Message::signal(ObjectPath::new(b"/t").unwrap(), "a.b", "Hi", serial(1))
        .with_arg("x".repeat(4096));

    let mut buf = WriteBuf::with_limit(16);
    encode_to(&mut buf, &m, Capabilities::NONE).unwrap();

    let grown = buf.take();
    let (reference, _) = encode_message(m).unwrap();
    assert_eq!(grown, reference);
}
