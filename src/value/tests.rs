use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};

use crate::{Signature, Value};

use super::{same_open_file, signature_of};

fn sig(s: &str) -> crate::OwnedSignature {
    Signature::new(s.as_bytes()).unwrap().to_owned()
}

fn open_fd() -> OwnedFd {
    OwnedFd::from(File::open("/dev/null").unwrap())
}

#[test]
fn signatures() {
    assert_eq!(Value::Byte(1).signature(), *Signature::new(b"y").unwrap());
    assert_eq!(Value::Double(1.0).signature(), *Signature::new(b"d").unwrap());
    assert_eq!(
        Value::ByteArray(vec![1, 2]).signature(),
        *Signature::new(b"ay").unwrap()
    );
    assert_eq!(
        Value::Array(sig("ai"), Vec::new()).signature(),
        *Signature::new(b"aai").unwrap()
    );
    assert_eq!(
        Value::Dict(sig("s"), sig("v"), Vec::new()).signature(),
        *Signature::new(b"a{sv}").unwrap()
    );
    assert_eq!(
        Value::Struct(vec![
            Value::Int32(1),
            Value::Variant(Box::new(Value::String("x".into()))),
        ])
        .signature(),
        *Signature::new(b"(iv)").unwrap()
    );
    assert_eq!(
        signature_of(&[Value::Int32(1), Value::String("x".into())]),
        *Signature::new(b"is").unwrap()
    );
}

#[test]
fn structural_equality() {
    let a = Value::Struct(vec![Value::Int32(1), Value::String("x".into())]);
    let b = Value::Struct(vec![Value::Int32(1), Value::String("x".into())]);
    assert_eq!(a, b);

    let c = Value::Struct(vec![Value::Int32(2), Value::String("x".into())]);
    assert_ne!(a, c);

    // Same element values under different array types are distinct.
    let d = Value::Array(sig("i"), vec![]);
    let e = Value::Array(sig("u"), vec![]);
    assert_ne!(d, e);
}

#[test]
fn deep_dup_plain() {
    let value = Value::Array(
        sig("(is)"),
        vec![Value::Struct(vec![Value::Int32(7), Value::String("x".into())])],
    );

    let dup = value.deep_dup().unwrap();
    assert_eq!(value, dup);
}

#[test]
fn deep_dup_duplicates_fds() {
    let fd = open_fd();
    let raw = fd.as_raw_fd();

    let value = Value::Struct(vec![
        Value::Int32(1),
        Value::Fd(fd),
        Value::Variant(Box::new(Value::Fd(open_fd()))),
    ]);

    let dup = value.deep_dup().unwrap();

    let Value::Struct(orig_elements) = &value else {
        unreachable!()
    };
    let Value::Struct(dup_elements) = &dup else {
        unreachable!()
    };

    let (Value::Fd(orig), Value::Fd(new)) = (&orig_elements[1], &dup_elements[1]) else {
        panic!("expected fds");
    };

    // A fresh handle referencing the same open file.
    assert_ne!(new.as_raw_fd(), raw);
    assert!(same_open_file(orig, new));

    let (Value::Variant(orig), Value::Variant(new)) = (&orig_elements[2], &dup_elements[2])
    else {
        panic!("expected variants");
    };

    let (Value::Fd(orig), Value::Fd(new)) = (&**orig, &**new) else {
        panic!("expected fds in variants");
    };

    assert!(same_open_file(orig, new));
}

#[test]
fn deep_dup_fd_array() {
    let value = Value::Array(sig("h"), vec![Value::Fd(open_fd()), Value::Fd(open_fd())]);
    let dup = value.deep_dup().unwrap();

    let (Value::Array(_, orig), Value::Array(_, new)) = (&value, &dup) else {
        unreachable!()
    };

    for (a, b) in orig.iter().zip(new) {
        let (Value::Fd(a), Value::Fd(b)) = (a, b) else {
            panic!("expected fds");
        };

        assert!(same_open_file(a, b));
    }
}
