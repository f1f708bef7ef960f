//! The typed D-Bus value model.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use crate::protocol::types;
use crate::{ObjectPathBuf, OwnedSignature, Signature};

#[cfg(test)]
mod tests;

/// A single D-Bus value, mirroring the protocol type tree.
///
/// Container values carry the signatures they were built or decoded with,
/// so the signature of any value can be recovered without inspecting its
/// contents.
///
/// A [`Value::Fd`] owns its file descriptor; duplicating a value
/// duplicates the kernel handle (see [`Value::deep_dup`]).
#[derive(Debug)]
pub enum Value {
    /// 8-bit unsigned integer (`y`).
    Byte(u8),
    /// Boolean (`b`), marshalled as a 32-bit 0 or 1.
    Bool(bool),
    /// 16-bit signed integer (`n`).
    Int16(i16),
    /// 16-bit unsigned integer (`q`).
    UInt16(u16),
    /// 32-bit signed integer (`i`).
    Int32(i32),
    /// 32-bit unsigned integer (`u`).
    UInt32(u32),
    /// 64-bit signed integer (`x`).
    Int64(i64),
    /// 64-bit unsigned integer (`t`).
    UInt64(u64),
    /// IEEE 754 double (`d`).
    Double(f64),
    /// UTF-8 string (`s`).
    String(String),
    /// Object path (`o`).
    ObjectPath(ObjectPathBuf),
    /// Type signature (`g`).
    Signature(OwnedSignature),
    /// An owned unix file descriptor (`h`), transmitted out-of-band.
    Fd(OwnedFd),
    /// An array (`aT`) of the given element type.
    Array(OwnedSignature, Vec<Value>),
    /// Specialization of `ay`.
    ByteArray(Vec<u8>),
    /// A dict (`a{KV}`) with basic key type and value type.
    Dict(OwnedSignature, OwnedSignature, Vec<(Value, Value)>),
    /// A struct (`(...)`); its signature is derived from the elements.
    Struct(Vec<Value>),
    /// A variant (`v`), carrying a single value of any type.
    Variant(Box<Value>),
}

impl Value {
    /// The signature of this value.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio_minibus::{Signature, Value};
    ///
    /// let value = Value::Struct(vec![Value::Int32(1), Value::String("hi".into())]);
    /// assert_eq!(value.signature(), Signature::new(b"(is)").unwrap());
    /// ```
    pub fn signature(&self) -> OwnedSignature {
        let mut out = OwnedSignature::new();
        self.append_signature(&mut out);
        out
    }

    pub(crate) fn append_signature(&self, out: &mut OwnedSignature) {
        match self {
            Value::Byte(..) => out.push(types::BYTE),
            Value::Bool(..) => out.push(types::BOOLEAN),
            Value::Int16(..) => out.push(types::INT16),
            Value::UInt16(..) => out.push(types::UINT16),
            Value::Int32(..) => out.push(types::INT32),
            Value::UInt32(..) => out.push(types::UINT32),
            Value::Int64(..) => out.push(types::INT64),
            Value::UInt64(..) => out.push(types::UINT64),
            Value::Double(..) => out.push(types::DOUBLE),
            Value::String(..) => out.push(types::STRING),
            Value::ObjectPath(..) => out.push(types::OBJECT_PATH),
            Value::Signature(..) => out.push(types::SIGNATURE),
            Value::Fd(..) => out.push(types::UNIX_FD),
            Value::Array(element, ..) => {
                out.push(types::ARRAY);
                out.extend_from_signature(element);
            }
            Value::ByteArray(..) => {
                out.push(types::ARRAY);
                out.push(types::BYTE);
            }
            Value::Dict(key, value, ..) => {
                out.push(types::ARRAY);
                out.push(types::OPEN_BRACE);
                out.extend_from_signature(key);
                out.extend_from_signature(value);
                out.push(types::CLOSE_BRACE);
            }
            Value::Struct(elements) => {
                out.push(types::OPEN_PAREN);

                for element in elements {
                    element.append_signature(out);
                }

                out.push(types::CLOSE_PAREN);
            }
            Value::Variant(..) => out.push(types::VARIANT),
        }
    }

    /// Duplicate this value, duplicating every contained file descriptor
    /// into a fresh kernel handle.
    ///
    /// Subtrees whose type cannot carry a file descriptor are copied
    /// structurally without per-element handle work, which keeps the
    /// common case cheap.
    pub fn deep_dup(&self) -> io::Result<Value> {
        Ok(match self {
            Value::Fd(fd) => Value::Fd(fd.try_clone()?),
            Value::Array(element, values) => {
                if !element.contains_fds() {
                    Value::Array(element.clone(), values.iter().map(Value::dup_plain).collect())
                } else {
                    let mut out = Vec::with_capacity(values.len());

                    for value in values {
                        out.push(value.deep_dup()?);
                    }

                    Value::Array(element.clone(), out)
                }
            }
            Value::Dict(key_type, value_type, entries) => {
                // The key type is basic, which includes unix fds.
                if !key_type.contains_fds() && !value_type.contains_fds() {
                    Value::Dict(
                        key_type.clone(),
                        value_type.clone(),
                        entries
                            .iter()
                            .map(|(k, v)| (k.dup_plain(), v.dup_plain()))
                            .collect(),
                    )
                } else {
                    let mut out = Vec::with_capacity(entries.len());

                    for (k, v) in entries {
                        out.push((k.deep_dup()?, v.deep_dup()?));
                    }

                    Value::Dict(key_type.clone(), value_type.clone(), out)
                }
            }
            Value::Struct(elements) => {
                let mut out = Vec::with_capacity(elements.len());

                for element in elements {
                    out.push(element.deep_dup()?);
                }

                Value::Struct(out)
            }
            Value::Variant(value) => Value::Variant(Box::new(value.deep_dup()?)),
            other => other.dup_plain(),
        })
    }

    /// Copy a value known to carry no file descriptors.
    fn dup_plain(&self) -> Value {
        match self {
            Value::Byte(v) => Value::Byte(*v),
            Value::Bool(v) => Value::Bool(*v),
            Value::Int16(v) => Value::Int16(*v),
            Value::UInt16(v) => Value::UInt16(*v),
            Value::Int32(v) => Value::Int32(*v),
            Value::UInt32(v) => Value::UInt32(*v),
            Value::Int64(v) => Value::Int64(*v),
            Value::UInt64(v) => Value::UInt64(*v),
            Value::Double(v) => Value::Double(*v),
            Value::String(v) => Value::String(v.clone()),
            Value::ObjectPath(v) => Value::ObjectPath(v.clone()),
            Value::Signature(v) => Value::Signature(v.clone()),
            Value::Array(t, v) => {
                Value::Array(t.clone(), v.iter().map(Value::dup_plain).collect())
            }
            Value::ByteArray(v) => Value::ByteArray(v.clone()),
            Value::Dict(k, t, v) => Value::Dict(
                k.clone(),
                t.clone(),
                v.iter().map(|(k, v)| (k.dup_plain(), v.dup_plain())).collect(),
            ),
            Value::Struct(v) => Value::Struct(v.iter().map(Value::dup_plain).collect()),
            Value::Variant(v) => Value::Variant(Box::new(v.dup_plain())),
            Value::Fd(..) => unreachable!("subtree checked to be fd-free"),
        }
    }
}

/// The concatenated signature of a sequence of values, as used for a
/// message body.
pub fn signature_of(values: &[Value]) -> OwnedSignature {
    let mut out = OwnedSignature::new();

    for value in values {
        value.append_signature(&mut out);
    }

    out
}

/// Equality is structural; file descriptors compare by raw descriptor.
/// Use [`same_open_file`] in tests to compare duplicated handles.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::ObjectPath(a), Value::ObjectPath(b)) => a == b,
            (Value::Signature(a), Value::Signature(b)) => a == b,
            (Value::Fd(a), Value::Fd(b)) => a.as_raw_fd() == b.as_raw_fd(),
            (Value::Array(at, a), Value::Array(bt, b)) => at == bt && a == b,
            (Value::ByteArray(a), Value::ByteArray(b)) => a == b,
            (Value::Dict(ak, av, a), Value::Dict(bk, bv, b)) => {
                ak == bk && av == bv && a == b
            }
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Variant(a), Value::Variant(b)) => a == b,
            _ => false,
        }
    }
}

impl From<u8> for Value {
    #[inline]
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    #[inline]
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    #[inline]
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(v: &str) -> Self {
        Value::String(v.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<OwnedFd> for Value {
    #[inline]
    fn from(v: OwnedFd) -> Self {
        Value::Fd(v)
    }
}

impl From<&Signature> for Value {
    #[inline]
    fn from(v: &Signature) -> Self {
        Value::Signature(v.to_owned())
    }
}

/// Test whether two descriptors reference the same open file, by device
/// and inode. This is the identity that survives duplication.
#[cfg(test)]
pub(crate) fn same_open_file<A, B>(a: &A, b: &B) -> bool
where
    A: AsRawFd,
    B: AsRawFd,
{
    fn ids(fd: std::os::fd::RawFd) -> (u64, u64) {
        let stat = nix::sys::stat::fstat(fd).expect("fstat");
        (stat.st_dev as u64, stat.st_ino as u64)
    }

    ids(a.as_raw_fd()) == ids(b.as_raw_fd())
}
