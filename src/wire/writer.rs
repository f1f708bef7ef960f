use crate::error::Result;
use crate::protocol::{types, Capabilities, MAX_ARRAY_LENGTH};
use crate::value::Value;
use crate::{Error, ObjectPath, Signature};

use super::{padding_to, WriteBuf};

/// A value writer over a [`WriteBuf`].
///
/// Writing always uses the host byte order; the message's endianness
/// marker tells the peer how to read it back. File descriptors are not
/// written inline: each one is counted and encoded as an index into the
/// out-of-band descriptor array, which the transport transmits as
/// `SCM_RIGHTS` ancillary data.
pub(crate) struct Writer<'a> {
    buf: &'a mut WriteBuf,
    capabilities: Capabilities,
    fds: u32,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut WriteBuf, capabilities: Capabilities) -> Self {
        Self {
            buf,
            capabilities,
            fds: 0,
        }
    }

    /// Number of file descriptors encoded so far.
    pub(crate) fn fds(&self) -> u32 {
        self.fds
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Pad with zero bytes to the given alignment.
    pub(crate) fn align(&mut self, align: usize) -> Result<()> {
        self.buf.push_zeros(padding_to(self.buf.len(), align))
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buf.extend_from_slice(&[value])
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> Result<()> {
        self.align(4)?;
        self.buf.extend_from_slice(&value.to_ne_bytes())
    }

    /// Reserve an aligned 32-bit length slot, returning its position for
    /// a later [`WriteBuf::patch_u32`].
    pub(crate) fn reserve_u32(&mut self) -> Result<usize> {
        self.align(4)?;
        let at = self.buf.len();
        self.buf.extend_from_slice(&0u32.to_ne_bytes())?;
        Ok(at)
    }

    pub(crate) fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf.patch_u32(at, value);
    }

    pub(crate) fn write_string(&mut self, string: &str) -> Result<()> {
        if string.as_bytes().contains(&0) {
            return Err(Error::encode("string contains an interior nul byte"));
        }

        let Ok(len) = u32::try_from(string.len()) else {
            return Err(Error::encode("string exceeds maximum length"));
        };

        self.write_u32(len)?;
        self.buf.extend_from_slice(string.as_bytes())?;
        self.buf.extend_from_slice(&[0])
    }

    pub(crate) fn write_object_path(&mut self, path: &ObjectPath) -> Result<()> {
        self.write_string(path.as_str())
    }

    pub(crate) fn write_signature(&mut self, signature: &Signature) -> Result<()> {
        self.write_u8(signature.len() as u8)?;
        self.buf.extend_from_slice(signature.as_bytes())?;
        self.buf.extend_from_slice(&[0])
    }

    /// Write a single value after checking it against the expected
    /// signature.
    pub(crate) fn write_typed(&mut self, expected: &Signature, value: &Value) -> Result<()> {
        let actual = value.signature();

        if actual != *expected {
            return Err(Error::encode(format!(
                "value of type `{}` does not match expected type `{}`",
                actual.as_str(),
                expected.as_str()
            )));
        }

        self.write_value(value)
    }

    pub(crate) fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Byte(v) => self.write_u8(*v),
            Value::Bool(v) => self.write_u32(*v as u32),
            Value::Int16(v) => {
                self.align(2)?;
                self.buf.extend_from_slice(&v.to_ne_bytes())
            }
            Value::UInt16(v) => {
                self.align(2)?;
                self.buf.extend_from_slice(&v.to_ne_bytes())
            }
            Value::Int32(v) => {
                self.align(4)?;
                self.buf.extend_from_slice(&v.to_ne_bytes())
            }
            Value::UInt32(v) => self.write_u32(*v),
            Value::Int64(v) => {
                self.align(8)?;
                self.buf.extend_from_slice(&v.to_ne_bytes())
            }
            Value::UInt64(v) => {
                self.align(8)?;
                self.buf.extend_from_slice(&v.to_ne_bytes())
            }
            Value::Double(v) => {
                self.align(8)?;
                self.buf.extend_from_slice(&v.to_ne_bytes())
            }
            Value::String(v) => self.write_string(v),
            Value::ObjectPath(v) => self.write_object_path(v),
            Value::Signature(v) => self.write_signature(v),
            Value::Fd(..) => {
                if !(self.capabilities & Capabilities::UNIX_FD) {
                    return Err(Error::encode(
                        "file descriptor passing was not negotiated on this transport",
                    ));
                }

                // The descriptor itself travels out-of-band; only its
                // index in encounter order is marshalled here. The handle
                // is extracted from the message once encoding succeeds.
                let index = self.fds;
                self.fds += 1;
                self.write_u32(index)
            }
            Value::ByteArray(bytes) => {
                let Ok(len) = u32::try_from(bytes.len()) else {
                    return Err(Error::encode("array size exceeds limit"));
                };

                if len > MAX_ARRAY_LENGTH {
                    return Err(Error::encode("array size exceeds limit"));
                }

                self.write_u32(len)?;
                self.buf.extend_from_slice(bytes)
            }
            Value::Array(element, values) => {
                if !is_single_complete_type(element) {
                    return Err(Error::encode(
                        "array element type must be a single complete type",
                    ));
                }

                let slot = self.reserve_u32()?;
                self.align(element.alignment())?;
                let start = self.len();

                for value in values {
                    self.write_typed(element, value)?;
                }

                self.patch_array_length(slot, start)
            }
            Value::Dict(key_type, value_type, entries) => {
                if !is_basic_type(key_type) {
                    return Err(Error::encode("dict key must be a basic type"));
                }

                if !is_single_complete_type(value_type) {
                    return Err(Error::encode(
                        "dict value type must be a single complete type",
                    ));
                }

                let slot = self.reserve_u32()?;
                self.align(8)?;
                let start = self.len();

                for (key, value) in entries {
                    self.align(8)?;
                    self.write_typed(key_type, key)?;
                    self.write_typed(value_type, value)?;
                }

                self.patch_array_length(slot, start)
            }
            Value::Struct(elements) => {
                if elements.is_empty() {
                    return Err(Error::encode("struct must have at least one field"));
                }

                self.align(8)?;

                for element in elements {
                    self.write_value(element)?;
                }

                Ok(())
            }
            Value::Variant(value) => {
                let signature = value.signature();
                self.write_signature(&signature)?;
                self.write_value(value)
            }
        }
    }

    fn patch_array_length(&mut self, slot: usize, start: usize) -> Result<()> {
        let len = self.len() - start;

        if len > MAX_ARRAY_LENGTH as usize {
            return Err(Error::encode("array size exceeds limit"));
        }

        self.patch_u32(slot, len as u32);
        Ok(())
    }
}

fn is_single_complete_type(signature: &Signature) -> bool {
    let mut types = signature.iter();
    types.next().is_some() && types.next().is_none()
}

fn is_basic_type(signature: &Signature) -> bool {
    matches!(
        signature.as_bytes(),
        [types::BYTE
            | types::BOOLEAN
            | types::INT16
            | types::UINT16
            | types::INT32
            | types::UINT32
            | types::INT64
            | types::UINT64
            | types::DOUBLE
            | types::STRING
            | types::OBJECT_PATH
            | types::SIGNATURE
            | types::UNIX_FD]
    )
}
