use std::os::fd::OwnedFd;

use crate::error::Result;
use crate::protocol::{types, Endianness, MAX_ARRAY_LENGTH};
use crate::signature::TypeView;
use crate::value::Value;
use crate::{Error, ObjectPath, Signature};

use super::padding_to;

macro_rules! read_number {
    ($name:ident, $ty:ty) => {
        pub(crate) fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();

            self.align(N)?;
            let bytes = self.take(N)?;
            let mut raw = [0u8; N];
            raw.copy_from_slice(bytes);

            Ok(match self.endianness {
                Endianness::Little => <$ty>::from_le_bytes(raw),
                Endianness::Big => <$ty>::from_be_bytes(raw),
            })
        }
    };
}

/// A cursor over a received message, reading in the byte order the peer
/// declared and resolving fd indices against the out-of-band descriptor
/// array.
///
/// Never reads past the supplied buffer; every failure carries the byte
/// offset at which it was detected.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    endianness: Endianness,
    fds: &'a mut Vec<Option<OwnedFd>>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(
        buf: &'a [u8],
        endianness: Endianness,
        fds: &'a mut Vec<Option<OwnedFd>>,
    ) -> Self {
        Self {
            buf,
            pos: 0,
            endianness,
            fds,
        }
    }

    /// Current offset into the message.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> Error {
        Error::decode(reason, self.pos)
    }

    /// Consume `n` bytes.
    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(bytes) = self.buf.get(self.pos..self.pos + n) else {
            return Err(self.error("unexpected end of message"));
        };

        self.pos += n;
        Ok(bytes)
    }

    /// Advance past padding to the given alignment. Padding content is
    /// ignored, but the padding itself must fit in the buffer.
    pub(crate) fn align(&mut self, align: usize) -> Result<()> {
        let pad = padding_to(self.pos, align);
        self.take(pad)?;
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    read_number!(read_u16, u16);
    read_number!(read_i16, i16);
    read_number!(read_u32, u32);
    read_number!(read_i32, i32);
    read_number!(read_u64, u64);
    read_number!(read_i64, i64);

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// A length-prefixed, nul-terminated string without interior nul
    /// bytes.
    pub(crate) fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len + 1)?;

        if bytes[len] != 0 {
            return Err(self.error("string is not nul terminated"));
        }

        let bytes = &bytes[..len];

        if bytes.contains(&0) {
            return Err(self.error("string contains an interior nul byte"));
        }

        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.into()),
            Err(..) => Err(self.error("string is not valid utf-8")),
        }
    }

    pub(crate) fn read_object_path(&mut self) -> Result<Value> {
        let s = self.read_string()?;

        match ObjectPath::new(s.as_bytes()) {
            Ok(path) => Ok(Value::ObjectPath(path.to_owned())),
            Err(..) => Err(self.error(format!("invalid object path `{s}`"))),
        }
    }

    /// A byte-length-prefixed, nul-terminated signature.
    pub(crate) fn read_signature(&mut self) -> Result<&'a Signature> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len + 1)?;

        if bytes[len] != 0 {
            return Err(self.error("signature is not nul terminated"));
        }

        match Signature::new(&bytes[..len]) {
            Ok(signature) => Ok(signature),
            Err(error) => Err(self.error(format!("invalid signature: {error}"))),
        }
    }

    /// Take ownership of the descriptor at the given out-of-band index.
    fn claim_fd(&mut self, index: u32) -> Result<OwnedFd> {
        let pos = self.pos;

        let Some(slot) = self.fds.get_mut(index as usize) else {
            return Err(Error::decode(
                format!("unix fd index {index} out of range"),
                pos,
            ));
        };

        match slot.take() {
            Some(fd) => Ok(fd),
            None => Err(Error::decode(format!("unix fd index {index} reused"), pos)),
        }
    }

    /// Read one value of the given single complete type.
    pub(crate) fn read_value(&mut self, ty: &Signature) -> Result<Value> {
        match ty.view() {
            TypeView::Basic(code) => self.read_basic(code),
            TypeView::Array(element) => {
                let len = self.read_u32()?;

                if len > MAX_ARRAY_LENGTH {
                    return Err(self.error(format!("array length {len} exceeds limit")));
                }

                self.align(element.alignment())?;

                if element.as_bytes() == [types::BYTE] {
                    return Ok(Value::ByteArray(self.take(len as usize)?.to_vec()));
                }

                let end = self.pos + len as usize;
                let mut values = Vec::new();

                while self.pos < end {
                    values.push(self.read_value(element)?);
                }

                if self.pos != end {
                    return Err(self.error("array contents overrun the declared length"));
                }

                Ok(Value::Array(element.to_owned(), values))
            }
            TypeView::Dict(key_type, value_type) => {
                let len = self.read_u32()?;

                if len > MAX_ARRAY_LENGTH {
                    return Err(self.error(format!("array length {len} exceeds limit")));
                }

                self.align(8)?;

                let end = self.pos + len as usize;
                let mut entries = Vec::new();

                while self.pos < end {
                    self.align(8)?;
                    let key = self.read_value(key_type)?;
                    let value = self.read_value(value_type)?;
                    entries.push((key, value));
                }

                if self.pos != end {
                    return Err(self.error("dict contents overrun the declared length"));
                }

                Ok(Value::Dict(
                    key_type.to_owned(),
                    value_type.to_owned(),
                    entries,
                ))
            }
            TypeView::Struct(fields) => {
                self.align(8)?;

                let mut values = Vec::new();

                for field in fields.iter() {
                    values.push(self.read_value(field)?);
                }

                Ok(Value::Struct(values))
            }
            TypeView::Variant => {
                let signature = self.read_signature()?;
                let mut types = signature.iter();

                let Some(ty) = types.next() else {
                    return Err(self.error("variant has an empty signature"));
                };

                if types.next().is_some() {
                    return Err(
                        self.error("variant signature must be a single complete type")
                    );
                }

                Ok(Value::Variant(Box::new(self.read_value(ty)?)))
            }
        }
    }

    fn read_basic(&mut self, code: u8) -> Result<Value> {
        Ok(match code {
            types::BYTE => Value::Byte(self.read_u8()?),
            types::BOOLEAN => match self.read_u32()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(self.error(format!("invalid boolean value: {other}")));
                }
            },
            types::INT16 => Value::Int16(self.read_i16()?),
            types::UINT16 => Value::UInt16(self.read_u16()?),
            types::INT32 => Value::Int32(self.read_i32()?),
            types::UINT32 => Value::UInt32(self.read_u32()?),
            types::INT64 => Value::Int64(self.read_i64()?),
            types::UINT64 => Value::UInt64(self.read_u64()?),
            types::DOUBLE => Value::Double(self.read_f64()?),
            types::STRING => Value::String(self.read_string()?),
            types::OBJECT_PATH => self.read_object_path()?,
            types::SIGNATURE => Value::Signature(self.read_signature()?.to_owned()),
            types::UNIX_FD => {
                let index = self.read_u32()?;
                Value::Fd(self.claim_fd(index)?)
            }
            other => {
                return Err(self.error(format!("unexpected type code `{}`", other as char)));
            }
        })
    }
}
