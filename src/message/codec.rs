//! Pure encoding and decoding of complete messages.
//!
//! Exposed for testing and for peer-independent framing; the transport
//! drives the same routines for every message it sends or receives.

use std::num::NonZeroU32;
use std::os::fd::OwnedFd;

use crate::error::Result;
use crate::names;
use crate::protocol::{
    fields, Capabilities, Endianness, Flags, MessageType, FIXED_HEADER_LENGTH,
    MAX_ARRAY_LENGTH, MAX_MESSAGE_LENGTH, PROTOCOL_VERSION,
};
use crate::value::Value;
use crate::wire::{padding_to, Reader, WriteBuf, Writer};
use crate::{Error, Message, MessageKind, ObjectPathBuf, OwnedSignature};

/// The decoded fixed 16-byte header of a message.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedHeader {
    pub(crate) endianness: Endianness,
    pub(crate) message_type: MessageType,
    pub(crate) flags: Flags,
    pub(crate) body_length: u32,
    pub(crate) serial: NonZeroU32,
    pub(crate) fields_length: u32,
}

impl FixedHeader {
    /// Total length of the message on the wire, bounded by the protocol
    /// maximum. The body begins after the header fields array, padded to
    /// an 8-byte boundary.
    pub(crate) fn total_length(&self) -> Result<usize> {
        let fields = self.fields_length as usize;
        let body = self.body_length as usize;

        let total = FIXED_HEADER_LENGTH
            + fields
            + padding_to(FIXED_HEADER_LENGTH + fields, 8)
            + body;

        if total > MAX_MESSAGE_LENGTH {
            return Err(Error::decode("message size exceeds limit", 4));
        }

        Ok(total)
    }
}

/// Decode the fixed header, validating the endianness marker, message
/// type, protocol version, serial and the declared lengths.
pub(crate) fn decode_fixed_header(bytes: &[u8; FIXED_HEADER_LENGTH]) -> Result<FixedHeader> {
    let Some(endianness) = Endianness::from_byte(bytes[0]) else {
        return Err(Error::decode(
            format!("invalid endianness marker: {:#04x}", bytes[0]),
            0,
        ));
    };

    let Some(message_type) = MessageType::from_raw(bytes[1]) else {
        return Err(Error::decode(
            format!("invalid message type: {}", bytes[1]),
            1,
        ));
    };

    let flags = Flags::from_raw(bytes[2]);

    if bytes[3] != PROTOCOL_VERSION {
        return Err(Error::decode(
            format!("invalid protocol version: {}", bytes[3]),
            3,
        ));
    }

    let word = |at: usize| -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[at..at + 4]);

        match endianness {
            Endianness::Little => u32::from_le_bytes(raw),
            Endianness::Big => u32::from_be_bytes(raw),
        }
    };

    let body_length = word(4);

    let Some(serial) = NonZeroU32::new(word(8)) else {
        return Err(Error::decode("message serial is zero", 8));
    };

    let fields_length = word(12);

    if fields_length > MAX_ARRAY_LENGTH {
        return Err(Error::decode(
            format!("header fields array length {fields_length} exceeds limit"),
            12,
        ));
    }

    Ok(FixedHeader {
        endianness,
        message_type,
        flags,
        body_length,
        serial,
        fields_length,
    })
}

/// Decode a complete message from its wire bytes and the file descriptors
/// that accompanied it.
///
/// The byte slice must hold exactly one message; trailing bytes are a
/// hard error. On failure any unclaimed descriptors are closed.
pub fn decode_message(bytes: &[u8], fds: Vec<OwnedFd>) -> Result<Message> {
    if bytes.len() < FIXED_HEADER_LENGTH {
        return Err(Error::decode("message shorter than the fixed header", 0));
    }

    let mut head = [0u8; FIXED_HEADER_LENGTH];
    head.copy_from_slice(&bytes[..FIXED_HEADER_LENGTH]);

    let header = decode_fixed_header(&head)?;
    let total = header.total_length()?;

    if bytes.len() != total {
        return Err(Error::decode(
            format!(
                "message length {} does not match the declared length {total}",
                bytes.len()
            ),
            0,
        ));
    }

    let fd_count = fds.len();
    let mut fds = fds.into_iter().map(Some).collect::<Vec<_>>();
    let mut reader = Reader::new(bytes, header.endianness, &mut fds);
    reader.take(FIXED_HEADER_LENGTH)?;

    let mut parsed = HeaderFields::default();
    let fields_end = FIXED_HEADER_LENGTH + header.fields_length as usize;

    while reader.pos() < fields_end {
        reader.align(8)?;

        if reader.pos() >= fields_end {
            break;
        }

        let code = reader.read_u8()?;
        let value = read_header_variant(&mut reader)?;
        parsed.set(&reader, code, value)?;
    }

    if reader.pos() != fields_end {
        return Err(reader.error("header field overruns the declared array length"));
    }

    reader.align(8)?;

    let signature = parsed.signature.take().unwrap_or_default();

    if header.body_length > 0 && signature.is_empty() {
        return Err(reader.error("missing signature for non-empty body"));
    }

    let mut body = Vec::new();

    for ty in signature.iter() {
        body.push(reader.read_value(ty)?);
    }

    if !reader.is_empty() {
        return Err(reader.error("trailing bytes after message body"));
    }

    let end = reader.pos();
    drop(reader);

    // Every descriptor sent with the message must have been referenced by
    // an fd index in the body.
    if fds.iter().any(Option::is_some) {
        return Err(Error::decode(
            "message carried more file descriptors than fd values",
            end,
        ));
    }

    match parsed.unix_fds {
        Some(declared) if declared as usize != fd_count => {
            return Err(Error::decode(
                format!("UNIX_FDS declares {declared} descriptors but {fd_count} arrived"),
                end,
            ));
        }
        None if fd_count > 0 => {
            return Err(Error::decode(
                format!("message carried {fd_count} descriptors without a UNIX_FDS field"),
                end,
            ));
        }
        _ => {}
    }

    let kind = parsed.into_kind(header.message_type, end)?;

    Ok(Message {
        kind,
        serial: header.serial,
        flags: header.flags,
        sender: parsed.sender.take(),
        destination: parsed.destination.take(),
        body,
    })
}

/// Decoded header fields, collected by code. Unknown codes are decoded
/// and discarded.
#[derive(Default)]
struct HeaderFields {
    path: Option<ObjectPathBuf>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    reply_serial: Option<NonZeroU32>,
    destination: Option<String>,
    sender: Option<String>,
    signature: Option<OwnedSignature>,
    unix_fds: Option<u32>,
}

impl HeaderFields {
    fn set(&mut self, reader: &Reader<'_>, code: u8, value: Value) -> Result<()> {
        match (code, value) {
            (fields::PATH, Value::ObjectPath(path)) => self.path = Some(path),
            (fields::INTERFACE, Value::String(s)) => self.interface = Some(s),
            (fields::MEMBER, Value::String(s)) => self.member = Some(s),
            (fields::ERROR_NAME, Value::String(s)) => self.error_name = Some(s),
            (fields::REPLY_SERIAL, Value::UInt32(serial)) => {
                let Some(serial) = NonZeroU32::new(serial) else {
                    return Err(reader.error("REPLY_SERIAL is zero"));
                };

                self.reply_serial = Some(serial);
            }
            (fields::DESTINATION, Value::String(s)) => self.destination = Some(s),
            (fields::SENDER, Value::String(s)) => self.sender = Some(s),
            (fields::SIGNATURE, Value::Signature(s)) => self.signature = Some(s),
            (fields::UNIX_FDS, Value::UInt32(n)) => self.unix_fds = Some(n),
            (
                fields::PATH
                | fields::INTERFACE
                | fields::MEMBER
                | fields::ERROR_NAME
                | fields::REPLY_SERIAL
                | fields::DESTINATION
                | fields::SENDER
                | fields::SIGNATURE
                | fields::UNIX_FDS,
                other,
            ) => {
                return Err(reader.error(format!(
                    "header field {code} has unexpected type `{}`",
                    other.signature().as_str()
                )));
            }
            // Unknown codes are skipped.
            (_, _) => {}
        }

        Ok(())
    }

    /// Check the required fields for the message type and assemble the
    /// message kind.
    fn into_kind(&mut self, message_type: MessageType, at: usize) -> Result<MessageKind> {
        let missing = |name: &str| Error::decode(format!("missing required {name} header"), at);

        Ok(match message_type {
            MessageType::MethodCall => MessageKind::MethodCall {
                path: self.path.take().ok_or_else(|| missing("PATH"))?,
                interface: self.interface.take(),
                member: self.member.take().ok_or_else(|| missing("MEMBER"))?,
            },
            MessageType::MethodReturn => MessageKind::MethodReturn {
                reply_serial: self
                    .reply_serial
                    .take()
                    .ok_or_else(|| missing("REPLY_SERIAL"))?,
            },
            MessageType::Error => MessageKind::Error {
                error_name: self
                    .error_name
                    .take()
                    .ok_or_else(|| missing("ERROR_NAME"))?,
                reply_serial: self
                    .reply_serial
                    .take()
                    .ok_or_else(|| missing("REPLY_SERIAL"))?,
            },
            MessageType::Signal => MessageKind::Signal {
                path: self.path.take().ok_or_else(|| missing("PATH"))?,
                interface: self.interface.take().ok_or_else(|| missing("INTERFACE"))?,
                member: self.member.take().ok_or_else(|| missing("MEMBER"))?,
            },
        })
    }
}

/// Read one header field variant: a signature holding a single complete
/// type, followed by the value.
fn read_header_variant(reader: &mut Reader<'_>) -> Result<Value> {
    let signature = reader.read_signature()?;
    let mut types = signature.iter();

    let Some(ty) = types.next() else {
        return Err(reader.error("header field variant has an empty signature"));
    };

    if types.next().is_some() {
        return Err(reader.error("header field variant must be a single complete type"));
    }

    reader.read_value(ty)
}

/// Encode a message into the given buffer, growing it and restarting on
/// overflow. The encoder itself never partially commits: each attempt
/// starts from an empty buffer.
pub(crate) fn encode_to(
    buf: &mut WriteBuf,
    message: &Message,
    capabilities: Capabilities,
) -> Result<()> {
    loop {
        buf.clear();

        match try_encode(buf, message, capabilities) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_buffer_full() && buf.can_grow() => buf.grow(),
            Err(e) if e.is_buffer_full() => {
                return Err(Error::encode("message size exceeds limit"));
            }
            Err(e) => return Err(e),
        }
    }
}

fn try_encode(buf: &mut WriteBuf, message: &Message, capabilities: Capabilities) -> Result<()> {
    validate_names(message)?;

    let fd_count = count_fds(&message.body);

    let Ok(fd_count) = u32::try_from(fd_count) else {
        return Err(Error::encode("too many file descriptors"));
    };

    let mut writer = Writer::new(buf, capabilities);

    writer.write_u8(Endianness::NATIVE.as_byte())?;
    writer.write_u8(message.kind.message_type() as u8)?;
    writer.write_u8(message.flags.as_raw())?;
    writer.write_u8(PROTOCOL_VERSION)?;

    let body_length_slot = writer.reserve_u32()?;
    writer.write_u32(message.serial.get())?;
    let fields_length_slot = writer.reserve_u32()?;

    let fields_start = writer.len();

    match &message.kind {
        MessageKind::MethodCall {
            path,
            interface,
            member,
        } => {
            write_field(&mut writer, fields::PATH, Value::ObjectPath(path.clone()))?;

            if let Some(interface) = interface {
                write_field(
                    &mut writer,
                    fields::INTERFACE,
                    Value::String(interface.clone()),
                )?;
            }

            write_field(&mut writer, fields::MEMBER, Value::String(member.clone()))?;
        }
        MessageKind::MethodReturn { reply_serial } => {
            write_field(
                &mut writer,
                fields::REPLY_SERIAL,
                Value::UInt32(reply_serial.get()),
            )?;
        }
        MessageKind::Error {
            error_name,
            reply_serial,
        } => {
            write_field(
                &mut writer,
                fields::ERROR_NAME,
                Value::String(error_name.clone()),
            )?;
            write_field(
                &mut writer,
                fields::REPLY_SERIAL,
                Value::UInt32(reply_serial.get()),
            )?;
        }
        MessageKind::Signal {
            path,
            interface,
            member,
        } => {
            write_field(&mut writer, fields::PATH, Value::ObjectPath(path.clone()))?;
            write_field(
                &mut writer,
                fields::INTERFACE,
                Value::String(interface.clone()),
            )?;
            write_field(&mut writer, fields::MEMBER, Value::String(member.clone()))?;
        }
    }

    if let Some(destination) = &message.destination {
        write_field(
            &mut writer,
            fields::DESTINATION,
            Value::String(destination.clone()),
        )?;
    }

    if let Some(sender) = &message.sender {
        write_field(&mut writer, fields::SENDER, Value::String(sender.clone()))?;
    }

    if !message.body.is_empty() {
        let signature = message.body_signature();
        write_field(&mut writer, fields::SIGNATURE, Value::Signature(signature))?;
    }

    if fd_count > 0 {
        write_field(&mut writer, fields::UNIX_FDS, Value::UInt32(fd_count))?;
    }

    let fields_length = writer.len() - fields_start;

    let Ok(fields_length) = u32::try_from(fields_length) else {
        return Err(Error::encode("header fields array exceeds limit"));
    };

    if fields_length > MAX_ARRAY_LENGTH {
        return Err(Error::encode("header fields array exceeds limit"));
    }

    writer.patch_u32(fields_length_slot, fields_length);
    writer.align(8)?;

    let body_start = writer.len();

    for value in &message.body {
        writer.write_value(value)?;
    }

    let body_length = writer.len() - body_start;

    let Ok(body_length) = u32::try_from(body_length) else {
        return Err(Error::encode("message size exceeds limit"));
    };

    writer.patch_u32(body_length_slot, body_length);

    // The UNIX_FDS field was computed before the body was written; the
    // writer must have handed out exactly that many indices.
    debug_assert_eq!(writer.fds(), fd_count);

    if writer.len() > MAX_MESSAGE_LENGTH {
        return Err(Error::encode("message size exceeds limit"));
    }

    Ok(())
}

/// Encode a message, returning its wire bytes and the file descriptors to
/// transmit alongside, in index order.
pub fn encode_message(message: Message) -> Result<(Vec<u8>, Vec<OwnedFd>)> {
    let mut buf = WriteBuf::new();
    encode_to(&mut buf, &message, Capabilities::UNIX_FD)?;
    let bytes = buf.take();
    let fds = take_message_fds(message);
    Ok((bytes, fds))
}

fn write_field(writer: &mut Writer<'_>, code: u8, value: Value) -> Result<()> {
    writer.align(8)?;
    writer.write_u8(code)?;
    writer.write_value(&Value::Variant(Box::new(value)))
}

fn validate_names(message: &Message) -> Result<()> {
    match &message.kind {
        MessageKind::MethodCall {
            interface, member, ..
        } => {
            if let Some(interface) = interface {
                names::validate_interface(interface)?;
            }

            names::validate_member(member)?;
        }
        MessageKind::MethodReturn { .. } => {}
        MessageKind::Error { error_name, .. } => {
            names::validate_error_name(error_name)?;
        }
        MessageKind::Signal {
            interface, member, ..
        } => {
            names::validate_interface(interface)?;
            names::validate_member(member)?;
        }
    }

    if let Some(destination) = &message.destination {
        names::validate_bus_name(destination)?;
    }

    if let Some(sender) = &message.sender {
        names::validate_bus_name(sender)?;
    }

    Ok(())
}

/// Count the file descriptors reachable from the body, in the order the
/// writer will index them.
fn count_fds(values: &[Value]) -> usize {
    fn count(value: &Value) -> usize {
        match value {
            Value::Fd(..) => 1,
            Value::Array(_, values) | Value::Struct(values) => {
                values.iter().map(count).sum()
            }
            Value::Dict(_, _, entries) => entries
                .iter()
                .map(|(k, v)| count(k) + count(v))
                .sum(),
            Value::Variant(value) => count(value),
            _ => 0,
        }
    }

    values.iter().map(count).sum()
}

/// Extract the owned descriptors from a message, depth-first in body
/// order. This matches the index order assigned while encoding.
pub(crate) fn take_message_fds(message: Message) -> Vec<OwnedFd> {
    fn take(value: Value, out: &mut Vec<OwnedFd>) {
        match value {
            Value::Fd(fd) => out.push(fd),
            Value::Array(_, values) | Value::Struct(values) => {
                for value in values {
                    take(value, out);
                }
            }
            Value::Dict(_, _, entries) => {
                for (key, value) in entries {
                    take(key, out);
                    take(value, out);
                }
            }
            Value::Variant(value) => take(*value, out),
            _ => {}
        }
    }

    let mut out = Vec::new();

    for value in message.body {
        take(value, &mut out);
    }

    out
}
