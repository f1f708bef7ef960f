//! D-Bus messages and the pure message codec.

use std::num::NonZeroU32;

use crate::protocol::{Flags, MessageType};
use crate::value::{signature_of, Value};
use crate::{ObjectPath, ObjectPathBuf, OwnedSignature};

pub use self::codec::{decode_message, encode_message};
pub(crate) use self::codec::{decode_fixed_header, encode_to, take_message_fds};
mod codec;

#[cfg(test)]
pub(crate) mod tests;

/// The kind of a [`Message`], along with the header fields required for
/// that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// A method call to an object.
    MethodCall {
        /// The path of the object the call is directed at.
        path: ObjectPathBuf,
        /// The interface holding the member, if qualified.
        interface: Option<String>,
        /// The method being called.
        member: String,
    },
    /// A reply to a method call.
    MethodReturn {
        /// Serial of the call this replies to.
        reply_serial: NonZeroU32,
    },
    /// An error reply to a method call.
    Error {
        /// The name of the error that occurred.
        error_name: String,
        /// Serial of the call this replies to.
        reply_serial: NonZeroU32,
    },
    /// A signal emission.
    Signal {
        /// The path of the object emitting the signal.
        path: ObjectPathBuf,
        /// The interface the signal belongs to.
        interface: String,
        /// The signal name.
        member: String,
    },
}

impl MessageKind {
    pub(crate) fn message_type(&self) -> MessageType {
        match self {
            MessageKind::MethodCall { .. } => MessageType::MethodCall,
            MessageKind::MethodReturn { .. } => MessageType::MethodReturn,
            MessageKind::Error { .. } => MessageType::Error,
            MessageKind::Signal { .. } => MessageType::Signal,
        }
    }
}

/// An owned D-Bus message.
///
/// The body signature is derived from the body values, so a message is
/// well-formed by construction; names are validated when the message is
/// encoded.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU32;
///
/// use tokio_minibus::{Message, ObjectPath, Value};
///
/// const PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");
///
/// let serial = NonZeroU32::new(1).unwrap();
///
/// let m = Message::method_call(PATH, "Hello", serial)
///     .with_interface("org.freedesktop.DBus")
///     .with_destination("org.freedesktop.DBus")
///     .with_arg(42i32);
///
/// assert_eq!(m.body(), &[Value::Int32(42)]);
/// ```
#[derive(Debug, PartialEq)]
pub struct Message {
    /// The type of the message.
    pub(crate) kind: MessageKind,
    /// Sender-assigned serial of the message.
    pub(crate) serial: NonZeroU32,
    /// Flags in the message.
    pub(crate) flags: Flags,
    /// The sender of the message.
    pub(crate) sender: Option<String>,
    /// The destination of the message.
    pub(crate) destination: Option<String>,
    /// The body as a sequence of values.
    pub(crate) body: Vec<Value>,
}

impl Message {
    fn new(kind: MessageKind, serial: NonZeroU32) -> Self {
        Self {
            kind,
            serial,
            flags: Flags::EMPTY,
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    /// Construct a method call.
    pub fn method_call(path: &ObjectPath, member: &str, serial: NonZeroU32) -> Self {
        Self::new(
            MessageKind::MethodCall {
                path: path.to_owned(),
                interface: None,
                member: member.into(),
            },
            serial,
        )
    }

    /// Construct a signal.
    pub fn signal(path: &ObjectPath, interface: &str, member: &str, serial: NonZeroU32) -> Self {
        Self::new(
            MessageKind::Signal {
                path: path.to_owned(),
                interface: interface.into(),
                member: member.into(),
            },
            serial,
        )
    }

    /// Construct a method return replying to this message, with the sender
    /// and destination swapped.
    pub fn method_return(&self, serial: NonZeroU32) -> Self {
        let mut m = Self::new(
            MessageKind::MethodReturn {
                reply_serial: self.serial,
            },
            serial,
        );

        m.sender = self.destination.clone();
        m.destination = self.sender.clone();
        m
    }

    /// Construct an error replying to this message, with the sender and
    /// destination swapped.
    pub fn error(&self, error_name: &str, serial: NonZeroU32) -> Self {
        let mut m = Self::new(
            MessageKind::Error {
                error_name: error_name.into(),
                reply_serial: self.serial,
            },
            serial,
        );

        m.sender = self.destination.clone();
        m.destination = self.sender.clone();
        m
    }

    /// Modify the interface of a method call. Has no effect on other
    /// kinds.
    pub fn with_interface(mut self, interface: &str) -> Self {
        if let MessageKind::MethodCall {
            interface: slot, ..
        } = &mut self.kind
        {
            *slot = Some(interface.into());
        }

        self
    }

    /// Modify the destination of the message.
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Modify the sender of the message.
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Modify the flags of the message.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the body of the message.
    pub fn with_body(mut self, body: Vec<Value>) -> Self {
        self.body = body;
        self
    }

    /// Append a single value to the body.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.body.push(value.into());
        self
    }

    /// The kind of the message.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// The serial of the message.
    pub fn serial(&self) -> NonZeroU32 {
        self.serial
    }

    /// The flags of the message.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The sender of the message, if any.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The destination of the message, if any.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The body of the message.
    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// Take the body out of the message.
    pub fn into_body(self) -> Vec<Value> {
        self.body
    }

    /// The signature of the body.
    pub fn body_signature(&self) -> OwnedSignature {
        signature_of(&self.body)
    }

    /// Duplicate the message, duplicating every file descriptor carried
    /// in the body into a fresh kernel handle.
    pub fn deep_dup(&self) -> std::io::Result<Message> {
        let mut body = Vec::with_capacity(self.body.len());

        for value in &self.body {
            body.push(value.deep_dup()?);
        }

        Ok(Message {
            kind: self.kind.clone(),
            serial: self.serial,
            flags: self.flags,
            sender: self.sender.clone(),
            destination: self.destination.clone(),
            body,
        })
    }
}
