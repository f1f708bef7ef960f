//! Low level details for the D-Bus protocol implementation.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Maximum length in bytes of a single array, including all of its contents.
pub(crate) const MAX_ARRAY_LENGTH: u32 = 1 << 26;

/// Maximum length in bytes of a complete message, fixed header included.
pub(crate) const MAX_MESSAGE_LENGTH: usize = 1 << 27;

/// The only protocol major version this implementation speaks.
pub(crate) const PROTOCOL_VERSION: u8 = 1;

/// Length of the fixed message header.
pub(crate) const FIXED_HEADER_LENGTH: usize = 16;

/// The endianness of a message.
///
/// Both byte orders are accepted when reading, since the remote peer picks
/// the marker. Writing always uses [`Endianness::NATIVE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Endianness {
    /// Little endian, marked `l` on the wire.
    Little = b'l',
    /// Big endian, marked `B` on the wire.
    Big = b'B',
}

impl Endianness {
    /// Native endian.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Self = Self::Little;
    /// Native endian.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Self = Self::Big;

    /// Decode an endianness marker byte.
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'l' => Some(Self::Little),
            b'B' => Some(Self::Big),
            _ => None,
        }
    }

    /// The marker byte for this endianness.
    pub(crate) fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum MessageType {
    /// Method call. This message type may prompt a reply.
    MethodCall = 1,
    /// Method reply with returned data.
    MethodReturn = 2,
    /// Error reply.
    Error = 3,
    /// Signal emission.
    Signal = 4,
}

impl MessageType {
    pub(crate) fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::MethodCall),
            2 => Some(Self::MethodReturn),
            3 => Some(Self::Error),
            4 => Some(Self::Signal),
            _ => None,
        }
    }
}

/// Flags inside of a D-Bus message.
///
/// # Examples
///
/// ```
/// use tokio_minibus::Flags;
///
/// let flags = Flags::EMPTY | Flags::NO_REPLY_EXPECTED;
/// assert!(flags & Flags::NO_REPLY_EXPECTED);
/// assert!(!(flags & Flags::NO_AUTO_START));
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Flags(pub(crate) u8);

impl Flags {
    /// An empty set of flags.
    pub const EMPTY: Self = Self(0);
    /// This message does not expect a reply, even if it is of a type that
    /// can have one.
    pub const NO_REPLY_EXPECTED: Self = Self(1);
    /// The bus must not launch an owner for the destination name in
    /// response to this message.
    pub const NO_AUTO_START: Self = Self(2);
    /// The caller is prepared to wait for interactive authorization of the
    /// call, which might take a considerable time to complete.
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Self = Self(4);

    pub(crate) fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub(crate) fn as_raw(self) -> u8 {
        self.0
    }
}

impl BitOr for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = bool;

    #[inline]
    fn bitand(self, rhs: Self) -> bool {
        self.0 & rhs.0 != 0
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();

        for (bit, name) in [
            (Self::NO_REPLY_EXPECTED, "NO_REPLY_EXPECTED"),
            (Self::NO_AUTO_START, "NO_AUTO_START"),
            (
                Self::ALLOW_INTERACTIVE_AUTHORIZATION,
                "ALLOW_INTERACTIVE_AUTHORIZATION",
            ),
        ] {
            if *self & bit {
                set.entry(&format_args!("{name}"));
            }
        }

        set.finish()
    }
}

/// Optional protocol features negotiated during authentication.
///
/// # Examples
///
/// ```
/// use tokio_minibus::Capabilities;
///
/// let caps = Capabilities::NONE | Capabilities::UNIX_FD;
/// assert!(caps & Capabilities::UNIX_FD);
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Capabilities(pub(crate) u8);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Self = Self(0);
    /// File descriptors can accompany messages, passed out-of-band over the
    /// socket as `SCM_RIGHTS` ancillary data. Only negotiable over unix
    /// domain sockets.
    pub const UNIX_FD: Self = Self(1);
}

impl BitOr for Capabilities {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = bool;

    #[inline]
    fn bitand(self, rhs: Self) -> bool {
        self.0 & rhs.0 != 0
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();

        if *self & Self::UNIX_FD {
            set.entry(&format_args!("UNIX_FD"));
        }

        set.finish()
    }
}

/// Header field codes as they appear in the header-fields array.
pub(crate) mod fields {
    /// The object to send a call to, or the object a signal is emitted from.
    pub(crate) const PATH: u8 = 1;
    /// The interface to invoke a method call on, or that a signal is
    /// emitted from. Optional for method calls, required for signals.
    pub(crate) const INTERFACE: u8 = 2;
    /// The member, either the method name or signal name.
    pub(crate) const MEMBER: u8 = 3;
    /// The name of the error that occurred, for errors.
    pub(crate) const ERROR_NAME: u8 = 4;
    /// The serial number of the message this message is a reply to.
    pub(crate) const REPLY_SERIAL: u8 = 5;
    /// The name of the connection this message is intended for.
    pub(crate) const DESTINATION: u8 = 6;
    /// Unique name of the sending connection.
    pub(crate) const SENDER: u8 = 7;
    /// The signature of the message body.
    pub(crate) const SIGNATURE: u8 = 8;
    /// The number of unix file descriptors that accompany the message.
    pub(crate) const UNIX_FDS: u8 = 9;
}

/// Type codes as they appear inside a signature.
pub(crate) mod types {
    /// 8-bit unsigned integer.
    pub(crate) const BYTE: u8 = b'y';
    /// Boolean value, marshalled as a 32-bit word holding 0 or 1.
    pub(crate) const BOOLEAN: u8 = b'b';
    /// 16-bit signed integer.
    pub(crate) const INT16: u8 = b'n';
    /// 16-bit unsigned integer.
    pub(crate) const UINT16: u8 = b'q';
    /// 32-bit signed integer.
    pub(crate) const INT32: u8 = b'i';
    /// 32-bit unsigned integer.
    pub(crate) const UINT32: u8 = b'u';
    /// 64-bit signed integer.
    pub(crate) const INT64: u8 = b'x';
    /// 64-bit unsigned integer.
    pub(crate) const UINT64: u8 = b't';
    /// IEEE 754 double.
    pub(crate) const DOUBLE: u8 = b'd';
    /// UTF-8 string without interior nul bytes.
    pub(crate) const STRING: u8 = b's';
    /// Name of an object instance.
    pub(crate) const OBJECT_PATH: u8 = b'o';
    /// A type signature.
    pub(crate) const SIGNATURE: u8 = b'g';
    /// Index into the out-of-band file descriptor array.
    pub(crate) const UNIX_FD: u8 = b'h';
    /// Array of a single complete type.
    pub(crate) const ARRAY: u8 = b'a';
    /// Variant, carrying its own signature.
    pub(crate) const VARIANT: u8 = b'v';
    pub(crate) const OPEN_PAREN: u8 = b'(';
    pub(crate) const CLOSE_PAREN: u8 = b')';
    pub(crate) const OPEN_BRACE: u8 = b'{';
    pub(crate) const CLOSE_BRACE: u8 = b'}';
}
