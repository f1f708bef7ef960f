//! The text-line authentication handshake D-Bus performs before any
//! message flows.
//!
//! The client side is a pure state machine: the transport feeds it one
//! server line at a time and writes out whatever bytes it produces, so
//! the whole protocol can be exercised without a socket.

use std::collections::VecDeque;
use std::fmt;

use crate::error::Result;
use crate::protocol::Capabilities;
use crate::Error;


/// Longest server line the client will accept.
pub(crate) const MAX_LINE_LENGTH: usize = 16 * 1024;

/// A server identity reported in the `OK` line: 16 bytes as 32 hex
/// characters.
#[derive(Clone, PartialEq, Eq)]
pub struct Guid(Box<str>);

impl Guid {
    pub(crate) fn parse(s: &str) -> Option<Guid> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }

        Some(Guid(s.into()))
    }

    /// The guid as its 32-character hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Guid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guid").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Guid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authentication mechanism the client can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Credentials-based authentication over unix sockets, proving the
    /// client uid through `SO_PEERCRED`.
    External,
    /// Anonymous access with an identifying trace string.
    Anonymous,
}

impl Mechanism {
    /// The default order in which mechanisms are attempted.
    pub const DEFAULT: &'static [Mechanism] = &[Mechanism::External, Mechanism::Anonymous];

    fn as_str(self) -> &'static str {
        match self {
            Mechanism::External => "EXTERNAL",
            Mechanism::Anonymous => "ANONYMOUS",
        }
    }

    fn from_name(name: &str) -> Option<Mechanism> {
        match name {
            "EXTERNAL" => Some(Mechanism::External),
            "ANONYMOUS" => Some(Mechanism::Anonymous),
            _ => None,
        }
    }
}

impl fmt::Display for Mechanism {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// `AUTH` sent; the server answers with `DATA`, `REJECTED`, `OK` or
    /// `ERROR`.
    WaitingForData,
    /// `CANCEL` sent after a server error; only `REJECTED` may follow.
    WaitingForReject,
    /// `NEGOTIATE_UNIX_FD` sent after `OK`.
    NegotiatingUnixFd,
    /// `BEGIN` sent; the stream has switched to the binary protocol.
    Done,
}

/// The successful outcome of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// The server identity from the `OK` line.
    pub guid: Guid,
    /// The capabilities both sides agreed on.
    pub capabilities: Capabilities,
}

/// The client half of the handshake.
pub(crate) struct Client {
    mechanisms: VecDeque<Mechanism>,
    current: Mechanism,
    requested: Capabilities,
    negotiated: Capabilities,
    state: State,
    guid: Option<Guid>,
    uid: u32,
}

impl Client {
    /// Construct a client offering the given mechanisms in order.
    ///
    /// `requested` must already be filtered for the transport at hand:
    /// only unix sockets may request [`Capabilities::UNIX_FD`].
    pub(crate) fn new(mechanisms: &[Mechanism], requested: Capabilities, uid: u32) -> Client {
        let mut mechanisms = mechanisms.iter().copied().collect::<VecDeque<_>>();

        let current = mechanisms.pop_front().unwrap_or(Mechanism::External);

        Client {
            mechanisms,
            current,
            requested,
            negotiated: Capabilities::NONE,
            state: State::WaitingForData,
            guid: None,
            uid,
        }
    }

    /// Produce the opening bytes: the credentials nul byte followed by the
    /// first `AUTH` line.
    pub(crate) fn initial(&self, out: &mut Vec<u8>) {
        out.push(0);
        self.push_auth(self.current, out);
    }

    /// Feed one server line, stripped or unstripped of its `\r\n`.
    /// Response bytes are appended to `out`. Returns the outcome once the
    /// handshake is complete.
    pub(crate) fn advance(
        &mut self,
        line: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<Option<Authenticated>> {
        if line.len() > MAX_LINE_LENGTH {
            return Err(Error::auth("server line exceeds the line length limit"));
        }

        let Ok(line) = std::str::from_utf8(line.trim_ascii_end()) else {
            return Err(Error::auth("server line is not valid ascii"));
        };

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest),
            None => (line, ""),
        };

        match (self.state, command) {
            (State::WaitingForData, "OK") => self.on_ok(rest, out),
            (State::WaitingForData, "REJECTED") => self.on_rejected(rest, out),
            (State::WaitingForData, "DATA") => {
                // Neither EXTERNAL nor ANONYMOUS has a challenge to answer;
                // an empty response asks the server to decide.
                out.extend_from_slice(b"DATA\r\n");
                Ok(None)
            }
            (State::WaitingForData, "ERROR") => {
                out.extend_from_slice(b"CANCEL\r\n");
                self.state = State::WaitingForReject;
                Ok(None)
            }
            (State::WaitingForReject, "REJECTED") => self.on_rejected(rest, out),
            (State::NegotiatingUnixFd, "AGREE_UNIX_FD") => {
                self.negotiated |= Capabilities::UNIX_FD;
                self.begin(out)
            }
            (State::NegotiatingUnixFd, "ERROR") => {
                // The server refused descriptor passing; authentication
                // itself still succeeds.
                self.begin(out)
            }
            (State::Done, _) => Err(Error::auth("line received after handshake completed")),
            (_, _) => Err(Error::auth(format!(
                "unexpected command `{command}` from server"
            ))),
        }
    }

    fn on_ok(&mut self, rest: &str, out: &mut Vec<u8>) -> Result<Option<Authenticated>> {
        let Some(guid) = Guid::parse(rest.trim()) else {
            return Err(Error::auth(format!("malformed guid in OK line `{rest}`")));
        };

        self.guid = Some(guid);

        if self.requested & Capabilities::UNIX_FD {
            out.extend_from_slice(b"NEGOTIATE_UNIX_FD\r\n");
            self.state = State::NegotiatingUnixFd;
            return Ok(None);
        }

        self.begin(out)
    }

    fn on_rejected(&mut self, rest: &str, out: &mut Vec<u8>) -> Result<Option<Authenticated>> {
        let offered = rest
            .split_ascii_whitespace()
            .filter_map(Mechanism::from_name)
            .collect::<Vec<_>>();

        // Mechanisms the server does not offer can never succeed.
        self.mechanisms.retain(|m| offered.contains(m));

        let Some(next) = self.mechanisms.pop_front() else {
            return Err(Error::auth(format!(
                "all mechanisms rejected, server offers [{}]",
                rest.trim()
            )));
        };

        self.current = next;
        self.push_auth(next, out);
        self.state = State::WaitingForData;
        Ok(None)
    }

    fn begin(&mut self, out: &mut Vec<u8>) -> Result<Option<Authenticated>> {
        let Some(guid) = self.guid.clone() else {
            return Err(Error::auth("BEGIN without a server guid"));
        };

        out.extend_from_slice(b"BEGIN\r\n");
        self.state = State::Done;

        Ok(Some(Authenticated {
            guid,
            capabilities: self.negotiated,
        }))
    }

    fn push_auth(&self, mechanism: Mechanism, out: &mut Vec<u8>) {
        out.extend_from_slice(b"AUTH ");
        out.extend_from_slice(mechanism.as_str().as_bytes());
        out.extend_from_slice(b" ");

        match mechanism {
            // The initial response is the client uid, in decimal, hex
            // encoded byte by byte.
            Mechanism::External => push_hex(self.uid.to_string().as_bytes(), out),
            // An arbitrary trace string identifying the client.
            Mechanism::Anonymous => push_hex(b"tokio-minibus", out),
        }

        out.extend_from_slice(b"\r\n");
    }
}

fn push_hex(bytes: &[u8], out: &mut Vec<u8>) {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    for &b in bytes {
        out.push(HEX[usize::from(b >> 4)]);
        out.push(HEX[usize::from(b & 0xf)]);
    }
}
