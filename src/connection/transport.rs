use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags,
};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, ErrorKind, Result};
use crate::message::{decode_fixed_header, encode_to, take_message_fds};
use crate::protocol::{Capabilities, FIXED_HEADER_LENGTH};
use crate::wire::WriteBuf;
use crate::{decode_message, Message};

/// Most descriptors accepted in a single ancillary batch. Matches the
/// limit the reference bus enforces per message.
const MAX_FDS_PER_READ: usize = 16;

/// A connected byte stream to a peer, either flavor of socket the
/// transport supports.
#[derive(Debug)]
pub(crate) enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub(crate) fn is_unix(&self) -> bool {
        matches!(self, Stream::Unix(..))
    }

    pub(crate) fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Stream::Unix(stream) => stream.set_nonblocking(true),
            Stream::Tcp(stream) => stream.set_nonblocking(true),
        }
    }

    /// Read into `buf`, collecting any descriptors that arrive as
    /// ancillary data.
    pub(crate) fn recv(&self, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> io::Result<usize> {
        match self {
            Stream::Unix(stream) => {
                let mut iov = [IoSliceMut::new(buf)];
                let mut cmsg = nix::cmsg_space!([RawFd; MAX_FDS_PER_READ]);

                let msg = recvmsg::<()>(
                    stream.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsg),
                    MsgFlags::MSG_CMSG_CLOEXEC,
                )
                .map_err(io::Error::from)?;

                let bytes = msg.bytes;

                for cmsg in msg.cmsgs().map_err(io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(received) = cmsg {
                        for fd in received {
                            // SAFETY: recvmsg hands us ownership of every
                            // descriptor it delivers.
                            fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
                        }
                    }
                }

                Ok(bytes)
            }
            Stream::Tcp(stream) => (&*stream).read(buf),
        }
    }

    /// Write from `buf`, attaching `fds` as `SCM_RIGHTS` ancillary data.
    /// Descriptors may only accompany unix sockets; the codec never
    /// produces them otherwise.
    pub(crate) fn send(&self, buf: &[u8], fds: &[RawFd]) -> io::Result<usize> {
        match self {
            Stream::Unix(stream) => {
                let iov = [IoSlice::new(buf)];

                let cmsgs = if fds.is_empty() {
                    Vec::new()
                } else {
                    vec![ControlMessage::ScmRights(fds)]
                };

                sendmsg::<()>(
                    stream.as_raw_fd(),
                    &iov,
                    &cmsgs,
                    MsgFlags::empty(),
                    None,
                )
                .map_err(io::Error::from)
            }
            Stream::Tcp(stream) => (&*stream).write(buf),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Stream::Unix(stream) => stream.shutdown(std::net::Shutdown::Both),
            Stream::Tcp(stream) => stream.shutdown(std::net::Shutdown::Both),
        }
    }
}

impl AsRawFd for Stream {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Unix(stream) => stream.as_raw_fd(),
            Stream::Tcp(stream) => stream.as_raw_fd(),
        }
    }
}

/// An authenticated transport carrying D-Bus messages.
///
/// Obtained from [`connect_authenticated`] or [`loopback`]. At most one
/// `recv` and one `send` may be outstanding at a time; a send abandoned
/// mid-write poisons the transport and only [`shutdown`] remains useful.
///
/// [`connect_authenticated`]: crate::connect_authenticated
/// [`loopback`]: crate::loopback
/// [`shutdown`]: Transport::shutdown
#[derive(Debug)]
pub struct Transport {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Socket(SocketTransport),
    Loopback(Loopback),
}

impl Transport {
    pub(crate) fn socket(transport: SocketTransport) -> Transport {
        Transport {
            inner: Inner::Socket(transport),
        }
    }

    /// Receive the next message.
    ///
    /// On a decode error the stream itself stays open and usable; whether
    /// to continue is the caller's decision.
    pub async fn recv(&mut self) -> Result<Message> {
        match &mut self.inner {
            Inner::Socket(transport) => transport.recv().await,
            Inner::Loopback(loopback) => loopback.recv().await,
        }
    }

    /// Send a message, consuming it and the descriptors it carries.
    ///
    /// A send error leaves the peer's stream in an unknown position; the
    /// transport is poisoned and must be shut down.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        match &mut self.inner {
            Inner::Socket(transport) => transport.send(message).await,
            Inner::Loopback(loopback) => loopback.send(message).await,
        }
    }

    /// The capabilities negotiated for this transport.
    pub fn capabilities(&self) -> Capabilities {
        match &self.inner {
            Inner::Socket(transport) => transport.capabilities,
            Inner::Loopback(..) => Capabilities::UNIX_FD,
        }
    }

    /// Shut the transport down. Idempotent; errors while closing are
    /// logged, not surfaced. Every subsequent operation fails.
    pub fn shutdown(&mut self) {
        match &mut self.inner {
            Inner::Socket(transport) => transport.shutdown(),
            Inner::Loopback(loopback) => loopback.shutdown(),
        }
    }
}

/// An in-memory transport for testing: a single-slot mailbox where
/// `send` deposits a deep duplicate of the message and `recv` takes it.
///
/// Duplication ensures sender and receiver hold independent descriptors,
/// the same contract a socket pair provides.
pub fn loopback() -> Transport {
    let (tx, rx) = mpsc::channel(1);

    Transport {
        inner: Inner::Loopback(Loopback {
            tx,
            rx,
            shutdown: false,
        }),
    }
}

#[derive(Debug)]
struct Loopback {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    shutdown: bool,
}

impl Loopback {
    async fn send(&mut self, message: Message) -> Result<()> {
        if self.shutdown {
            return Err(Error::new(ErrorKind::Shutdown));
        }

        let dup = message.deep_dup()?;

        if self.tx.send(dup).await.is_err() {
            return Err(Error::new(ErrorKind::Shutdown));
        }

        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        if self.shutdown {
            return Err(Error::new(ErrorKind::Shutdown));
        }

        match self.rx.recv().await {
            Some(message) => Ok(message),
            None => Err(Error::new(ErrorKind::Shutdown)),
        }
    }

    fn shutdown(&mut self) {
        self.shutdown = true;
        self.rx.close();
    }
}

/// A transport over a connected, authenticated socket.
#[derive(Debug)]
pub(crate) struct SocketTransport {
    stream: Option<AsyncFd<Stream>>,
    capabilities: Capabilities,
    /// Set while a send is on the wire or after one failed; the stream
    /// position is then unknown to the peer.
    poisoned: bool,
    write_buf: WriteBuf,
    read_buf: Vec<u8>,
    /// Descriptors collected from ancillary data while receiving the
    /// current message.
    pending_fds: Vec<OwnedFd>,
}

impl SocketTransport {
    /// Wrap an authenticated stream. `leftover` holds any bytes read past
    /// the end of the handshake.
    pub(crate) fn new(
        stream: AsyncFd<Stream>,
        capabilities: Capabilities,
        leftover: Vec<u8>,
    ) -> SocketTransport {
        SocketTransport {
            stream: Some(stream),
            capabilities,
            poisoned: false,
            write_buf: WriteBuf::new(),
            read_buf: leftover,
            pending_fds: Vec::new(),
        }
    }

    fn stream(&self) -> Result<&AsyncFd<Stream>> {
        if self.poisoned {
            return Err(Error::new(ErrorKind::Cancelled));
        }

        match &self.stream {
            Some(stream) => Ok(stream),
            None => Err(Error::new(ErrorKind::Shutdown)),
        }
    }

    /// Receive one message. Resumable after cancellation: partially read
    /// bytes stay in the read buffer and the next call continues from
    /// them.
    async fn recv(&mut self) -> Result<Message> {
        self.read_exact(FIXED_HEADER_LENGTH).await?;

        let mut head = [0u8; FIXED_HEADER_LENGTH];
        head.copy_from_slice(&self.read_buf[..FIXED_HEADER_LENGTH]);

        // Validate the fixed header and the size cap before committing to
        // read the remainder. On a header-level error only those sixteen
        // bytes can be discarded; the frame length is unknown.
        let total = match decode_fixed_header(&head).and_then(|header| header.total_length()) {
            Ok(total) => total,
            Err(e) => {
                self.read_buf.drain(..FIXED_HEADER_LENGTH);
                return Err(e);
            }
        };

        self.read_exact(total).await?;

        let fds = std::mem::take(&mut self.pending_fds);
        let result = decode_message(&self.read_buf[..total], fds);

        // Consume the whole frame either way; bytes past it belong to the
        // next message and a failed frame does not poison the stream.
        self.read_buf.drain(..total);

        if let Ok(message) = &result {
            trace!(serial = message.serial().get(), "received message");
        }

        result
    }

    /// Send one message. The descriptors ride along with the first bytes
    /// of the frame.
    async fn send(&mut self, message: Message) -> Result<()> {
        self.stream()?;

        encode_to(&mut self.write_buf, &message, self.capabilities)?;

        let serial = message.serial().get();
        let fds = take_message_fds(message);
        let raw_fds = fds.iter().map(AsRawFd::as_raw_fd).collect::<Vec<_>>();

        // From the first byte on the wire until the frame completes, the
        // stream is desynchronized if we stop.
        self.poisoned = true;

        let mut pos = 0;

        while pos < self.write_buf.len() {
            let stream = match &self.stream {
                Some(stream) => stream,
                None => return Err(Error::new(ErrorKind::Shutdown)),
            };

            let mut guard = stream.writable().await?;

            let attach = if pos == 0 { &raw_fds[..] } else { &[] };

            match guard.get_inner().send(&self.write_buf.get()[pos..], attach) {
                Ok(0) => {
                    return Err(Error::new(ErrorKind::Io(io::Error::from(
                        io::ErrorKind::WriteZero,
                    ))));
                }
                Ok(n) => pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                }
                Err(e) => return Err(Error::new(ErrorKind::Io(e))),
            }
        }

        self.poisoned = false;
        self.write_buf.clear();

        // The descriptors were consumed by the kernel with the first
        // chunk; dropping our handles completes the ownership transfer.
        drop(fds);

        trace!(serial, "sent message");
        Ok(())
    }

    /// Fill the read buffer up to `target` bytes.
    async fn read_exact(&mut self, target: usize) -> Result<()> {
        self.stream()?;

        while self.read_buf.len() < target {
            let stream = match &self.stream {
                Some(stream) => stream,
                None => return Err(Error::new(ErrorKind::Shutdown)),
            };

            let mut guard = stream.readable().await?;

            let start = self.read_buf.len();
            self.read_buf.resize(target, 0);

            let result = guard
                .get_inner()
                .recv(&mut self.read_buf[start..], &mut self.pending_fds);

            match result {
                Ok(0) => {
                    self.read_buf.truncate(start);
                    return Err(Error::new(ErrorKind::Io(io::Error::from(
                        io::ErrorKind::UnexpectedEof,
                    ))));
                }
                Ok(n) => self.read_buf.truncate(start + n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.read_buf.truncate(start);
                    guard.clear_ready();
                }
                Err(e) => {
                    self.read_buf.truncate(start);
                    return Err(Error::new(ErrorKind::Io(e)));
                }
            }
        }

        Ok(())
    }

    fn shutdown(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        let stream = stream.into_inner();

        if let Err(e) = stream.shutdown() {
            debug!("error shutting down socket: {e}");
        }
    }
}
