use std::collections::VecDeque;
use std::env;
use std::io;
use std::os::unix::net::UnixStream;

use tokio::io::unix::AsyncFd;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::protocol::Capabilities;
use crate::sasl::{self, Guid, Mechanism, MAX_LINE_LENGTH};
use crate::{Address, Transport};

use super::transport::{SocketTransport, Stream};

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// Candidate addresses for the session bus, from
/// `DBUS_SESSION_BUS_ADDRESS`.
pub fn session_addresses() -> Result<Vec<Address>> {
    let Some(value) = env::var_os(ENV_SESSION_BUS) else {
        return Err(Error::new(ErrorKind::InvalidAddress(format!(
            "{ENV_SESSION_BUS} is not set"
        ))));
    };

    let Some(value) = value.to_str() else {
        return Err(Error::new(ErrorKind::InvalidAddress(format!(
            "{ENV_SESSION_BUS} is not valid utf-8"
        ))));
    };

    Address::parse_list(value)
}

/// Candidate addresses for the system bus, from
/// `DBUS_SYSTEM_BUS_ADDRESS` with the well-known socket as fallback.
pub fn system_addresses() -> Result<Vec<Address>> {
    match env::var_os(ENV_SYSTEM_BUS) {
        Some(value) => {
            let Some(value) = value.to_str() else {
                return Err(Error::new(ErrorKind::InvalidAddress(format!(
                    "{ENV_SYSTEM_BUS} is not valid utf-8"
                ))));
            };

            Address::parse_list(value)
        }
        None => Address::parse_list(DEFAULT_SYSTEM_BUS),
    }
}

/// Try each candidate address in order and authenticate over the first
/// stream that connects.
///
/// `autolaunch` candidates expand in place: the launcher's output joins
/// the front of the queue. When every candidate fails the error of the
/// *first* failure is returned, since later candidates are usually
/// irrelevant fallbacks; the rest are logged at debug level.
pub async fn connect_authenticated(
    addresses: &[Address],
    requested: Capabilities,
    mechanisms: &[Mechanism],
) -> Result<(Guid, Transport)> {
    let mut queue = addresses.iter().cloned().collect::<VecDeque<_>>();
    let mut first_error = None::<Error>;

    let record = |address: &Address, error: Error, first_error: &mut Option<Error>| {
        if first_error.is_none() {
            *first_error = Some(error);
        } else {
            debug!(address = %address, error = %error, "discarding candidate failure");
        }
    };

    while let Some(address) = queue.pop_front() {
        if address.name() == "autolaunch" {
            match autolaunch().await {
                Ok(launched) => {
                    for address in launched.into_iter().rev() {
                        queue.push_front(address);
                    }
                }
                Err(error) => record(&address, error, &mut first_error),
            }

            continue;
        }

        let stream = match open_stream(&address).await {
            Ok(stream) => stream,
            Err(error) => {
                record(&address, error, &mut first_error);
                continue;
            }
        };

        match authenticate(stream, requested, mechanisms).await {
            Ok(ok) => return Ok(ok),
            Err(error) => record(&address, error, &mut first_error),
        }
    }

    Err(first_error.unwrap_or_else(|| {
        Error::new(ErrorKind::InvalidAddress("empty address list".into()))
    }))
}

/// Open a byte stream to a single address.
async fn open_stream(address: &Address) -> Result<Stream> {
    match address.name() {
        "unix" => open_unix(address).await,
        "tcp" => open_tcp(address).await,
        other => Err(Error::new(ErrorKind::UnknownTransport(other.into()))),
    }
}

async fn open_unix(address: &Address) -> Result<Stream> {
    let connect_error = |inner: io::Error| {
        Error::new(ErrorKind::Connect {
            address: address.to_string(),
            inner,
        })
    };

    match (
        address.get("path"),
        address.get("abstract"),
        address.get("tmpdir"),
    ) {
        (Some(path), None, None) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(connect_error)?;

            Ok(Stream::Unix(stream.into_std().map_err(connect_error)?))
        }
        (None, Some(name), None) => {
            let stream = connect_abstract(name).map_err(connect_error)?;
            Ok(Stream::Unix(stream))
        }
        (None, None, Some(..)) => Err(Error::new(ErrorKind::InvalidAddress(
            "`tmpdir` is only valid in listening addresses".into(),
        ))),
        _ => Err(Error::new(ErrorKind::InvalidAddress(
            "unix address requires exactly one of `path`, `abstract`, `tmpdir`".into(),
        ))),
    }
}

/// Connect to a socket in the abstract namespace.
#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    use nix::sys::socket::{
        connect, socket, AddressFamily, SockFlag, SockType, UnixAddr,
    };
    use std::os::fd::AsRawFd;

    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(io::Error::from)?;

    let addr = UnixAddr::new_abstract(name.as_bytes()).map_err(io::Error::from)?;
    connect(fd.as_raw_fd(), &addr).map_err(io::Error::from)?;

    Ok(UnixStream::from(fd))
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_: &str) -> io::Result<UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract sockets are linux-only",
    ))
}

async fn open_tcp(address: &Address) -> Result<Stream> {
    let invalid = |why: &str| Error::new(ErrorKind::InvalidAddress(format!("`{address}`: {why}")));

    let Some(host) = address.get("host") else {
        return Err(invalid("tcp address requires `host`"));
    };

    let Some(port) = address.get("port") else {
        return Err(invalid("tcp address requires `port`"));
    };

    let Ok(port) = port.parse::<u16>() else {
        return Err(invalid("`port` is not a number"));
    };

    let family = match address.get("family") {
        None => None,
        Some("ipv4") => Some(false),
        Some("ipv6") => Some(true),
        Some(..) => return Err(invalid("`family` must be `ipv4` or `ipv6`")),
    };

    let connect_error = |inner: io::Error| {
        Error::new(ErrorKind::Connect {
            address: address.to_string(),
            inner,
        })
    };

    let resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(connect_error)?;

    let mut last = None::<io::Error>;

    for addr in resolved {
        if let Some(want_v6) = family {
            if addr.is_ipv6() != want_v6 {
                continue;
            }
        }

        match tokio::net::TcpStream::connect(addr).await {
            Ok(stream) => {
                let stream = stream.into_std().map_err(connect_error)?;
                return Ok(Stream::Tcp(stream));
            }
            Err(e) => last = Some(e),
        }
    }

    Err(connect_error(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no usable address")
    })))
}

/// Spawn the platform launcher and parse its output as a fresh address
/// list.
async fn autolaunch() -> Result<Vec<Address>> {
    let launcher = |why: String| Error::new(ErrorKind::Launcher(why));

    let uuid = machine_uuid()
        .await
        .map_err(|e| launcher(format!("cannot read machine uuid: {e}")))?;

    let output = tokio::process::Command::new("dbus-launch")
        .arg("--autolaunch")
        .arg(uuid)
        .arg("--binary-syntax")
        .output()
        .await
        .map_err(|e| launcher(format!("cannot spawn dbus-launch: {e}")))?;

    if !output.status.success() {
        return Err(launcher(format!("dbus-launch exited with {}", output.status)));
    }

    // With --binary-syntax the address is nul terminated and followed by
    // binary pid and window id fields; older launchers emit a plain
    // newline-terminated line. Cut at whichever terminator comes first.
    let stdout = &output.stdout;

    let end = stdout
        .iter()
        .position(|&b| b == 0)
        .or_else(|| stdout.iter().position(|&b| b == b'\n'))
        .unwrap_or(stdout.len());

    let Ok(line) = std::str::from_utf8(&stdout[..end]) else {
        return Err(launcher("launcher output is not valid utf-8".into()));
    };

    Address::parse_list(line.trim())
        .map_err(|e| launcher(format!("cannot parse launcher output: {e}")))
}

async fn machine_uuid() -> io::Result<String> {
    let raw = match tokio::fs::read_to_string("/var/lib/dbus/machine-id").await {
        Ok(raw) => raw,
        Err(..) => tokio::fs::read_to_string("/etc/machine-id").await?,
    };

    Ok(raw.trim().to_owned())
}

/// Run the handshake over a fresh stream and wrap it into a transport.
async fn authenticate(
    stream: Stream,
    requested: Capabilities,
    mechanisms: &[Mechanism],
) -> Result<(Guid, Transport)> {
    // Descriptor passing is only negotiable over unix sockets; the
    // request is silently dropped elsewhere.
    let requested = if stream.is_unix() {
        requested
    } else {
        Capabilities::NONE
    };

    stream.set_nonblocking()?;
    let stream = AsyncFd::new(stream)?;

    let uid = nix::unistd::Uid::current().as_raw();
    let mut client = sasl::Client::new(mechanisms, requested, uid);

    let mut out = Vec::new();
    client.initial(&mut out);
    write_all(&stream, &out).await?;

    let mut buf = Vec::new();

    let authenticated = loop {
        let line_end = read_line(&stream, &mut buf).await?;

        out.clear();
        let result = client.advance(&buf[..line_end], &mut out)?;
        buf.drain(..line_end + 1);

        write_all(&stream, &out).await?;

        if let Some(authenticated) = result {
            break authenticated;
        }
    };

    let capabilities = authenticated.capabilities;

    // Bytes past the final handshake line already belong to the message
    // stream.
    let transport = SocketTransport::new(stream, capabilities, buf);

    Ok((authenticated.guid, Transport::socket(transport)))
}

/// Read until a full `\n`-terminated line is buffered, returning the
/// index of the newline.
async fn read_line(stream: &AsyncFd<Stream>, buf: &mut Vec<u8>) -> Result<usize> {
    loop {
        if let Some(n) = buf.iter().position(|&b| b == b'\n') {
            return Ok(n);
        }

        if buf.len() > MAX_LINE_LENGTH {
            return Err(Error::auth("server line exceeds the line length limit"));
        }

        let mut guard = stream.readable().await?;

        let start = buf.len();
        buf.resize(start + 256, 0);

        let mut fds = Vec::new();
        let result = guard.get_inner().recv(&mut buf[start..], &mut fds);

        // Nothing may pass descriptors before authentication completes.
        if !fds.is_empty() {
            buf.truncate(start);
            return Err(Error::auth("descriptors received during handshake"));
        }

        match result {
            Ok(0) => {
                buf.truncate(start);
                return Err(Error::auth("connection closed during handshake"));
            }
            Ok(n) => buf.truncate(start + n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                buf.truncate(start);
                guard.clear_ready();
            }
            Err(e) => {
                buf.truncate(start);
                return Err(Error::new(ErrorKind::Io(e)));
            }
        }
    }
}

async fn write_all(stream: &AsyncFd<Stream>, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        let mut guard = stream.writable().await?;

        match guard.get_inner().send(bytes, &[]) {
            Ok(0) => return Err(Error::auth("wrote zero bytes during handshake")),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                guard.clear_ready();
            }
            Err(e) => return Err(Error::new(ErrorKind::Io(e))),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_requires_host_and_numeric_port() {
        let address = Address::parse("tcp:host=localhost").unwrap();
        let err = open_tcp(&address).await.unwrap_err();
        assert!(err.to_string().contains("requires `port`"));

        let address = Address::parse("tcp:host=localhost,port=nope").unwrap();
        let err = open_tcp(&address).await.unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[tokio::test]
    async fn unix_tmpdir_cannot_connect() {
        let address = Address::parse("unix:tmpdir=/tmp").unwrap();
        let err = open_unix(&address).await.unwrap_err();
        assert!(err.to_string().contains("listening"));
    }

    #[tokio::test]
    async fn unix_requires_exactly_one_key() {
        let address = Address::parse("unix:path=/a,abstract=b").unwrap();
        assert!(open_unix(&address).await.is_err());

        let address = Address::parse("unix:").unwrap();
        assert!(open_unix(&address).await.is_err());
    }

    #[tokio::test]
    async fn unknown_transport_is_rejected() {
        let address = Address::parse("launchd:env=DBUS_LAUNCHD_SESSION_BUS_SOCKET").unwrap();
        let err = open_stream(&address).await.unwrap_err();
        assert!(err.to_string().contains("unsupported transport"));
    }
}
