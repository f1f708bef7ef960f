//! An asynchronous D-Bus client transport and message codec.
//!
//! This crate implements the client side of the D-Bus wire protocol:
//! address parsing with candidate fallback, the SASL-style authentication
//! handshake with guid and capability negotiation, and an
//! alignment-correct binary codec for typed messages, including unix file
//! descriptor passing over `SCM_RIGHTS`.
//!
//! Higher-level concerns such as reply dispatch, signal routing and
//! proxies are left to the layer above; this crate hands it an
//! authenticated [`Transport`] with `recv`/`send` semantics and nothing
//! else.
//!
//! # Examples
//!
//! ```
//! use std::num::NonZeroU32;
//!
//! use tokio_minibus::{loopback, Message, ObjectPath, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tokio_minibus::Result<()> {
//! let mut t = loopback();
//!
//! let serial = NonZeroU32::new(1).unwrap();
//!
//! let m = Message::method_call(ObjectPath::new_const(b"/org/example/Obj"), "Echo", serial)
//!     .with_arg(42i32);
//!
//! t.send(m).await?;
//!
//! let echoed = t.recv().await?;
//! assert_eq!(echoed.body(), &[Value::Int32(42)]);
//! # Ok(()) }
//! ```

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

#[doc(inline)]
pub use self::protocol::{Capabilities, Flags};
mod protocol;

#[doc(inline)]
pub use self::signature::{OwnedSignature, Signature, SignatureError};
mod signature;

#[doc(inline)]
pub use self::object_path::{ObjectPath, ObjectPathBuf, ObjectPathError};
mod object_path;

mod names;

#[doc(inline)]
pub use self::value::{signature_of, Value};
mod value;

mod wire;

#[doc(inline)]
pub use self::message::{decode_message, encode_message, Message, MessageKind};
mod message;

#[doc(inline)]
pub use self::address::Address;
mod address;

#[doc(inline)]
pub use self::sasl::{Guid, Mechanism};
mod sasl;

#[doc(inline)]
pub use self::connection::{
    connect_authenticated, loopback, session_addresses, system_addresses, Transport,
};
mod connection;
