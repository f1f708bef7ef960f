//! D-Bus object paths.

use std::borrow::{Borrow, ToOwned};
use std::fmt;
use std::ops::Deref;
use std::str::from_utf8_unchecked;

use thiserror::Error;

use self::validation::validate;
mod validation;


/// An error raised when validating an object path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid object path")]
pub struct ObjectPathError;

/// A validated D-Bus object path, such as `/org/freedesktop/DBus`.
///
/// A path is `/`, or one or more `/`-prefixed elements of ASCII letters,
/// digits and underscores.
///
/// # Examples
///
/// ```
/// use tokio_minibus::ObjectPath;
///
/// const PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");
///
/// assert!(ObjectPath::new(b"/").is_ok());
/// assert!(ObjectPath::new(b"/a//b").is_err());
/// assert!(ObjectPath::new(b"").is_err());
/// ```
#[derive(PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectPath([u8]);

impl ObjectPath {
    /// The root path.
    pub const ROOT: &'static ObjectPath = ObjectPath::new_const(b"/");

    /// Construct a new validated object path.
    pub fn new(bytes: &[u8]) -> Result<&ObjectPath, ObjectPathError> {
        if !validate(bytes) {
            return Err(ObjectPathError);
        }

        // SAFETY: just validated.
        Ok(unsafe { ObjectPath::new_unchecked(bytes) })
    }

    /// Construct an object path from a constant, panicking at compile time
    /// if it is not valid.
    pub const fn new_const(bytes: &'static [u8]) -> &'static ObjectPath {
        if !validate(bytes) {
            panic!("invalid object path");
        }

        // SAFETY: just validated.
        unsafe { ObjectPath::new_unchecked(bytes) }
    }

    /// Construct an object path without validation.
    ///
    /// # Safety
    ///
    /// Caller must ensure the byte slice is a valid object path.
    pub(crate) const unsafe fn new_unchecked(bytes: &[u8]) -> &ObjectPath {
        // SAFETY: ObjectPath is repr(transparent) over [u8].
        &*(bytes as *const [u8] as *const ObjectPath)
    }

    /// The path as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The path as a string.
    pub fn as_str(&self) -> &str {
        // SAFETY: validated paths are ASCII.
        unsafe { from_utf8_unchecked(&self.0) }
    }
}

impl fmt::Debug for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectPath").field(&self.as_str()).finish()
    }
}

impl fmt::Display for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<ObjectPath> for ObjectPath {
    #[inline]
    fn as_ref(&self) -> &ObjectPath {
        self
    }
}

impl ToOwned for ObjectPath {
    type Owned = ObjectPathBuf;

    #[inline]
    fn to_owned(&self) -> ObjectPathBuf {
        ObjectPathBuf(self.0.to_vec())
    }
}

impl<'a> TryFrom<&'a str> for &'a ObjectPath {
    type Error = ObjectPathError;

    #[inline]
    fn try_from(s: &'a str) -> Result<Self, ObjectPathError> {
        ObjectPath::new(s.as_bytes())
    }
}

/// The owned variant of an [`ObjectPath`], which it dereferences to.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectPathBuf(Vec<u8>);

impl Deref for ObjectPathBuf {
    type Target = ObjectPath;

    #[inline]
    fn deref(&self) -> &ObjectPath {
        // SAFETY: construction ensures the path is valid.
        unsafe { ObjectPath::new_unchecked(&self.0) }
    }
}

impl fmt::Debug for ObjectPathBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectPathBuf").field(&self.as_str()).finish()
    }
}

impl fmt::Display for ObjectPathBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Borrow<ObjectPath> for ObjectPathBuf {
    #[inline]
    fn borrow(&self) -> &ObjectPath {
        self
    }
}

impl AsRef<ObjectPath> for ObjectPathBuf {
    #[inline]
    fn as_ref(&self) -> &ObjectPath {
        self
    }
}

impl From<&ObjectPath> for ObjectPathBuf {
    #[inline]
    fn from(path: &ObjectPath) -> Self {
        path.to_owned()
    }
}

impl TryFrom<&str> for ObjectPathBuf {
    type Error = ObjectPathError;

    #[inline]
    fn try_from(s: &str) -> Result<Self, ObjectPathError> {
        Ok(ObjectPath::new(s.as_bytes())?.to_owned())
    }
}

impl PartialEq<ObjectPath> for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &ObjectPath) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&ObjectPath> for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &&ObjectPath) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<ObjectPathBuf> for ObjectPath {
    #[inline]
    fn eq(&self, other: &ObjectPathBuf) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
