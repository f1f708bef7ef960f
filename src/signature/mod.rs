//! D-Bus type signatures.

use std::borrow::{Borrow, ToOwned};
use std::fmt;
use std::ops::Deref;
use std::str::from_utf8_unchecked;

use crate::protocol::types;

pub use self::error::SignatureError;
mod error;

pub(crate) use self::iter::{Iter, TypeView};
mod iter;

use self::validation::validate;
mod validation;


/// Maximum length of a signature in bytes.
pub(crate) const MAX_SIGNATURE_LENGTH: usize = 255;

/// Maximum nesting depth per container kind.
pub(crate) const MAX_CONTAINER_DEPTH: usize = 32;

/// A D-Bus signature: a validated sequence of single complete types.
///
/// # Examples
///
/// ```
/// use tokio_minibus::Signature;
///
/// const SIG: &Signature = Signature::new_const(b"a{sv}");
///
/// assert!(Signature::new(b"(ii)as").is_ok());
/// assert!(Signature::new(b"a").is_err());
/// ```
#[derive(PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Signature([u8]);

impl Signature {
    /// The empty signature.
    pub const EMPTY: &'static Signature = Signature::new_const(b"");

    /// Construct a new validated signature.
    pub fn new(bytes: &[u8]) -> Result<&Signature, SignatureError> {
        validate(bytes)?;
        // SAFETY: just validated.
        Ok(unsafe { Signature::new_unchecked(bytes) })
    }

    /// Construct a signature from a constant, panicking at compile time if
    /// it is not valid.
    pub const fn new_const(bytes: &'static [u8]) -> &'static Signature {
        if validate(bytes).is_err() {
            panic!("invalid signature");
        }

        // SAFETY: just validated.
        unsafe { Signature::new_unchecked(bytes) }
    }

    /// Construct a signature without validation.
    ///
    /// # Safety
    ///
    /// Caller must ensure the byte slice is a valid signature.
    pub(crate) const unsafe fn new_unchecked(bytes: &[u8]) -> &Signature {
        // SAFETY: Signature is repr(transparent) over [u8].
        &*(bytes as *const [u8] as *const Signature)
    }

    /// The signature as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The signature as a string.
    pub fn as_str(&self) -> &str {
        // SAFETY: validated signatures are ASCII.
        unsafe { from_utf8_unchecked(&self.0) }
    }

    /// The length of the signature in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Test if the signature is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the single complete types of this signature.
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter::new(self)
    }

    /// Test if values of this signature can transitively carry a unix file
    /// descriptor.
    ///
    /// A variant counts, since its content type is only known per value.
    pub fn contains_fds(&self) -> bool {
        self.0
            .iter()
            .any(|&b| b == types::UNIX_FD || b == types::VARIANT)
    }

    /// Natural alignment of the first complete type of this signature.
    pub(crate) fn alignment(&self) -> usize {
        match self.0.first() {
            Some(&types::BYTE) | Some(&types::SIGNATURE) | Some(&types::VARIANT) => 1,
            Some(&types::INT16) | Some(&types::UINT16) => 2,
            Some(&types::INT64) | Some(&types::UINT64) | Some(&types::DOUBLE) => 8,
            Some(&types::OPEN_PAREN) | Some(&types::OPEN_BRACE) => 8,
            // boolean, u32-sized numbers, fd index, length-prefixed strings
            // and arrays all start on a 4-byte boundary.
            Some(..) => 4,
            None => 1,
        }
    }
}

impl fmt::Debug for Signature {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.as_str()).finish()
    }
}

impl AsRef<Signature> for Signature {
    #[inline]
    fn as_ref(&self) -> &Signature {
        self
    }
}

impl ToOwned for Signature {
    type Owned = OwnedSignature;

    #[inline]
    fn to_owned(&self) -> OwnedSignature {
        // SAFETY: self is already validated.
        unsafe { OwnedSignature::from_vec(self.0.to_vec()) }
    }
}

impl<'a> TryFrom<&'a str> for &'a Signature {
    type Error = SignatureError;

    #[inline]
    fn try_from(s: &'a str) -> Result<Self, SignatureError> {
        Signature::new(s.as_bytes())
    }
}

/// The owned variant of a [`Signature`], which it dereferences to.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OwnedSignature(Vec<u8>);

impl OwnedSignature {
    /// Construct a new empty signature.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio_minibus::OwnedSignature;
    ///
    /// let sig = OwnedSignature::new();
    /// assert!(sig.is_empty());
    /// ```
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Construct directly from a vector.
    ///
    /// # Safety
    ///
    /// Caller must ensure that the vector holds a valid signature.
    pub(crate) unsafe fn from_vec(signature: Vec<u8>) -> Self {
        Self(signature)
    }

    /// Push a single type code onto the signature.
    pub(crate) fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    /// Extend this signature with another.
    pub(crate) fn extend_from_signature<S>(&mut self, other: S)
    where
        S: AsRef<Signature>,
    {
        self.0.extend_from_slice(other.as_ref().as_bytes());
    }
}

impl Default for OwnedSignature {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OwnedSignature {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedSignature")
            .field(&self.as_str())
            .finish()
    }
}

impl Deref for OwnedSignature {
    type Target = Signature;

    #[inline]
    fn deref(&self) -> &Signature {
        // SAFETY: construction ensures the signature is valid.
        unsafe { Signature::new_unchecked(&self.0) }
    }
}

impl Borrow<Signature> for OwnedSignature {
    #[inline]
    fn borrow(&self) -> &Signature {
        self
    }
}

impl AsRef<Signature> for OwnedSignature {
    #[inline]
    fn as_ref(&self) -> &Signature {
        self
    }
}

impl From<&Signature> for OwnedSignature {
    #[inline]
    fn from(signature: &Signature) -> Self {
        signature.to_owned()
    }
}

impl TryFrom<&str> for OwnedSignature {
    type Error = SignatureError;

    #[inline]
    fn try_from(s: &str) -> Result<Self, SignatureError> {
        Ok(Signature::new(s.as_bytes())?.to_owned())
    }
}

impl PartialEq<Signature> for OwnedSignature {
    #[inline]
    fn eq(&self, other: &Signature) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&Signature> for OwnedSignature {
    #[inline]
    fn eq(&self, other: &&Signature) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<OwnedSignature> for Signature {
    #[inline]
    fn eq(&self, other: &OwnedSignature) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<OwnedSignature> for &Signature {
    #[inline]
    fn eq(&self, other: &OwnedSignature) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}
