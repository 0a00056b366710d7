//! Content addressing for graph nodes.
//!
//! Every object in the graph is identified by a 32-byte digest of its
//! defining attributes. Structural equality therefore implies identical
//! identity, which is what gives the object graph its deduplication
//! behavior: building the same node twice yields the same handle.
//!
//! The hash function is abstracted behind the [`HashProtocol`] trait so a
//! repository can pick its protocol once and keep every identity value
//! tagged with it at the type level. [`Blake3`] is the default protocol;
//! [`Blake2b`] is provided as an alternative.
//!
//! Two value types are built on top of a protocol:
//!
//! * [`Digest<H>`]: a bare 32-byte identity. Used for opaque references
//!   into an external content store, where this crate neither knows nor
//!   cares what the bytes address.
//! * [`Handle<H, N>`]: a digest that is additionally typed by the node
//!   kind `N` it refers to, so a snapshot handle cannot be passed where a
//!   file handle is expected.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{self, Debug};
use std::hash::Hasher;
use std::marker::PhantomData;

use digest::typenum::U32;
use hex::{FromHex, FromHexError};

pub const DIGEST_LEN: usize = 32;
pub type RawDigest = [u8; DIGEST_LEN];

/// A hash function usable for content addressing.
///
/// The associated name is the prefix used when rendering digests as
/// strings, e.g. `"blake3:AB12…"`.
pub trait HashProtocol: digest::Digest<OutputSize = U32> + 'static {
    const NAME: &'static str;
}

use blake2::Blake2b as Blake2bUnsized;
pub type Blake2b = Blake2bUnsized<U32>;

pub use blake3::Hasher as Blake3;

impl HashProtocol for Blake2b {
    const NAME: &'static str = "blake2";
}

impl HashProtocol for Blake3 {
    const NAME: &'static str = "blake3";
}

/// A 32-byte identity value produced by the hash protocol `H`.
#[repr(transparent)]
pub struct Digest<H> {
    pub bytes: RawDigest,
    _protocol: PhantomData<H>,
}

impl<H: HashProtocol> Digest<H> {
    pub fn new(bytes: RawDigest) -> Self {
        Self {
            bytes,
            _protocol: PhantomData,
        }
    }

    /// Digest an opaque byte sequence.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::new(H::digest(bytes).into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, DigestParseError> {
        let protocol = H::NAME;
        if !(hex.starts_with(protocol) && hex[protocol.len()..].starts_with(':')) {
            return Err(DigestParseError::BadProtocol);
        }
        let bytes = RawDigest::from_hex(&hex[protocol.len() + 1..])?;
        Ok(Self::new(bytes))
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::new();
        out.push_str(H::NAME);
        out.push(':');
        out.push_str(&hex::encode_upper(self.bytes));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DigestParseError {
    BadProtocol,
    BadHex(FromHexError),
}

impl fmt::Display for DigestParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadProtocol => write!(f, "digest string carries the wrong protocol prefix"),
            Self::BadHex(e) => write!(f, "digest string is not valid hex: {e}"),
        }
    }
}

impl Error for DigestParseError {}

impl From<FromHexError> for DigestParseError {
    fn from(value: FromHexError) -> Self {
        DigestParseError::BadHex(value)
    }
}

// The manual impls below sidestep the derive bounds on the phantom
// protocol and kind parameters, which are never part of the value.

impl<H> Copy for Digest<H> {}

impl<H> Clone for Digest<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> PartialEq for Digest<H> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<H> Eq for Digest<H> {}

impl<H> std::hash::Hash for Digest<H> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.bytes.hash(state);
    }
}

impl<H> Ord for Digest<H> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<H> PartialOrd for Digest<H> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<H> Borrow<RawDigest> for Digest<H> {
    fn borrow(&self) -> &RawDigest {
        &self.bytes
    }
}

impl<H: HashProtocol> Debug for Digest<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// A digest typed by the node kind it addresses.
#[repr(transparent)]
pub struct Handle<H, N> {
    raw: RawDigest,
    _kind: PhantomData<(H, N)>,
}

impl<H: HashProtocol, N> Handle<H, N> {
    pub(crate) fn new(raw: RawDigest) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    pub fn raw(&self) -> &RawDigest {
        &self.raw
    }

    pub fn digest(&self) -> Digest<H> {
        Digest::new(self.raw)
    }
}

impl<H: HashProtocol, N> From<Handle<H, N>> for Digest<H> {
    fn from(value: Handle<H, N>) -> Self {
        Digest::new(value.raw)
    }
}

impl<H, N> Copy for Handle<H, N> {}

impl<H, N> Clone for Handle<H, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H, N> PartialEq for Handle<H, N> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<H, N> Eq for Handle<H, N> {}

impl<H, N> std::hash::Hash for Handle<H, N> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.raw.hash(state);
    }
}

impl<H, N> Ord for Handle<H, N> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<H, N> PartialOrd for Handle<H, N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<H, N> Borrow<RawDigest> for Handle<H, N> {
    fn borrow(&self) -> &RawDigest {
        &self.raw
    }
}

impl<H, N> Debug for Handle<H, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handle<{}>({})",
            std::any::type_name::<N>(),
            hex::encode_upper(self.raw)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let digest: Digest<Blake3> = Digest::new(rand::random());
        let rendered = digest.to_hex();
        let parsed = Digest::from_hex(&rendered).expect("roundtrip should succeed");
        assert_eq!(digest, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_protocol() {
        let rendered = Digest::<Blake2b>::of_bytes(b"some bytes").to_hex();
        let err = Digest::<Blake3>::from_hex(&rendered).expect_err("protocol mismatch should fail");
        assert_eq!(err, DigestParseError::BadProtocol);
    }

    #[test]
    fn from_hex_rejects_bad_hex() {
        let err = Digest::<Blake3>::from_hex("blake3:NOT!").expect_err("bad hex should fail");
        assert!(matches!(err, DigestParseError::BadHex(..)));
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(
            Digest::<Blake3>::of_bytes(b"content"),
            Digest::<Blake3>::of_bytes(b"content")
        );
        assert_ne!(
            Digest::<Blake3>::of_bytes(b"content"),
            Digest::<Blake3>::of_bytes(b"other content")
        );
    }

    #[test]
    fn protocols_disagree() {
        assert_ne!(
            Digest::<Blake3>::of_bytes(b"content").bytes,
            Digest::<Blake2b>::of_bytes(b"content").bytes
        );
    }
}
