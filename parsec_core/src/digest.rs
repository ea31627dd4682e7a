//! Block digest type (SHA-512, 64 bytes).

use minicbor::{Decode, Decoder, Encode, Encoder, decode, encode};
use sha2::{Digest, Sha512};
use std::{borrow::Borrow, fmt};

/// Plaintext digest carried in every block access.
#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct BlockDigest([u8; 64]);

impl<C> Encode<C> for BlockDigest {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.bytes(&self.0)?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for BlockDigest {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
        let bytes: [u8; 64] = d
            .bytes()?
            .try_into()
            .map_err(|_| decode::Error::message("block digest must be 64 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockDigest").field(&self.fmt_short()).finish()
    }
}

impl BlockDigest {
    /// The size of the digest in bytes.
    pub const SIZE: usize = 64;

    /// Calculate the digest of the provided bytes.
    pub fn new(buf: impl AsRef<[u8]>) -> Self {
        let mut out = [0u8; 64];
        out.copy_from_slice(&Sha512::digest(buf.as_ref()));
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }

    /// Hex of the first 5 bytes, for log lines.
    pub fn fmt_short(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0[..5])
    }
}

impl AsRef<[u8]> for BlockDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for BlockDigest {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 64]> for BlockDigest {
    fn from(value: [u8; 64]) -> Self {
        Self(value)
    }
}
