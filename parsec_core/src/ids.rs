//! Identifiers: block ids, vlob ids, user ids and trust seeds.

use data_encoding::BASE32_NOPAD;
use minicbor::{Decode, Decoder, Encode, Encoder, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! cbor_as_str {
    ($name:ident) => {
        impl<C> Encode<C> for $name {
            fn encode<W: encode::Write>(
                &self,
                e: &mut Encoder<W>,
                _ctx: &mut C,
            ) -> Result<(), encode::Error<W::Error>> {
                e.str(&self.0)?;
                Ok(())
            }
        }

        impl<'b, C> Decode<'b, C> for $name {
            fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
                Ok(Self(d.str()?.to_string()))
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        cbor_as_str!($name);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Backend id of an opaque ciphertext block.
    BlockId
);
string_id!(
    /// Backend id of a versioned blob.
    VlobId
);
string_id!(
    /// Identity of the user owning a session.
    UserId
);

impl BlockId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl VlobId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Capability string gating access to a vlob.
///
/// Seeds are carried on the wire and inside encrypted manifests only. They
/// do not implement `Display` and their `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustSeed(String);

cbor_as_str!(TrustSeed);

impl TrustSeed {
    /// Minimum accepted length in characters.
    pub const MIN_LEN: usize = 12;

    /// Generates a fresh seed: 15 random bytes, base32 encoded (24 chars).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 15];
        rand::rng().fill(&mut bytes[..]);
        Self(BASE32_NOPAD.encode(&bytes))
    }

    pub fn new(seed: impl Into<String>) -> Self {
        Self(seed.into())
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.chars().count() >= Self::MIN_LEN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TrustSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrustSeed(***)")
    }
}
