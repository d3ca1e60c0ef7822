// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Entity content hash and its truncated form used for peer reconciliation.
//!
//! Content hashes are SHA-256 digests serialized using the
//! [Multihash](https://multiformats.io/multihash) format, so that the wire
//! representation carries the algorithm tag and the digest length.
//!
//! A [ShortHash] is the first four bytes of the digest. It is cheap to ship
//! around when two nodes compare the content of their pending caches, but it
//! is never used as the identity of an entity.

use crate::{base::serialize, Error, ErrorKind, Result};
use ring::digest;
use serde::{de::Visitor, Deserializer, Serializer};
use std::fmt::{Debug, Display, Formatter};

/// Multihash SHA-256 type tag.
const MULTIHASH_TYPE_SHA256: u8 = 0x12;

/// SHA-256 digest length.
const SHA256_LEN: usize = 32;

/// Serialized multihash length: type tag, digest length and digest bytes.
const MULTIHASH_BYTES_LEN: usize = 2 + SHA256_LEN;

/// Short hash length in bytes.
pub const SHORT_HASH_LEN: usize = 4;

/// Entity content hash.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Hash([u8; SHA256_LEN]);

impl Hash {
    /// Wraps a precomputed SHA-256 digest.
    pub const fn new(digest: [u8; SHA256_LEN]) -> Self {
        Hash(digest)
    }

    /// Computes the digest of arbitrary data.
    pub fn from_data(data: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, data);
        let mut bytes = [0; SHA256_LEN];
        bytes.copy_from_slice(digest.as_ref());
        Hash(bytes)
    }

    /// Construct from a serialized multihash.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MULTIHASH_BYTES_LEN
            || bytes[0] != MULTIHASH_TYPE_SHA256
            || bytes[1] as usize != SHA256_LEN
        {
            return Err(Error::new(ErrorKind::MalformedData));
        }
        let mut digest = [0; SHA256_LEN];
        digest.copy_from_slice(&bytes[2..]);
        Ok(Hash(digest))
    }

    /// Creates a new instance from a hex encoded multihash.
    /// Mostly used for testing.
    pub fn from_hex(hex: &str) -> Result<Self> {
        match hex::decode(hex) {
            Ok(buf) => Self::from_bytes(&buf),
            Err(_) => Err(Error::new(ErrorKind::MalformedData)),
        }
    }

    /// Returns the hash serialized as a multihash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MULTIHASH_BYTES_LEN);
        buf.push(MULTIHASH_TYPE_SHA256);
        buf.push(SHA256_LEN as u8);
        buf.extend_from_slice(&self.0);
        buf
    }

    /// Raw digest bytes.
    pub fn hash_value(&self) -> &[u8] {
        &self.0
    }

    /// Digest truncated to its first bytes.
    pub fn short_hash(&self) -> ShortHash {
        let mut bytes = [0; SHORT_HASH_LEN];
        bytes.copy_from_slice(&self.0[..SHORT_HASH_LEN]);
        ShortHash(u32::from_le_bytes(bytes))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl serde::Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HashVisitor;

        impl<'v> Visitor<'v> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
                write!(fmt, "expecting byte array.")
            }

            fn visit_bytes<E>(self, bytes: &[u8]) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Hash::from_bytes(bytes)
                    .map_err(|_err| serde::de::Error::custom("Invalid multihash"))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_bytes(&v)
            }
        }
        deserializer.deserialize_byte_buf(HashVisitor)
    }
}

/// First bytes of an entity hash, used for cheap set reconciliation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct ShortHash(pub u32);

impl Debug for ShortHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShortHash({:08x})", self.0)
    }
}

/// Short hashes of a partial transaction and of its cosignatures set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ShortHashPair {
    /// Transaction short hash.
    pub transaction: ShortHash,
    /// Cosignatures short hash.
    pub cosignatures: ShortHash,
}

/// A trait for types that can be hashed.
pub trait Hashable {
    /// Content hash.
    fn primary_hash(&self) -> Hash;
}

/// Blanket implementation for all types that can be serialized using
/// MessagePack.
impl<T: serde::Serialize> Hashable for T {
    fn primary_hash(&self) -> Hash {
        // Serialization of in-memory core structs never fails.
        let buf = serialize::rmp_serialize(self).unwrap_or_default();
        Hash::from_data(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::serialize::{rmp_deserialize, rmp_serialize};

    const HASH_HEX: &str = "1220879ecb0adedfa6a8aa19d972d225c3ce74d95619fda302ab4090fcff2ab45e6f";
    const HASH_PACKED_HEX: &str =
        "c4221220879ecb0adedfa6a8aa19d972d225c3ce74d95619fda302ab4090fcff2ab45e6f";

    #[test]
    fn hash_serialize() {
        let hash = Hash::from_hex(HASH_HEX).unwrap();

        let buf = rmp_serialize(&hash).unwrap();

        assert_eq!(hex::encode(&buf), HASH_PACKED_HEX);
    }

    #[test]
    fn hash_deserialize() {
        let expected = Hash::from_hex(HASH_HEX).unwrap();
        let buf = hex::decode(HASH_PACKED_HEX).unwrap();

        let hash: Hash = rmp_deserialize(&buf).unwrap();

        assert_eq!(hash, expected);
    }

    #[test]
    fn malformed_multihash() {
        let err = Hash::from_hex("1210879ecb0a").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn short_hash_takes_first_bytes() {
        let hash = Hash::from_hex(HASH_HEX).unwrap();

        let short_hash = hash.short_hash();

        assert_eq!(short_hash, ShortHash(u32::from_le_bytes([0x87, 0x9e, 0xcb, 0x0a])));
    }

    #[test]
    fn same_content_same_hash() {
        let hash1 = (1u32, "foo").primary_hash();
        let hash2 = (1u32, "foo").primary_hash();
        let hash3 = (2u32, "foo").primary_hash();

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
    }
}
