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

//! Cryptographic primitives consumed by the ingestion core.
//!
//! Signature verification is not performed here: validators receive the raw
//! signer keys and signatures and are injected by the node.

pub mod hash;

pub use hash::{Hash, Hashable, ShortHash, ShortHashPair};

use std::fmt::{Debug, Formatter};

/// Public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Opaque signer public key.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Creates a key from a hex string.
    /// Mostly used for testing.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let buf = hex::decode(hex).ok()?;
        let bytes: [u8; PUBLIC_KEY_LEN] = buf.try_into().ok()?;
        Some(PublicKey(bytes))
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
