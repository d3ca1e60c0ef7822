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

use crate::crypto::PublicKey;
use std::fmt::{Display, Formatter};

/// Identity of a remote node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity {
    /// Node public key.
    pub public_key: PublicKey,
    /// Node host, empty when unknown.
    pub host: String,
}

impl NodeIdentity {
    pub fn new(public_key: PublicKey, host: &str) -> Self {
        NodeIdentity {
            public_key,
            host: host.to_owned(),
        }
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.public_key, self.host)
    }
}

/// Returns true if `host` belongs to one of the `local_networks` prefixes.
pub fn is_local_host(host: &str, local_networks: &[String]) -> bool {
    !host.is_empty()
        && local_networks
            .iter()
            .any(|network| !network.is_empty() && host.starts_with(network.as_str()))
}
