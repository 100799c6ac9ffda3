// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use der::asn1::ObjectIdentifier;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Digest algorithm for the canonical file-list document. `sha256` is the
/// default per spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

// NIST hash OIDs under the `nistAlgorithms` arc, as used throughout PKCS#7/CMS.
const OID_SHA224: &str = "2.16.840.1.101.3.4.2.4";
const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";
const OID_SHA384: &str = "2.16.840.1.101.3.4.2.2";
const OID_SHA512: &str = "2.16.840.1.101.3.4.2.3";

impl Algorithm {
    pub fn oid(self) -> ObjectIdentifier {
        let dotted = match self {
            Algorithm::Sha224 => OID_SHA224,
            Algorithm::Sha256 => OID_SHA256,
            Algorithm::Sha384 => OID_SHA384,
            Algorithm::Sha512 => OID_SHA512,
        };
        ObjectIdentifier::new_unwrap(dotted)
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        match oid.to_string().as_str() {
            OID_SHA224 => Some(Algorithm::Sha224),
            OID_SHA256 => Some(Algorithm::Sha256),
            OID_SHA384 => Some(Algorithm::Sha384),
            OID_SHA512 => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    pub fn digest_hex(self, bytes: &[u8]) -> String {
        match self {
            Algorithm::Sha224 => hex::encode(Sha224::digest(bytes)),
            Algorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}
