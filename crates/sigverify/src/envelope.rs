// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The detached-signature envelope: a DER sequence carrying the role tag,
//! digest algorithm, canonical file-list document, its signature, and the
//! signing certificate chain (leaf first). Built and parsed with the same
//! RustCrypto `der`/`x509-cert` types `cms::signed_data::SignedData` itself
//! is made of, rather than replaying every PKCS#7 `SignerInfo` attribute by
//! hand.

use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence};
use x509_cert::Certificate;

use crate::{Error, Role};

#[derive(Sequence)]
pub(crate) struct Envelope {
    role: OctetString,
    digest_algorithm: ObjectIdentifier,
    file_list: OctetString,
    signature: OctetString,
    certificates: Vec<Certificate>,
}

impl Envelope {
    pub(crate) fn new(
        role: Role,
        digest_algorithm: ObjectIdentifier,
        file_list: Vec<u8>,
        signature: Vec<u8>,
        certificates: Vec<Certificate>,
    ) -> Result<Self, Error> {
        Ok(Self {
            role: OctetString::new(vec![role.tag()]).map_err(Error::Der)?,
            digest_algorithm,
            file_list: OctetString::new(file_list).map_err(Error::Der)?,
            signature: OctetString::new(signature).map_err(Error::Der)?,
            certificates,
        })
    }

    pub(crate) fn to_der(&self) -> Result<Vec<u8>, Error> {
        self.to_vec().map_err(Error::Der)
    }

    pub(crate) fn from_der(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_der_inner(bytes).map_err(Error::Der)
    }

    fn from_der_inner(bytes: &[u8]) -> der::Result<Self> {
        <Self as Decode>::from_der(bytes)
    }

    pub(crate) fn role(&self) -> Result<Role, Error> {
        match self.role.as_bytes() {
            [tag] => Role::from_tag(*tag),
            _ => Err(Error::BadSignature("malformed role tag".into())),
        }
    }

    pub(crate) fn digest_algorithm(&self) -> ObjectIdentifier {
        self.digest_algorithm
    }

    pub(crate) fn file_list(&self) -> &[u8] {
        self.file_list.as_bytes()
    }

    pub(crate) fn signature(&self) -> &[u8] {
        self.signature.as_bytes()
    }

    pub(crate) fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }
}
