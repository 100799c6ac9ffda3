// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Detached PKCS#7-style signature verification over a file tree.
//!
//! Grounded on the teacher's `crates/stone::write::digest` hash-while-writing
//! pattern (here, digesting happens per-file rather than stream-wide, since
//! the signed content is a file list rather than a single archive) and the
//! RustCrypto `cms`/`x509-cert`/`der` family for the envelope and chain.

mod algorithm;
mod chain;
mod envelope;
mod filelist;

use std::io;

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::RsaPrivateKey;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer, Verifier};
use thiserror::Error as ThisError;
use x509_cert::Certificate;

pub use algorithm::Algorithm;
use envelope::Envelope;

/// Source of file bytes for a tree built out-of-band (by the orchestrator,
/// from the client's declared file list). Decouples this crate from any
/// particular storage backend.
pub trait FileSource {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Author,
    Distributor,
}

impl Role {
    fn tag(self) -> u8 {
        match self {
            Role::Author => 0,
            Role::Distributor => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0 => Ok(Role::Author),
            1 => Ok(Role::Distributor),
            other => Err(Error::BadSignature(format!("unknown role tag {other}"))),
        }
    }
}

/// Derived from the signing certificate's subject on a successful [`check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedDomain {
    pub role: Role,
    pub subject: String,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("i/o error reading {0}: {1}")]
    Io(String, #[source] io::Error),

    #[error("der encoding error: {0}")]
    Der(der::Error),

    #[error("rsa error: {0}")]
    Rsa(rsa::Error),

    #[error("bad signature: {0}")]
    BadSignature(String),
}

fn sign_document(algorithm: Algorithm, key: &RsaPrivateKey, document: &[u8]) -> Result<Vec<u8>, Error> {
    let signature: Signature = match algorithm {
        Algorithm::Sha224 => SigningKey::<Sha224>::new(key.clone()).sign(document),
        Algorithm::Sha256 => SigningKey::<Sha256>::new(key.clone()).sign(document),
        Algorithm::Sha384 => SigningKey::<Sha384>::new(key.clone()).sign(document),
        Algorithm::Sha512 => SigningKey::<Sha512>::new(key.clone()).sign(document),
    };
    Ok(signature.to_vec())
}

fn verify_document(algorithm: Algorithm, cert: &Certificate, document: &[u8], signature: &[u8]) -> Result<(), Error> {
    use rsa::pkcs8::DecodePublicKey;
    use der::Encode;

    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(Error::Der)?;
    let public_key = rsa::RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| Error::BadSignature(format!("unsupported signing certificate key: {e}")))?;

    let signature = Signature::try_from(signature)
        .map_err(|e| Error::BadSignature(format!("malformed signature: {e}")))?;

    let result = match algorithm {
        Algorithm::Sha224 => VerifyingKey::<Sha224>::new(public_key).verify(document, &signature),
        Algorithm::Sha256 => VerifyingKey::<Sha256>::new(public_key).verify(document, &signature),
        Algorithm::Sha384 => VerifyingKey::<Sha384>::new(public_key).verify(document, &signature),
        Algorithm::Sha512 => VerifyingKey::<Sha512>::new(public_key).verify(document, &signature),
    };
    result.map_err(|_| Error::BadSignature("signature does not verify".into()))
}

/// Produce a detached signature envelope over every added path in the tree.
pub fn make(
    tree: &pathtree::Tree,
    source: &dyn FileSource,
    role: Role,
    algorithm: Algorithm,
    key: &RsaPrivateKey,
    chain: &[Certificate],
) -> Result<Vec<u8>, Error> {
    let paths: Vec<String> = tree
        .added_paths(tree.root())
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    let document = filelist::build(&paths, source, algorithm)?;
    let signature = sign_document(algorithm, key, &document)?;

    let envelope = Envelope::new(role, algorithm.oid(), document, signature, chain.to_vec())?;
    envelope.to_der()
}

/// Verify a detached signature envelope against a file tree.
pub fn check(
    envelope_bytes: &[u8],
    tree: &pathtree::Tree,
    source: &dyn FileSource,
    trust_anchors: &[Certificate],
) -> Result<AllowedDomain, Error> {
    let envelope = Envelope::from_der(envelope_bytes)?;

    let algorithm = Algorithm::from_oid(envelope.digest_algorithm())
        .ok_or_else(|| Error::BadSignature("unknown digest algorithm oid".into()))?;
    let role = envelope.role()?;
    let certificates = envelope.certificates();
    let leaf = certificates
        .first()
        .ok_or_else(|| Error::BadSignature("signature has no certificates".into()))?;

    verify_document(algorithm, leaf, envelope.file_list(), envelope.signature())?;
    chain::verify(certificates, trust_anchors)?;

    let references = filelist::parse(envelope.file_list())?;
    let tree_paths: Vec<String> = tree
        .added_paths(tree.root())
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    filelist::verify_against_tree(&references, &tree_paths, source, algorithm)?;

    Ok(AllowedDomain {
        role,
        subject: leaf.tbs_certificate.subject.to_string(),
    })
}
