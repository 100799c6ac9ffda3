// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal certificate-chain verification: each certificate's signature is
//! checked against its issuer's public key, and the top of the chain must
//! match (or be directly signed by) one of the configured trust anchors.
//! This is deliberately not a full X.509 path validator (no revocation, no
//! extension constraint checking) — spec.md scopes trust to "chains to one
//! of the anchors", nothing more.

use der::Encode;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha2::Sha256;
use signature::Verifier;
use x509_cert::Certificate;

use crate::Error;

fn public_key(cert: &Certificate) -> Result<RsaPublicKey, Error> {
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(Error::Der)?;
    RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| Error::BadSignature(format!("unsupported certificate public key: {e}")))
}

fn verify_signed_by(cert: &Certificate, issuer: &Certificate) -> Result<(), Error> {
    let tbs = cert.tbs_certificate.to_der().map_err(Error::Der)?;
    let signature_bytes = cert
        .signature
        .as_bytes()
        .ok_or_else(|| Error::BadSignature("certificate signature is not byte-aligned".into()))?;
    let signature = Signature::try_from(signature_bytes)
        .map_err(|e| Error::BadSignature(format!("malformed certificate signature: {e}")))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key(issuer)?);
    verifying_key
        .verify(&tbs, &signature)
        .map_err(|_| Error::BadSignature("certificate chain link does not verify".into()))
}

/// `chain` is leaf-first. Verifies every adjacent (child, issuer) pair, then
/// checks the chain's root either matches a trust anchor by raw DER bytes or
/// is directly signed by one.
pub(crate) fn verify(chain: &[Certificate], anchors: &[Certificate]) -> Result<(), Error> {
    if chain.is_empty() {
        return Err(Error::BadSignature("empty certificate chain".into()));
    }

    for pair in chain.windows(2) {
        verify_signed_by(&pair[0], &pair[1])?;
    }

    let root = chain.last().expect("non-empty chain checked above");
    let root_der = root.to_der().map_err(Error::Der)?;

    let anchored_directly = anchors
        .iter()
        .map(|anchor| anchor.to_der().map_err(Error::Der))
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .any(|anchor_der| anchor_der == &root_der);
    if anchored_directly {
        return Ok(());
    }

    for anchor in anchors {
        if verify_signed_by(root, anchor).is_ok() {
            return Ok(());
        }
    }

    Err(Error::BadSignature("certificate chain does not reach a trust anchor".into()))
}
