// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The canonical file-list document: one `{digest}  {path}\n` line per file,
//! ascending by path, byte-wise. This is the content that gets signed.

use crate::algorithm::Algorithm;
use crate::{Error, FileSource};

/// References are package-relative paths with no scheme, authority, query,
/// or leading slash (spec.md §4.4).
pub fn validate_reference(path: &str) -> Result<(), Error> {
    if path.starts_with('/') {
        return Err(Error::BadSignature("reference starts with /".into()));
    }
    if path.contains('?') {
        return Err(Error::BadSignature("reference has a query component".into()));
    }
    if path.contains("://") {
        return Err(Error::BadSignature("reference has an authority component".into()));
    }
    if let Some(colon) = path.find(':') {
        let scheme = &path[..colon];
        let looks_like_scheme = !scheme.is_empty()
            && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
        if looks_like_scheme {
            return Err(Error::BadSignature("reference has a URI scheme".into()));
        }
    }
    Ok(())
}

/// Build the canonical document over every added path in `paths` (must
/// already be ascending-by-path, as `pathtree::Tree::added_paths` returns).
pub fn build(paths: &[String], source: &dyn FileSource, algorithm: Algorithm) -> Result<Vec<u8>, Error> {
    let mut document = Vec::new();
    for path in paths {
        validate_reference(path.trim_start_matches('/'))?;
        let bytes = source
            .read(path)
            .map_err(|e| Error::Io(path.clone(), e))?;
        let digest = algorithm.digest_hex(&bytes);
        document.extend_from_slice(digest.as_bytes());
        document.extend_from_slice(b"  ");
        document.extend_from_slice(path.as_bytes());
        document.push(b'\n');
    }
    Ok(document)
}

/// One parsed line of a file-list document.
pub struct Reference {
    pub digest: String,
    pub path: String,
}

pub fn parse(document: &[u8]) -> Result<Vec<Reference>, Error> {
    let text = std::str::from_utf8(document)
        .map_err(|_| Error::BadSignature("file list is not valid utf-8".into()))?;
    let mut references = Vec::new();
    for line in text.lines() {
        let (digest, path) = line
            .split_once("  ")
            .ok_or_else(|| Error::BadSignature(format!("malformed file list line: {line:?}")))?;
        validate_reference(path)?;
        references.push(Reference {
            digest: digest.to_owned(),
            path: path.to_owned(),
        });
    }
    Ok(references)
}

/// Verify every reference matches a file in the tree, recomputing its
/// digest, and that every tree path is referenced (no unreferenced files).
pub fn verify_against_tree(
    references: &[Reference],
    tree_paths: &[String],
    source: &dyn FileSource,
    algorithm: Algorithm,
) -> Result<(), Error> {
    use std::collections::BTreeSet;

    let referenced: BTreeSet<&str> = references.iter().map(|r| r.path.as_str()).collect();
    for path in tree_paths {
        let relative = path.trim_start_matches('/');
        if !referenced.contains(relative) {
            return Err(Error::BadSignature(format!("unreferenced file: {relative}")));
        }
    }

    let tree: BTreeSet<&str> = tree_paths.iter().map(|p| p.trim_start_matches('/')).collect();
    for reference in references {
        let path = &reference.path;
        if !tree.contains(path.as_str()) {
            return Err(Error::BadSignature(format!("reference names a file absent from the tree: {path}")));
        }
        let bytes = source.read(path).map_err(|e| Error::Io(path.clone(), e))?;
        let digest = algorithm.digest_hex(&bytes);
        if digest != reference.digest {
            return Err(Error::BadSignature(format!("digest mismatch for {path}")));
        }
    }

    Ok(())
}
