// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier utilities: virtual snapshot ids and tree fingerprints.
//!
//! Change ids are opaque strings minted by the record store. The engine only
//! mints two kinds of identity of its own:
//!
//! - virtual snapshot ids, which join two disjoint snapshot lineages under a
//!   synthetic root (see [`virtual_snapshot_id`]);
//! - tree fingerprints, a BLAKE3 digest over the observable tree structure
//!   (see [`Fingerprint`]).
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use blake3::Hasher;

/// Literal prefix carried by every virtual snapshot id.
pub const VIRTUAL_PREFIX: &str = "_virtual:";

const VIRTUAL_SEPARATOR: char = '+';

/// Canonical 256-bit digest type.
pub type Hash = [u8; 32];

/// Builds the virtual snapshot id joining `s1` and `s2`.
///
/// The pair is sorted first, so `virtual_snapshot_id(a, b)` and
/// `virtual_snapshot_id(b, a)` are the same id.
pub fn virtual_snapshot_id(s1: &str, s2: &str) -> String {
    let (lo, hi) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };
    let joined = format!("{lo}{VIRTUAL_SEPARATOR}{hi}");
    format!("{VIRTUAL_PREFIX}{}", URL_SAFE_NO_PAD.encode(joined.as_bytes()))
}

/// Returns `true` if `id` carries the virtual snapshot prefix.
pub fn is_virtual_id(id: &str) -> bool {
    id.starts_with(VIRTUAL_PREFIX)
}

/// Decodes a virtual snapshot id back into its sorted pair of snapshot ids.
///
/// Returns `None` when the prefix is missing, the body is not valid
/// base64url, or it does not split into exactly two non-empty ids.
pub fn decode_virtual_id(id: &str) -> Option<(String, String)> {
    let body = id.strip_prefix(VIRTUAL_PREFIX)?;
    let bytes = URL_SAFE_NO_PAD.decode(body).ok()?;
    let joined = String::from_utf8(bytes).ok()?;
    let mut parts = joined.split(VIRTUAL_SEPARATOR);
    let (first, second) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || first.is_empty() || second.is_empty() {
        return None;
    }
    Some((first.to_owned(), second.to_owned()))
}

/// Deterministic identity of a tree's observable structure.
///
/// Two trees with the same attached ids, heads and meta-heads always produce
/// the same fingerprint, on every device. The `Display` impl renders
/// lowercase hex.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Fingerprint(pub Hash);

impl Fingerprint {
    /// View the digest as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Hashes the canonical structure sections of a tree.
///
/// Encoding: domain tag, then for each section a little-endian `u64` entry
/// count followed by each id as `u64` length + UTF-8 bytes. Callers must pass
/// every section already sorted.
pub(crate) fn fingerprint_sections<'a, I, S>(sections: I) -> Fingerprint
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = &'a str>,
    S::IntoIter: ExactSizeIterator,
{
    let mut hasher = Hasher::new();
    hasher.update(b"changetree:fingerprint:v1");
    for section in sections {
        let ids = section.into_iter();
        hasher.update(&(ids.len() as u64).to_le_bytes());
        for id in ids {
            hasher.update(&(id.len() as u64).to_le_bytes());
            hasher.update(id.as_bytes());
        }
    }
    Fingerprint(hasher.finalize().into())
}
