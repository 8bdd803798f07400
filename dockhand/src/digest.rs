//! Content digests (`sha256:<hex>`).
//!
//! Image ids, layer DiffIDs and ChainIDs are all digests; the aliases below
//! only document which role a value plays.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use dockhand_shared::errors::{DockhandError, DockhandResult};

/// A `sha256:<64 hex>` content digest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

/// Digest of an image's canonical JSON config.
pub type ImageId = Digest;

/// Digest of a single layer's uncompressed tar content.
pub type DiffId = Digest;

/// Digest identifying a layer together with all of its ancestors.
pub type ChainId = Digest;

impl Digest {
    pub const ALGORITHM: &'static str = "sha256";
    const HEX_LEN: usize = 64;

    /// Hash `data` with SHA256.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    /// Finish a streaming hasher.
    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{}:{}", Self::ALGORITHM, hex::encode(hasher.finalize())))
    }

    /// Parse a full digest. A bare 64-char hex string is accepted as sha256.
    pub fn parse(s: &str) -> DockhandResult<Self> {
        let hex_part = match s.split_once(':') {
            Some((algo, hex_part)) if algo == Self::ALGORITHM => hex_part,
            Some((algo, _)) => {
                return Err(DockhandError::InvalidParameter(format!(
                    "unsupported digest algorithm: {}",
                    algo
                )));
            }
            None => s,
        };
        if hex_part.len() != Self::HEX_LEN
            || !hex_part
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(DockhandError::InvalidParameter(format!(
                "invalid digest: {}",
                s
            )));
        }
        Ok(Self(format!("{}:{}", Self::ALGORITHM, hex_part)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex part without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, hex_part)| hex_part)
            .unwrap_or(&self.0)
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        let hex_part = self.hex();
        hex_part.get(..12).unwrap_or(hex_part)
    }
}

impl TryFrom<String> for Digest {
    type Error = DockhandError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.0)
    }
}

/// Compute the ChainID of a DiffID sequence.
///
/// `chain(0) = diff(0)`, `chain(n) = sha256(chain(n-1) + " " + diff(n))`.
/// Returns `None` for an empty sequence.
pub fn chain_id(diff_ids: &[DiffId]) -> Option<ChainId> {
    let mut iter = diff_ids.iter();
    let first = iter.next()?.clone();
    Some(iter.fold(first, |parent, diff| {
        Digest::from_bytes(format!("{} {}", parent, diff).as_bytes())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_known_value() {
        let d = Digest::from_bytes(b"");
        assert_eq!(
            d.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(d.short(), "e3b0c44298fc");
    }

    #[test]
    fn test_parse_accepts_bare_hex() {
        let hex_part = "a".repeat(64);
        let d = Digest::parse(&hex_part).unwrap();
        assert_eq!(d.as_str(), format!("sha256:{}", hex_part));
        assert_eq!(d.hex(), hex_part);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse(&format!("md5:{}", "a".repeat(64))).is_err());
        assert!(Digest::parse(&"A".repeat(64)).is_err());
    }

    #[test]
    fn test_chain_id() {
        let a = Digest::from_bytes(b"a");
        let b = Digest::from_bytes(b"b");

        assert_eq!(chain_id(&[]), None);
        assert_eq!(chain_id(std::slice::from_ref(&a)), Some(a.clone()));

        let expected = Digest::from_bytes(format!("{} {}", a, b).as_bytes());
        assert_eq!(chain_id(&[a.clone(), b.clone()]), Some(expected));
        // Order matters
        assert_ne!(chain_id(&[a.clone(), b.clone()]), chain_id(&[b, a]));
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let d = Digest::from_bytes(b"x");
        let json = serde_json::to_string(&d).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(serde_json::from_str::<Digest>("\"sha256:zz\"").is_err());
    }
}
