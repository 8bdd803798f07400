//! Small helpers shared by the stores: id generation, atomic JSON files,
//! prefix lookup and random container names.

pub(crate) mod names;

use std::io::Write;
use std::path::Path;

use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use dockhand_shared::errors::{DockhandError, DockhandResult};

/// Generate a 64-char lowercase hex identifier.
///
/// SHA256 of 32 random bytes, the same format container and exec ids use.
pub(crate) fn generate_id() -> String {
    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let mut hasher = Sha256::new();
    hasher.update(random_bytes);
    hex::encode(hasher.finalize())
}

/// Serialize `value` as JSON and atomically replace `path` with it.
///
/// The document is written to a temp file in the same directory and renamed
/// over the target, so readers see either the old or the new content.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> DockhandResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_file_atomic(path, &bytes)
}

/// Atomically replace `path` with `bytes`.
pub(crate) fn write_file_atomic(path: &Path, bytes: &[u8]) -> DockhandResult<()> {
    let dir = path.parent().ok_or_else(|| {
        DockhandError::Internal(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        DockhandError::Storage(format!("failed to persist {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

/// Read and deserialize a JSON document.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> DockhandResult<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        DockhandError::Storage(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// Total size of regular files under `path`. Unreadable entries are skipped.
pub(crate) fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Resolve `prefix` against a set of full ids.
///
/// Returns `Ok(None)` when nothing matches and an error when the prefix is
/// ambiguous.
pub(crate) fn find_by_prefix<'a, I>(prefix: &str, ids: I) -> DockhandResult<Option<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    if prefix.is_empty() {
        return Ok(None);
    }
    let mut found: Option<&str> = None;
    for id in ids {
        if id.starts_with(prefix) {
            if found.is_some() {
                return Err(DockhandError::InvalidParameter(format!(
                    "multiple IDs found with provided prefix: {}",
                    prefix
                )));
            }
            found = Some(id);
        }
    }
    Ok(found.map(str::to_string))
}
