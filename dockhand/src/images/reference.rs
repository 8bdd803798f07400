//! Human-readable image references and the store mapping them to image ids.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use crate::digest::{Digest, ImageId};
use crate::util::{read_json, write_json_atomic};

pub const DEFAULT_TAG: &str = "latest";

/// `name:tag` or `name@digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Tagged { name: String, tag: String },
    Digested { name: String, digest: Digest },
}

fn is_valid_component(c: &str) -> bool {
    // [a-z0-9]+(?:[._-][a-z0-9]+)*
    !c.is_empty()
        && c.split(['.', '_', '-'])
            .all(|p| !p.is_empty() && p.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit()))
}

fn is_registry_host(c: &str) -> bool {
    c == "localhost" || c.contains('.') || c.contains(':')
}

fn is_valid_tag(tag: &str) -> bool {
    // [\w][\w.-]{0,127}
    tag.len() <= 128
        && tag.chars().next().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn validate_name(name: &str, input: &str) -> DockhandResult<()> {
    let invalid = |reason: &str| {
        DockhandError::InvalidParameter(format!("invalid reference format: {}: {}", input, reason))
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(invalid("repository name must be lowercase"));
    }
    let mut components = name.split('/').peekable();
    let mut first = true;
    while let Some(component) = components.next() {
        let is_host = first && components.peek().is_some() && is_registry_host(component);
        first = false;
        if !is_host && !is_valid_component(component) {
            return Err(invalid("invalid repository name"));
        }
    }
    Ok(())
}

impl Reference {
    /// Parse a reference. A missing tag defaults to `latest`.
    pub fn parse(s: &str) -> DockhandResult<Self> {
        if let Some((name, digest)) = s.split_once('@') {
            validate_name(name, s)?;
            return Ok(Reference::Digested {
                name: name.to_string(),
                digest: Digest::parse(digest)?,
            });
        }

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let last_slash = s.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match s[last_slash..].rfind(':') {
            Some(i) => (&s[..last_slash + i], &s[last_slash + i + 1..]),
            None => (s, DEFAULT_TAG),
        };
        validate_name(name, s)?;
        if !is_valid_tag(tag) {
            return Err(DockhandError::InvalidParameter(format!(
                "invalid reference format: {}: invalid tag",
                s
            )));
        }
        Ok(Reference::Tagged {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Build `repo:tag` from separate parts; an empty tag means `latest`.
    pub fn with_tag(repo: &str, tag: &str) -> DockhandResult<Self> {
        if repo.contains('@') {
            return Err(DockhandError::InvalidParameter(format!(
                "refusing to create a tag with a digest reference: {}",
                repo
            )));
        }
        let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
        match Self::parse(&format!("{}:{}", repo, tag))? {
            reference @ Reference::Tagged { .. } if reference.name() == repo => Ok(reference),
            _ => Err(DockhandError::InvalidParameter(format!(
                "invalid reference format: {}:{}",
                repo, tag
            ))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Reference::Tagged { name, .. } | Reference::Digested { name, .. } => name,
        }
    }

    pub fn is_digested(&self) -> bool {
        matches!(self, Reference::Digested { .. })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tagged { name, tag } => write!(f, "{}:{}", name, tag),
            Reference::Digested { name, digest } => write!(f, "{}@{}", name, digest),
        }
    }
}

/// On-disk form: repository name -> full reference -> image id.
#[derive(Default, Serialize, Deserialize)]
struct RepositoriesFile {
    #[serde(rename = "Repositories")]
    repositories: BTreeMap<String, BTreeMap<String, ImageId>>,
}

#[derive(Default)]
struct RefState {
    refs: BTreeMap<Reference, ImageId>,
    by_id: HashMap<ImageId, Vec<Reference>>,
}

impl RefState {
    fn insert(&mut self, reference: Reference, id: ImageId) {
        if let Some(old) = self.refs.insert(reference.clone(), id.clone()) {
            self.unlink(&reference, &old);
        }
        let refs = self.by_id.entry(id).or_default();
        refs.push(reference);
        refs.sort();
    }

    fn unlink(&mut self, reference: &Reference, id: &ImageId) {
        if let Some(refs) = self.by_id.get_mut(id) {
            refs.retain(|r| r != reference);
            if refs.is_empty() {
                self.by_id.remove(id);
            }
        }
    }
}

pub struct ReferenceStore {
    path: PathBuf,
    state: RwLock<RefState>,
}

impl ReferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> DockhandResult<Self> {
        let path = path.into();
        let mut state = RefState::default();

        if path.is_file() {
            let file: RepositoriesFile = read_json(&path)?;
            for (reference, id) in file.repositories.into_values().flatten() {
                match Reference::parse(&reference) {
                    Ok(parsed) => state.insert(parsed, id),
                    Err(e) => tracing::warn!(reference = %reference, error = %e, "Skipping invalid reference"),
                }
            }
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn persist(&self, state: &RefState) -> DockhandResult<()> {
        let mut file = RepositoriesFile::default();
        for (reference, id) in &state.refs {
            file.repositories
                .entry(reference.name().to_string())
                .or_default()
                .insert(reference.to_string(), id.clone());
        }
        write_json_atomic(&self.path, &file)
    }

    /// Point `reference` at `id`.
    ///
    /// Tags may be moved to another image; a digest reference may not.
    pub fn add(&self, reference: &Reference, id: &ImageId) -> DockhandResult<()> {
        let mut state = self.state.write();
        if let Some(existing) = state.refs.get(reference) {
            if existing == id {
                return Ok(());
            }
            if reference.is_digested() {
                return Err(DockhandError::Conflict(format!(
                    "cannot overwrite digest {}",
                    reference
                )));
            }
        }
        let previous = state.refs.get(reference).cloned();
        state.insert(reference.clone(), id.clone());
        if let Err(e) = self.persist(&state) {
            // Restore the previous mapping
            state.refs.remove(reference);
            state.unlink(reference, id);
            if let Some(previous) = previous {
                state.insert(reference.clone(), previous);
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn get(&self, reference: &Reference) -> Option<ImageId> {
        self.state.read().refs.get(reference).cloned()
    }

    /// Remove `reference`; returns whether it existed.
    pub fn delete(&self, reference: &Reference) -> DockhandResult<bool> {
        let mut state = self.state.write();
        let Some(id) = state.refs.remove(reference) else {
            return Ok(false);
        };
        state.unlink(reference, &id);
        self.persist(&state)?;
        Ok(true)
    }

    /// References pointing at `id`, sorted.
    pub fn references(&self, id: &ImageId) -> Vec<Reference> {
        self.state.read().by_id.get(id).cloned().unwrap_or_default()
    }

    pub fn all(&self) -> Vec<(Reference, ImageId)> {
        self.state
            .read()
            .refs
            .iter()
            .map(|(r, id)| (r.clone(), id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("busybox", "busybox", "latest")]
    #[case("busybox:1.36", "busybox", "1.36")]
    #[case("library/redis:7", "library/redis", "7")]
    #[case("localhost:5000/app", "localhost:5000/app", "latest")]
    #[case("registry.example.com:443/team/app:v1.2", "registry.example.com:443/team/app", "v1.2")]
    fn test_parse_tagged(#[case] input: &str, #[case] name: &str, #[case] tag: &str) {
        assert_eq!(
            Reference::parse(input).unwrap(),
            Reference::Tagged {
                name: name.into(),
                tag: tag.into()
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("Busybox")]
    #[case("busybox:")]
    #[case("busybox:-bad")]
    #[case("bad//name")]
    #[case("app@sha256:short")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(Reference::parse(input).is_err());
    }

    #[test]
    fn test_parse_digested() {
        let digest = Digest::from_bytes(b"x");
        let reference = Reference::parse(&format!("app@{}", digest)).unwrap();
        assert!(reference.is_digested());
        assert_eq!(reference.to_string(), format!("app@{}", digest));
    }

    #[test]
    fn test_with_tag() {
        assert_eq!(Reference::with_tag("app", "").unwrap().to_string(), "app:latest");
        assert!(Reference::with_tag("app:v1", "v2").is_err());
        assert!(Reference::with_tag("app", "bad tag").is_err());
    }

    #[test]
    fn test_tag_reassignment_and_digest_conflict() {
        let dir = TempDir::new().unwrap();
        let store = ReferenceStore::open(dir.path().join("repositories.json")).unwrap();
        let a = Digest::from_bytes(b"a");
        let b = Digest::from_bytes(b"b");

        let tag = Reference::parse("app:v1").unwrap();
        store.add(&tag, &a).unwrap();
        store.add(&tag, &b).unwrap();
        assert_eq!(store.get(&tag), Some(b.clone()));
        assert!(store.references(&a).is_empty());
        assert_eq!(store.references(&b), vec![tag.clone()]);

        let pinned = Reference::parse(&format!("app@{}", a)).unwrap();
        store.add(&pinned, &a).unwrap();
        let err = store.add(&pinned, &b).unwrap_err();
        assert!(matches!(err, DockhandError::Conflict(_)));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repositories.json");
        let id = Digest::from_bytes(b"a");
        {
            let store = ReferenceStore::open(&path).unwrap();
            store.add(&Reference::parse("app:v1").unwrap(), &id).unwrap();
            store.add(&Reference::parse("app:v2").unwrap(), &id).unwrap();
            assert!(store.delete(&Reference::parse("app:v2").unwrap()).unwrap());
        }
        let store = ReferenceStore::open(&path).unwrap();
        assert_eq!(store.references(&id).len(), 1);
        assert!(!store.delete(&Reference::parse("app:v2").unwrap()).unwrap());
    }
}
