//! Mount point resolution.
//!
//! Merges the four mount sources of a container into one table, in fixed
//! order:
//!
//! 1. mount points the container already has (restart / re-registration)
//! 2. mounts inherited through `--volumes-from`
//! 3. legacy bind strings (`src:dst[:mode]`)
//! 4. structured mount specs
//!
//! followed by anonymous volumes for image-declared destinations nothing
//! else claimed. A destination claimed twice by binds or structured mounts
//! is a conflict, never an overwrite.
//!
//! Resolution only touches the volume store. Callers swap the returned table
//! into the container under its lock, then call [`ResolvedMounts::commit`]
//! (or [`ResolvedMounts::rollback`] when the swap is abandoned).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::mount::{MountPoint, MountSpec, MountType};
use super::parser::{clean_path, parse_bind, validate_mount_spec};
use super::store::{VolumeCreateOptions, VolumeStore};

/// Mount points copied from a `--volumes-from` source container.
#[derive(Debug, Clone)]
pub struct InheritedMounts {
    pub container_id: String,
    /// False for `:ro`, which forces every inherited entry read-only.
    pub rw: bool,
    pub mounts: Vec<MountPoint>,
}

/// Everything that feeds a container's mount table.
#[derive(Debug, Clone, Copy)]
pub struct MountRequest<'a> {
    pub container_id: &'a str,
    pub existing: &'a BTreeMap<String, MountPoint>,
    pub inherited: &'a [InheritedMounts],
    pub binds: &'a [String],
    pub mounts: &'a [MountSpec],
    /// `HostConfig.tmpfs` destinations.
    pub tmpfs: &'a BTreeMap<String, String>,
    /// Image/config volume destinations that get anonymous volumes.
    pub anonymous: &'a [String],
    /// Driver for volumes created from binds and anonymous volumes; `None`
    /// uses the store default.
    pub volume_driver: Option<&'a str>,
}

/// A computed mount table plus the volume references taken to build it.
#[derive(Debug)]
#[must_use = "commit or roll back the acquired volume references"]
pub struct ResolvedMounts {
    pub mounts: BTreeMap<String, MountPoint>,
    container_id: String,
    previous: BTreeSet<String>,
    acquired: BTreeSet<String>,
}

impl ResolvedMounts {
    /// Release references to volumes no longer in the table after a
    /// successful swap.
    pub fn commit(self, volumes: &VolumeStore) -> BTreeMap<String, MountPoint> {
        let kept = volume_names(&self.mounts);
        for name in self.previous.union(&self.acquired) {
            if !kept.contains(name) {
                tracing::debug!(container_id = %self.container_id, volume = %name, "Dereferencing detached volume");
                volumes.dereference(name, &self.container_id);
            }
        }
        self.mounts
    }

    /// Undo the references this resolution took.
    pub fn rollback(self, volumes: &VolumeStore) {
        release_acquired(volumes, &self.container_id, &self.acquired, &self.previous);
    }
}

fn volume_names(mounts: &BTreeMap<String, MountPoint>) -> BTreeSet<String> {
    mounts
        .values()
        .filter(|mp| mp.is_volume())
        .map(|mp| mp.name.clone())
        .collect()
}

fn release_acquired(
    volumes: &VolumeStore,
    container_id: &str,
    acquired: &BTreeSet<String>,
    previous: &BTreeSet<String>,
) {
    for name in acquired.difference(previous) {
        volumes.dereference(name, container_id);
    }
}

fn duplicate(destination: &str) -> DockhandError {
    DockhandError::InvalidParameter(format!("Duplicate mount point: {}", destination))
}

pub struct MountResolver<'a> {
    volumes: &'a VolumeStore,
}

impl<'a> MountResolver<'a> {
    pub fn new(volumes: &'a VolumeStore) -> Self {
        Self { volumes }
    }

    /// Compute the mount table. On error every reference taken is released
    /// and nothing needs undoing by the caller.
    pub fn resolve(&self, req: &MountRequest<'_>) -> DockhandResult<ResolvedMounts> {
        let previous = volume_names(req.existing);
        let mut acquired = BTreeSet::new();

        match self.collect(req, &mut acquired) {
            Ok(mounts) => Ok(ResolvedMounts {
                mounts,
                container_id: req.container_id.to_string(),
                previous,
                acquired,
            }),
            Err(e) => {
                release_acquired(self.volumes, req.container_id, &acquired, &previous);
                Err(e)
            }
        }
    }

    fn collect(
        &self,
        req: &MountRequest<'_>,
        acquired: &mut BTreeSet<String>,
    ) -> DockhandResult<BTreeMap<String, MountPoint>> {
        let tmpfs: HashSet<String> = req.tmpfs.keys().map(|d| clean_path(d)).collect();

        // 1. Already configured mount points
        let mut points: BTreeMap<String, MountPoint> = req.existing.clone();

        // 2. Volumes from other containers
        for inherited in req.inherited {
            for mount in &inherited.mounts {
                let mut mp = mount.clone();
                mp.rw = mount.rw && inherited.rw;
                mp.volume = None;
                if mp.is_volume() {
                    let driver = Some(mp.driver.as_str()).filter(|d| !d.is_empty());
                    let volume = self.volumes.get_with_ref(&mp.name, driver, req.container_id)?;
                    acquired.insert(volume.name.clone());
                    mp.attach(volume);
                }
                tracing::debug!(
                    container_id = %req.container_id,
                    from = %inherited.container_id,
                    destination = %mp.destination,
                    rw = mp.rw,
                    "Inherited mount point"
                );
                points.insert(mp.destination.clone(), mp);
            }
        }

        // 3. Legacy binds
        let mut claimed: HashMap<String, String> = HashMap::new();
        for spec in req.binds {
            let mut bind = parse_bind(spec, self.volumes.default_driver())?;
            let key = match bind.mount_type {
                MountType::Volume => format!("volume:{}", bind.name),
                _ => bind.source.clone(),
            };

            if tmpfs.contains(&bind.destination) {
                return Err(duplicate(&bind.destination));
            }
            match claimed.get(&bind.destination) {
                Some(prev) if prev == &key => continue,
                Some(_) => return Err(duplicate(&bind.destination)),
                None => {}
            }

            if bind.mount_type == MountType::Volume {
                let opts = VolumeCreateOptions {
                    driver: req.volume_driver.map(str::to_string),
                    ..VolumeCreateOptions::named(bind.name.clone())
                };
                let volume = self.volumes.create_with_ref(&opts, Some(req.container_id))?;
                acquired.insert(volume.name.clone());
                bind.name = volume.name.clone();
                bind.attach(volume);
            }

            claimed.insert(bind.destination.clone(), key);
            points.insert(bind.destination.clone(), bind);
        }

        // 4. Structured mounts
        for spec in req.mounts {
            validate_mount_spec(spec)?;
            let destination = clean_path(&spec.target);
            if claimed.contains_key(&destination) || tmpfs.contains(&destination) {
                return Err(duplicate(&destination));
            }

            let mut mp = match spec.mount_type {
                MountType::Volume => {
                    let volume_opts = spec.volume_options.clone().unwrap_or_default();
                    let (driver, driver_opts) = match volume_opts.driver_config {
                        Some(cfg) => (Some(cfg.name).filter(|n| !n.is_empty()), cfg.options),
                        None => (None, BTreeMap::new()),
                    };
                    let opts = VolumeCreateOptions {
                        name: spec.source.clone(),
                        driver,
                        driver_opts,
                        labels: volume_opts.labels,
                    };
                    let volume = self.volumes.create_with_ref(&opts, Some(req.container_id))?;
                    acquired.insert(volume.name.clone());

                    let mut mp = MountPoint::volume(
                        volume.name.clone(),
                        volume.driver.clone(),
                        destination.clone(),
                        !spec.read_only,
                    );
                    mp.copy_data = !volume_opts.no_copy;
                    mp.named = !spec.source.is_empty();
                    mp.attach(volume);
                    mp
                }
                MountType::Bind => {
                    let mut mp = MountPoint::bind(clean_path(&spec.source), destination.clone(), !spec.read_only);
                    mp.propagation = spec.bind_options.as_ref().and_then(|o| o.propagation);
                    mp
                }
                MountType::Tmpfs | MountType::Npipe => {
                    let mut mp = MountPoint::bind(spec.source.clone(), destination.clone(), !spec.read_only);
                    mp.mount_type = spec.mount_type;
                    mp
                }
            };
            mp.spec = Some(spec.clone());

            claimed.insert(destination.clone(), String::new());
            points.insert(destination, mp);
        }

        // Anonymous volumes for declared destinations nothing else claimed
        for destination in req.anonymous {
            let destination = clean_path(destination);
            if points.contains_key(&destination) || tmpfs.contains(&destination) {
                continue;
            }
            let opts = VolumeCreateOptions {
                driver: req.volume_driver.map(str::to_string),
                ..Default::default()
            };
            let volume = self.volumes.create_with_ref(&opts, Some(req.container_id))?;
            acquired.insert(volume.name.clone());

            let mut mp = MountPoint::volume(volume.name.clone(), volume.driver.clone(), destination.clone(), true);
            mp.named = false;
            mp.attach(volume);
            points.insert(destination, mp);
        }

        Ok(points)
    }
}

/// Re-acquire the volume behind a mount point loaded from disk.
///
/// Entries that already carry a live volume, and non-volume entries, are
/// left alone.
pub fn lazy_initialize_volume(
    volumes: &VolumeStore,
    container_id: &str,
    mp: &mut MountPoint,
) -> DockhandResult<()> {
    if !mp.is_volume() || mp.volume.is_some() {
        return Ok(());
    }
    let driver = Some(mp.driver.as_str()).filter(|d| !d.is_empty());
    let volume = volumes.get_with_ref(&mp.name, driver, container_id)?;
    mp.attach(volume);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volumes::LocalDriver;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        host: TempDir,
        store: VolumeStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let driver = LocalDriver::new(dir.path().join("volumes")).unwrap();
        let store = VolumeStore::open(
            dir.path().join("volumes/metadata.json"),
            vec![Arc::new(driver)],
            "local",
        )
        .unwrap();
        Fixture {
            _dir: dir,
            host: TempDir::new().unwrap(),
            store,
        }
    }

    fn request<'a>(
        id: &'a str,
        existing: &'a BTreeMap<String, MountPoint>,
        binds: &'a [String],
        mounts: &'a [MountSpec],
        tmpfs: &'a BTreeMap<String, String>,
    ) -> MountRequest<'a> {
        MountRequest {
            container_id: id,
            existing,
            inherited: &[],
            binds,
            mounts,
            tmpfs,
            anonymous: &[],
            volume_driver: None,
        }
    }

    #[test]
    fn test_binds_and_volumes_resolve() {
        let f = fixture();
        let host = f.host.path().to_str().unwrap().to_string();
        let binds = vec![format!("{}:/host", host), "data:/data:ro".to_string()];
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();

        let resolved = MountResolver::new(&f.store)
            .resolve(&request("c1", &empty, &binds, &[], &no_tmpfs))
            .unwrap();
        let mounts = resolved.commit(&f.store);

        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts["/host"].mount_type, MountType::Bind);
        assert_eq!(mounts["/host"].source, host);
        let data = &mounts["/data"];
        assert!(data.is_volume());
        assert!(!data.rw);
        assert!(data.source.ends_with("data/_data"));
        assert_eq!(f.store.ref_count("data"), 1);
    }

    #[test]
    fn test_bind_conflicts_with_structured_mount() {
        let f = fixture();
        let host = f.host.path().to_str().unwrap().to_string();
        let binds = vec!["data:/data".to_string()];
        let mounts = vec![MountSpec::new(MountType::Bind, host, "/data")];
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();

        let err = MountResolver::new(&f.store)
            .resolve(&request("c1", &empty, &binds, &mounts, &no_tmpfs))
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate mount point: /data"));
        // The reference taken for the bind was released
        assert_eq!(f.store.ref_count("data"), 0);
    }

    #[test]
    fn test_bind_duplicates() {
        let f = fixture();
        let host = f.host.path().to_str().unwrap().to_string();
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();
        let resolver = MountResolver::new(&f.store);

        // Same source twice is tolerated
        let same = vec![format!("{}:/x", host), format!("{}:/x", host)];
        let resolved = resolver.resolve(&request("c1", &empty, &same, &[], &no_tmpfs)).unwrap();
        assert_eq!(resolved.commit(&f.store).len(), 1);

        let different = vec![format!("{}:/x", host), "/other:/x".to_string()];
        assert!(resolver.resolve(&request("c1", &empty, &different, &[], &no_tmpfs)).is_err());

        let tmpfs = BTreeMap::from([("/x".to_string(), String::new())]);
        let single = vec![format!("{}:/x", host)];
        assert!(resolver.resolve(&request("c1", &empty, &single, &[], &tmpfs)).is_err());
    }

    #[test]
    fn test_volumes_from_read_only_override() {
        let f = fixture();
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();
        let resolver = MountResolver::new(&f.store);

        let binds = vec!["shared:/shared".to_string()];
        let a = resolver
            .resolve(&request("a", &empty, &binds, &[], &no_tmpfs))
            .unwrap()
            .commit(&f.store);
        assert!(a["/shared"].rw);

        let inherited = vec![InheritedMounts {
            container_id: "a".into(),
            rw: false,
            mounts: a.values().cloned().collect(),
        }];
        let req = MountRequest {
            inherited: &inherited,
            ..request("b", &empty, &[], &[], &no_tmpfs)
        };
        let b = resolver.resolve(&req).unwrap().commit(&f.store);

        assert!(!b["/shared"].rw);
        assert_eq!(f.store.ref_count("shared"), 2);
    }

    #[test]
    fn test_resolution_is_deterministic_and_idempotent() {
        let f = fixture();
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();
        let resolver = MountResolver::new(&f.store);
        let binds = vec!["data:/data".to_string()];
        let anonymous = vec!["/cache".to_string()];

        let req = MountRequest {
            anonymous: &anonymous,
            ..request("c1", &empty, &binds, &[], &no_tmpfs)
        };
        let first = resolver.resolve(&req).unwrap().commit(&f.store);

        // Re-resolve on top of the existing table
        let req = MountRequest {
            anonymous: &anonymous,
            ..request("c1", &first, &binds, &[], &no_tmpfs)
        };
        let second = resolver.resolve(&req).unwrap().commit(&f.store);

        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            second.keys().collect::<Vec<_>>()
        );
        assert_eq!(first["/cache"].name, second["/cache"].name);
        assert_eq!(f.store.ref_count("data"), 1);
        assert_eq!(f.store.list().len(), 2);
    }

    #[test]
    fn test_commit_dereferences_replaced_volumes() {
        let f = fixture();
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();
        let resolver = MountResolver::new(&f.store);

        let binds = vec!["old:/data".to_string()];
        let first = resolver
            .resolve(&request("c1", &empty, &binds, &[], &no_tmpfs))
            .unwrap()
            .commit(&f.store);
        assert_eq!(f.store.ref_count("old"), 1);

        let binds = vec!["new:/data".to_string()];
        let second = resolver
            .resolve(&request("c1", &first, &binds, &[], &no_tmpfs))
            .unwrap()
            .commit(&f.store);

        assert_eq!(second["/data"].name, "new");
        assert_eq!(f.store.ref_count("old"), 0);
        assert_eq!(f.store.ref_count("new"), 1);
    }

    #[test]
    fn test_rollback_keeps_previous_refs() {
        let f = fixture();
        let empty = BTreeMap::new();
        let no_tmpfs: BTreeMap<String, String> = BTreeMap::new();
        let resolver = MountResolver::new(&f.store);

        let binds = vec!["data:/data".to_string()];
        let first = resolver
            .resolve(&request("c1", &empty, &binds, &[], &no_tmpfs))
            .unwrap()
            .commit(&f.store);

        let more = vec!["data:/data".to_string(), "extra:/extra".to_string()];
        resolver
            .resolve(&request("c1", &first, &more, &[], &no_tmpfs))
            .unwrap()
            .rollback(&f.store);

        assert_eq!(f.store.ref_count("data"), 1);
        assert_eq!(f.store.ref_count("extra"), 0);
    }

    #[test]
    fn test_lazy_initialize_volume() {
        let f = fixture();
        f.store
            .create(&VolumeCreateOptions::named("data"))
            .unwrap();

        let mut mp = MountPoint::volume("data", "local", "/data", true);
        lazy_initialize_volume(&f.store, "c1", &mut mp).unwrap();
        assert!(mp.volume.is_some());
        assert!(mp.source.ends_with("data/_data"));
        assert_eq!(f.store.ref_count("data"), 1);

        let mut missing = MountPoint::volume("gone", "local", "/gone", true);
        assert!(lazy_initialize_volume(&f.store, "c1", &mut missing).is_err());
    }
}
