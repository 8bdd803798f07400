//! Parsing of legacy bind strings, `--volumes-from` specs and structured mounts.

use std::path::{Component, Path};

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::local::validate_volume_name;
use super::mount::{MountPoint, MountSpec, MountType, Propagation};

fn invalid_spec(spec: &str, reason: &str) -> DockhandError {
    DockhandError::InvalidParameter(format!("invalid spec: {}: {}", spec, reason))
}

/// Lexically clean an absolute path: collapse `//`, `.`, `..` and drop
/// trailing slashes.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    format!("/{}", parts.join("/"))
}

fn validate_destination(spec: &str, destination: &str) -> DockhandResult<String> {
    if destination.is_empty() {
        return Err(invalid_spec(spec, "empty destination"));
    }
    if !destination.starts_with('/') {
        return Err(DockhandError::InvalidParameter(format!(
            "invalid mount path: '{}' mount path must be absolute",
            destination
        )));
    }
    let cleaned = clean_path(destination);
    if cleaned == "/" {
        return Err(invalid_spec(spec, "destination can't be '/'"));
    }
    Ok(cleaned)
}

#[derive(Default)]
struct ParsedMode {
    rw: Option<bool>,
    propagation: Option<Propagation>,
    nocopy: bool,
}

fn parse_mode(spec: &str, mode: &str) -> DockhandResult<ParsedMode> {
    let mut parsed = ParsedMode::default();
    let mut relabel = false;
    let invalid = || DockhandError::InvalidParameter(format!("invalid mode: {} in {}", mode, spec));

    for part in mode.split(',') {
        match part {
            "rw" | "ro" if parsed.rw.is_none() => parsed.rw = Some(part == "rw"),
            // SELinux relabel flags are accepted and kept in the raw mode string
            "z" | "Z" if !relabel => relabel = true,
            "nocopy" if !parsed.nocopy => parsed.nocopy = true,
            other => match Propagation::parse(other) {
                Some(p) if parsed.propagation.is_none() => parsed.propagation = Some(p),
                _ => return Err(invalid()),
            },
        }
    }
    Ok(parsed)
}

/// Parse a legacy bind string: `dst`, `src:dst` or `src:dst:mode`.
///
/// An absolute source is a host bind; anything else names a volume. A lone
/// destination is an anonymous volume (empty name).
pub fn parse_bind(spec: &str, default_driver: &str) -> DockhandResult<MountPoint> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (source, destination, mode) = match parts.as_slice() {
        [dst] => ("", *dst, ""),
        [src, dst] => (*src, *dst, ""),
        [src, dst, mode] => (*src, *dst, *mode),
        _ => return Err(invalid_spec(spec, "too many colons")),
    };
    if parts.len() > 1 && source.is_empty() {
        return Err(invalid_spec(spec, "empty section between colons"));
    }

    let destination = validate_destination(spec, destination)?;
    let parsed = if mode.is_empty() {
        ParsedMode::default()
    } else {
        parse_mode(spec, mode)?
    };
    let rw = parsed.rw.unwrap_or(true);

    let mut mp = if source.starts_with('/') {
        if parsed.nocopy {
            return Err(DockhandError::InvalidParameter(format!(
                "invalid mode: {}: nocopy is only valid for volumes",
                mode
            )));
        }
        let mut mp = MountPoint::bind(clean_path(source), destination, rw);
        mp.propagation = Some(parsed.propagation.unwrap_or(Propagation::Rprivate));
        mp
    } else {
        if parsed.propagation.is_some() {
            return Err(DockhandError::InvalidParameter(format!(
                "invalid mode: {}: propagation is only valid for bind mounts",
                mode
            )));
        }
        if !source.is_empty() {
            validate_volume_name(source)?;
        }
        let mut mp = MountPoint::volume(source, default_driver, destination, rw);
        mp.copy_data = !parsed.nocopy;
        mp
    };
    mp.mode = mode.to_string();
    Ok(mp)
}

/// Parse `container[:ro|rw]`. Returns the container reference and whether
/// inherited mounts may stay writable.
pub fn parse_volumes_from(spec: &str) -> DockhandResult<(String, bool)> {
    let (id, mode) = match spec.split_once(':') {
        Some((id, mode)) => (id, Some(mode)),
        None => (spec, None),
    };
    if id.is_empty() {
        return Err(invalid_spec(spec, "empty container reference"));
    }
    let rw = match mode {
        None | Some("rw") => true,
        Some("ro") => false,
        Some(other) => {
            return Err(DockhandError::InvalidParameter(format!(
                "invalid mode for volumes-from: {}",
                other
            )));
        }
    };
    Ok((id.to_string(), rw))
}

/// Structural validation of a mount spec. Bind sources must exist unless
/// `create_mountpoint` is set.
pub fn validate_mount_spec(spec: &MountSpec) -> DockhandResult<()> {
    let err = |msg: &str| {
        DockhandError::InvalidParameter(format!(
            "invalid mount config for type \"{}\": {}",
            spec.mount_type, msg
        ))
    };

    if spec.target.is_empty() {
        return Err(err("field Target must not be empty"));
    }
    if !spec.target.starts_with('/') {
        return Err(err(&format!(
            "invalid mount path: '{}' mount path must be absolute",
            spec.target
        )));
    }
    if clean_path(&spec.target) == "/" {
        return Err(err("target can't be '/'"));
    }

    match spec.mount_type {
        MountType::Bind => {
            if spec.source.is_empty() {
                return Err(err("field Source must not be empty"));
            }
            if !spec.source.starts_with('/') {
                return Err(err(&format!(
                    "invalid mount path: '{}' mount path must be absolute",
                    spec.source
                )));
            }
            if spec.volume_options.is_some() {
                return Err(err("field VolumeOptions must not be specified"));
            }
            if spec.tmpfs_options.is_some() {
                return Err(err("field TmpfsOptions must not be specified"));
            }
            let create = spec
                .bind_options
                .as_ref()
                .is_some_and(|o| o.create_mountpoint);
            if !create && !Path::new(&spec.source).exists() {
                return Err(err(&format!(
                    "bind source path does not exist: {}",
                    spec.source
                )));
            }
        }
        MountType::Volume => {
            if spec.bind_options.is_some() {
                return Err(err("field BindOptions must not be specified"));
            }
            if spec.tmpfs_options.is_some() {
                return Err(err("field TmpfsOptions must not be specified"));
            }
            if !spec.source.is_empty() {
                validate_volume_name(&spec.source)?;
            }
        }
        MountType::Tmpfs => {
            if !spec.source.is_empty() {
                return Err(err("field Source must not be specified"));
            }
            if spec.bind_options.is_some() {
                return Err(err("field BindOptions must not be specified"));
            }
            if spec.volume_options.is_some() {
                return Err(err("field VolumeOptions must not be specified"));
            }
            if let Some(size) = spec.tmpfs_options.as_ref().and_then(|o| o.size_bytes)
                && size < 0
            {
                return Err(err("invalid tmpfs size"));
            }
        }
        MountType::Npipe => {
            if spec.source.is_empty() {
                return Err(err("field Source must not be empty"));
            }
        }
    }
    Ok(())
}
