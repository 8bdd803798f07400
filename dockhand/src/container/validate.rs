//! Create-time and start-time validation of container settings.

use dockhand_shared::constants::container::{MIN_HEALTHCHECK_DURATION_NANOS, MIN_MEMORY_LIMIT_BYTES};
use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::config::{ContainerConfig, HostConfig, PlatformConfig, Resources, RestartPolicyName};
use super::links::parse_link;
use crate::runtime::options::{HostCapabilities, Platform};
use crate::volumes::parser::{parse_bind, parse_volumes_from, validate_mount_spec};

fn invalid(msg: impl Into<String>) -> DockhandError {
    DockhandError::InvalidParameter(msg.into())
}

/// Validate a create request. Returns warnings for accepted-but-odd settings.
pub(crate) fn validate_create(
    config: &ContainerConfig,
    host_config: &HostConfig,
    platform: Platform,
    default_driver: &str,
) -> DockhandResult<Vec<String>> {
    let mut warnings = Vec::new();

    if !config.working_dir.is_empty() && !config.working_dir.starts_with('/') {
        return Err(invalid(format!(
            "the working directory '{}' is invalid, it needs to be an absolute path",
            config.working_dir
        )));
    }

    if let Some(health) = &config.healthcheck {
        for (what, value) in [
            ("Interval", health.interval_ns),
            ("Timeout", health.timeout_ns),
            ("StartPeriod", health.start_period_ns),
        ] {
            if value != 0 && value < MIN_HEALTHCHECK_DURATION_NANOS {
                return Err(invalid(format!(
                    "{} in Healthcheck cannot be less than 1ms",
                    what
                )));
            }
        }
        if health.retries < 0 {
            return Err(invalid("Retries in Healthcheck cannot be negative"));
        }
    }

    validate_restart_policy(host_config)?;
    validate_platform(host_config, platform)?;
    validate_resources(&host_config.resources)?;

    for bind in &host_config.binds {
        parse_bind(bind, default_driver)?;
    }
    for spec in &host_config.mounts {
        validate_mount_spec(spec)?;
    }
    for from in &host_config.volumes_from {
        parse_volumes_from(from)?;
    }
    for link in &host_config.links {
        parse_link(link)?;
    }
    for dest in host_config.tmpfs.keys() {
        if !dest.starts_with('/') {
            return Err(invalid(format!(
                "invalid mount config for type \"tmpfs\": invalid mount path: '{}' mount path must be absolute",
                dest
            )));
        }
    }

    if host_config.resources.memory > 0 && host_config.resources.memory_swap == 0 {
        warnings.push(
            "Memory limit set without swap limit; swap defaults to twice the memory limit".into(),
        );
    }

    Ok(warnings)
}

fn validate_restart_policy(host_config: &HostConfig) -> DockhandResult<()> {
    let policy = &host_config.restart_policy;
    match policy.name {
        RestartPolicyName::OnFailure if policy.maximum_retry_count < 0 => {
            return Err(invalid("invalid restart policy: maximum retry count cannot be negative"));
        }
        RestartPolicyName::OnFailure => {}
        _ if policy.maximum_retry_count != 0 => {
            return Err(invalid(format!(
                "invalid restart policy: maximum retry count can only be used with 'on-failure' (got '{}')",
                policy.name
            )));
        }
        _ => {}
    }
    if host_config.auto_remove && !policy.is_none() {
        return Err(invalid(
            "can't create 'AutoRemove' container with restart policy",
        ));
    }
    Ok(())
}

fn validate_platform(host_config: &HostConfig, platform: Platform) -> DockhandResult<()> {
    match (&host_config.platform, platform) {
        (PlatformConfig::Unix(_), Platform::Linux) => Ok(()),
        (PlatformConfig::Windows(w), Platform::Windows) => {
            if !w.isolation.is_empty() && w.isolation != "process" && w.isolation != "hyperv" {
                return Err(invalid(format!("invalid isolation '{}'", w.isolation)));
            }
            Ok(())
        }
        (PlatformConfig::Windows(_), Platform::Linux) => Err(invalid(
            "windows host settings are not supported on a linux daemon",
        )),
        (PlatformConfig::Unix(u), Platform::Windows) => {
            if u.privileged {
                return Err(invalid("privileged mode is not supported on windows"));
            }
            Ok(())
        }
    }
}

fn validate_resources(resources: &Resources) -> DockhandResult<()> {
    if resources.memory != 0 && resources.memory < MIN_MEMORY_LIMIT_BYTES {
        return Err(invalid("Minimum memory limit allowed is 6MB"));
    }
    if resources.memory > 0 && resources.memory_swap > 0 && resources.memory_swap < resources.memory
    {
        return Err(invalid(
            "Minimum memoryswap limit should be larger than memory limit, see usage",
        ));
    }
    if resources.nano_cpus < 0 {
        return Err(invalid("Range of CPUs is from 0.01 to the number of CPUs available"));
    }
    if resources.cpu_shares < 0 {
        return Err(invalid("CPU shares cannot be negative"));
    }
    Ok(())
}

/// Re-check resource limits against what the host can enforce right now.
pub(crate) fn validate_runtime(
    host_config: &HostConfig,
    caps: &HostCapabilities,
) -> DockhandResult<()> {
    let resources = &host_config.resources;
    let unsupported = |what: &str| {
        DockhandError::InvalidParameter(format!(
            "Your kernel does not support {}; remove the limit and retry",
            what
        ))
    };
    if resources.memory > 0 && !caps.memory_limit {
        return Err(unsupported("memory limit"));
    }
    if resources.memory_swap > 0 && !caps.memory_swap {
        return Err(unsupported("swap limit"));
    }
    if (resources.nano_cpus > 0 || resources.cpu_shares > 0) && !caps.cpu_limit {
        return Err(unsupported("CPU limits"));
    }
    if !resources.cpuset_cpus.is_empty() && !caps.cpuset {
        return Err(unsupported("cpuset"));
    }
    if resources.pids_limit.is_some_and(|p| p > 0) && !caps.pids_limit {
        return Err(unsupported("PIDs limit"));
    }
    Ok(())
}
