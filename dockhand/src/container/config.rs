//! Container configuration.
//!
//! [`ContainerConfig`] is the portable part (also embedded in images);
//! [`HostConfig`] is host-specific runtime policy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::volumes::MountSpec;

// ============================================================================
// CONTAINER CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image reference as given by the caller.
    pub image: String,
    pub hostname: String,
    pub domainname: String,
    pub user: String,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    /// `None` inherits the image entrypoint, `Some(vec![])` clears it.
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: String,
    pub labels: BTreeMap<String, String>,
    /// Destinations that receive anonymous volumes.
    pub volumes: BTreeSet<String>,
    pub exposed_ports: BTreeSet<String>,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<i64>,
    pub healthcheck: Option<HealthConfig>,
    pub tty: bool,
    pub open_stdin: bool,
    pub on_build: Vec<String>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Fill unset fields of `self` from `base` (the image or container config).
    ///
    /// Env and labels are merged key-wise with `self` winning; cmd is only
    /// inherited when no entrypoint was given.
    pub fn merge_from(&mut self, base: &ContainerConfig) {
        if self.user.is_empty() {
            self.user = base.user.clone();
        }

        self.exposed_ports.extend(base.exposed_ports.iter().cloned());

        let keys: BTreeSet<String> = self.env.iter().map(|e| env_key(e).to_string()).collect();
        for entry in &base.env {
            if !keys.contains(env_key(entry)) {
                self.env.push(entry.clone());
            }
        }

        for (k, v) in &base.labels {
            self.labels.entry(k.clone()).or_insert_with(|| v.clone());
        }

        if self.entrypoint.as_ref().is_none_or(Vec::is_empty) {
            if self.cmd.is_empty() {
                self.cmd = base.cmd.clone();
            }
            if self.entrypoint.is_none() {
                self.entrypoint = base.entrypoint.clone();
            }
        }

        match (&mut self.healthcheck, &base.healthcheck) {
            (None, Some(base_hc)) => self.healthcheck = Some(base_hc.clone()),
            (Some(hc), Some(base_hc)) => {
                if hc.test.is_empty() {
                    hc.test = base_hc.test.clone();
                }
                if hc.interval_ns == 0 {
                    hc.interval_ns = base_hc.interval_ns;
                }
                if hc.timeout_ns == 0 {
                    hc.timeout_ns = base_hc.timeout_ns;
                }
                if hc.start_period_ns == 0 {
                    hc.start_period_ns = base_hc.start_period_ns;
                }
                if hc.retries == 0 {
                    hc.retries = base_hc.retries;
                }
            }
            _ => {}
        }

        if self.working_dir.is_empty() {
            self.working_dir = base.working_dir.clone();
        }
        self.volumes.extend(base.volumes.iter().cloned());
        if self.stop_signal.is_none() {
            self.stop_signal = base.stop_signal.clone();
        }
        if self.on_build.is_empty() {
            self.on_build = base.on_build.clone();
        }
    }

    /// Command line actually run: entrypoint followed by cmd.
    pub fn command_line(&self) -> Vec<String> {
        self.entrypoint
            .iter()
            .flatten()
            .chain(self.cmd.iter())
            .cloned()
            .collect()
    }
}

/// Key part of a `KEY=value` entry.
pub(crate) fn env_key(entry: &str) -> &str {
    entry.split_once('=').map_or(entry, |(k, _)| k)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub test: Vec<String>,
    pub interval_ns: i64,
    pub timeout_ns: i64,
    pub start_period_ns: i64,
    pub retries: i64,
}

// ============================================================================
// HOST CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyName {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl fmt::Display for RestartPolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartPolicyName::No => "no",
            RestartPolicyName::Always => "always",
            RestartPolicyName::UnlessStopped => "unless-stopped",
            RestartPolicyName::OnFailure => "on-failure",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub name: RestartPolicyName,
    /// Only meaningful for `on-failure`; zero means unlimited.
    pub maximum_retry_count: i64,
}

impl RestartPolicy {
    pub fn always() -> Self {
        Self {
            name: RestartPolicyName::Always,
            maximum_retry_count: 0,
        }
    }

    pub fn on_failure(max: i64) -> Self {
        Self {
            name: RestartPolicyName::OnFailure,
            maximum_retry_count: max,
        }
    }

    pub fn is_none(&self) -> bool {
        self.name == RestartPolicyName::No
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Memory limit in bytes; zero means unlimited.
    pub memory: i64,
    pub memory_swap: i64,
    pub nano_cpus: i64,
    pub cpu_shares: i64,
    pub cpuset_cpus: String,
    pub pids_limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnixConfig {
    pub privileged: bool,
    pub cgroup_parent: String,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub shm_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// `process` or `hyperv`.
    pub isolation: String,
    pub console_size: Option<(u32, u32)>,
}

/// Platform-specific host settings, picked when the container is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "os", rename_all = "lowercase")]
pub enum PlatformConfig {
    Unix(UnixConfig),
    Windows(WindowsConfig),
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig::Unix(UnixConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Legacy `src:dst[:mode]` bind strings.
    pub binds: Vec<String>,
    pub mounts: Vec<MountSpec>,
    /// `container[:ro|rw]` entries.
    pub volumes_from: Vec<String>,
    /// tmpfs destination -> options.
    pub tmpfs: BTreeMap<String, String>,
    /// `name:alias` entries.
    pub links: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub auto_remove: bool,
    pub resources: Resources,
    /// Driver for volumes created from binds; empty uses the daemon default.
    pub volume_driver: String,
    pub network_mode: String,
    pub platform: PlatformConfig,
}
