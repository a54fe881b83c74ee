//! Provisioner configuration.
//!
//! Loaded from JSON at startup and resolved into [`ProvisionerSettings`].
//! Region and cluster entries describe the backend endpoints the VM
//! client connects to.

use crate::errors::{ProvisionError, Result};
use crate::pipeline::PollPolicy;
use crate::provisioner::ProvisionerSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level provisioner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Whether this provisioner is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Platform image used when a deploy names none.
    #[serde(default = "default_image")]
    pub image: String,
    /// CPU throttle percentage handed to the backend.
    #[serde(default = "default_vcpu_percentage")]
    pub vcpu_percentage: String,
    /// Backend VM template.
    #[serde(default, rename = "one_template")]
    pub template: String,
    /// Whether deploys run the balance check.
    #[serde(default)]
    pub billing_enabled: bool,
    /// Backend regions.
    #[serde(default, rename = "region")]
    pub regions: Vec<RegionConfig>,
    /// Polling for power-state and snapshot waits.
    #[serde(default)]
    pub poll: PollConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_image() -> String {
    "ubuntu".to_string()
}

fn default_vcpu_percentage() -> String {
    "10".to_string()
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            image: default_image(),
            vcpu_percentage: default_vcpu_percentage(),
            template: String::new(),
            billing_enabled: false,
            regions: Vec::new(),
            poll: PollConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProvisionError::Config(format!("invalid config: {e}")))
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Io`] if the file cannot be read and
    /// [`ProvisionError::Config`] on malformed JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when an enabled provisioner has no
    /// region, a region has no endpoint, or the polling values are unusable.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.regions.is_empty() {
            return Err(ProvisionError::Config(
                "an enabled provisioner needs at least one region".to_string(),
            ));
        }
        if let Some(region) = self.regions.iter().find(|r| r.endpoint.is_empty()) {
            return Err(ProvisionError::Config(format!(
                "region '{}' has no endpoint",
                region.zone
            )));
        }
        self.poll.policy().map(|_| ())
    }

    /// Resolves the runtime settings.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProvisionerConfig::validate`] failure.
    pub fn settings(&self) -> Result<ProvisionerSettings> {
        self.validate()?;
        Ok(ProvisionerSettings {
            default_image: self.image.clone(),
            vcpu_throttle: self.vcpu_percentage.clone(),
            billing_enabled: self.billing_enabled,
            poll: self.poll.policy()?,
        })
    }

    /// Returns the region with the given zone.
    #[must_use]
    pub fn region(&self, zone: &str) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.zone == zone)
    }
}

/// One backend region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Zone name.
    #[serde(rename = "one_zone")]
    pub zone: String,
    /// API endpoint.
    #[serde(rename = "one_endpoint")]
    pub endpoint: String,
    /// API user.
    #[serde(default, rename = "one_user")]
    pub user: String,
    /// API password.
    #[serde(default, rename = "one_password")]
    pub password: String,
    /// Master key.
    #[serde(default, rename = "one_masterkey")]
    pub master_key: String,
    /// VM template.
    #[serde(default, rename = "one_template")]
    pub template: String,
    /// Platform image for this region.
    #[serde(default)]
    pub image: String,
    /// CPU throttle for this region.
    #[serde(default)]
    pub vcpu_percentage: String,
    /// TLS certificate.
    #[serde(default)]
    pub certificate: String,
    /// Billing unit for CPU.
    #[serde(default)]
    pub cpu_unit: String,
    /// Billing unit for memory.
    #[serde(default)]
    pub memory_unit: String,
    /// Billing unit for disk.
    #[serde(default)]
    pub disk_unit: String,
    /// Clusters in this region.
    #[serde(default, rename = "cluster")]
    pub clusters: Vec<ClusterConfig>,
}

impl RegionConfig {
    /// Flattens the endpoint settings into a string map.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        [
            ("zone", &self.zone),
            ("endpoint", &self.endpoint),
            ("user", &self.user),
            ("password", &self.password),
            ("template", &self.template),
            ("image", &self.image),
            ("vcpu_percentage", &self.vcpu_percentage),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    /// Network and storage settings of every enabled cluster, keyed by
    /// cluster id. The first definition of a cluster id wins.
    #[must_use]
    pub fn enabled_clusters(&self) -> HashMap<String, HashMap<String, String>> {
        let mut clusters = HashMap::new();
        for cluster in self.clusters.iter().filter(|c| c.enabled) {
            clusters
                .entry(cluster.cluster_id.clone())
                .or_insert_with(|| cluster.to_map());
        }
        clusters
    }
}

/// One cluster within a region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Whether machines may be placed here.
    #[serde(default)]
    pub enabled: bool,
    /// Storage type.
    #[serde(default, rename = "storage_hddtype")]
    pub storage_type: String,
    /// Managed through vOneCloud.
    #[serde(default)]
    pub vonecloud: bool,
    /// Cluster id.
    pub cluster_id: String,
    /// Private IPv4 network.
    #[serde(default)]
    pub vnet_pri_ipv4: String,
    /// Public IPv4 network.
    #[serde(default)]
    pub vnet_pub_ipv4: String,
    /// Private IPv6 network.
    #[serde(default)]
    pub vnet_pri_ipv6: String,
    /// Public IPv6 network.
    #[serde(default)]
    pub vnet_pub_ipv6: String,
}

impl ClusterConfig {
    fn to_map(&self) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = [
            ("ipv4_private", &self.vnet_pri_ipv4),
            ("ipv4_public", &self.vnet_pub_ipv4),
            ("ipv6_private", &self.vnet_pri_ipv6),
            ("ipv6_public", &self.vnet_pub_ipv6),
            ("storage_type", &self.storage_type),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
        if self.vonecloud {
            map.insert("vonecloud".to_string(), "true".to_string());
        }
        map
    }
}

/// Polling configuration, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Give up after this long.
    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: f64,
    /// Delay after the first unsuccessful probe.
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: f64,
    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Maximum delay between probes.
    #[serde(default = "default_max_interval")]
    pub max_interval_seconds: f64,
    /// Randomize delays.
    #[serde(default)]
    pub jitter: bool,
}

fn default_poll_timeout() -> f64 {
    600.0
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_max_interval() -> f64 {
    30.0
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_poll_timeout(),
            interval_seconds: default_poll_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_seconds: default_max_interval(),
            jitter: false,
        }
    }
}

impl PollConfig {
    /// Converts to a [`PollPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] for non-positive durations, a
    /// multiplier below one, or a maximum delay below the initial one.
    pub fn policy(&self) -> Result<PollPolicy> {
        let timeout = seconds("poll.timeout_seconds", self.timeout_seconds)?;
        let interval = seconds("poll.interval_seconds", self.interval_seconds)?;
        let max_interval = seconds("poll.max_interval_seconds", self.max_interval_seconds)?;

        if !(self.backoff_multiplier >= 1.0) {
            return Err(ProvisionError::Config(format!(
                "poll.backoff_multiplier must be at least 1, got {}",
                self.backoff_multiplier
            )));
        }
        if max_interval < interval {
            return Err(ProvisionError::Config(
                "poll.max_interval_seconds is below poll.interval_seconds".to_string(),
            ));
        }

        let policy = PollPolicy::fixed(timeout, interval).with_backoff(self.backoff_multiplier, max_interval);
        Ok(if self.jitter { policy.with_jitter() } else { policy })
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ProvisionError::Config(format!(
            "{field} must be a positive number of seconds, got {value}"
        ))),
    }
}
