//! Caller-supplied description of the machine an operation targets.

use super::MachineState;
use crate::errors::{ProvisionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn dns_label() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("host label pattern compiles")
    })
}

/// Source repository a machine is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Git URL of the source.
    pub source: String,
    /// True when the repository itself is the image ("one click").
    #[serde(default)]
    pub one_click: bool,
}

/// Requested compute resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compute {
    /// Virtual CPUs.
    pub cpu: String,
    /// Memory.
    pub memory: String,
    /// Root disk size.
    pub disk: String,
}

/// Everything the caller knows about the machine when invoking an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Opaque machine id.
    pub id: String,
    /// Owning account.
    pub account_id: String,
    /// Parent group id.
    pub carton_id: String,
    /// Grandparent group id.
    #[serde(default)]
    pub cartons_id: String,
    /// Hierarchy level of the record.
    #[serde(default)]
    pub level: u32,
    /// Short host name.
    pub name: String,
    /// DNS domain the host lives in.
    pub domain: String,
    /// Last known lifecycle state.
    #[serde(default)]
    pub state: MachineState,
    /// Storage type (e.g. "ssd").
    #[serde(default)]
    pub storage_type: String,
    /// Region the machine lives in.
    #[serde(default)]
    pub region: String,
    /// Backend-assigned instance id, once created.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Public address to route the full name to.
    #[serde(default)]
    pub public_ip: Option<String>,
    /// Pre-authorized quota, which skips the balance check.
    #[serde(default)]
    pub quota_id: Option<String>,
    /// Router handling the machine's name.
    #[serde(default)]
    pub router: Option<String>,
    /// Snapshot targeted by snapshot removal.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Disk targeted by disk removal.
    #[serde(default)]
    pub disk_id: Option<String>,
    /// Requested compute resources.
    #[serde(default)]
    pub compute: Compute,
    /// Source repository.
    #[serde(default)]
    pub repo: Repo,
    /// Requested image version.
    #[serde(default)]
    pub image_version: String,
}

impl MachineSpec {
    /// Creates a spec with the identifying fields set.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        name: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            name: name.into(),
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Sets the public address.
    #[must_use]
    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = Some(ip.into());
        self
    }

    /// Sets the router.
    #[must_use]
    pub fn with_router(mut self, router: impl Into<String>) -> Self {
        self.router = Some(router.into());
        self
    }

    /// Sets the quota.
    #[must_use]
    pub fn with_quota(mut self, quota_id: impl Into<String>) -> Self {
        self.quota_id = Some(quota_id.into());
        self
    }

    /// Sets the backend instance id.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Returns the fully qualified host name.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.domain.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.domain)
        }
    }

    /// Returns the public address when one was supplied.
    #[must_use]
    pub fn public_ip(&self) -> Option<&str> {
        self.public_ip.as_deref().filter(|ip| !ip.is_empty())
    }

    /// Returns true if a pre-authorized quota is attached.
    #[must_use]
    pub fn has_quota(&self) -> bool {
        self.quota_id.as_deref().is_some_and(|q| !q.is_empty())
    }

    /// Checks the identifying fields before any pipeline is built.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ProvisionError::InvalidSpec("machine id is empty".to_string()));
        }
        if !dns_label().is_match(&self.name) {
            return Err(ProvisionError::InvalidSpec(format!(
                "name '{}' is not a valid host label",
                self.name
            )));
        }
        if let Some(bad) = self
            .domain
            .split('.')
            .filter(|_| !self.domain.is_empty())
            .find(|label| !dns_label().is_match(label))
        {
            return Err(ProvisionError::InvalidSpec(format!(
                "domain label '{bad}' in '{}' is invalid",
                self.domain
            )));
        }
        Ok(())
    }
}
