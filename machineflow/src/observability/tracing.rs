//! Tracing setup and span attributes for machine operations.
//!
//! This module installs the process-wide `tracing` subscriber and provides
//! the attribute sets attached to operation spans.

use crate::core::MachineSpec;
use crate::errors::{ProvisionError, Result};
use crate::pipeline::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "MACHINEFLOW_LOG";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Builds the filter from [`LOG_ENV`], falling back to `info`.
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`ProvisionError::Config`] if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    installed.map_err(|err| ProvisionError::Config(format!("tracing already initialised: {err}")))
}

/// Span attributes for one provisioner operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpanAttributes {
    /// Pipeline name.
    pub pipeline_name: Option<String>,
    /// Run ID.
    pub run_id: Option<String>,
    /// Machine id.
    pub machine_id: Option<String>,
    /// Machine full name.
    pub machine: Option<String>,
    /// Owning account.
    pub account_id: Option<String>,
    /// Region.
    pub region: Option<String>,
}

impl PipelineSpanAttributes {
    /// Creates empty attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes for running `operation` against `spec`.
    #[must_use]
    pub fn for_operation(operation: Operation, spec: &MachineSpec) -> Self {
        Self {
            pipeline_name: Some(operation.name().to_string()),
            run_id: None,
            machine_id: Some(spec.id.clone()),
            machine: Some(spec.full_name()),
            account_id: Some(spec.account_id.clone()).filter(|a| !a.is_empty()),
            region: Some(spec.region.clone()).filter(|r| !r.is_empty()),
        }
    }

    /// Sets the run ID.
    #[must_use]
    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    /// Converts to OpenTelemetry-style attribute keys.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        if let Some(ref v) = self.pipeline_name {
            attrs.insert("pipeline.name".to_string(), v.clone());
        }
        if let Some(ref v) = self.run_id {
            attrs.insert("pipeline.run_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.machine_id {
            attrs.insert("machine.id".to_string(), v.clone());
        }
        if let Some(ref v) = self.machine {
            attrs.insert("machine.name".to_string(), v.clone());
        }
        if let Some(ref v) = self.account_id {
            attrs.insert("machine.account_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.region {
            attrs.insert("machine.region".to_string(), v.clone());
        }

        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
