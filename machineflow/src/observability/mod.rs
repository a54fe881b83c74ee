//! Observability utilities.

mod tracing;

pub use tracing::{
    env_filter, init_tracing, LogFormat, PipelineSpanAttributes, SpanTimer, LOG_ENV,
};
