pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Error, Result};
pub use crate::gpu::{
    bind_args, enqueue, AccessMode, DeviceBuffer, DeviceClass, ExecutionContext, KernelArg,
    SelectionPolicy, WorkDomain,
};
pub use crate::pipeline::{Pipeline, RunReport};
pub use crate::telemetry::{Metrics, MetricsSnapshot};
pub use crate::timing::ElapsedDuration;
