//! Execution context and its single command queue.

use super::device::Device;
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use std::fmt;
use std::sync::Arc;

/// Logical device bound to the selected adapter.
///
/// Owns the one command queue of the process. Programs and buffers are
/// created through it and must not outlive it.
pub struct ExecutionContext {
    device: Device,
    gpu: Arc<wgpu::Device>,
    pending_queue: Option<wgpu::Queue>,
    queue: Option<CommandQueue>,
    metrics: Arc<Metrics>,
}

impl ExecutionContext {
    /// Bind a logical device to `device`.
    ///
    /// The adapter's own limits are requested so buffers as large as the
    /// hardware allows can be allocated.
    pub fn create(device: Device, metrics: Arc<Metrics>) -> Result<Self> {
        let limits = device.limits();

        let (gpu, queue) = futures::executor::block_on(device.adapter().request_device(
            &wgpu::DeviceDescriptor {
                label: Some("offload-device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
            },
            None,
        ))
        .map_err(|e| Error::context_creation(format!("{} on {}", e, device.summary())))?;

        gpu.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            tracing::error!(%err, "uncaptured device error");
        }));

        tracing::debug!(device = %device.summary(), "execution context created");

        Ok(Self {
            device,
            gpu: Arc::new(gpu),
            pending_queue: Some(queue),
            queue: None,
            metrics,
        })
    }

    /// Bind the context's command queue. Only one queue per context exists.
    pub fn create_queue(&mut self) -> Result<&CommandQueue> {
        let raw = self
            .pending_queue
            .take()
            .ok_or_else(|| Error::queue_creation("context already owns its command queue"))?;

        let queue = self.queue.insert(CommandQueue {
            queue: raw,
            gpu: Arc::clone(&self.gpu),
            metrics: Arc::clone(&self.metrics),
        });
        Ok(&*queue)
    }

    /// The bound command queue.
    pub fn queue(&self) -> Result<&CommandQueue> {
        self.queue
            .as_ref()
            .ok_or_else(|| Error::queue_creation("command queue has not been created"))
    }

    /// Device this context is bound to.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Limits of the logical device.
    pub fn limits(&self) -> wgpu::Limits {
        self.gpu.limits()
    }

    /// Metrics shared with every buffer and queue of this context.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub(crate) fn gpu(&self) -> &wgpu::Device {
        &self.gpu
    }

    pub(crate) fn gpu_handle(&self) -> Arc<wgpu::Device> {
        Arc::clone(&self.gpu)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.device)
            .field("queue_bound", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

/// Command queue of an [`ExecutionContext`].
///
/// Every device operation of the process is submitted here, so submissions
/// are totally ordered.
pub struct CommandQueue {
    queue: wgpu::Queue,
    gpu: Arc<wgpu::Device>,
    metrics: Arc<Metrics>,
}

impl CommandQueue {
    pub(crate) fn raw(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub(crate) fn gpu(&self) -> &Arc<wgpu::Device> {
        &self.gpu
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Submit recorded commands and return the submission's index.
    pub(crate) fn submit(&self, commands: wgpu::CommandBuffer) -> wgpu::SubmissionIndex {
        self.queue.submit(Some(commands))
    }

    /// Block until everything submitted so far has finished.
    pub fn finish(&self) {
        let index = self.queue.submit(std::iter::empty());
        self.gpu.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue").finish_non_exhaustive()
    }
}

/// Run `f` inside out-of-memory and validation error scopes.
///
/// Returns the first device error raised while `f` ran, if any.
pub(crate) fn capture_errors<T>(
    gpu: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    gpu.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    gpu.push_error_scope(wgpu::ErrorFilter::Validation);

    let value = f();

    let validation = futures::executor::block_on(gpu.pop_error_scope());
    let out_of_memory = futures::executor::block_on(gpu.pop_error_scope());

    (value, out_of_memory.or(validation))
}
