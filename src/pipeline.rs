//! End-to-end offload pipeline.
//!
//! Construction runs device selection, context and queue creation and the
//! program build in that order; [`Pipeline::run`] then moves one pair of
//! input arrays through allocate, upload, bind, dispatch and download.
//! Every handle is owned here and released on drop, on success and on
//! every early error return alike.
//!
//! Buffers may be larger than one storage binding. The domain is then
//! dispatched as consecutive windows, each binding an aligned sub-range of
//! the three buffers and its own element count; all windows are enqueued
//! inside one timing window and only the last one is waited on.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gpu::{
    bind_args, binding_windows, build_kernel, enqueue, probe_devices, select_device, AccessMode,
    BoundKernel, DeviceBuffer, DeviceSummary, ExecutionContext, Kernel, KernelArg, Program,
    SelectionPolicy, WorkDomain,
};
use crate::host::elementwise_add_reference;
use crate::telemetry::{JsonExporter, Metrics, MetricsExporter, Stage};
use crate::timing::{self, ElapsedDuration};
use std::sync::Arc;

const ELEMENT_BYTES: u64 = std::mem::size_of::<i32>() as u64;

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output: Vec<i32>,
    /// Enqueue through completion wait; excludes transfers.
    pub elapsed: ElapsedDuration,
    pub device: DeviceSummary,
    /// Kernel launches the domain was split into.
    pub windows: usize,
}

/// Selected device, context, queue and built kernel for repeated runs.
pub struct Pipeline {
    kernel: Kernel,
    program: Program,
    ctx: ExecutionContext,
    metrics: Arc<Metrics>,
    verify: bool,
    max_binding_bytes: Option<u64>,
}

impl Pipeline {
    /// Select a device, bind its context and queue and build the kernel.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());

        let started = timing::start();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });
        for summary in probe_devices(&instance, config.backends) {
            tracing::debug!(device = %summary, driver = %summary.driver, "adapter found");
        }
        let device = select_device(
            &instance,
            config.backends,
            SelectionPolicy {
                allow_fallback: config.allow_fallback,
            },
        )?;
        metrics.record_stage(Stage::SelectDevice, timing::stop(started).as_duration());

        let started = timing::start();
        let mut ctx = ExecutionContext::create(device, Arc::clone(&metrics))?;
        ctx.create_queue()?;
        metrics.record_stage(Stage::CreateContext, timing::stop(started).as_duration());

        let started = timing::start();
        let (program, kernel) = build_kernel(&ctx, &config.kernel_path, &config.entry_point)?;
        metrics.record_stage(Stage::BuildProgram, timing::stop(started).as_duration());

        tracing::info!(
            device = %ctx.device().summary(),
            kernel = kernel.name(),
            "pipeline ready"
        );

        Ok(Self {
            kernel,
            program,
            ctx,
            metrics,
            verify: config.verify,
            max_binding_bytes: config.max_binding_bytes,
        })
    }

    /// Compute `a[i] + b[i]` on the device.
    pub fn run(&self, a: &[i32], b: &[i32]) -> Result<RunReport> {
        if a.len() != b.len() {
            return Err(Error::config(format!(
                "input lengths differ: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        let n = a.len();
        u32::try_from(n)
            .map_err(|_| Error::config(format!("{} elements exceed the u32 count parameter", n)))?;
        let bytes = n as u64 * ELEMENT_BYTES;
        let queue = self.ctx.queue()?;

        let limits = self.ctx.limits();
        let max_binding = match self.max_binding_bytes {
            Some(cap) => cap.min(limits.max_storage_buffer_binding_size as u64),
            None => limits.max_storage_buffer_binding_size as u64,
        };
        let windows = binding_windows(
            n as u64,
            ELEMENT_BYTES,
            max_binding,
            limits.min_storage_buffer_offset_alignment as u64,
        )?;

        let started = timing::start();
        let mut buf_a = DeviceBuffer::allocate(&self.ctx, bytes, AccessMode::ReadWrite)?;
        let mut buf_b = DeviceBuffer::allocate(&self.ctx, bytes, AccessMode::ReadWrite)?;
        let mut buf_out = DeviceBuffer::allocate(&self.ctx, bytes, AccessMode::ReadWrite)?;
        self.metrics
            .record_stage(Stage::Allocate, timing::stop(started).as_duration());

        let started = timing::start();
        buf_a.upload(queue, a)?;
        buf_b.upload(queue, b)?;
        self.metrics
            .record_stage(Stage::Upload, timing::stop(started).as_duration());

        let elapsed = {
            let bound_windows = windows
                .iter()
                .map(|range| {
                    let offset = range.start * ELEMENT_BYTES;
                    let size = (range.end - range.start) * ELEMENT_BYTES;
                    bind_args(
                        &self.kernel,
                        &[
                            (0, KernelArg::U32((range.end - range.start) as u32)),
                            (
                                1,
                                KernelArg::Window {
                                    buffer: &buf_a,
                                    offset,
                                    size,
                                },
                            ),
                            (
                                2,
                                KernelArg::Window {
                                    buffer: &buf_b,
                                    offset,
                                    size,
                                },
                            ),
                            (
                                3,
                                KernelArg::Window {
                                    buffer: &buf_out,
                                    offset,
                                    size,
                                },
                            ),
                        ],
                    )
                })
                .collect::<Result<Vec<BoundKernel<'_>>>>()?;
            tracing::debug!(elements = n, windows = bound_windows.len(), "arguments bound");

            let started = timing::start();
            let mut last = None;
            for (bound, range) in bound_windows.iter().zip(&windows) {
                last = Some(enqueue(
                    queue,
                    bound,
                    &WorkDomain::linear(range.end - range.start),
                )?);
            }
            if let Some(event) = last {
                event.wait();
            }
            timing::stop(started)
        };
        self.metrics.record_stage(Stage::Dispatch, elapsed.as_duration());

        let started = timing::start();
        let mut output = vec![0i32; n];
        buf_out.download(queue, &mut output)?;
        self.metrics
            .record_stage(Stage::Download, timing::stop(started).as_duration());

        if self.verify {
            verify_output(a, b, &output)?;
            tracing::info!(elements = n, "device output matches host reference");
        }

        Ok(RunReport {
            output,
            elapsed,
            device: self.ctx.device().summary().clone(),
            windows: windows.len(),
        })
    }

    /// Context owning the queue and every buffer of a run.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Program the kernel was extracted from.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Kernel dispatched by [`Pipeline::run`].
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Stage latencies and traffic counters collected so far.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Write the current metrics snapshot as JSON.
    pub fn export_metrics(&self, path: impl Into<std::path::PathBuf>) -> Result<()> {
        JsonExporter::new(path).export(&self.metrics.snapshot())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ctx", &self.ctx)
            .field("kernel", &self.kernel)
            .finish_non_exhaustive()
    }
}

/// Compare `output` with the host reference, reporting the first mismatch.
pub fn verify_output(a: &[i32], b: &[i32], output: &[i32]) -> Result<()> {
    let expected = elementwise_add_reference(a, b);
    if expected.len() != output.len() {
        return Err(Error::VerificationFailed {
            index: expected.len().min(output.len()),
            expected: format!("{} elements", expected.len()),
            actual: format!("{} elements", output.len()),
        });
    }

    match expected.iter().zip(output).position(|(e, o)| e != o) {
        Some(index) => Err(Error::VerificationFailed {
            index,
            expected: expected[index].to_string(),
            actual: output[index].to_string(),
        }),
        None => Ok(()),
    }
}
