//! Kernel argument binding, work domains and dispatch.
//!
//! Arguments are bound as one batch: if any argument is rejected no bind
//! group exists and the kernel cannot be enqueued. A [`CompletionEvent`]
//! borrows the bound kernel, which borrows its buffers, so the host cannot
//! download from a buffer until the event has been waited on and the
//! bound kernel dropped.

use super::buffer::DeviceBuffer;
use super::context::{capture_errors, CommandQueue};
use super::kernel::{Kernel, KernelSignature, Param, ScalarKind};
use crate::error::{Error, Result};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;

/// Uniform bindings are padded to this many bytes.
const UNIFORM_SLOT_BYTES: usize = 16;

/// A positional kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    U32(u32),
    I32(i32),
    F32(f32),
    Buffer(&'a DeviceBuffer),
    /// `size` bytes of a buffer starting at byte `offset`.
    Window {
        buffer: &'a DeviceBuffer,
        offset: u64,
        size: u64,
    },
}

impl KernelArg<'_> {
    /// Type of the argument as the binding check sees it.
    pub fn tag(&self) -> ArgTag {
        match self {
            KernelArg::U32(_) => ArgTag::Scalar(ScalarKind::U32),
            KernelArg::I32(_) => ArgTag::Scalar(ScalarKind::I32),
            KernelArg::F32(_) => ArgTag::Scalar(ScalarKind::F32),
            KernelArg::Buffer(buffer) | KernelArg::Window { buffer, .. } => ArgTag::Buffer {
                readable: buffer.mode().kernel_reads(),
                writable: buffer.mode().kernel_writes(),
            },
        }
    }

    /// Byte range of the buffer this argument binds, if it is a buffer.
    fn extent(&self) -> Option<(u64, u64, u64)> {
        match *self {
            KernelArg::Buffer(buffer) => Some((buffer.size(), 0, buffer.size())),
            KernelArg::Window {
                buffer,
                offset,
                size,
            } => Some((buffer.size(), offset, size)),
            _ => None,
        }
    }
}

/// Type of an argument as seen by the binding check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgTag {
    Scalar(ScalarKind),
    Buffer { readable: bool, writable: bool },
}

impl fmt::Display for ArgTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgTag::Scalar(kind) => write!(f, "scalar {}", kind),
            ArgTag::Buffer {
                readable: true,
                writable: true,
            } => write!(f, "read-write buffer"),
            ArgTag::Buffer { writable: true, .. } => write!(f, "write-only buffer"),
            ArgTag::Buffer { .. } => write!(f, "read-only buffer"),
        }
    }
}

fn accepts(param: &Param, tag: &ArgTag) -> bool {
    match (param, tag) {
        (Param::Scalar(expected), ArgTag::Scalar(got)) => expected == got,
        (Param::Buffer { writable: true }, ArgTag::Buffer { writable, .. }) => *writable,
        (Param::Buffer { writable: false }, ArgTag::Buffer { readable, .. }) => *readable,
        _ => false,
    }
}

/// Check a whole argument batch against a kernel signature.
///
/// Every problem is collected; the batch passes only if there are none.
pub fn check_args(signature: &KernelSignature, args: &[(u32, ArgTag)]) -> Result<()> {
    reject_batch(&signature.entry, signature_problems(signature, args))
}

/// Check the byte range a buffer argument binds.
///
/// The range must lie inside the buffer, start on `alignment`, be a
/// non-empty multiple of 4 bytes and fit one storage binding.
pub fn check_window(
    buffer_size: u64,
    offset: u64,
    size: u64,
    max_binding: u64,
    alignment: u64,
) -> std::result::Result<(), String> {
    if size == 0 || size % 4 != 0 {
        return Err(format!("binding size {} is not a positive multiple of 4", size));
    }
    if alignment > 0 && offset % alignment != 0 {
        return Err(format!("offset {} is not aligned to {} bytes", offset, alignment));
    }
    if offset.checked_add(size).map_or(true, |end| end > buffer_size) {
        return Err(format!(
            "range {}..{} exceeds the {} byte buffer",
            offset,
            offset.saturating_add(size),
            buffer_size
        ));
    }
    if size > max_binding {
        return Err(format!(
            "{} bytes exceeds the device's max storage binding size of {} bytes",
            size, max_binding
        ));
    }
    Ok(())
}

fn reject_batch(entry: &str, problems: Vec<String>) -> Result<()> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::arg_binding(format!(
            "kernel `{}`: {}",
            entry,
            problems.join("; ")
        )))
    }
}

fn signature_problems(signature: &KernelSignature, args: &[(u32, ArgTag)]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut bound = vec![false; signature.arity()];

    for (index, tag) in args {
        let slot = *index as usize;
        let Some(param) = signature.params.get(slot) else {
            problems.push(format!(
                "argument {}: kernel `{}` declares only {} parameters",
                index,
                signature.entry,
                signature.arity()
            ));
            continue;
        };
        if bound[slot] {
            problems.push(format!("argument {}: bound more than once", index));
            continue;
        }
        bound[slot] = true;

        if !accepts(param, tag) {
            problems.push(format!("argument {}: expected {}, got {}", index, param, tag));
        }
    }

    for (slot, is_bound) in bound.iter().enumerate() {
        if !is_bound {
            problems.push(format!("argument {}: not bound", slot));
        }
    }

    problems
}

/// A kernel whose every argument is bound; ready to enqueue.
pub struct BoundKernel<'a> {
    kernel: &'a Kernel,
    bind_group: wgpu::BindGroup,
    _buffers: PhantomData<&'a DeviceBuffer>,
}

impl BoundKernel<'_> {
    /// The kernel these arguments are bound to.
    pub fn kernel(&self) -> &Kernel {
        self.kernel
    }
}

impl fmt::Debug for BoundKernel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundKernel")
            .field("kernel", &self.kernel.name())
            .finish_non_exhaustive()
    }
}

/// Device resource backing one kernel parameter.
enum Slot<'a> {
    Storage {
        buffer: &'a DeviceBuffer,
        offset: u64,
        size: u64,
    },
    Uniform(wgpu::Buffer),
}

/// Bind `args` to `kernel` as one atomic batch.
pub fn bind_args<'a>(kernel: &'a Kernel, args: &[(u32, KernelArg<'a>)]) -> Result<BoundKernel<'a>> {
    let tags: Vec<(u32, ArgTag)> = args.iter().map(|(i, arg)| (*i, arg.tag())).collect();
    let mut problems = signature_problems(kernel.signature(), &tags);

    let limits = kernel.gpu().limits();
    for (index, arg) in args {
        if let Some((buffer_size, offset, size)) = arg.extent() {
            if let Err(problem) = check_window(
                buffer_size,
                offset,
                size,
                limits.max_storage_buffer_binding_size as u64,
                limits.min_storage_buffer_offset_alignment as u64,
            ) {
                problems.push(format!("argument {}: {}", index, problem));
            }
        }
    }
    reject_batch(kernel.name(), problems)?;

    // After the check every parameter has exactly one argument.
    let mut ordered = args.to_vec();
    ordered.sort_by_key(|(index, _)| *index);

    let gpu = kernel.gpu();
    let (bind_group, error) = capture_errors(gpu, || {
        let slots: Vec<Slot<'a>> = ordered
            .iter()
            .map(|(_, arg)| match *arg {
                KernelArg::Buffer(buffer) => Slot::Storage {
                    buffer,
                    offset: 0,
                    size: buffer.size(),
                },
                KernelArg::Window {
                    buffer,
                    offset,
                    size,
                } => Slot::Storage {
                    buffer,
                    offset,
                    size,
                },
                KernelArg::U32(v) => Slot::Uniform(uniform_arg(gpu, v.to_ne_bytes())),
                KernelArg::I32(v) => Slot::Uniform(uniform_arg(gpu, v.to_ne_bytes())),
                KernelArg::F32(v) => Slot::Uniform(uniform_arg(gpu, v.to_ne_bytes())),
            })
            .collect();

        let entries: Vec<wgpu::BindGroupEntry<'_>> = slots
            .iter()
            .enumerate()
            .map(|(binding, slot)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: match slot {
                    Slot::Storage {
                        buffer,
                        offset,
                        size,
                    } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buffer.raw(),
                        offset: *offset,
                        size: wgpu::BufferSize::new(*size),
                    }),
                    Slot::Uniform(uniform) => uniform.as_entire_binding(),
                },
            })
            .collect();

        gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("offload-kernel-args"),
            layout: kernel.layout(),
            entries: &entries,
        })
    });
    if let Some(err) = error {
        return Err(Error::arg_binding(format!("kernel `{}`: {}", kernel.name(), err)));
    }

    tracing::trace!(kernel = kernel.name(), args = args.len(), "arguments bound");

    Ok(BoundKernel {
        kernel,
        bind_group,
        _buffers: PhantomData,
    })
}

fn uniform_arg(gpu: &wgpu::Device, value: [u8; 4]) -> wgpu::Buffer {
    let mut contents = [0u8; UNIFORM_SLOT_BYTES];
    contents[..value.len()].copy_from_slice(&value);
    wgpu::util::DeviceExt::create_buffer_init(
        gpu,
        &wgpu::util::BufferInitDescriptor {
            label: Some("offload-scalar-arg"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        },
    )
}

/// Index space a kernel is dispatched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDomain {
    extent: [u64; 3],
    dims: u8,
}

impl WorkDomain {
    /// One invocation per element of a 1-D array.
    pub fn linear(len: u64) -> Self {
        Self {
            extent: [len, 1, 1],
            dims: 1,
        }
    }

    /// A 2-D or 3-D domain. Unused trailing extents should be 1.
    pub fn new(extent: [u64; 3]) -> Self {
        let dims = if extent[2] > 1 {
            3
        } else if extent[1] > 1 {
            2
        } else {
            1
        };
        Self { extent, dims }
    }

    /// Invocations along each axis.
    pub fn extent(&self) -> [u64; 3] {
        self.extent
    }

    /// Number of axes in use, 1 to 3.
    pub fn dims(&self) -> u8 {
        self.dims
    }

    /// Total number of invocations.
    pub fn len(&self) -> u64 {
        self.extent.iter().product()
    }

    /// True when no invocation would run.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workgroup grid covering this domain.
    ///
    /// A 1-D domain needing more than `max_per_dim` groups is folded into
    /// rows of `max_per_dim` groups; kernels rebuild the flat index as
    /// `gid.y * num_workgroups.x * workgroup_size.x + gid.x`.
    pub fn grid(&self, workgroup_size: [u32; 3], max_per_dim: u32) -> Result<[u32; 3]> {
        if self.is_empty() {
            return Err(Error::enqueue("work domain is empty"));
        }
        if workgroup_size.iter().any(|&w| w == 0) {
            return Err(Error::enqueue("kernel workgroup size has a zero extent"));
        }
        let max = max_per_dim as u64;
        let groups: Vec<u64> = self
            .extent
            .iter()
            .zip(workgroup_size)
            .map(|(&extent, size)| extent.div_ceil(size as u64))
            .collect();

        if self.dims == 1 && groups[0] > max {
            let rows = groups[0].div_ceil(max);
            if rows > max {
                return Err(Error::enqueue(format!(
                    "{} elements need {} workgroups, more than {}x{} the device allows",
                    self.extent[0], groups[0], max, max
                )));
            }
            return Ok([max_per_dim, rows as u32, 1]);
        }

        if let Some(over) = groups.iter().position(|&g| g > max) {
            return Err(Error::enqueue(format!(
                "dimension {} needs {} workgroups, device allows {}",
                over, groups[over], max
            )));
        }

        Ok([groups[0] as u32, groups[1] as u32, groups[2] as u32])
    }
}

/// Split `len` elements of `elem_bytes` each into consecutive element
/// ranges whose byte windows each fit one storage binding.
///
/// Every window but the last has the same length, and every window starts
/// on a multiple of `alignment` bytes.
pub fn binding_windows(
    len: u64,
    elem_bytes: u64,
    max_binding: u64,
    alignment: u64,
) -> Result<Vec<Range<u64>>> {
    if elem_bytes == 0 {
        return Err(Error::enqueue("element size must be > 0"));
    }
    let step = lcm(alignment.max(1), elem_bytes);
    let window_bytes = max_binding / step * step;
    if window_bytes == 0 {
        return Err(Error::enqueue(format!(
            "binding window of {} bytes cannot hold an aligned run of {} byte elements",
            max_binding, elem_bytes
        )));
    }

    let per_window = window_bytes / elem_bytes;
    Ok((0..len)
        .step_by(per_window as usize)
        .map(|start| start..(start + per_window).min(len))
        .collect())
}

fn lcm(a: u64, b: u64) -> u64 {
    let (mut x, mut y) = (a, b);
    while y != 0 {
        (x, y) = (y, x % y);
    }
    a / x * b
}

/// Signals completion of one enqueued kernel.
#[must_use = "wait on the event before reading the kernel's buffers"]
pub struct CompletionEvent<'k> {
    index: wgpu::SubmissionIndex,
    gpu: std::sync::Arc<wgpu::Device>,
    _bound: PhantomData<&'k ()>,
}

impl CompletionEvent<'_> {
    /// Block until the kernel has finished. There is no timeout.
    pub fn wait(self) {
        self.gpu
            .poll(wgpu::Maintain::WaitForSubmissionIndex(self.index));
    }
}

impl fmt::Debug for CompletionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionEvent").finish_non_exhaustive()
    }
}

/// Submit `bound` over `domain` on `queue`.
pub fn enqueue<'k>(
    queue: &CommandQueue,
    bound: &'k BoundKernel<'_>,
    domain: &WorkDomain,
) -> Result<CompletionEvent<'k>> {
    let kernel = bound.kernel;
    let gpu = queue.gpu();
    let grid = domain.grid(
        kernel.workgroup_size(),
        gpu.limits().max_compute_workgroups_per_dimension,
    )?;

    let (index, error) = capture_errors(gpu, || {
        let mut encoder = gpu.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("offload-kernel-encoder"),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("offload-compute-pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(kernel.pipeline());
            compute_pass.set_bind_group(0, &bound.bind_group, &[]);

            let [x, y, z] = grid;
            compute_pass.dispatch_workgroups(x, y, z);
        }

        queue.submit(encoder.finish())
    });
    if let Some(err) = error {
        return Err(Error::enqueue(format!("kernel `{}`: {}", kernel.name(), err)));
    }

    queue.metrics().record_enqueue();
    tracing::debug!(kernel = kernel.name(), ?grid, invocations = domain.len(), "kernel enqueued");

    Ok(CompletionEvent {
        index,
        gpu: std::sync::Arc::clone(gpu),
        _bound: PhantomData,
    })
}
