//! Device buffer management and host transfers.

use super::context::{capture_errors, CommandQueue, ExecutionContext};
use crate::error::{Error, Result};
use std::fmt;

/// How kernels may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Kernels may load from the buffer.
    pub fn kernel_reads(&self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Kernels may store into the buffer.
    pub fn kernel_writes(&self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// Device-resident memory region. Released on drop.
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    mode: AccessMode,
}

impl DeviceBuffer {
    /// Allocate `size` bytes of device memory.
    pub fn allocate(ctx: &ExecutionContext, size: u64, mode: AccessMode) -> Result<Self> {
        check_allocation(size, &ctx.limits())?;

        let (buffer, error) = capture_errors(ctx.gpu(), || {
            ctx.gpu().create_buffer(&wgpu::BufferDescriptor {
                label: Some("offload-buffer"),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        });
        if let Some(err) = error {
            return Err(Error::allocation(format!("{} bytes: {}", size, err)));
        }

        ctx.metrics().record_allocation(size);
        tracing::trace!(size, ?mode, "buffer allocated");

        Ok(Self { buffer, size, mode })
    }

    /// Copy `data` into the start of the buffer and wait for completion.
    pub fn upload<T: bytemuck::Pod>(&mut self, queue: &CommandQueue, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_transfer(bytes.len() as u64, self.size)?;

        let ((), error) = capture_errors(queue.gpu(), || {
            queue.raw().write_buffer(&self.buffer, 0, bytes);
        });
        if let Some(err) = error {
            return Err(Error::transfer(format!("upload of {} bytes: {}", bytes.len(), err)));
        }
        queue.finish();

        queue.metrics().record_upload(bytes.len() as u64);
        Ok(())
    }

    /// Copy the start of the buffer into `out`, blocking until it arrives.
    pub fn download<T: bytemuck::Pod>(&mut self, queue: &CommandQueue, out: &mut [T]) -> Result<()> {
        let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(out);
        let len = out_bytes.len() as u64;
        check_transfer(len, self.size)?;
        if len == 0 {
            return Ok(());
        }

        let gpu = queue.gpu();
        let (submitted, error) = capture_errors(gpu, || {
            let staging = gpu.create_buffer(&wgpu::BufferDescriptor {
                label: Some("offload-staging-buffer"),
                size: len,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = gpu.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offload-download-encoder"),
            });
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, len);

            (queue.submit(encoder.finish()), staging)
        });
        if let Some(err) = error {
            return Err(Error::transfer(format!("download of {} bytes: {}", len, err)));
        }
        let (index, staging) = submitted;

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.poll(wgpu::Maintain::WaitForSubmissionIndex(index));

        futures::executor::block_on(receiver)
            .map_err(|_| Error::transfer("device dropped the read-back request"))?
            .map_err(|e| Error::transfer(format!("mapping staging buffer: {}", e)))?;

        {
            let view = slice.get_mapped_range();
            out_bytes.copy_from_slice(&view);
        }
        staging.unmap();

        queue.metrics().record_download(len);
        Ok(())
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Access mode the buffer was allocated with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("size", &self.size)
            .field("mode", &self.mode)
            .finish()
    }
}

fn check_allocation(size: u64, limits: &wgpu::Limits) -> Result<()> {
    if size == 0 {
        return Err(Error::allocation("buffer size must be > 0"));
    }
    if size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(Error::allocation(format!(
            "buffer size {} is not a multiple of {}",
            size,
            wgpu::COPY_BUFFER_ALIGNMENT
        )));
    }
    if size > limits.max_buffer_size {
        return Err(Error::allocation(format!(
            "{} bytes exceeds the device's max buffer size of {} bytes",
            size, limits.max_buffer_size
        )));
    }
    Ok(())
}

fn check_transfer(len: u64, capacity: u64) -> Result<()> {
    if len > capacity {
        return Err(Error::transfer(format!(
            "{} bytes does not fit a {} byte buffer",
            len, capacity
        )));
    }
    if len % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(Error::transfer(format!(
            "transfer of {} bytes is not a multiple of {}",
            len,
            wgpu::COPY_BUFFER_ALIGNMENT
        )));
    }
    Ok(())
}
