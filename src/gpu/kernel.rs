//! Kernel source loading, compilation and entry point extraction.
//!
//! Compilation runs in two steps. The WGSL front-end parses and validates
//! the module on the host so a failure yields the complete rendered
//! diagnostic. The device then builds its own shader module and compute
//! pipeline; a rejection there is reported with the device's message.

use super::context::{capture_errors, ExecutionContext};
use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Scalar type of a by-value kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    U32,
    I32,
    F32,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::U32 => write!(f, "u32"),
            ScalarKind::I32 => write!(f, "i32"),
            ScalarKind::F32 => write!(f, "f32"),
        }
    }
}

/// One positional kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Passed by value through a uniform binding.
    Scalar(ScalarKind),
    /// Storage buffer; `writable` when the kernel stores into it.
    Buffer { writable: bool },
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Scalar(kind) => write!(f, "scalar {}", kind),
            Param::Buffer { writable: true } => write!(f, "read-write buffer"),
            Param::Buffer { writable: false } => write!(f, "read-only buffer"),
        }
    }
}

/// Positional parameter list of a kernel entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub entry: String,
    pub params: Vec<Param>,
    pub workgroup_size: [u32; 3],
}

impl KernelSignature {
    /// Number of positional parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Host-validated kernel source.
#[derive(Debug)]
pub struct CompiledSource {
    source: String,
    module: naga::Module,
    info: naga::valid::ModuleInfo,
}

impl CompiledSource {
    /// The WGSL text as loaded.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of all compute entry points in the module.
    pub fn entry_points(&self) -> Vec<&str> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.name.as_str())
            .collect()
    }

    /// Reflect the parameter list of the compute entry point `entry`.
    ///
    /// Parameters are the group 0 resources the entry point uses, ordered by
    /// binding index. Indices must be contiguous from 0.
    pub fn signature(&self, entry: &str) -> Result<KernelSignature> {
        let (index, ep) = self
            .module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == entry && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| Error::entry_not_found(entry))?;

        let usage = self.info.get_entry_point(index);
        let mut params: Vec<(u32, Param)> = Vec::new();

        for (handle, var) in self.module.global_variables.iter() {
            if usage[handle].is_empty() {
                continue;
            }
            let Some(binding) = &var.binding else {
                continue;
            };
            let name = var.name.as_deref().unwrap_or("<unnamed>");

            if binding.group != 0 {
                return Err(Error::compile_failed(format!(
                    "kernel `{}`: parameter `{}` uses bind group {}, only group 0 is supported",
                    entry, name, binding.group
                )));
            }

            let param = match var.space {
                naga::AddressSpace::Uniform => {
                    Param::Scalar(self.scalar_kind(var.ty).ok_or_else(|| {
                        Error::compile_failed(format!(
                            "kernel `{}`: uniform parameter `{}` must be a 32-bit scalar",
                            entry, name
                        ))
                    })?)
                }
                naga::AddressSpace::Storage { access } => Param::Buffer {
                    writable: access.contains(naga::StorageAccess::STORE),
                },
                _ => {
                    return Err(Error::compile_failed(format!(
                        "kernel `{}`: parameter `{}` is neither a uniform scalar nor a storage buffer",
                        entry, name
                    )))
                }
            };
            params.push((binding.binding, param));
        }

        params.sort_by_key(|(binding, _)| *binding);
        for (position, (binding, _)) in params.iter().enumerate() {
            if *binding as usize != position {
                return Err(Error::compile_failed(format!(
                    "kernel `{}`: parameter bindings must be contiguous from 0, found binding {} at position {}",
                    entry, binding, position
                )));
            }
        }

        Ok(KernelSignature {
            entry: entry.to_string(),
            params: params.into_iter().map(|(_, p)| p).collect(),
            workgroup_size: ep.workgroup_size,
        })
    }

    fn scalar_kind(&self, ty: naga::Handle<naga::Type>) -> Option<ScalarKind> {
        match self.module.types[ty].inner {
            naga::TypeInner::Scalar(naga::Scalar { kind, width: 4 }) => match kind {
                naga::ScalarKind::Uint => Some(ScalarKind::U32),
                naga::ScalarKind::Sint => Some(ScalarKind::I32),
                naga::ScalarKind::Float => Some(ScalarKind::F32),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Read kernel source text from `path`.
pub fn load_source(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| Error::source_not_found(path.display().to_string(), e.to_string()))?;

    String::from_utf8(bytes).map_err(|e| {
        Error::source_not_found(path.display().to_string(), format!("not valid UTF-8: {}", e))
    })
}

/// Parse and validate WGSL source on the host.
///
/// Parse and validation failures carry the full rendered diagnostic.
pub fn compile_source(source: impl Into<String>) -> Result<CompiledSource> {
    let source = source.into();

    let module = naga::front::wgsl::parse_str(&source)
        .map_err(|e| Error::compile_failed(e.emit_to_string(&source)))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| Error::compile_failed(e.emit_to_string(&source)))?;

    Ok(CompiledSource {
        source,
        module,
        info,
    })
}

/// Kernel source built for one device.
pub struct Program {
    compiled: CompiledSource,
    module: wgpu::ShaderModule,
    gpu: Arc<wgpu::Device>,
}

impl Program {
    /// Compile `source` for the context's device. Blocking, not cached.
    pub fn build(ctx: &ExecutionContext, source: impl Into<String>) -> Result<Self> {
        let compiled = compile_source(source)?;

        let (module, error) = capture_errors(ctx.gpu(), || {
            ctx.gpu().create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("offload-program"),
                source: wgpu::ShaderSource::Wgsl(compiled.source().into()),
            })
        });
        if let Some(err) = error {
            return Err(Error::compile_failed(err.to_string()));
        }

        tracing::debug!(
            entry_points = ?compiled.entry_points(),
            "program built for {}",
            ctx.device().summary()
        );

        Ok(Self {
            compiled,
            module,
            gpu: ctx.gpu_handle(),
        })
    }

    /// Host-side module the program was built from.
    pub fn compiled(&self) -> &CompiledSource {
        &self.compiled
    }

    /// Extract the compute entry point `entry` as a kernel.
    pub fn kernel(&self, entry: &str) -> Result<Kernel> {
        let signature = self.compiled.signature(entry)?;

        let entries: Vec<wgpu::BindGroupLayoutEntry> = signature
            .params
            .iter()
            .enumerate()
            .map(|(binding, param)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match param {
                        Param::Scalar(_) => wgpu::BufferBindingType::Uniform,
                        Param::Buffer { writable } => wgpu::BufferBindingType::Storage {
                            read_only: !writable,
                        },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let ((layout, pipeline), error) = capture_errors(&self.gpu, || {
            let layout = self
                .gpu
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("offload-kernel-layout"),
                    entries: &entries,
                });

            let pipeline_layout = self
                .gpu
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("offload-kernel-pipeline-layout"),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });

            let pipeline = self
                .gpu
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("offload-kernel-pipeline"),
                    layout: Some(&pipeline_layout),
                    module: &self.module,
                    entry_point: entry,
                });

            (layout, pipeline)
        });
        if let Some(err) = error {
            return Err(Error::compile_failed(err.to_string()));
        }

        Ok(Kernel {
            signature,
            layout,
            pipeline,
            gpu: Arc::clone(&self.gpu),
        })
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("entry_points", &self.compiled.entry_points())
            .finish_non_exhaustive()
    }
}

/// Named, invocable entry point of a built [`Program`].
pub struct Kernel {
    signature: KernelSignature,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    gpu: Arc<wgpu::Device>,
}

impl Kernel {
    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.signature.entry
    }

    /// Reflected parameter list.
    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    /// Workgroup size declared by the entry point.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.signature.workgroup_size
    }

    pub(crate) fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub(crate) fn gpu(&self) -> &wgpu::Device {
        &self.gpu
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Load, compile and extract one kernel.
pub fn build_kernel(
    ctx: &ExecutionContext,
    path: impl AsRef<Path>,
    entry: &str,
) -> Result<(Program, Kernel)> {
    let source = load_source(&path)?;
    tracing::debug!(path = %path.as_ref().display(), bytes = source.len(), "kernel source loaded");

    let program = Program::build(ctx, source)?;
    let kernel = program.kernel(entry)?;
    Ok((program, kernel))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTOR_OPS: &str = include_str!("../../kernels/vector_ops.wgsl");

    #[test]
    fn test_vector_ops_signature() {
        let compiled = compile_source(VECTOR_OPS).unwrap();
        let signature = compiled.signature("vector_add").unwrap();

        assert_eq!(
            signature.params,
            vec![
                Param::Scalar(ScalarKind::U32),
                Param::Buffer { writable: false },
                Param::Buffer { writable: false },
                Param::Buffer { writable: true },
            ]
        );
        assert_eq!(signature.workgroup_size, [256, 1, 1]);
    }

    #[test]
    fn test_invalid_source_keeps_log() {
        let err = compile_source("@compute @workgroup_size(1) fn broken( {").unwrap_err();
        match err {
            Error::CompileFailed { log } => {
                assert!(!log.is_empty());
                assert!(log.contains("error"));
            }
            other => panic!("expected CompileFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_error_is_compile_failure() {
        let source = r#"
            @group(0) @binding(0) var<storage, read_write> dst: array<i32>;
            @compute @workgroup_size(1)
            fn main() { dst[0] = 1.5; }
        "#;
        assert!(matches!(
            compile_source(source),
            Err(Error::CompileFailed { .. })
        ));
    }

    #[test]
    fn test_missing_entry() {
        let compiled = compile_source(VECTOR_OPS).unwrap();
        assert!(matches!(
            compiled.signature("vector_mul"),
            Err(Error::EntryNotFound(name)) if name == "vector_mul"
        ));
    }

    #[test]
    fn test_non_contiguous_bindings_rejected() {
        let source = r#"
            @group(0) @binding(0) var<uniform> n: u32;
            @group(0) @binding(2) var<storage, read_write> dst: array<u32>;
            @compute @workgroup_size(64)
            fn fill(@builtin(global_invocation_id) id: vec3<u32>) {
                if (id.x < n) { dst[id.x] = id.x; }
            }
        "#;
        let compiled = compile_source(source).unwrap();
        assert!(matches!(
            compiled.signature("fill"),
            Err(Error::CompileFailed { .. })
        ));
    }

    #[test]
    fn test_load_source_missing() {
        let err = load_source("/nonexistent/vector_ops.wgsl").unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
    }

    #[test]
    fn test_load_source_not_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.wgsl");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            load_source(&path),
            Err(Error::SourceNotFound { .. })
        ));
    }
}
