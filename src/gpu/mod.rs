//! Accelerator dispatch: device selection, execution context, program
//! build, buffers and kernel dispatch on top of wgpu.

pub mod buffer;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod kernel;

pub use buffer::{AccessMode, DeviceBuffer};
pub use context::{CommandQueue, ExecutionContext};
pub use device::{
    choose, pick_device, probe_devices, select_device, Device, DeviceClass, DeviceSummary,
    SelectionPolicy,
};
pub use dispatch::{
    bind_args, binding_windows, check_args, check_window, enqueue, ArgTag, BoundKernel,
    CompletionEvent, KernelArg, WorkDomain,
};
pub use kernel::{
    build_kernel, compile_source, load_source, CompiledSource, Kernel, KernelSignature, Param,
    Program, ScalarKind,
};
