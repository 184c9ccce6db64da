//! Compute device discovery and selection.
//!
//! A *platform* is a wgpu backend that exposes at least one adapter.
//! Platforms are visited in a fixed priority order and only the first one
//! is searched, mirroring how an ICD loader hands out its first platform.
//! Within that platform an accelerator is preferred; a general-purpose
//! (CPU) adapter is taken only when no accelerator exists.

use crate::error::{Error, Result};
use std::fmt;

/// Backend priority used to order platforms.
pub const PLATFORM_ORDER: [wgpu::Backend; 4] = [
    wgpu::Backend::Vulkan,
    wgpu::Backend::Metal,
    wgpu::Backend::Dx12,
    wgpu::Backend::Gl,
];

/// Broad class of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Discrete, integrated or virtual GPU.
    Accelerator,
    /// Software rasterizer or otherwise CPU-backed adapter.
    GeneralPurpose,
}

impl DeviceClass {
    /// Classify a wgpu device type.
    pub fn from_device_type(ty: wgpu::DeviceType) -> Self {
        match ty {
            wgpu::DeviceType::DiscreteGpu
            | wgpu::DeviceType::IntegratedGpu
            | wgpu::DeviceType::VirtualGpu => DeviceClass::Accelerator,
            // Unknown adapters are treated as generic processors.
            wgpu::DeviceType::Cpu | wgpu::DeviceType::Other => DeviceClass::GeneralPurpose,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Accelerator => write!(f, "accelerator"),
            DeviceClass::GeneralPurpose => write!(f, "general-purpose"),
        }
    }
}

/// How the selector treats a platform without accelerators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub allow_fallback: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            allow_fallback: true,
        }
    }
}

/// Hardware-independent description of an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub class: DeviceClass,
    pub platform: wgpu::Backend,
    pub driver: String,
}

impl DeviceSummary {
    /// Summarize what the adapter reports about itself.
    pub fn from_info(info: &wgpu::AdapterInfo) -> Self {
        let driver = if info.driver_info.is_empty() {
            info.driver.trim().to_string()
        } else {
            format!("{} {}", info.driver.trim(), info.driver_info.trim())
        };

        Self {
            name: info.name.trim().to_string(),
            class: DeviceClass::from_device_type(info.device_type),
            platform: info.backend,
            driver,
        }
    }
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {:?})", self.name, self.class, self.platform)
    }
}

/// A selected compute device. Immutable once chosen.
pub struct Device {
    adapter: wgpu::Adapter,
    summary: DeviceSummary,
}

impl Device {
    /// Name, class, platform and driver of the device.
    pub fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    /// Accelerator or general-purpose.
    pub fn class(&self) -> DeviceClass {
        self.summary.class
    }

    /// Limits the adapter supports.
    pub fn limits(&self) -> wgpu::Limits {
        self.adapter.limits()
    }

    pub(crate) fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Highest-priority platform (per [`PLATFORM_ORDER`]) present in `platforms`.
pub fn first_platform(platforms: &[wgpu::Backend]) -> Option<wgpu::Backend> {
    PLATFORM_ORDER
        .iter()
        .copied()
        .find(|backend| platforms.contains(backend))
}

/// Pick a device among the adapters of one platform.
///
/// Returns the index of the first accelerator, else (when the policy allows
/// it) the first general-purpose adapter.
pub fn choose(candidates: &[DeviceSummary], policy: SelectionPolicy) -> Option<usize> {
    let accelerator = candidates
        .iter()
        .position(|c| c.class == DeviceClass::Accelerator);

    match accelerator {
        Some(index) => Some(index),
        None if policy.allow_fallback => candidates
            .iter()
            .position(|c| c.class == DeviceClass::GeneralPurpose),
        None => None,
    }
}

/// Enumerate every adapter the instance can see. Never fails.
pub fn probe_devices(instance: &wgpu::Instance, backends: wgpu::Backends) -> Vec<DeviceSummary> {
    instance
        .enumerate_adapters(backends)
        .into_iter()
        .map(|adapter| DeviceSummary::from_info(&adapter.get_info()))
        .collect()
}

/// Pick the device among every adapter the instance reported.
///
/// Only adapters of the highest-priority platform are candidates. Returns
/// the index into `summaries` of the chosen device.
pub fn pick_device(
    summaries: &[DeviceSummary],
    backends: wgpu::Backends,
    policy: SelectionPolicy,
) -> Result<usize> {
    let platforms: Vec<wgpu::Backend> = summaries.iter().map(|s| s.platform).collect();
    let platform = first_platform(&platforms).ok_or_else(|| {
        Error::platform_not_found(format!("no adapters exposed by backends {:?}", backends))
    })?;
    tracing::debug!(?platform, adapters = summaries.len(), "identified compute platform");

    let in_platform: Vec<usize> = summaries
        .iter()
        .enumerate()
        .filter(|(_, summary)| summary.platform == platform)
        .map(|(index, _)| index)
        .collect();
    let candidates: Vec<DeviceSummary> = in_platform.iter().map(|&i| summaries[i].clone()).collect();

    let chosen = choose(&candidates, policy).ok_or_else(|| {
        let what = if policy.allow_fallback {
            "no accelerator or general-purpose device"
        } else {
            "no accelerator device (fallback disabled)"
        };
        Error::device_not_found(format!("{} on platform {:?}", what, platform))
    })?;

    Ok(in_platform[chosen])
}

/// Select the device the pipeline runs on.
pub fn select_device(
    instance: &wgpu::Instance,
    backends: wgpu::Backends,
    policy: SelectionPolicy,
) -> Result<Device> {
    let mut adapters: Vec<wgpu::Adapter> =
        instance.enumerate_adapters(backends).into_iter().collect();
    let summaries: Vec<DeviceSummary> = adapters
        .iter()
        .map(|adapter| DeviceSummary::from_info(&adapter.get_info()))
        .collect();

    let index = pick_device(&summaries, backends, policy)?;
    let summary = summaries[index].clone();
    if summary.class == DeviceClass::GeneralPurpose {
        tracing::warn!(device = %summary, "no accelerator found, falling back to general-purpose device");
    } else {
        tracing::info!(device = %summary, "selected accelerator");
    }

    Ok(Device {
        adapter: adapters.swap_remove(index),
        summary,
    })
}
