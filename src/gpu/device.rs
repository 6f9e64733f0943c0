// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate adapters and select the best non-software one.
//   - Expose a `GpuProfile` for simulating constrained hardware on a
//     development machine (e.g. cap invocations to match an embedded GPU).
//   - Provide `WorkgroupSize`, validated against the active profile and
//     injected into compute pipelines as WGSL override constants.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe (software renderers that appear as valid
// devices). We enumerate explicitly and prefer real hardware, falling back
// to whatever exists only as a last resort.
//
// DEVICE LIMITS:
// We request *lower* limits than the hardware actually supports when
// running under a non-Native profile. wgpu validates every dispatch against
// the requested limits, so launches that would fail on the small target
// are caught at dev time. This is purely a correctness harness; it does
// not make the GPU run slower.
//
// WORKGROUP SIZES:
// WGSL `override` constants are injected at pipeline creation time via
// `PipelineCompilationOptions::constants`. This keeps kernel source
// identical across configurations and preserves the shader compilation
// cache.

use std::collections::HashMap;
use std::fmt;

/// Hardware profile controlling device limits and default workgroup sizes.
///
/// Use `Native` on the development machine. Use `Embedded` to simulate a
/// small GPU: wgpu rejects any launch exceeding its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuProfile {
    /// The adapter's default limits. No artificial caps.
    Native,
    /// 256 invocations per workgroup, 4096² textures, 128 MiB bindings.
    Embedded,
}

impl fmt::Display for GpuProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuProfile::Native => write!(f, "Native"),
            GpuProfile::Embedded => write!(f, "Embedded (simulated limits)"),
        }
    }
}

/// A workgroup size for compute launches of up to three dimensions.
///
/// The product of the three extents must not exceed the profile's
/// `max_compute_invocations_per_workgroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupSize {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        WorkgroupSize { x, y, z }
    }

    /// Total invocations per workgroup.
    pub fn total(&self) -> u32 {
        self.x * self.y * self.z
    }

    /// Constants map for `PipelineCompilationOptions`.
    ///
    /// Kernels declare
    ///
    /// ```wgsl
    /// override WORKGROUP_X: u32 = 64u;
    /// override WORKGROUP_Y: u32 = 1u;
    /// override WORKGROUP_Z: u32 = 1u;
    ///
    /// @compute @workgroup_size(WORKGROUP_X, WORKGROUP_Y, WORKGROUP_Z)
    /// fn main(...) { ... }
    /// ```
    ///
    /// and the values here are injected when the pipeline is built.
    pub fn as_constants(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("WORKGROUP_X".to_string(), self.x as f64),
            ("WORKGROUP_Y".to_string(), self.y as f64),
            ("WORKGROUP_Z".to_string(), self.z as f64),
        ])
    }

    /// Validated default for a launch of `dims` dimensions.
    ///
    /// - `Native`: 128 invocations (4 NVIDIA warps, 2 AMD wavefronts).
    /// - `Embedded`: 64 invocations, leaving scheduler headroom under the
    ///   256 limit.
    pub fn for_launch(profile: GpuProfile, dims: u32) -> Self {
        match (profile, dims) {
            (GpuProfile::Native, 1) => WorkgroupSize::new(128, 1, 1),
            (GpuProfile::Native, 2) => WorkgroupSize::new(16, 8, 1),
            (GpuProfile::Native, _) => WorkgroupSize::new(8, 4, 4),
            (GpuProfile::Embedded, 1) => WorkgroupSize::new(64, 1, 1),
            (GpuProfile::Embedded, 2) => WorkgroupSize::new(8, 8, 1),
            (GpuProfile::Embedded, _) => WorkgroupSize::new(4, 4, 4),
        }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}×{} ({} invocations)", self.x, self.y, self.z, self.total())
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Adapter, device, queue, and active profile.
///
/// Expensive to create; hold one per process and share it (the backend
/// wraps it in an `Arc`).
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue`; some
/// layered drivers crash when the instance goes first.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: GpuProfile,
    pub adapter_info: AdapterInfo,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the best available adapter with
    /// `GpuProfile::Native` limits.
    ///
    /// # Errors
    /// `NoSuitableAdapter` if nothing is enumerated, `DeviceRequest` if the
    /// driver refuses the requested limits.
    pub fn new() -> Result<Self, GpuError> {
        Self::new_with_profile(GpuProfile::Native)
    }

    pub fn new_with_profile(profile: GpuProfile) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: GpuProfile) -> Result<Self, GpuError> {
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER keeps layered drivers (e.g.
        // D3D12-to-Vulkan on WSL2) in the enumeration. Compute-only use does
        // not depend on the conformance-required rendering behaviour.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags,
            ..Default::default()
        });

        // Tiered selection:
        //   1. Discrete, integrated, virtual or other (real hardware or a
        //      pass-through layer).
        //   2. Anything at all, software included. Logged so it is obvious.
        let all_adapters = instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            tracing::debug!(
                name = %info.name,
                backend = ?info.backend,
                device_type = ?info.device_type,
                "adapter enumerated"
            );
        }

        let adapter = all_adapters
            .into_iter()
            .find(|a| !matches!(a.get_info().device_type, wgpu::DeviceType::Cpu))
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::PRIMARY)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };
        if raw_info.device_type == wgpu::DeviceType::Cpu {
            tracing::warn!(adapter = %adapter_info, "only a software adapter is available");
        }

        let limits = limits_for_profile(profile);

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("devqueue"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        tracing::info!(adapter = %adapter_info, %profile, "gpu device ready");

        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            _instance: instance,
        })
    }

    /// Validate a caller-chosen workgroup size against the profile.
    pub fn validate_workgroup_size(&self, size: WorkgroupSize) -> Result<(), GpuError> {
        check_workgroup_size(self.profile, size)
    }

    /// Number of workgroups needed to cover `global` with `size`.
    ///
    /// Ceiling division; kernels must guard against invocations past the
    /// global extent:
    /// ```wgsl
    /// if any(gid >= launch.global.xyz) { return; }
    /// ```
    pub fn dispatch_size(&self, global: [usize; 3], size: WorkgroupSize) -> (u32, u32, u32) {
        dispatch_size(global, size)
    }

    /// Submit nothing and wait until the GPU is idle.
    pub(crate) fn wait_idle(&self) {
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {} }}",
            self.adapter_info, self.profile
        )
    }
}

impl fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// wgpu limits for the given profile.
fn limits_for_profile(profile: GpuProfile) -> wgpu::Limits {
    match profile {
        GpuProfile::Native => wgpu::Limits::default(),

        GpuProfile::Embedded => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_1d: 4096,
            max_texture_dimension_2d: 4096,
            max_texture_dimension_3d: 256,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

pub(crate) fn max_invocations_for_profile(profile: GpuProfile) -> u32 {
    limits_for_profile(profile).max_compute_invocations_per_workgroup
}

pub(crate) fn check_workgroup_size(profile: GpuProfile, size: WorkgroupSize) -> Result<(), GpuError> {
    let total = size.total();
    let max = max_invocations_for_profile(profile);
    if total == 0 || total > max {
        return Err(GpuError::WorkgroupTooLarge { total, max });
    }
    Ok(())
}

pub(crate) fn dispatch_size(global: [usize; 3], size: WorkgroupSize) -> (u32, u32, u32) {
    let groups = |g: usize, w: u32| g.div_ceil(w as usize) as u32;
    (
        groups(global[0], size.x),
        groups(global[1], size.y),
        groups(global[2], size.z),
    )
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialisation and configuration.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// Nothing was enumerated on any primary backend.
    #[error("no suitable GPU adapter found; check that Vulkan, Metal or DX12 drivers are installed")]
    NoSuitableAdapter,
    /// Driver issue or unsupported limits.
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    /// Workgroup size is zero or exceeds the profile's invocation limit.
    #[error("workgroup size {total} outside profile limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },
}

// ============================================================
// Tests
// ============================================================
