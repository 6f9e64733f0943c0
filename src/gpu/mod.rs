// gpu/mod.rs — wgpu-backed device (feature "wgpu").
//
// A second implementation of the transport traits, next to the host
// reference device. The host device stays the authoritative reference:
// GPU results are checked against it in the (ignored) integration tests.
//
//   device   adapter selection, profiles, workgroup sizes, GpuError
//   memory   buffer/texture storage and staging transfers
//   kernel   WGSL programs and compute pipelines
//   backend  GpuBackend (Backend) and its executor
//
// Usage:
//
//   let gpu = GpuDevice::new()?;
//   let device = Device::new(GpuBackend::new(gpu));
//   let context = Context::new(&device);
//   let queue = CommandQueue::new(&context, &device, QueueProperties::empty())?;

pub mod backend;
pub mod device;
pub mod kernel;
pub mod memory;

pub use backend::GpuBackend;
pub use device::{GpuDevice, GpuError, GpuProfile, WorkgroupSize};
pub use kernel::{gpu_kernel, GpuProgram};
