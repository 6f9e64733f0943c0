// devqueue: command-queue dispatch for compute devices
//
// One queue type, one submission protocol: optional blocking vs.
// event-returning submission, wait-list dependencies, capability gating on
// the device's negotiated version, and host-side image walking for work the
// device cannot do natively.
//
// Layers, bottom up:
//
//   error, version        status codes, capability tiers, dispatch table
//   event                 completion events, user events, wait lists
//   context, memory       devices, contexts, buffers, images, SVM pointers
//   kernel, native        kernels, launch ranges, host-function calls
//   transport             Backend / Channel traits the queue submits through
//   worker, host          a threaded channel and the host reference device
//   queue, walk           the dispatch core and the image-walk engine
//   gpu (feature "wgpu")  a wgpu-backed device

pub mod error;
pub mod version;
pub mod event;
pub mod context;
pub mod memory;
pub mod kernel;
pub mod native;
pub mod transport;
pub mod worker;
pub mod host;
pub mod queue;
mod walk;

#[cfg(feature = "wgpu")]
pub mod gpu;

pub use context::{Context, Device};
pub use error::{status, QueueError, Result};
pub use event::{Event, EventProfile, EventStatus, UserEvent, WaitList};
pub use kernel::{HostProgram, Kernel, NdRange, WorkItem};
pub use memory::{
    Buffer, ChannelOrder, ChannelType, FillColor, Image, ImageFormat, ImageRegion, ImageType,
    MapFlags, MappedRegion, MemObject, MigrationFlags, RectCopy, SvmPtr,
};
pub use native::HostCall;
pub use queue::CommandQueue;
pub use transport::{Backend, Channel, QueueProperties};
pub use version::{DispatchTable, OpKind, Route, Version};
