// transport.rs — The seam between the dispatch core and a device runtime.
//
// Two traits:
//
//   Backend  → the device side: identity, capability tier, memory
//              allocation, SVM, queue creation.
//   Channel  → one submission channel (what a queue wraps): "submit
//              operation O with dependencies D", plus flush/finish.
//
// The dispatch core never executes anything itself. It validates
// preconditions, resolves the route for the queue's capability tier, and
// hands an `Operation` to the channel. The channel either blocks until the
// operation finishes (`Completion::Block`) or returns a trackable event
// straight away (`Completion::Track`).
//
// Errors cross this boundary as raw status codes (`TransportResult`); the
// queue wraps them in `QueueError::Transport` unchanged.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::TransportResult;
use crate::event::Event;
use crate::kernel::{Kernel, NdRange};
use crate::memory::{
    Buffer, FillColor, HostPtr, HostSource, Image, ImageDesc, ImageRegion, MapFlags,
    MappedRegion, MemHandle, MemObject, MigrationFlags, RectCopy, SvmPtr,
};
use crate::native::NativeCall;
use crate::version::{OpKind, Version};

bitflags! {
    /// Queue creation properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueProperties: u32 {
        const OUT_OF_ORDER_EXEC_MODE_ENABLE = 1 << 0;
        const PROFILING_ENABLE = 1 << 1;
    }
}

/// Device-side transport.
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Capability tier. May be expensive; queues call it at most once.
    fn version(&self) -> Version;

    fn allocate_buffer(&self, size: usize) -> TransportResult<MemHandle>;

    fn allocate_image(&self, desc: &ImageDesc) -> TransportResult<MemHandle>;

    fn svm_alloc(&self, size: usize) -> TransportResult<SvmPtr>;

    /// Legacy queue creation entry point.
    fn create_queue(&self, properties: QueueProperties) -> TransportResult<Arc<dyn Channel>>;

    /// Property-list queue creation entry point (tier 2.0 and later).
    fn create_queue_with_properties(
        &self,
        properties: QueueProperties,
    ) -> TransportResult<Arc<dyn Channel>> {
        self.create_queue(properties)
    }
}

/// How the submitter wants to learn about completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Return only after the operation has finished.
    Block,
    /// Return immediately with an event tracking the operation.
    Track,
}

/// What a successful submission hands back.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub event: Event,
    /// Set for map operations: valid as soon as `submit` returns, readable
    /// once `event` has completed.
    pub mapping: Option<MappedRegion>,
}

/// One submission channel.
pub trait Channel: Send + Sync + 'static {
    /// Identity of the channel, used for queue equality.
    fn id(&self) -> u64;

    fn submit(
        &self,
        op: Operation,
        deps: &[Event],
        completion: Completion,
    ) -> TransportResult<Receipt>;

    fn flush(&self) -> TransportResult<()>;

    /// Block until every submitted operation has finished.
    fn finish(&self) -> TransportResult<()>;

    fn properties(&self) -> QueueProperties;
}

/// One unit of work, as handed to the transport.
///
/// Byte ranges and regions have already been bounds-checked by the queue.
pub enum Operation {
    ReadBuffer {
        buffer: Buffer,
        offset: usize,
        len: usize,
        dst: HostPtr,
    },
    WriteBuffer {
        buffer: Buffer,
        offset: usize,
        src: HostSource,
    },
    CopyBuffer {
        src: Buffer,
        dst: Buffer,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    },
    ReadBufferRect {
        buffer: Buffer,
        rect: RectCopy,
        dst: HostPtr,
    },
    WriteBufferRect {
        buffer: Buffer,
        rect: RectCopy,
        src: HostPtr,
    },
    CopyBufferRect {
        src: Buffer,
        dst: Buffer,
        rect: RectCopy,
    },
    FillBuffer {
        buffer: Buffer,
        pattern: Vec<u8>,
        offset: usize,
        len: usize,
    },
    MapBuffer {
        buffer: Buffer,
        flags: MapFlags,
        offset: usize,
        len: usize,
    },
    MapImage {
        image: Image,
        flags: MapFlags,
        region: ImageRegion,
    },
    Unmap {
        mem: MemObject,
        ptr: HostPtr,
    },
    ReadImage {
        image: Image,
        region: ImageRegion,
        row_pitch: usize,
        slice_pitch: usize,
        dst: HostPtr,
    },
    WriteImage {
        image: Image,
        region: ImageRegion,
        row_pitch: usize,
        slice_pitch: usize,
        src: HostSource,
    },
    CopyImage {
        src: Image,
        dst: Image,
        src_region: ImageRegion,
        dst_origin: [usize; 3],
    },
    CopyImageToBuffer {
        src: Image,
        dst: Buffer,
        src_region: ImageRegion,
        dst_offset: usize,
    },
    CopyBufferToImage {
        src: Buffer,
        dst: Image,
        src_offset: usize,
        dst_region: ImageRegion,
    },
    FillImage {
        image: Image,
        color: FillColor,
        region: ImageRegion,
    },
    MigrateMemObjects {
        objects: Vec<MemObject>,
        flags: MigrationFlags,
    },
    NdRangeKernel {
        kernel: Kernel,
        range: NdRange,
    },
    Task {
        kernel: Kernel,
    },
    NativeKernel {
        call: NativeCall,
    },
    /// Completes once every earlier submission has finished.
    Marker,
    /// Completes once its wait list (or, if empty, every earlier
    /// submission) has finished.
    MarkerWithWaitList,
    /// Later submissions start only after every earlier one finished.
    Barrier,
    /// Like `Barrier`, scoped to the wait list when one is given.
    BarrierWithWaitList,
    SvmMemcpy {
        dst: HostPtr,
        src: HostPtr,
        len: usize,
    },
    SvmFill {
        ptr: HostPtr,
        pattern: Vec<u8>,
        len: usize,
    },
    SvmMap {
        ptr: HostPtr,
        len: usize,
        flags: MapFlags,
    },
    SvmUnmap {
        ptr: HostPtr,
    },
    SvmFree {
        ptrs: Vec<SvmPtr>,
    },
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::ReadBuffer { .. } => OpKind::ReadBuffer,
            Operation::WriteBuffer { .. } => OpKind::WriteBuffer,
            Operation::CopyBuffer { .. } => OpKind::CopyBuffer,
            Operation::ReadBufferRect { .. } => OpKind::ReadBufferRect,
            Operation::WriteBufferRect { .. } => OpKind::WriteBufferRect,
            Operation::CopyBufferRect { .. } => OpKind::CopyBufferRect,
            Operation::FillBuffer { .. } => OpKind::FillBuffer,
            Operation::MapBuffer { .. } => OpKind::MapBuffer,
            Operation::MapImage { .. } => OpKind::MapImage,
            Operation::Unmap { .. } => OpKind::Unmap,
            Operation::ReadImage { .. } => OpKind::ReadImage,
            Operation::WriteImage { .. } => OpKind::WriteImage,
            Operation::CopyImage { .. } => OpKind::CopyImage,
            Operation::CopyImageToBuffer { .. } => OpKind::CopyImageToBuffer,
            Operation::CopyBufferToImage { .. } => OpKind::CopyBufferToImage,
            Operation::FillImage { .. } => OpKind::FillImage,
            Operation::MigrateMemObjects { .. } => OpKind::MigrateMemObjects,
            Operation::NdRangeKernel { .. } => OpKind::NdRangeKernel,
            Operation::Task { .. } => OpKind::Task,
            Operation::NativeKernel { .. } => OpKind::NativeKernel,
            Operation::Marker => OpKind::Marker,
            Operation::MarkerWithWaitList => OpKind::MarkerWithWaitList,
            Operation::Barrier => OpKind::Barrier,
            Operation::BarrierWithWaitList => OpKind::BarrierWithWaitList,
            Operation::SvmMemcpy { .. } => OpKind::SvmMemcpy,
            Operation::SvmFill { .. } => OpKind::SvmFill,
            Operation::SvmMap { .. } => OpKind::SvmMap,
            Operation::SvmUnmap { .. } => OpKind::SvmUnmap,
            Operation::SvmFree { .. } => OpKind::SvmFree,
        }
    }

    /// Markers and barriers carry no work of their own.
    pub fn is_sync_point(&self) -> bool {
        matches!(
            self,
            Operation::Marker
                | Operation::MarkerWithWaitList
                | Operation::Barrier
                | Operation::BarrierWithWaitList
        )
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self, Operation::Barrier | Operation::BarrierWithWaitList)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation::{}", self.kind())
    }
}
