// queue.rs — The dispatch core.
//
// `CommandQueue` is the single doorway through which work reaches a device.
// Every enqueue call follows the same protocol:
//
//   1. Preconditions  → asserted. A null queue, an operand from another
//                       context, an out-of-bounds range or a null host
//                       pointer is a caller bug and panics.
//   2. Gating         → the queue's cached capability tier is looked up in
//                       the `DispatchTable`. Under-tier operations fail with
//                       `QueueError::Unsupported` and never reach the
//                       transport. Tiered operations pick the legacy or
//                       modern entry point here.
//   3. Submission     → the operation goes to the channel with the caller's
//                       wait list. Any status the transport reports comes
//                       back as `QueueError::Transport` with its code intact.
//
// BLOCKING VS. ASYNCHRONOUS
// ─────────────────────────
// Every enqueue call takes `event: Option<&mut Event>`.
//
//   None            → the call blocks until the operation has finished.
//   Some(&mut ev)   → the call returns as soon as the operation is accepted,
//                     storing its completion event in `ev`.
//
// There is no separate "blocking" flag. Failures that happen after an
// asynchronous submission was accepted surface only through the event.
// The `*_async` helpers are the same calls returning the event directly.
//
// VERSION CACHE
// ─────────────
// The device's capability tier is resolved at most once per queue and
// cached in a `OnceLock`; clones share the cache.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::context::{Context, Device};
use crate::error::{status, QueueError, Result};
use crate::event::{Event, WaitList};
use crate::kernel::{Kernel, NdRange};
use crate::memory::{
    Buffer, HostPtr, HostSource, Image, ImageRegion, MapFlags, MappedRegion, MemObject,
    MigrationFlags, RectCopy, SvmPtr,
};
use crate::native::HostCall;
use crate::transport::{Channel, Completion, Operation, QueueProperties, Receipt};
use crate::version::{DispatchTable, OpKind, Route, Version};

struct QueueInner {
    channel: Arc<dyn Channel>,
    context: Context,
    device: Device,
    version: OnceLock<Version>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        tracing::debug!(channel = self.channel.id(), "command queue released");
    }
}

/// A reference-counted handle to a device submission channel.
///
/// Cloning shares the channel; the channel is released with the last
/// clone. The default value is the *null queue*, which is valid to hold
/// and compare but panics on any enqueue.
#[derive(Clone, Default)]
pub struct CommandQueue {
    inner: Option<Arc<QueueInner>>,
}

// ============================================================
// Lifecycle and accessors
// ============================================================

impl CommandQueue {
    /// Create a queue for `device` in `context`.
    ///
    /// Devices at tier 2.0 or later are asked through the property-list
    /// entry point, older ones through the legacy one.
    pub fn new(context: &Context, device: &Device, properties: QueueProperties) -> Result<Self> {
        assert!(
            context.device() == device,
            "queue device must be the device of its context"
        );
        let version = device.version();
        let backend = device.backend();
        let route = DispatchTable::new(version).route(OpKind::CreateQueue);
        let channel = match route {
            Route::Modern => backend.create_queue_with_properties(properties)?,
            _ => backend.create_queue(properties)?,
        };
        tracing::debug!(
            channel = channel.id(),
            device = %device.name(),
            %version,
            ?route,
            ?properties,
            "command queue created"
        );
        let cache = OnceLock::new();
        let _ = cache.set(version);
        Ok(CommandQueue {
            inner: Some(Arc::new(QueueInner {
                channel,
                context: context.clone(),
                device: device.clone(),
                version: cache,
            })),
        })
    }

    /// Wrap an existing channel. Its device version is resolved on first
    /// use.
    pub fn from_channel(channel: Arc<dyn Channel>, context: &Context, device: &Device) -> Self {
        assert!(
            context.device() == device,
            "queue device must be the device of its context"
        );
        CommandQueue {
            inner: Some(Arc::new(QueueInner {
                channel,
                context: context.clone(),
                device: device.clone(),
                version: OnceLock::new(),
            })),
        }
    }

    pub fn null() -> Self {
        CommandQueue { inner: None }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// The underlying channel.
    pub fn get(&self) -> &Arc<dyn Channel> {
        &self.inner().channel
    }

    pub fn device(&self) -> &Device {
        &self.inner().device
    }

    pub fn context(&self) -> &Context {
        &self.inner().context
    }

    pub fn properties(&self) -> QueueProperties {
        self.inner().channel.properties()
    }

    /// Capability tier of the queue's device, queried once and cached.
    pub fn version(&self) -> Version {
        let inner = self.inner();
        *inner.version.get_or_init(|| inner.device.version())
    }

    /// `true` if the queue's device is at least `major.minor`.
    pub fn check_device_version(&self, major: u32, minor: u32) -> bool {
        self.version() >= Version::new(major, minor)
    }

    pub fn dispatch_table(&self) -> DispatchTable {
        DispatchTable::new(self.version())
    }

    pub fn flush(&self) -> Result<()> {
        self.inner().channel.flush().map_err(QueueError::transport)
    }

    /// Block until everything submitted so far has finished.
    pub fn finish(&self) -> Result<()> {
        self.inner().channel.finish().map_err(QueueError::transport)
    }

    // --------------------------------------------------------
    // Internals shared by every enqueue call
    // --------------------------------------------------------

    fn inner(&self) -> &QueueInner {
        match self.inner.as_deref() {
            Some(inner) => inner,
            None => panic!("operation on a null command queue"),
        }
    }

    /// Resolve the route for `op`, rejecting under-tier operations.
    pub(crate) fn gate(&self, op: OpKind) -> Result<Route> {
        let version = self.version();
        match DispatchTable::new(version).route(op) {
            Route::Unsupported { required } => {
                tracing::debug!(op = %op, %required, actual = %version, "rejected: device tier too low");
                Err(QueueError::Unsupported {
                    op,
                    required,
                    actual: version,
                })
            }
            route => Ok(route),
        }
    }

    pub(crate) fn submit(
        &self,
        op: Operation,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<Receipt> {
        let inner = self.inner();
        let completion = match event {
            Some(_) => Completion::Track,
            None => Completion::Block,
        };
        tracing::trace!(op = %op.kind(), ?completion, deps = wait.len(), "submit");
        let receipt = inner
            .channel
            .submit(op, wait.events(), completion)
            .map_err(QueueError::transport)?;
        if let Some(slot) = event {
            *slot = receipt.event.clone();
        }
        Ok(receipt)
    }

    pub(crate) fn assert_context(&self, context: &Context, what: &str) {
        assert!(
            self.context() == context,
            "{what} belongs to a different context than the queue"
        );
    }

    fn assert_buffer_range(&self, buffer: &Buffer, offset: usize, size: usize) {
        self.assert_context(buffer.context(), "buffer");
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= buffer.size()),
            "buffer range out of bounds: offset {offset} + size {size} > {}",
            buffer.size()
        );
    }

    pub(crate) fn assert_image_region(&self, image: &Image, region: &ImageRegion) {
        self.assert_context(image.context(), "image");
        region.assert_within(image);
    }
}

fn assert_host_ptr<T>(ptr: *const T) {
    assert!(!ptr.is_null(), "host pointer must not be null");
}

fn into_event(submit: impl FnOnce(&mut Event) -> Result<()>) -> Result<Event> {
    let mut event = Event::null();
    submit(&mut event)?;
    Ok(event)
}

fn mapping_of(receipt: Receipt) -> Result<MappedRegion> {
    receipt
        .mapping
        .ok_or(QueueError::Transport { code: status::MAP_FAILURE })
}

// ============================================================
// Buffers
// ============================================================

impl CommandQueue {
    /// Read `size` bytes at `offset` of `buffer` into `host_ptr`.
    ///
    /// # Safety
    /// `host_ptr` must be valid for `size` bytes of writes until the
    /// operation has finished (immediately for a blocking call).
    pub unsafe fn enqueue_read_buffer_raw(
        &self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        host_ptr: *mut u8,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_buffer_range(buffer, offset, size);
        assert_host_ptr(host_ptr);
        self.gate(OpKind::ReadBuffer)?;
        let op = Operation::ReadBuffer {
            buffer: buffer.clone(),
            offset,
            len: size,
            dst: HostPtr::new(host_ptr),
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Blocking read into `dst`.
    pub fn enqueue_read_buffer(
        &self,
        buffer: &Buffer,
        offset: usize,
        dst: &mut [u8],
        wait: &WaitList,
    ) -> Result<()> {
        // SAFETY: the call blocks, so `dst` outlives the operation.
        unsafe {
            self.enqueue_read_buffer_raw(buffer, offset, dst.len(), dst.as_mut_ptr(), wait, None)
        }
    }

    /// # Safety
    /// As for [`enqueue_read_buffer_raw`](Self::enqueue_read_buffer_raw);
    /// `host_ptr` must stay valid until the returned event finishes.
    pub unsafe fn enqueue_read_buffer_async(
        &self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        host_ptr: *mut u8,
        wait: &WaitList,
    ) -> Result<Event> {
        into_event(|ev| {
            self.enqueue_read_buffer_raw(buffer, offset, size, host_ptr, wait, Some(ev))
        })
    }

    /// Write `size` bytes from `host_ptr` to `buffer` at `offset`.
    ///
    /// # Safety
    /// `host_ptr` must be valid for `size` bytes of reads until the
    /// operation has finished.
    pub unsafe fn enqueue_write_buffer_raw(
        &self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        host_ptr: *const u8,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_buffer_range(buffer, offset, size);
        assert_host_ptr(host_ptr);
        self.gate(OpKind::WriteBuffer)?;
        let op = Operation::WriteBuffer {
            buffer: buffer.clone(),
            offset,
            src: HostSource::Borrowed {
                ptr: HostPtr::from_const(host_ptr),
                len: size,
            },
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Blocking write from `src`.
    pub fn enqueue_write_buffer(
        &self,
        buffer: &Buffer,
        offset: usize,
        src: &[u8],
        wait: &WaitList,
    ) -> Result<()> {
        // SAFETY: the call blocks, so `src` outlives the operation.
        unsafe { self.enqueue_write_buffer_raw(buffer, offset, src.len(), src.as_ptr(), wait, None) }
    }

    /// Asynchronous write; the operation owns `data` until it finishes.
    pub fn enqueue_write_buffer_async(
        &self,
        buffer: &Buffer,
        offset: usize,
        data: Vec<u8>,
        wait: &WaitList,
    ) -> Result<Event> {
        self.assert_buffer_range(buffer, offset, data.len());
        self.gate(OpKind::WriteBuffer)?;
        let op = Operation::WriteBuffer {
            buffer: buffer.clone(),
            offset,
            src: HostSource::Owned(data),
        };
        into_event(|ev| self.submit(op, wait, Some(ev)).map(drop))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_buffer(
        &self,
        src: &Buffer,
        dst: &Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_buffer_range(src, src_offset, size);
        self.assert_buffer_range(dst, dst_offset, size);
        self.gate(OpKind::CopyBuffer)?;
        let op = Operation::CopyBuffer {
            src: src.clone(),
            dst: dst.clone(),
            src_offset,
            dst_offset,
            len: size,
        };
        self.submit(op, wait, event).map(drop)
    }

    pub fn enqueue_copy_buffer_async(
        &self,
        src: &Buffer,
        dst: &Buffer,
        src_offset: usize,
        dst_offset: usize,
        size: usize,
        wait: &WaitList,
    ) -> Result<Event> {
        into_event(|ev| {
            self.enqueue_copy_buffer(src, dst, src_offset, dst_offset, size, wait, Some(ev))
        })
    }

    /// Rectangular read: `buffer` is the source side of `rect`, host memory
    /// the destination side. Requires tier 1.1.
    ///
    /// # Safety
    /// `host_ptr` must be valid for writes up to `rect.dst_end()` bytes
    /// until the operation has finished.
    pub unsafe fn enqueue_read_buffer_rect(
        &self,
        buffer: &Buffer,
        rect: &RectCopy,
        host_ptr: *mut u8,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_context(buffer.context(), "buffer");
        assert!(rect.src_end() <= buffer.size(), "rect read exceeds buffer bounds");
        assert_host_ptr(host_ptr);
        self.gate(OpKind::ReadBufferRect)?;
        let op = Operation::ReadBufferRect {
            buffer: buffer.clone(),
            rect: *rect,
            dst: HostPtr::new(host_ptr),
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Blocking rectangular read into `dst`.
    pub fn enqueue_read_buffer_rect_into(
        &self,
        buffer: &Buffer,
        rect: &RectCopy,
        dst: &mut [u8],
        wait: &WaitList,
    ) -> Result<()> {
        assert!(rect.dst_end() <= dst.len(), "rect read exceeds host slice");
        // SAFETY: blocking, and the host extent was checked above.
        unsafe { self.enqueue_read_buffer_rect(buffer, rect, dst.as_mut_ptr(), wait, None) }
    }

    /// Rectangular write: host memory is the source side of `rect`,
    /// `buffer` the destination side. Requires tier 1.1.
    ///
    /// # Safety
    /// `host_ptr` must be valid for reads up to `rect.src_end()` bytes
    /// until the operation has finished.
    pub unsafe fn enqueue_write_buffer_rect(
        &self,
        buffer: &Buffer,
        rect: &RectCopy,
        host_ptr: *const u8,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_context(buffer.context(), "buffer");
        assert!(rect.dst_end() <= buffer.size(), "rect write exceeds buffer bounds");
        assert_host_ptr(host_ptr);
        self.gate(OpKind::WriteBufferRect)?;
        let op = Operation::WriteBufferRect {
            buffer: buffer.clone(),
            rect: *rect,
            src: HostPtr::from_const(host_ptr),
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Blocking rectangular write from `src`.
    pub fn enqueue_write_buffer_rect_from(
        &self,
        buffer: &Buffer,
        rect: &RectCopy,
        src: &[u8],
        wait: &WaitList,
    ) -> Result<()> {
        assert!(rect.src_end() <= src.len(), "rect write exceeds host slice");
        // SAFETY: blocking, and the host extent was checked above.
        unsafe { self.enqueue_write_buffer_rect(buffer, rect, src.as_ptr(), wait, None) }
    }

    pub fn enqueue_copy_buffer_rect(
        &self,
        src: &Buffer,
        dst: &Buffer,
        rect: &RectCopy,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_context(src.context(), "source buffer");
        self.assert_context(dst.context(), "destination buffer");
        assert!(rect.src_end() <= src.size(), "rect copy exceeds source bounds");
        assert!(rect.dst_end() <= dst.size(), "rect copy exceeds destination bounds");
        self.gate(OpKind::CopyBufferRect)?;
        let op = Operation::CopyBufferRect {
            src: src.clone(),
            dst: dst.clone(),
            rect: *rect,
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Fill `size` bytes at `offset` with repetitions of `pattern`.
    /// Requires tier 1.2.
    pub fn enqueue_fill_buffer(
        &self,
        buffer: &Buffer,
        pattern: &[u8],
        offset: usize,
        size: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_buffer_range(buffer, offset, size);
        assert!(!pattern.is_empty(), "fill pattern must not be empty");
        self.gate(OpKind::FillBuffer)?;
        let op = Operation::FillBuffer {
            buffer: buffer.clone(),
            pattern: pattern.to_vec(),
            offset,
            len: size,
        };
        self.submit(op, wait, event).map(drop)
    }

    pub fn enqueue_fill_buffer_async(
        &self,
        buffer: &Buffer,
        pattern: &[u8],
        offset: usize,
        size: usize,
        wait: &WaitList,
    ) -> Result<Event> {
        into_event(|ev| self.enqueue_fill_buffer(buffer, pattern, offset, size, wait, Some(ev)))
    }

    /// Map `size` bytes at `offset` into host memory.
    ///
    /// The returned pointer is valid immediately, but may only be accessed
    /// once the map has completed: on return for a blocking call, after the
    /// event for an asynchronous one.
    pub fn enqueue_map_buffer(
        &self,
        buffer: &Buffer,
        flags: MapFlags,
        offset: usize,
        size: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<MappedRegion> {
        self.assert_buffer_range(buffer, offset, size);
        self.gate(OpKind::MapBuffer)?;
        let op = Operation::MapBuffer {
            buffer: buffer.clone(),
            flags,
            offset,
            len: size,
        };
        mapping_of(self.submit(op, wait, event)?)
    }

    pub fn enqueue_map_buffer_async(
        &self,
        buffer: &Buffer,
        flags: MapFlags,
        offset: usize,
        size: usize,
        wait: &WaitList,
    ) -> Result<(MappedRegion, Event)> {
        let mut event = Event::null();
        let mapping = self.enqueue_map_buffer(buffer, flags, offset, size, wait, Some(&mut event))?;
        Ok((mapping, event))
    }

    pub fn enqueue_unmap_buffer(
        &self,
        buffer: &Buffer,
        mapping: &MappedRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.enqueue_unmap_mem_object(&MemObject::from(buffer), mapping, wait, event)
    }

    /// Release a mapping of any memory object. The mapped pointer must not
    /// be used once this has been submitted.
    pub fn enqueue_unmap_mem_object(
        &self,
        mem: &MemObject,
        mapping: &MappedRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_context(mem.context(), "memory object");
        assert_host_ptr(mapping.as_ptr());
        self.gate(OpKind::Unmap)?;
        let op = Operation::Unmap {
            mem: mem.clone(),
            ptr: mapping.host_ptr(),
        };
        self.submit(op, wait, event).map(drop)
    }
}

// ============================================================
// Images
// ============================================================

impl CommandQueue {
    /// Map an image region. The returned row and slice pitch describe the
    /// host layout of the mapping.
    pub fn enqueue_map_image(
        &self,
        image: &Image,
        flags: MapFlags,
        region: &ImageRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<MappedRegion> {
        self.assert_image_region(image, region);
        self.gate(OpKind::MapImage)?;
        let op = Operation::MapImage {
            image: image.clone(),
            flags,
            region: *region,
        };
        mapping_of(self.submit(op, wait, event)?)
    }

    pub fn enqueue_map_image_async(
        &self,
        image: &Image,
        flags: MapFlags,
        region: &ImageRegion,
        wait: &WaitList,
    ) -> Result<(MappedRegion, Event)> {
        let mut event = Event::null();
        let mapping = self.enqueue_map_image(image, flags, region, wait, Some(&mut event))?;
        Ok((mapping, event))
    }

    pub fn enqueue_unmap_image(
        &self,
        image: &Image,
        mapping: &MappedRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.enqueue_unmap_mem_object(&MemObject::from(image), mapping, wait, event)
    }

    /// Read an image region into host memory laid out with the given
    /// pitches (0 = tightly packed).
    ///
    /// # Safety
    /// `host_ptr` must be valid for the whole pitched region until the
    /// operation has finished.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_read_image_raw(
        &self,
        image: &Image,
        region: &ImageRegion,
        row_pitch: usize,
        slice_pitch: usize,
        host_ptr: *mut u8,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_image_region(image, region);
        assert_host_ptr(host_ptr);
        self.gate(OpKind::ReadImage)?;
        let op = Operation::ReadImage {
            image: image.clone(),
            region: *region,
            row_pitch,
            slice_pitch,
            dst: HostPtr::new(host_ptr),
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Blocking read of a region into a tightly packed slice.
    pub fn enqueue_read_image(
        &self,
        image: &Image,
        region: &ImageRegion,
        dst: &mut [u8],
        wait: &WaitList,
    ) -> Result<()> {
        assert!(
            dst.len() >= region.packed_len(image.element_size()),
            "host slice too small for image region"
        );
        // SAFETY: blocking, and the slice covers the packed region.
        unsafe { self.enqueue_read_image_raw(image, region, 0, 0, dst.as_mut_ptr(), wait, None) }
    }

    /// # Safety
    /// `host_ptr` must be valid for the whole pitched region until the
    /// operation has finished.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_write_image_raw(
        &self,
        image: &Image,
        region: &ImageRegion,
        row_pitch: usize,
        slice_pitch: usize,
        host_ptr: *const u8,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_image_region(image, region);
        assert_host_ptr(host_ptr);
        self.gate(OpKind::WriteImage)?;
        let len = region.packed_len(image.element_size());
        let op = Operation::WriteImage {
            image: image.clone(),
            region: *region,
            row_pitch,
            slice_pitch,
            src: HostSource::Borrowed {
                ptr: HostPtr::from_const(host_ptr),
                len,
            },
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Blocking write of a tightly packed slice into a region.
    pub fn enqueue_write_image(
        &self,
        image: &Image,
        region: &ImageRegion,
        src: &[u8],
        wait: &WaitList,
    ) -> Result<()> {
        assert!(
            src.len() >= region.packed_len(image.element_size()),
            "host slice too small for image region"
        );
        // SAFETY: blocking, and the slice covers the packed region.
        unsafe { self.enqueue_write_image_raw(image, region, 0, 0, src.as_ptr(), wait, None) }
    }

    /// Asynchronous packed write; the operation owns `data`.
    pub fn enqueue_write_image_async(
        &self,
        image: &Image,
        region: &ImageRegion,
        data: Vec<u8>,
        wait: &WaitList,
    ) -> Result<Event> {
        self.assert_image_region(image, region);
        assert!(
            data.len() >= region.packed_len(image.element_size()),
            "host data too small for image region"
        );
        self.gate(OpKind::WriteImage)?;
        let op = Operation::WriteImage {
            image: image.clone(),
            region: *region,
            row_pitch: 0,
            slice_pitch: 0,
            src: HostSource::Owned(data),
        };
        into_event(|ev| self.submit(op, wait, Some(ev)).map(drop))
    }

    /// Copy `src_region` of `src` to `dst` at `dst_origin`. Both images
    /// must have the same format.
    pub fn enqueue_copy_image(
        &self,
        src: &Image,
        dst: &Image,
        src_region: &ImageRegion,
        dst_origin: [usize; 3],
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        assert_eq!(src.format(), dst.format(), "image copy needs matching formats");
        self.assert_image_region(src, src_region);
        let dst_region = ImageRegion {
            origin: dst_origin,
            region: src_region.region,
        };
        self.assert_image_region(dst, &dst_region);
        self.gate(OpKind::CopyImage)?;
        let op = Operation::CopyImage {
            src: src.clone(),
            dst: dst.clone(),
            src_region: *src_region,
            dst_origin,
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Copy an image region into a buffer, tightly packed from `dst_offset`.
    pub fn enqueue_copy_image_to_buffer(
        &self,
        src: &Image,
        dst: &Buffer,
        src_region: &ImageRegion,
        dst_offset: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_image_region(src, src_region);
        self.assert_buffer_range(dst, dst_offset, src_region.packed_len(src.element_size()));
        self.gate(OpKind::CopyImageToBuffer)?;
        let op = Operation::CopyImageToBuffer {
            src: src.clone(),
            dst: dst.clone(),
            src_region: *src_region,
            dst_offset,
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Copy tightly packed buffer bytes from `src_offset` into an image
    /// region.
    pub fn enqueue_copy_buffer_to_image(
        &self,
        src: &Buffer,
        dst: &Image,
        src_offset: usize,
        dst_region: &ImageRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_image_region(dst, dst_region);
        self.assert_buffer_range(src, src_offset, dst_region.packed_len(dst.element_size()));
        self.gate(OpKind::CopyBufferToImage)?;
        let op = Operation::CopyBufferToImage {
            src: src.clone(),
            dst: dst.clone(),
            src_offset,
            dst_region: *dst_region,
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Hint where memory objects should live next. Requires tier 1.2.
    pub fn enqueue_migrate_memory_objects(
        &self,
        objects: &[MemObject],
        flags: MigrationFlags,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        for object in objects {
            self.assert_context(object.context(), "memory object");
        }
        self.gate(OpKind::MigrateMemObjects)?;
        let op = Operation::MigrateMemObjects {
            objects: objects.to_vec(),
            flags,
        };
        self.submit(op, wait, event).map(drop)
    }
}

// ============================================================
// Kernels and host calls
// ============================================================

impl CommandQueue {
    pub fn enqueue_nd_range_kernel(
        &self,
        kernel: &Kernel,
        range: &NdRange,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_context(kernel.context(), "kernel");
        self.gate(OpKind::NdRangeKernel)?;
        let op = Operation::NdRangeKernel {
            kernel: kernel.clone(),
            range: *range,
        };
        self.submit(op, wait, event).map(drop)
    }

    pub fn enqueue_nd_range_kernel_async(
        &self,
        kernel: &Kernel,
        range: &NdRange,
        wait: &WaitList,
    ) -> Result<Event> {
        into_event(|ev| self.enqueue_nd_range_kernel(kernel, range, wait, Some(ev)))
    }

    /// 1D launch. A `local_size` of 0 lets the runtime choose.
    pub fn enqueue_1d_range_kernel(
        &self,
        kernel: &Kernel,
        global_offset: usize,
        global_size: usize,
        local_size: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        let range = NdRange::linear(global_offset, global_size, local_size);
        self.enqueue_nd_range_kernel(kernel, &range, wait, event)
    }

    pub fn enqueue_1d_range_kernel_async(
        &self,
        kernel: &Kernel,
        global_offset: usize,
        global_size: usize,
        local_size: usize,
        wait: &WaitList,
    ) -> Result<Event> {
        into_event(|ev| {
            self.enqueue_1d_range_kernel(
                kernel,
                global_offset,
                global_size,
                local_size,
                wait,
                Some(ev),
            )
        })
    }

    /// Run `kernel` as a single work item.
    ///
    /// From tier 2.0 the dedicated task entry point is deprecated, and the
    /// task is submitted as a 1×1×1 range instead.
    pub fn enqueue_task(
        &self,
        kernel: &Kernel,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_context(kernel.context(), "kernel");
        let op = match self.gate(OpKind::Task)? {
            Route::Modern => Operation::NdRangeKernel {
                kernel: kernel.clone(),
                range: NdRange::single(),
            },
            _ => Operation::Task {
                kernel: kernel.clone(),
            },
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Run a host function on the device's host-execution facility.
    ///
    /// Accepts a plain `fn()`, a [`HostCall::closure`], or a raw C-ABI
    /// call built with [`HostCall::raw`].
    pub fn enqueue_native_kernel(
        &self,
        call: impl Into<HostCall>,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.gate(OpKind::NativeKernel)?;
        let op = Operation::NativeKernel {
            call: call.into().into_native(),
        };
        self.submit(op, wait, event).map(drop)
    }
}

// ============================================================
// Markers and barriers
// ============================================================

impl CommandQueue {
    /// A marker that completes once everything submitted before it has.
    pub fn enqueue_marker(&self, event: Option<&mut Event>) -> Result<()> {
        let op = match self.gate(OpKind::Marker)? {
            Route::Modern => Operation::MarkerWithWaitList,
            _ => Operation::Marker,
        };
        self.submit(op, &WaitList::new(), event).map(drop)
    }

    /// A marker that completes once `wait` has (or, if `wait` is empty,
    /// everything before it). Requires tier 1.2.
    pub fn enqueue_marker_with_wait_list(
        &self,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.gate(OpKind::MarkerWithWaitList)?;
        self.submit(Operation::MarkerWithWaitList, wait, event).map(drop)
    }

    /// Everything submitted after the barrier starts only once everything
    /// before it has finished.
    pub fn enqueue_barrier(&self, event: Option<&mut Event>) -> Result<()> {
        let op = match self.gate(OpKind::Barrier)? {
            Route::Modern => Operation::BarrierWithWaitList,
            _ => Operation::Barrier,
        };
        self.submit(op, &WaitList::new(), event).map(drop)
    }

    /// Requires tier 1.2.
    pub fn enqueue_barrier_with_wait_list(
        &self,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.gate(OpKind::BarrierWithWaitList)?;
        self.submit(Operation::BarrierWithWaitList, wait, event).map(drop)
    }
}

// ============================================================
// Shared virtual memory (tier 2.0)
// ============================================================

impl CommandQueue {
    /// # Safety
    /// `dst` and `src` must each be valid for `size` bytes until the
    /// operation has finished.
    pub unsafe fn enqueue_svm_memcpy(
        &self,
        dst: *mut u8,
        src: *const u8,
        size: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        assert_host_ptr(dst);
        assert_host_ptr(src);
        self.gate(OpKind::SvmMemcpy)?;
        let op = Operation::SvmMemcpy {
            dst: HostPtr::new(dst),
            src: HostPtr::from_const(src),
            len: size,
        };
        self.submit(op, wait, event).map(drop)
    }

    /// # Safety
    /// As for [`enqueue_svm_memcpy`](Self::enqueue_svm_memcpy).
    pub unsafe fn enqueue_svm_memcpy_async(
        &self,
        dst: *mut u8,
        src: *const u8,
        size: usize,
        wait: &WaitList,
    ) -> Result<Event> {
        into_event(|ev| self.enqueue_svm_memcpy(dst, src, size, wait, Some(ev)))
    }

    pub fn enqueue_svm_fill(
        &self,
        svm: &SvmPtr,
        pattern: &[u8],
        size: usize,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        assert!(size <= svm.len(), "svm fill exceeds allocation");
        assert!(!pattern.is_empty(), "fill pattern must not be empty");
        self.gate(OpKind::SvmFill)?;
        let op = Operation::SvmFill {
            ptr: svm.host_ptr(),
            pattern: pattern.to_vec(),
            len: size,
        };
        self.submit(op, wait, event).map(drop)
    }

    pub fn enqueue_svm_map(
        &self,
        svm: &SvmPtr,
        size: usize,
        flags: MapFlags,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        assert!(size <= svm.len(), "svm map exceeds allocation");
        self.gate(OpKind::SvmMap)?;
        let op = Operation::SvmMap {
            ptr: svm.host_ptr(),
            len: size,
            flags,
        };
        self.submit(op, wait, event).map(drop)
    }

    pub fn enqueue_svm_unmap(
        &self,
        svm: &SvmPtr,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.gate(OpKind::SvmUnmap)?;
        let op = Operation::SvmUnmap {
            ptr: svm.host_ptr(),
        };
        self.submit(op, wait, event).map(drop)
    }

    /// Free an SVM allocation once `wait` has finished.
    pub fn enqueue_svm_free(
        &self,
        svm: SvmPtr,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.gate(OpKind::SvmFree)?;
        let op = Operation::SvmFree { ptrs: vec![svm] };
        self.submit(op, wait, event).map(drop)
    }
}

// ============================================================
// Trait impls
// ============================================================

impl PartialEq for CommandQueue {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => a.channel.id() == b.channel.id(),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for CommandQueue {}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => write!(f, "CommandQueue(null)"),
            Some(inner) => f
                .debug_struct("CommandQueue")
                .field("channel", &inner.channel.id())
                .field("device", &inner.device)
                .field("version", &inner.version.get())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DeviceProfile, HostDevice};
    use crate::transport::Backend;

    fn setup(profile: DeviceProfile) -> (HostDevice, CommandQueue) {
        let host = HostDevice::new(profile);
        let device = Device::new(host.clone());
        let context = Context::new(&device);
        let queue = CommandQueue::new(&context, &device, QueueProperties::empty()).unwrap();
        (host, queue)
    }

    #[test]
    fn test_null_queue() {
        let q = CommandQueue::default();
        assert!(q.is_null());
        assert_eq!(q, CommandQueue::null());
        assert_eq!(format!("{q:?}"), "CommandQueue(null)");
    }

    #[test]
    #[should_panic(expected = "null command queue")]
    fn test_null_queue_panics_on_enqueue() {
        CommandQueue::null().enqueue_marker(None).unwrap();
    }

    #[test]
    fn test_clone_shares_channel() {
        let (_, q) = setup(DeviceProfile::Baseline);
        let c = q.clone();
        assert_eq!(q, c);
        let (_, other) = setup(DeviceProfile::Baseline);
        assert_ne!(q, other);
    }

    #[test]
    fn test_creation_route_follows_version() {
        let (old, _) = setup(DeviceProfile::Baseline);
        assert_eq!(old.legacy_queue_creations(), 1);
        assert_eq!(old.modern_queue_creations(), 0);
        let (new, _) = setup(DeviceProfile::Modern);
        assert_eq!(new.legacy_queue_creations(), 0);
        assert_eq!(new.modern_queue_creations(), 1);
    }

    #[test]
    fn test_version_cached_on_creation() {
        let (host, q) = setup(DeviceProfile::Legacy);
        for _ in 0..5 {
            assert_eq!(q.version(), Version::V1_1);
        }
        assert!(q.check_device_version(1, 1));
        assert!(!q.check_device_version(1, 2));
        assert_eq!(host.version_queries(), 1);
    }

    #[test]
    fn test_from_channel_resolves_version_lazily() {
        let host = HostDevice::new(DeviceProfile::Baseline);
        let device = Device::new(host.clone());
        let context = Context::new(&device);
        let channel = host.create_queue(QueueProperties::empty()).unwrap();
        let q = CommandQueue::from_channel(channel, &context, &device);
        assert_eq!(host.version_queries(), 0);
        q.enqueue_marker(None).unwrap();
        q.enqueue_barrier(None).unwrap();
        assert_eq!(q.version(), Version::V1_2);
        assert_eq!(host.version_queries(), 1);
    }

    #[test]
    fn test_marker_route_by_tier() {
        let (legacy, q) = setup(DeviceProfile::Legacy);
        q.enqueue_marker(None).unwrap();
        assert_eq!(legacy.op_count(OpKind::Marker), 1);
        assert_eq!(legacy.op_count(OpKind::MarkerWithWaitList), 0);

        let (baseline, q) = setup(DeviceProfile::Baseline);
        q.enqueue_marker(None).unwrap();
        assert_eq!(baseline.op_count(OpKind::Marker), 0);
        assert_eq!(baseline.op_count(OpKind::MarkerWithWaitList), 1);
    }

    #[test]
    #[should_panic(expected = "different context")]
    fn test_foreign_buffer_panics() {
        let (_, q) = setup(DeviceProfile::Baseline);
        let (_, other) = setup(DeviceProfile::Baseline);
        let foreign = Buffer::new(other.context(), 16).unwrap();
        let mut out = [0u8; 4];
        let _ = q.enqueue_read_buffer(&foreign, 0, &mut out, &WaitList::new());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_range_read_panics() {
        let (_, q) = setup(DeviceProfile::Baseline);
        let buf = Buffer::new(q.context(), 16).unwrap();
        let mut out = [0u8; 8];
        let _ = q.enqueue_read_buffer(&buf, 12, &mut out, &WaitList::new());
    }

    #[test]
    #[should_panic(expected = "host pointer must not be null")]
    fn test_null_host_pointer_panics() {
        let (_, q) = setup(DeviceProfile::Baseline);
        let buf = Buffer::new(q.context(), 16).unwrap();
        let _ = unsafe {
            q.enqueue_read_buffer_raw(&buf, 0, 4, std::ptr::null_mut(), &WaitList::new(), None)
        };
    }
}
