// memory.rs — Memory operands: buffers, images, regions and mappings.
//
// Buffers and images are reference-counted handles onto backend storage.
// Cloning a `Buffer` retains the same device allocation (like `clRetainMemObject`);
// `clone_on` makes an actual device-side copy through a queue.
//
// REGIONS
// ───────
// Images are addressed with an origin/region triple of up to three
// components. Lower-dimensional images use the same triple with the unused
// axes defaulted: origin 0, region 1. A 2D image of 64×32 therefore has
// the full region `[64, 32, 1]`. Bounds violations are caller bugs and
// panic; they never become runtime errors.
//
// MAPPINGS
// ────────
// A map returns a `MappedRegion`: a host pointer to the first element of
// the mapped region plus the row/slice pitch the device chose. The pointer
// stays valid until the matching unmap is *submitted*.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::context::Context;
use crate::error::{status, QueueError, Result};
use crate::event::WaitList;
use crate::queue::CommandQueue;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Host access requested by a map operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// The host overwrites the whole region; prior contents need not be
        /// transferred.
        const WRITE_INVALIDATE_REGION = 1 << 2;
    }
}

bitflags! {
    /// Options for migrating memory objects between host and device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MigrationFlags: u32 {
        const HOST = 1 << 0;
        const CONTENT_UNDEFINED = 1 << 1;
    }
}

// ---------------------------------------------------------------------------
// Host pointers
// ---------------------------------------------------------------------------

/// A raw host address that may cross to a transport thread.
///
/// The transport only dereferences it while executing the operation that
/// carries it; keeping the memory alive until then is the submitter's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPtr(*mut u8);

// SAFETY: a HostPtr is an address, not a borrow. Every dereference happens
// in an `unsafe` block whose caller guarantees the pointee is live.
unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

impl HostPtr {
    pub fn new(ptr: *mut u8) -> Self {
        HostPtr(ptr)
    }

    pub fn from_const(ptr: *const u8) -> Self {
        HostPtr(ptr as *mut u8)
    }

    pub fn null() -> Self {
        HostPtr(std::ptr::null_mut())
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    pub fn addr(self) -> usize {
        self.0 as usize
    }

    /// # Safety
    /// The result must stay inside the allocation `self` points into.
    pub unsafe fn add(self, bytes: usize) -> Self {
        HostPtr(self.0.add(bytes))
    }
}

/// Source bytes of a host → device transfer.
///
/// `Borrowed` points at caller memory that must outlive the operation.
/// `Owned` moves the bytes into the operation, which is what makes a safe
/// asynchronous write possible.
#[derive(Debug)]
pub enum HostSource {
    Borrowed { ptr: HostPtr, len: usize },
    Owned(Vec<u8>),
}

impl HostSource {
    pub fn as_ptr(&self) -> *const u8 {
        match self {
            HostSource::Borrowed { ptr, .. } => ptr.as_ptr(),
            HostSource::Owned(bytes) => bytes.as_ptr(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostSource::Borrowed { len, .. } => *len,
            HostSource::Owned(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A host-visible window onto mapped device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRegion {
    ptr: HostPtr,
    len: usize,
    row_pitch: usize,
    slice_pitch: usize,
}

impl MappedRegion {
    pub fn new(ptr: HostPtr, len: usize, row_pitch: usize, slice_pitch: usize) -> Self {
        MappedRegion {
            ptr,
            len,
            row_pitch,
            slice_pitch,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn host_ptr(&self) -> HostPtr {
        self.ptr
    }

    /// Number of bytes from the first to one past the last mapped byte.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes between consecutive rows (0 for buffers and 1D images).
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// Bytes between consecutive slices (0 unless the image is 3D).
    pub fn slice_pitch(&self) -> usize {
        self.slice_pitch
    }

    /// View the mapping as a byte slice.
    ///
    /// # Safety
    /// The map must have completed, the unmap must not have been submitted,
    /// and no other view of the same bytes may be alive.
    pub unsafe fn as_slice_mut<'a>(&self) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }

    /// # Safety
    /// As for [`as_slice_mut`](Self::as_slice_mut).
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }
}

/// A shared-virtual-memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SvmPtr {
    ptr: HostPtr,
    len: usize,
}

impl SvmPtr {
    pub fn new(ptr: HostPtr, len: usize) -> Self {
        SvmPtr { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn host_ptr(&self) -> HostPtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// Backend storage handle
// ---------------------------------------------------------------------------

static NEXT_MEM_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle onto backend-owned storage.
///
/// The backend that allocated it downcasts `storage` back to its own type.
#[derive(Clone)]
pub struct MemHandle {
    id: u64,
    storage: Arc<dyn Any + Send + Sync>,
}

impl MemHandle {
    pub fn new<T: Any + Send + Sync>(storage: T) -> Self {
        MemHandle {
            id: NEXT_MEM_ID.fetch_add(1, Ordering::Relaxed),
            storage: Arc::new(storage),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.storage.downcast_ref::<T>()
    }
}

impl PartialEq for MemHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MemHandle {}

impl fmt::Debug for MemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemHandle({})", self.id)
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// A linear block of device memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buffer {
    context: Context,
    size: usize,
    handle: MemHandle,
}

impl Buffer {
    /// Allocate `size` bytes in `context`. Contents are zeroed on the host
    /// device; other backends leave them unspecified.
    pub fn new(context: &Context, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(QueueError::transport(status::INVALID_BUFFER_SIZE));
        }
        let handle = context.device().backend().allocate_buffer(size)?;
        Ok(Buffer {
            context: context.clone(),
            size,
            handle,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Raw backend handle.
    pub fn get(&self) -> &MemHandle {
        &self.handle
    }

    /// A new buffer in the same context holding a copy of this one,
    /// copied device-side through `queue`.
    pub fn clone_on(&self, queue: &CommandQueue) -> Result<Buffer> {
        let copy = Buffer::new(&self.context, self.size)?;
        queue.enqueue_copy_buffer(self, &copy, 0, 0, self.size, &WaitList::new(), None)?;
        Ok(copy)
    }
}

// ---------------------------------------------------------------------------
// Image formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    R,
    A,
    Rg,
    Ra,
    Rgb,
    Rgba,
    Bgra,
    Argb,
    Intensity,
    Luminance,
}

impl ChannelOrder {
    pub fn channel_count(self) -> usize {
        match self {
            ChannelOrder::R | ChannelOrder::A => 1,
            ChannelOrder::Intensity | ChannelOrder::Luminance => 1,
            ChannelOrder::Rg | ChannelOrder::Ra => 2,
            ChannelOrder::Rgb => 3,
            ChannelOrder::Rgba | ChannelOrder::Bgra | ChannelOrder::Argb => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    SnormInt8,
    SnormInt16,
    UnormInt8,
    UnormInt16,
    UnormShort565,
    UnormShort555,
    UnormInt101010,
    SignedInt8,
    SignedInt16,
    SignedInt32,
    UnsignedInt8,
    UnsignedInt16,
    UnsignedInt32,
    HalfFloat,
    Float,
}

impl ChannelType {
    /// Bytes per channel, or `None` for packed types whose size belongs to
    /// the whole element.
    fn channel_width(self) -> Option<usize> {
        match self {
            ChannelType::SnormInt8 | ChannelType::UnormInt8 => Some(1),
            ChannelType::SignedInt8 | ChannelType::UnsignedInt8 => Some(1),
            ChannelType::SnormInt16 | ChannelType::UnormInt16 => Some(2),
            ChannelType::SignedInt16 | ChannelType::UnsignedInt16 => Some(2),
            ChannelType::HalfFloat => Some(2),
            ChannelType::SignedInt32 | ChannelType::UnsignedInt32 => Some(4),
            ChannelType::Float => Some(4),
            ChannelType::UnormShort565 | ChannelType::UnormShort555 => None,
            ChannelType::UnormInt101010 => None,
        }
    }
}

/// Pixel layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub channel_type: ChannelType,
}

impl ImageFormat {
    pub const fn new(order: ChannelOrder, channel_type: ChannelType) -> Self {
        ImageFormat {
            order,
            channel_type,
        }
    }

    /// Size of one element in bytes, derived from the format.
    pub fn element_size(&self) -> usize {
        match self.channel_type.channel_width() {
            Some(width) => width * self.order.channel_count(),
            None => match self.channel_type {
                ChannelType::UnormInt101010 => 4,
                _ => 2,
            },
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.order, self.channel_type)
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Image1d,
    Image2d,
    Image3d,
}

impl ImageType {
    pub fn dims(self) -> usize {
        match self {
            ImageType::Image1d => 1,
            ImageType::Image2d => 2,
            ImageType::Image3d => 3,
        }
    }
}

/// Shape and format of an image allocation.
///
/// `height` and `depth` are 0 for axes the image type does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub image_type: ImageType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub format: ImageFormat,
}

impl ImageDesc {
    /// Extent with absent axes floored to 1.
    pub fn extent(&self) -> [usize; 3] {
        [self.width, self.height.max(1), self.depth.max(1)]
    }

    /// Packed row pitch in bytes.
    pub fn row_pitch(&self) -> usize {
        self.width * self.format.element_size()
    }

    /// Packed slice pitch in bytes.
    pub fn slice_pitch(&self) -> usize {
        self.row_pitch() * self.height.max(1)
    }

    /// Total bytes of a packed allocation.
    pub fn byte_size(&self) -> usize {
        self.slice_pitch() * self.depth.max(1)
    }
}

/// A 1D, 2D or 3D image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    context: Context,
    desc: ImageDesc,
    handle: MemHandle,
}

impl Image {
    pub fn new_1d(context: &Context, width: usize, format: ImageFormat) -> Result<Self> {
        Self::with_desc(
            context,
            ImageDesc {
                image_type: ImageType::Image1d,
                width,
                height: 0,
                depth: 0,
                format,
            },
        )
    }

    pub fn new_2d(
        context: &Context,
        width: usize,
        height: usize,
        format: ImageFormat,
    ) -> Result<Self> {
        Self::with_desc(
            context,
            ImageDesc {
                image_type: ImageType::Image2d,
                width,
                height,
                depth: 0,
                format,
            },
        )
    }

    pub fn new_3d(
        context: &Context,
        width: usize,
        height: usize,
        depth: usize,
        format: ImageFormat,
    ) -> Result<Self> {
        Self::with_desc(
            context,
            ImageDesc {
                image_type: ImageType::Image3d,
                width,
                height,
                depth,
                format,
            },
        )
    }

    fn with_desc(context: &Context, desc: ImageDesc) -> Result<Self> {
        let dims = desc.image_type.dims();
        let degenerate = desc.width == 0
            || (dims >= 2 && desc.height == 0)
            || (dims == 3 && desc.depth == 0);
        if degenerate {
            return Err(QueueError::transport(status::INVALID_IMAGE_SIZE));
        }
        let handle = context.device().backend().allocate_image(&desc)?;
        Ok(Image {
            context: context.clone(),
            desc,
            handle,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn get(&self) -> &MemHandle {
        &self.handle
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn image_type(&self) -> ImageType {
        self.desc.image_type
    }

    pub fn format(&self) -> ImageFormat {
        self.desc.format
    }

    pub fn width(&self) -> usize {
        self.desc.width
    }

    /// 0 for 1D images.
    pub fn height(&self) -> usize {
        self.desc.height
    }

    /// 0 for 1D and 2D images.
    pub fn depth(&self) -> usize {
        self.desc.depth
    }

    /// Bytes per element, from the image format.
    pub fn element_size(&self) -> usize {
        self.desc.format.element_size()
    }

    pub fn origin(&self) -> [usize; 3] {
        [0, 0, 0]
    }

    /// Full extent with absent axes floored to 1.
    pub fn size(&self) -> [usize; 3] {
        self.desc.extent()
    }

    /// A new image of the same shape holding a copy of this one.
    pub fn clone_on(&self, queue: &CommandQueue) -> Result<Image> {
        let copy = Image::with_desc(&self.context, self.desc)?;
        queue.enqueue_copy_image(
            self,
            &copy,
            &ImageRegion::full(self),
            copy.origin(),
            &WaitList::new(),
            None,
        )?;
        Ok(copy)
    }
}

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

/// An origin/extent triple addressing part of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageRegion {
    pub origin: [usize; 3],
    pub region: [usize; 3],
}

impl ImageRegion {
    /// Build from up to three components; missing origin components
    /// default to 0, missing region components to 1.
    pub fn new<const N: usize>(origin: [usize; N], region: [usize; N]) -> Self {
        assert!(
            (1..=3).contains(&N),
            "image regions have 1 to 3 dimensions, got {N}"
        );
        let mut o = [0; 3];
        let mut r = [1; 3];
        o[..N].copy_from_slice(&origin);
        r[..N].copy_from_slice(&region);
        ImageRegion {
            origin: o,
            region: r,
        }
    }

    /// The whole image.
    pub fn full(image: &Image) -> Self {
        ImageRegion {
            origin: [0; 3],
            region: image.size(),
        }
    }

    /// `true` if any extent is zero.
    pub fn is_empty(&self) -> bool {
        self.region.iter().any(|&r| r == 0)
    }

    pub fn element_count(&self) -> usize {
        self.region.iter().product()
    }

    /// Panic unless the region lies inside `image`.
    pub fn assert_within(&self, image: &Image) {
        let extent = image.size();
        for axis in 0..3 {
            assert!(
                self.origin[axis]
                    .checked_add(self.region[axis])
                    .is_some_and(|end| end <= extent[axis]),
                "image region out of bounds on axis {axis}: origin {} + region {} > extent {}",
                self.origin[axis],
                self.region[axis],
                extent[axis]
            );
        }
    }

    /// Packed byte size of this region in host memory.
    pub fn packed_len(&self, element_size: usize) -> usize {
        self.element_count() * element_size
    }
}

/// Geometry of a rectangular (up to 3D) byte copy.
///
/// `region[0]` and both `*_origin[0]` are in bytes; the other components
/// count rows and slices. A pitch of 0 means "tightly packed": row pitch
/// `region[0]`, slice pitch `region[1] * row_pitch`.
///
/// For reads the buffer is the source and host memory the destination;
/// for writes it is the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RectCopy {
    pub src_origin: [usize; 3],
    pub dst_origin: [usize; 3],
    pub region: [usize; 3],
    pub src_row_pitch: usize,
    pub src_slice_pitch: usize,
    pub dst_row_pitch: usize,
    pub dst_slice_pitch: usize,
}

impl RectCopy {
    pub fn new(region: [usize; 3]) -> Self {
        RectCopy {
            src_origin: [0; 3],
            dst_origin: [0; 3],
            region,
            src_row_pitch: 0,
            src_slice_pitch: 0,
            dst_row_pitch: 0,
            dst_slice_pitch: 0,
        }
    }

    pub fn src_origin(mut self, origin: [usize; 3]) -> Self {
        self.src_origin = origin;
        self
    }

    pub fn dst_origin(mut self, origin: [usize; 3]) -> Self {
        self.dst_origin = origin;
        self
    }

    pub fn src_pitch(mut self, row: usize, slice: usize) -> Self {
        self.src_row_pitch = row;
        self.src_slice_pitch = slice;
        self
    }

    pub fn dst_pitch(mut self, row: usize, slice: usize) -> Self {
        self.dst_row_pitch = row;
        self.dst_slice_pitch = slice;
        self
    }

    /// Resolved `(row_pitch, slice_pitch)` for the source side.
    pub fn src_pitches(&self) -> (usize, usize) {
        self.resolve(self.src_row_pitch, self.src_slice_pitch)
    }

    pub fn dst_pitches(&self) -> (usize, usize) {
        self.resolve(self.dst_row_pitch, self.dst_slice_pitch)
    }

    fn resolve(&self, row: usize, slice: usize) -> (usize, usize) {
        let row = if row == 0 { self.region[0] } else { row };
        let slice = if slice == 0 { self.region[1].saturating_mul(row) } else { slice };
        (row, slice)
    }

    /// Byte offset of the source origin.
    pub fn src_offset(&self) -> usize {
        let (row, slice) = self.src_pitches();
        offset_of(self.src_origin, row, slice)
    }

    pub fn dst_offset(&self) -> usize {
        let (row, slice) = self.dst_pitches();
        offset_of(self.dst_origin, row, slice)
    }

    /// One past the last source byte touched (0 for an empty region).
    pub fn src_end(&self) -> usize {
        let (row, slice) = self.src_pitches();
        self.end(self.src_offset(), row, slice)
    }

    pub fn dst_end(&self) -> usize {
        let (row, slice) = self.dst_pitches();
        self.end(self.dst_offset(), row, slice)
    }

    // Saturates on overflow so a bogus geometry fails every bounds check.
    fn end(&self, start: usize, row: usize, slice: usize) -> usize {
        if self.is_empty() {
            return 0;
        }
        start
            .saturating_add((self.region[2] - 1).saturating_mul(slice))
            .saturating_add((self.region[1] - 1).saturating_mul(row))
            .saturating_add(self.region[0])
    }

    pub fn is_empty(&self) -> bool {
        self.region.iter().any(|&r| r == 0)
    }
}

fn offset_of(origin: [usize; 3], row: usize, slice: usize) -> usize {
    origin[2]
        .saturating_mul(slice)
        .saturating_add(origin[1].saturating_mul(row))
        .saturating_add(origin[0])
}

// ---------------------------------------------------------------------------
// Fill colors
// ---------------------------------------------------------------------------

/// Up to 16 bytes of encoded element data used to fill an image.
///
/// Exactly `element_size` leading bytes are written to each element; the
/// rest is ignored. Encoding the color for the image format is the caller's
/// job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FillColor {
    bytes: [u8; 16],
}

impl FillColor {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(
            bytes.len() <= 16,
            "fill color is at most 16 bytes, got {}",
            bytes.len()
        );
        let mut color = FillColor::default();
        color.bytes[..bytes.len()].copy_from_slice(bytes);
        color
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// The leading `element_size` bytes.
    pub fn element(&self, element_size: usize) -> &[u8] {
        &self.bytes[..element_size.min(16)]
    }
}

impl<const N: usize> From<[u8; N]> for FillColor {
    fn from(bytes: [u8; N]) -> Self {
        FillColor::from_bytes(&bytes)
    }
}

impl From<[f32; 4]> for FillColor {
    fn from(rgba: [f32; 4]) -> Self {
        FillColor {
            bytes: bytemuck::cast(rgba),
        }
    }
}

impl From<[u32; 4]> for FillColor {
    fn from(rgba: [u32; 4]) -> Self {
        FillColor {
            bytes: bytemuck::cast(rgba),
        }
    }
}

impl From<[i32; 4]> for FillColor {
    fn from(rgba: [i32; 4]) -> Self {
        FillColor {
            bytes: bytemuck::cast(rgba),
        }
    }
}

// ---------------------------------------------------------------------------
// MemObject
// ---------------------------------------------------------------------------

/// Either kind of memory object, for operations that accept both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemObject {
    Buffer(Buffer),
    Image(Image),
}

impl MemObject {
    pub fn context(&self) -> &Context {
        match self {
            MemObject::Buffer(b) => b.context(),
            MemObject::Image(i) => i.context(),
        }
    }

    pub fn get(&self) -> &MemHandle {
        match self {
            MemObject::Buffer(b) => b.get(),
            MemObject::Image(i) => i.get(),
        }
    }
}

impl From<Buffer> for MemObject {
    fn from(b: Buffer) -> Self {
        MemObject::Buffer(b)
    }
}

impl From<Image> for MemObject {
    fn from(i: Image) -> Self {
        MemObject::Image(i)
    }
}

impl From<&Buffer> for MemObject {
    fn from(b: &Buffer) -> Self {
        MemObject::Buffer(b.clone())
    }
}

impl From<&Image> for MemObject {
    fn from(i: &Image) -> Self {
        MemObject::Image(i.clone())
    }
}
