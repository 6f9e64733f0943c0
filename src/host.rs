// host.rs — Host reference device.
//
// `HostDevice` implements the transport on plain host memory. It is the
// authoritative reference for every operation the queue can submit: tests
// run against it, and the wgpu backend is validated against it.
//
// DEVICE PROFILES:
// A real runtime reports its capability tier; the host device reports
// whatever its configuration says. `DeviceProfile` gives the common tiers
// names so that an old device can be simulated on a development machine
// and capability-gated paths (legacy markers, walk-emulated fills, rejected
// rect transfers) get exercised without old hardware.
//
//   Modern    2.0  SVM, property-list queue creation, task → ND-range
//   Baseline  1.2  fill, migrate, wait-list markers and barriers
//   Legacy    1.1  rect transfers, legacy markers, image fill by walk
//   Minimal   1.0  no rect transfers
//
// MEMORY LAYOUT:
// Buffers and images are zeroed boxed slices. Images are tightly packed:
// row pitch = width × element size, slice pitch = row pitch × height.
// Maps return a pointer straight into the allocation, so a map never
// copies and an unmap never writes back. Mapped row/slice pitches follow
// the usual convention: slice pitch is reported as 0 for 1D and 2D images.
//
// INSTRUMENTATION:
// The device counts how often its version was queried and how many
// operations of each kind reached it. Tests use this to prove that a
// capability error never touches the transport and that a queue resolves
// its version exactly once.

use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{status, TransportResult};
use crate::kernel::{HostProgram, Kernel, NdRange, WorkItem};
use crate::memory::{
    Buffer, HostPtr, Image, ImageDesc, ImageRegion, ImageType, MappedRegion, MemHandle, RectCopy,
    SvmPtr,
};
use crate::transport::{Backend, Channel, Operation, QueueProperties};
use crate::version::{OpKind, Version};
use crate::worker::{Executor, WorkerChannel};

/// Largest work-group the host device accepts unless configured otherwise.
pub const DEFAULT_MAX_WORK_GROUP_SIZE: usize = 256;

/// Fill pattern sizes accepted for buffer and SVM fills.
const FILL_PATTERN_SIZES: [usize; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

// ============================================================
// Configuration
// ============================================================

/// Named capability tiers for the host device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProfile {
    Modern,
    Baseline,
    Legacy,
    Minimal,
}

impl DeviceProfile {
    pub fn version(self) -> Version {
        match self {
            DeviceProfile::Modern => Version::V2_0,
            DeviceProfile::Baseline => Version::V1_2,
            DeviceProfile::Legacy => Version::V1_1,
            DeviceProfile::Minimal => Version::V1_0,
        }
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Modern => write!(f, "Modern (2.0)"),
            DeviceProfile::Baseline => write!(f, "Baseline (1.2)"),
            DeviceProfile::Legacy => write!(f, "Legacy (1.1)"),
            DeviceProfile::Minimal => write!(f, "Minimal (1.0)"),
        }
    }
}

/// Host device settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDeviceConfig {
    pub name: String,
    pub version: Version,
    pub max_work_group_size: usize,
}

impl HostDeviceConfig {
    pub fn for_profile(profile: DeviceProfile) -> Self {
        HostDeviceConfig {
            name: format!("host reference device ({profile})"),
            version: profile.version(),
            max_work_group_size: DEFAULT_MAX_WORK_GROUP_SIZE,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        assert!(size > 0, "max work-group size must be non-zero");
        self.max_work_group_size = size;
        self
    }
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self::for_profile(DeviceProfile::Modern)
    }
}

// ============================================================
// Storage
// ============================================================

/// A zeroed, fixed-size block of host memory standing in for device memory.
struct HostAllocation {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the allocation is plain bytes; concurrent access is governed by
// the same rules as device memory (ordering through events).
unsafe impl Send for HostAllocation {}
unsafe impl Sync for HostAllocation {}

impl HostAllocation {
    fn zeroed(len: usize) -> Self {
        let bytes = vec![0u8; len].into_boxed_slice();
        let len = bytes.len();
        HostAllocation {
            ptr: Box::into_raw(bytes) as *mut u8,
            len,
        }
    }

    fn base(&self) -> *mut u8 {
        self.ptr
    }

    fn contains(&self, addr: usize, len: usize) -> bool {
        let start = self.ptr as usize;
        addr >= start && addr + len <= start + self.len
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::into_raw of a boxed slice.
        unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, self.len))) };
    }
}

#[derive(Default)]
struct Stats {
    version_queries: AtomicUsize,
    legacy_queues: AtomicUsize,
    modern_queues: AtomicUsize,
    ops: Mutex<HashMap<OpKind, usize>>,
}

struct HostShared {
    config: HostDeviceConfig,
    stats: Stats,
    svm: Mutex<HashMap<usize, HostAllocation>>,
    mappings: Mutex<HashMap<usize, usize>>,
}

// ============================================================
// HostDevice
// ============================================================

/// The host reference device. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HostDevice {
    shared: Arc<HostShared>,
}

impl HostDevice {
    pub fn new(profile: DeviceProfile) -> Self {
        Self::with_config(HostDeviceConfig::for_profile(profile))
    }

    pub fn with_config(config: HostDeviceConfig) -> Self {
        tracing::debug!(name = %config.name, version = %config.version, "host device created");
        HostDevice {
            shared: Arc::new(HostShared {
                config,
                stats: Stats::default(),
                svm: Mutex::new(HashMap::new()),
                mappings: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &HostDeviceConfig {
        &self.shared.config
    }

    /// How many times `version()` was called on this device.
    pub fn version_queries(&self) -> usize {
        self.shared.stats.version_queries.load(Ordering::SeqCst)
    }

    /// Operations of `kind` that reached the device.
    pub fn op_count(&self, kind: OpKind) -> usize {
        lock(&self.shared.stats.ops).get(&kind).copied().unwrap_or(0)
    }

    /// All operations that reached the device.
    pub fn ops_submitted(&self) -> usize {
        lock(&self.shared.stats.ops).values().sum()
    }

    /// Queues created through the legacy entry point.
    pub fn legacy_queue_creations(&self) -> usize {
        self.shared.stats.legacy_queues.load(Ordering::SeqCst)
    }

    /// Queues created through the property-list entry point.
    pub fn modern_queue_creations(&self) -> usize {
        self.shared.stats.modern_queues.load(Ordering::SeqCst)
    }

    fn channel(&self, properties: QueueProperties) -> TransportResult<Arc<dyn Channel>> {
        let executor = HostExecutor {
            shared: Arc::clone(&self.shared),
        };
        Ok(Arc::new(WorkerChannel::new(executor, properties)?))
    }
}

impl fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDevice")
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Backend for HostDevice {
    fn name(&self) -> String {
        self.shared.config.name.clone()
    }

    fn version(&self) -> Version {
        self.shared.stats.version_queries.fetch_add(1, Ordering::SeqCst);
        self.shared.config.version
    }

    fn allocate_buffer(&self, size: usize) -> TransportResult<MemHandle> {
        if size == 0 {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        Ok(MemHandle::new(HostAllocation::zeroed(size)))
    }

    fn allocate_image(&self, desc: &ImageDesc) -> TransportResult<MemHandle> {
        let size = desc.byte_size();
        if size == 0 {
            return Err(status::INVALID_IMAGE_SIZE);
        }
        Ok(MemHandle::new(HostAllocation::zeroed(size)))
    }

    fn svm_alloc(&self, size: usize) -> TransportResult<SvmPtr> {
        if self.shared.config.version < Version::V2_0 {
            return Err(status::INVALID_OPERATION);
        }
        if size == 0 {
            return Err(status::INVALID_VALUE);
        }
        let alloc = HostAllocation::zeroed(size);
        let ptr = HostPtr::new(alloc.base());
        lock(&self.shared.svm).insert(ptr.addr(), alloc);
        Ok(SvmPtr::new(ptr, size))
    }

    fn create_queue(&self, properties: QueueProperties) -> TransportResult<Arc<dyn Channel>> {
        self.shared.stats.legacy_queues.fetch_add(1, Ordering::SeqCst);
        self.channel(properties)
    }

    fn create_queue_with_properties(
        &self,
        properties: QueueProperties,
    ) -> TransportResult<Arc<dyn Channel>> {
        if self.shared.config.version < Version::V2_0 {
            return Err(status::INVALID_OPERATION);
        }
        self.shared.stats.modern_queues.fetch_add(1, Ordering::SeqCst);
        self.channel(properties)
    }
}

// ============================================================
// Executor
// ============================================================

struct HostExecutor {
    shared: Arc<HostShared>,
}

impl Executor for HostExecutor {
    fn accept(&self, op: &Operation) -> TransportResult<Option<MappedRegion>> {
        *lock(&self.shared.stats.ops).entry(op.kind()).or_insert(0) += 1;

        match op {
            Operation::ReadBuffer { buffer, offset, len, dst } => {
                check_range(buffer, *offset, *len)?;
                non_null(*dst)?;
            }
            Operation::WriteBuffer { buffer, offset, src } => {
                check_range(buffer, *offset, src.len())?;
                non_null(HostPtr::from_const(src.as_ptr()))?;
            }
            Operation::CopyBuffer { src, dst, src_offset, dst_offset, len } => {
                check_range(src, *src_offset, *len)?;
                check_range(dst, *dst_offset, *len)?;
                if src.get() == dst.get() && overlaps(*src_offset, *dst_offset, *len, *len) {
                    return Err(status::MEM_COPY_OVERLAP);
                }
            }
            Operation::ReadBufferRect { buffer, rect, dst } => {
                check_end(buffer, rect.src_end())?;
                non_null(*dst)?;
            }
            Operation::WriteBufferRect { buffer, rect, src } => {
                check_end(buffer, rect.dst_end())?;
                non_null(*src)?;
            }
            Operation::CopyBufferRect { src, dst, rect } => {
                check_end(src, rect.src_end())?;
                check_end(dst, rect.dst_end())?;
                let (s, d) = (rect.src_offset(), rect.dst_offset());
                if src.get() == dst.get()
                    && overlaps(s, d, rect.src_end() - s, rect.dst_end() - d)
                {
                    return Err(status::MEM_COPY_OVERLAP);
                }
            }
            Operation::FillBuffer { buffer, pattern, offset, len } => {
                check_pattern(pattern, *offset, *len)?;
                check_range(buffer, *offset, *len)?;
            }
            Operation::MapBuffer { buffer, offset, len, .. } => {
                check_range(buffer, *offset, *len)?;
                let alloc = allocation(buffer.get())?;
                // SAFETY: offset + len was checked against the buffer size.
                let ptr = HostPtr::new(unsafe { alloc.base().add(*offset) });
                self.register_mapping(ptr);
                return Ok(Some(MappedRegion::new(ptr, *len, 0, 0)));
            }
            Operation::MapImage { image, region, .. } => {
                check_region(image, region)?;
                let ptr = image_ptr(image, region.origin)?;
                self.register_mapping(ptr);
                let desc = image.desc();
                let slice_pitch = match desc.image_type {
                    ImageType::Image3d => desc.slice_pitch(),
                    _ => 0,
                };
                let len = mapped_len(desc, region);
                return Ok(Some(MappedRegion::new(ptr, len, desc.row_pitch(), slice_pitch)));
            }
            Operation::Unmap { ptr, .. } => self.release_mapping(*ptr)?,
            Operation::ReadImage { image, region, dst, .. } => {
                check_region(image, region)?;
                non_null(*dst)?;
            }
            Operation::WriteImage { image, region, src, .. } => {
                check_region(image, region)?;
                non_null(HostPtr::from_const(src.as_ptr()))?;
            }
            Operation::CopyImage { src, dst, src_region, dst_origin } => {
                if src.format() != dst.format() {
                    return Err(status::IMAGE_FORMAT_MISMATCH);
                }
                check_region(src, src_region)?;
                let dst_region = ImageRegion {
                    origin: *dst_origin,
                    region: src_region.region,
                };
                check_region(dst, &dst_region)?;
                if src.get() == dst.get() && regions_overlap(src_region, &dst_region) {
                    return Err(status::MEM_COPY_OVERLAP);
                }
            }
            Operation::CopyImageToBuffer { src, dst, src_region, dst_offset } => {
                check_region(src, src_region)?;
                check_range(dst, *dst_offset, src_region.packed_len(src.element_size()))?;
            }
            Operation::CopyBufferToImage { src, dst, src_offset, dst_region } => {
                check_region(dst, dst_region)?;
                check_range(src, *src_offset, dst_region.packed_len(dst.element_size()))?;
            }
            Operation::FillImage { image, region, .. } => check_region(image, region)?,
            Operation::NdRangeKernel { kernel, range } => {
                self.check_launch(kernel, range)?;
            }
            Operation::Task { kernel } => {
                self.check_launch(kernel, &NdRange::single())?;
            }
            Operation::SvmMemcpy { dst, src, .. } => {
                non_null(*dst)?;
                non_null(*src)?;
            }
            Operation::SvmFill { ptr, pattern, len } => {
                check_pattern(pattern, 0, *len)?;
                self.check_svm(*ptr, *len)?;
            }
            Operation::SvmMap { ptr, len, .. } => self.check_svm(*ptr, *len)?,
            Operation::SvmUnmap { ptr } => self.check_svm(*ptr, 0)?,
            Operation::SvmFree { ptrs } => {
                let svm = lock(&self.shared.svm);
                if ptrs.iter().any(|p| !svm.contains_key(&p.host_ptr().addr())) {
                    return Err(status::INVALID_VALUE);
                }
            }
            Operation::MigrateMemObjects { .. }
            | Operation::NativeKernel { .. }
            | Operation::Marker
            | Operation::MarkerWithWaitList
            | Operation::Barrier
            | Operation::BarrierWithWaitList => {}
        }
        Ok(None)
    }

    fn execute(&self, op: Operation) -> TransportResult<()> {
        // SAFETY (whole match): every range and region below was validated in
        // `accept`, host pointers are kept alive by the submitter, and device
        // allocations are kept alive by the operand handles inside `op`.
        unsafe {
            match op {
                Operation::ReadBuffer { buffer, offset, len, dst } => {
                    let base = allocation(buffer.get())?.base();
                    ptr::copy_nonoverlapping(base.add(offset), dst.as_ptr(), len);
                }
                Operation::WriteBuffer { buffer, offset, src } => {
                    let base = allocation(buffer.get())?.base();
                    ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), src.len());
                }
                Operation::CopyBuffer { src, dst, src_offset, dst_offset, len } => {
                    let s = allocation(src.get())?.base();
                    let d = allocation(dst.get())?.base();
                    ptr::copy(s.add(src_offset), d.add(dst_offset), len);
                }
                Operation::ReadBufferRect { buffer, rect, dst } => {
                    copy_rect(allocation(buffer.get())?.base(), dst.as_ptr(), &rect);
                }
                Operation::WriteBufferRect { buffer, rect, src } => {
                    copy_rect(src.as_ptr(), allocation(buffer.get())?.base(), &rect);
                }
                Operation::CopyBufferRect { src, dst, rect } => {
                    let s = allocation(src.get())?.base();
                    let d = allocation(dst.get())?.base();
                    copy_rect(s, d, &rect);
                }
                Operation::FillBuffer { buffer, pattern, offset, len } => {
                    let base = allocation(buffer.get())?.base();
                    fill_pattern(base.add(offset), &pattern, len);
                }
                Operation::MapBuffer { .. } | Operation::MapImage { .. } | Operation::Unmap { .. } => {
                    // Maps point straight into the allocation.
                }
                Operation::ReadImage { image, region, row_pitch, slice_pitch, dst } => {
                    let es = image.element_size();
                    let (hr, hs) = host_pitches(&region, es, row_pitch, slice_pitch);
                    let desc = image.desc();
                    copy_block(
                        image_ptr(&image, region.origin)?.as_ptr(),
                        (desc.row_pitch(), desc.slice_pitch()),
                        dst.as_ptr(),
                        (hr, hs),
                        region.region[0] * es,
                        region.region[1],
                        region.region[2],
                    );
                }
                Operation::WriteImage { image, region, row_pitch, slice_pitch, src } => {
                    let es = image.element_size();
                    let (hr, hs) = host_pitches(&region, es, row_pitch, slice_pitch);
                    let desc = image.desc();
                    copy_block(
                        src.as_ptr(),
                        (hr, hs),
                        image_ptr(&image, region.origin)?.as_ptr(),
                        (desc.row_pitch(), desc.slice_pitch()),
                        region.region[0] * es,
                        region.region[1],
                        region.region[2],
                    );
                }
                Operation::CopyImage { src, dst, src_region, dst_origin } => {
                    let (sd, dd) = (src.desc(), dst.desc());
                    copy_block(
                        image_ptr(&src, src_region.origin)?.as_ptr(),
                        (sd.row_pitch(), sd.slice_pitch()),
                        image_ptr(&dst, dst_origin)?.as_ptr(),
                        (dd.row_pitch(), dd.slice_pitch()),
                        src_region.region[0] * src.element_size(),
                        src_region.region[1],
                        src_region.region[2],
                    );
                }
                Operation::CopyImageToBuffer { src, dst, src_region, dst_offset } => {
                    let es = src.element_size();
                    let (hr, hs) = host_pitches(&src_region, es, 0, 0);
                    let sd = src.desc();
                    copy_block(
                        image_ptr(&src, src_region.origin)?.as_ptr(),
                        (sd.row_pitch(), sd.slice_pitch()),
                        allocation(dst.get())?.base().add(dst_offset),
                        (hr, hs),
                        src_region.region[0] * es,
                        src_region.region[1],
                        src_region.region[2],
                    );
                }
                Operation::CopyBufferToImage { src, dst, src_offset, dst_region } => {
                    let es = dst.element_size();
                    let (hr, hs) = host_pitches(&dst_region, es, 0, 0);
                    let dd = dst.desc();
                    copy_block(
                        allocation(src.get())?.base().add(src_offset),
                        (hr, hs),
                        image_ptr(&dst, dst_region.origin)?.as_ptr(),
                        (dd.row_pitch(), dd.slice_pitch()),
                        dst_region.region[0] * es,
                        dst_region.region[1],
                        dst_region.region[2],
                    );
                }
                Operation::FillImage { image, color, region } => {
                    let es = image.element_size();
                    let element = color.element(es);
                    let desc = image.desc();
                    let base = image_ptr(&image, region.origin)?.as_ptr();
                    for z in 0..region.region[2] {
                        for y in 0..region.region[1] {
                            let row = base.add(z * desc.slice_pitch() + y * desc.row_pitch());
                            for x in 0..region.region[0] {
                                ptr::copy_nonoverlapping(element.as_ptr(), row.add(x * es), element.len());
                            }
                        }
                    }
                }
                Operation::MigrateMemObjects { .. } => {
                    // Host memory is already where both sides can see it.
                }
                Operation::NdRangeKernel { kernel, range } => self.run_kernel(&kernel, &range)?,
                Operation::Task { kernel } => self.run_kernel(&kernel, &NdRange::single())?,
                Operation::NativeKernel { call } => call.invoke()?,
                Operation::SvmMemcpy { dst, src, len } => {
                    ptr::copy(src.as_ptr(), dst.as_ptr(), len);
                }
                Operation::SvmFill { ptr, pattern, len } => {
                    fill_pattern(ptr.as_ptr(), &pattern, len);
                }
                Operation::SvmMap { .. } | Operation::SvmUnmap { .. } => {}
                Operation::SvmFree { ptrs } => {
                    let mut svm = lock(&self.shared.svm);
                    for p in ptrs {
                        svm.remove(&p.host_ptr().addr());
                    }
                }
                Operation::Marker
                | Operation::MarkerWithWaitList
                | Operation::Barrier
                | Operation::BarrierWithWaitList => {}
            }
        }
        Ok(())
    }
}

impl HostExecutor {
    fn register_mapping(&self, ptr: HostPtr) {
        *lock(&self.shared.mappings).entry(ptr.addr()).or_insert(0) += 1;
    }

    fn release_mapping(&self, ptr: HostPtr) -> TransportResult<()> {
        let mut mappings = lock(&self.shared.mappings);
        match mappings.get_mut(&ptr.addr()) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                mappings.remove(&ptr.addr());
            }
            None => return Err(status::INVALID_VALUE),
        }
        Ok(())
    }

    fn check_svm(&self, ptr: HostPtr, len: usize) -> TransportResult<()> {
        let svm = lock(&self.shared.svm);
        if svm.values().any(|a| a.contains(ptr.addr(), len)) {
            Ok(())
        } else {
            Err(status::INVALID_VALUE)
        }
    }

    fn check_launch(&self, kernel: &Kernel, range: &NdRange) -> TransportResult<()> {
        kernel.program::<HostProgram>().ok_or(status::INVALID_KERNEL)?;
        if range.global().iter().any(|&g| g == 0) {
            return Err(status::INVALID_GLOBAL_WORK_SIZE);
        }
        self.resolve_local(range).map(|_| ())
    }

    /// Work-group extent for `range`: the caller's, validated, or the
    /// largest divisors of the global extent that fit the device limit.
    fn resolve_local(&self, range: &NdRange) -> TransportResult<[usize; 3]> {
        let global = range.global();
        let max = self.shared.config.max_work_group_size;
        match range.local() {
            Some(local) => {
                let divides = local
                    .iter()
                    .zip(global.iter())
                    .all(|(&l, &g)| l != 0 && g % l == 0);
                if !divides || local.iter().product::<usize>() > max {
                    return Err(status::INVALID_WORK_GROUP_SIZE);
                }
                Ok(local)
            }
            None => {
                let mut budget = max;
                let mut local = [1; 3];
                for axis in 0..3 {
                    local[axis] = largest_divisor(global[axis], budget);
                    budget /= local[axis];
                }
                Ok(local)
            }
        }
    }

    fn run_kernel(&self, kernel: &Kernel, range: &NdRange) -> TransportResult<()> {
        let program = kernel.program::<HostProgram>().ok_or(status::INVALID_KERNEL)?;
        let local = self.resolve_local(range)?;
        let global = range.global();
        let offset = range.offset().unwrap_or([0; 3]);
        for z in 0..global[2] {
            for y in 0..global[1] {
                for x in 0..global[0] {
                    let idx = [x, y, z];
                    let item = WorkItem {
                        dims: range.dims(),
                        global_id: [offset[0] + x, offset[1] + y, offset[2] + z],
                        local_id: [x % local[0], y % local[1], z % local[2]],
                        group_id: [idx[0] / local[0], idx[1] / local[1], idx[2] / local[2]],
                        global_size: global,
                        local_size: local,
                        global_offset: offset,
                    };
                    program.run(&item);
                }
            }
        }
        Ok(())
    }
}

// ============================================================
// Helpers
// ============================================================

fn allocation(handle: &MemHandle) -> TransportResult<&HostAllocation> {
    handle.downcast::<HostAllocation>().ok_or(status::INVALID_MEM_OBJECT)
}

fn non_null(ptr: HostPtr) -> TransportResult<()> {
    if ptr.is_null() {
        Err(status::INVALID_VALUE)
    } else {
        Ok(())
    }
}

pub(crate) fn check_range(buffer: &Buffer, offset: usize, len: usize) -> TransportResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer.size() => Ok(()),
        _ => Err(status::INVALID_VALUE),
    }
}

pub(crate) fn check_end(buffer: &Buffer, end: usize) -> TransportResult<()> {
    if end <= buffer.size() {
        Ok(())
    } else {
        Err(status::INVALID_VALUE)
    }
}

pub(crate) fn check_region(image: &Image, region: &ImageRegion) -> TransportResult<()> {
    let extent = image.size();
    let inside = (0..3).all(|a| {
        region.origin[a]
            .checked_add(region.region[a])
            .is_some_and(|end| end <= extent[a])
    });
    if inside {
        Ok(())
    } else {
        Err(status::INVALID_VALUE)
    }
}

pub(crate) fn check_pattern(pattern: &[u8], offset: usize, len: usize) -> TransportResult<()> {
    let size = pattern.len();
    if !FILL_PATTERN_SIZES.contains(&size) || offset % size != 0 || len % size != 0 {
        return Err(status::INVALID_VALUE);
    }
    Ok(())
}

fn overlaps(a: usize, b: usize, a_len: usize, b_len: usize) -> bool {
    a < b + b_len && b < a + a_len
}

fn regions_overlap(a: &ImageRegion, b: &ImageRegion) -> bool {
    (0..3).all(|axis| overlaps(a.origin[axis], b.origin[axis], a.region[axis], b.region[axis]))
}

fn image_ptr(image: &Image, origin: [usize; 3]) -> TransportResult<HostPtr> {
    let desc = image.desc();
    let offset = origin[2] * desc.slice_pitch()
        + origin[1] * desc.row_pitch()
        + origin[0] * desc.format.element_size();
    let base = allocation(image.get())?.base();
    // SAFETY: callers validated origin against the image extent.
    Ok(HostPtr::new(unsafe { base.add(offset) }))
}

fn mapped_len(desc: &ImageDesc, region: &ImageRegion) -> usize {
    if region.is_empty() {
        return 0;
    }
    (region.region[2] - 1) * desc.slice_pitch()
        + (region.region[1] - 1) * desc.row_pitch()
        + region.region[0] * desc.format.element_size()
}

/// Host-side pitches of an image transfer; 0 means tightly packed.
pub(crate) fn host_pitches(region: &ImageRegion, es: usize, row: usize, slice: usize) -> (usize, usize) {
    let row = if row == 0 { region.region[0] * es } else { row };
    let slice = if slice == 0 { row * region.region[1] } else { slice };
    (row, slice)
}

fn largest_divisor(n: usize, cap: usize) -> usize {
    (1..=n.min(cap).max(1)).rev().find(|d| n % d == 0).unwrap_or(1)
}

/// Copy `slices × rows` rows of `row_bytes` between two pitched layouts.
///
/// # Safety
/// Both layouts must be valid for the whole block.
pub(crate) unsafe fn copy_block(
    src: *const u8,
    (src_row, src_slice): (usize, usize),
    dst: *mut u8,
    (dst_row, dst_slice): (usize, usize),
    row_bytes: usize,
    rows: usize,
    slices: usize,
) {
    for z in 0..slices {
        for y in 0..rows {
            ptr::copy(
                src.add(z * src_slice + y * src_row),
                dst.add(z * dst_slice + y * dst_row),
                row_bytes,
            );
        }
    }
}

pub(crate) unsafe fn copy_rect(src: *const u8, dst: *mut u8, rect: &RectCopy) {
    copy_block(
        src.add(rect.src_offset()),
        rect.src_pitches(),
        dst.add(rect.dst_offset()),
        rect.dst_pitches(),
        rect.region[0],
        rect.region[1],
        rect.region[2],
    );
}

pub(crate) unsafe fn fill_pattern(dst: *mut u8, pattern: &[u8], len: usize) {
    for chunk in 0..len / pattern.len() {
        ptr::copy_nonoverlapping(pattern.as_ptr(), dst.add(chunk * pattern.len()), pattern.len());
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
