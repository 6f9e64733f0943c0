// walk.rs — Host-side image walking on top of map/unmap.
//
// Some per-element image work has no device opcode (region fill below tier
// 1.2, arbitrary transforms everywhere). It is emulated as:
//
//     map(region) → visit every element on the host → unmap
//
// VISIT ORDER
// ───────────
// z (slices) outermost, then y (rows), then x (elements). Element size comes
// from the image format; stepping uses the pitches the device reported for
// the mapping, never an assumed packed layout. Callback coordinates are
// absolute image coordinates (region origin + offset).
//
// ASYNCHRONOUS FORM
// ─────────────────
// With an event slot the sequence must not block, yet the unmap must not run
// before the host walk has finished. A `UserEvent` ties the two together:
//
//   1. gate       user event created unsignalled
//   2. map        submitted asynchronously → map event
//   3. walk       registered as a callback on the map event; it runs on the
//                 transport's completion thread, then signals the gate
//   4. unmap      submitted waiting on the gate; its event is the caller's
//
// The caller's event therefore completes only after map, walk and unmap.
// A failed map or a panicking walk puts the gate into an error state, which
// the unmap (and so the caller's event) inherits.
//
// An empty region never reaches the transport. It still honours the wait
// list: the blocking form waits for it, and the asynchronous form hands back
// a user event that finishes when the last listed event does (failing if any
// of them failed).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{status, QueueError, Result};
use crate::event::{Event, EventStatus, UserEvent, WaitList};
use crate::memory::{FillColor, Image, ImageRegion, MapFlags, MappedRegion};
use crate::queue::CommandQueue;
use crate::transport::Operation;
use crate::version::{OpKind, Route, Version};

/// Iteration geometry for one mapped image region.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImageWalk {
    origin: [usize; 3],
    region: [usize; 3],
    element_size: usize,
    row_pitch: usize,
    slice_pitch: usize,
}

impl ImageWalk {
    pub(crate) fn new(image: &Image, region: &ImageRegion, mapping: &MappedRegion) -> Self {
        let element_size = image.element_size();
        // Pitch 0 from the device means tightly packed along that axis.
        let row_pitch = match mapping.row_pitch() {
            0 => region.region[0] * element_size,
            p => p,
        };
        let slice_pitch = match mapping.slice_pitch() {
            0 => row_pitch * region.region[1],
            p => p,
        };
        ImageWalk {
            origin: region.origin,
            region: region.region,
            element_size,
            row_pitch,
            slice_pitch,
        }
    }

    /// Visit every element, z then y then x.
    ///
    /// # Safety
    /// `base` must point at the region origin of a live mapping covering the
    /// whole pitched region, with no other access for the duration.
    pub(crate) unsafe fn run<F>(&self, base: *mut u8, f: &mut F)
    where
        F: FnMut(&mut [u8], usize, usize, usize),
    {
        let [ox, oy, oz] = self.origin;
        let [w, h, d] = self.region;
        for z in 0..d {
            let slice = base.add(z * self.slice_pitch);
            for y in 0..h {
                let row = slice.add(y * self.row_pitch);
                for x in 0..w {
                    let element =
                        std::slice::from_raw_parts_mut(row.add(x * self.element_size), self.element_size);
                    f(element, ox + x, oy + y, oz + z);
                }
            }
        }
    }
}

impl CommandQueue {
    /// Run `f` on every element of `region` (the whole image if `None`)
    /// through a host mapping made with `flags`.
    ///
    /// `f` receives the element's bytes (exactly `element_size` of them)
    /// and its absolute `(x, y, z)`. Without an event slot the call blocks
    /// until the image is unmapped again; with one, `f` runs on the
    /// transport's completion thread and the event fires after the unmap.
    pub fn enqueue_walk_image<F>(
        &self,
        image: &Image,
        mut f: F,
        flags: MapFlags,
        region: Option<&ImageRegion>,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()>
    where
        F: FnMut(&mut [u8], usize, usize, usize) + Send + 'static,
    {
        let region = region.copied().unwrap_or_else(|| ImageRegion::full(image));
        self.assert_image_region(image, &region);

        if region.is_empty() {
            tracing::trace!(deps = wait.len(), "empty walk region, nothing mapped");
            return match event {
                None => wait.wait().map_err(|_| {
                    QueueError::transport(status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
                }),
                Some(slot) => {
                    *slot = self.join_wait_list(wait);
                    Ok(())
                }
            };
        }

        match event {
            None => self.walk_blocking(image, &region, flags, &mut f, wait),
            Some(slot) => self.walk_async(image, region, flags, f, wait, slot),
        }
    }

    /// A user event that finishes once every event in `wait` has. It fails
    /// with `EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST` if any of them did.
    fn join_wait_list(&self, wait: &WaitList) -> Event {
        let done = UserEvent::new(self.context());
        if wait.is_empty() {
            done.set_complete();
            return done.into_event();
        }

        let pending = Arc::new(AtomicUsize::new(wait.len()));
        let failed = Arc::new(AtomicBool::new(false));
        for dep in wait.iter() {
            let done = done.clone();
            let pending = Arc::clone(&pending);
            let failed = Arc::clone(&failed);
            dep.set_callback(move |outcome| {
                if matches!(outcome, EventStatus::Error(_)) {
                    failed.store(true, Ordering::SeqCst);
                }
                if pending.fetch_sub(1, Ordering::AcqRel) > 1 {
                    return;
                }
                if failed.load(Ordering::SeqCst) {
                    done.set_status(EventStatus::Error(
                        status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                    ));
                } else {
                    done.set_complete();
                }
            });
        }
        done.into_event()
    }

    fn walk_blocking<F>(
        &self,
        image: &Image,
        region: &ImageRegion,
        flags: MapFlags,
        f: &mut F,
        wait: &WaitList,
    ) -> Result<()>
    where
        F: FnMut(&mut [u8], usize, usize, usize),
    {
        let mapping = self.enqueue_map_image(image, flags, region, wait, None)?;
        let walk = ImageWalk::new(image, region, &mapping);
        // SAFETY: the blocking map has completed and the mapping stays live
        // until the unmap below.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            walk.run(mapping.as_mut_ptr(), f)
        }));
        let unmapped = self.enqueue_unmap_image(image, &mapping, &WaitList::new(), None);
        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
        unmapped
    }

    fn walk_async<F>(
        &self,
        image: &Image,
        region: ImageRegion,
        flags: MapFlags,
        mut f: F,
        wait: &WaitList,
        slot: &mut Event,
    ) -> Result<()>
    where
        F: FnMut(&mut [u8], usize, usize, usize) + Send + 'static,
    {
        let gate = UserEvent::new(self.context());
        let unmap_wait = WaitList::from(gate.event().clone());

        let (mapping, map_event) = self.enqueue_map_image_async(image, flags, &region, wait)?;
        let walk = ImageWalk::new(image, &region, &mapping);
        let signal = gate.clone();
        map_event.set_callback(move |map_status| {
            if let EventStatus::Error(code) = map_status {
                signal.set_status(EventStatus::Error(code));
                return;
            }
            // SAFETY: the map has completed and the unmap is held back by
            // `signal` until the walk returns.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
                walk.run(mapping.as_mut_ptr(), &mut f)
            }));
            match outcome {
                Ok(()) => signal.set_complete(),
                Err(_) => {
                    tracing::warn!("image walk callback panicked");
                    signal.set_status(EventStatus::Error(status::OUT_OF_RESOURCES));
                }
            }
        });

        self.enqueue_unmap_image(image, &mapping, &unmap_wait, Some(slot))
    }

    /// Fill `region` with `color` by walking a write mapping. Works at every
    /// tier; exactly `element_size` bytes of `color` are written per element.
    pub fn enqueue_rawfill_image_walking(
        &self,
        image: &Image,
        color: &FillColor,
        region: &ImageRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        let element_size = image.element_size();
        let pattern = color.element(element_size).to_vec();
        self.enqueue_walk_image(
            image,
            move |element, _, _, _| element.copy_from_slice(&pattern),
            MapFlags::WRITE,
            Some(region),
            wait,
            event,
        )
    }

    /// Fill `region` with `color` through the device's fill opcode.
    /// Requires tier 1.2; below that the call fails without submitting.
    pub fn enqueue_fill_image_native(
        &self,
        image: &Image,
        color: &FillColor,
        region: &ImageRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_image_region(image, region);
        if let Route::Emulated = self.gate(OpKind::FillImage)? {
            return Err(QueueError::Unsupported {
                op: OpKind::FillImage,
                required: Version::V1_2,
                actual: self.version(),
            });
        }
        self.submit_fill(image, color, region, wait, event)
    }

    /// Fill `region` with `color`, natively where the device supports it
    /// and by walking a mapping otherwise.
    pub fn enqueue_fill_image(
        &self,
        image: &Image,
        color: &FillColor,
        region: &ImageRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        self.assert_image_region(image, region);
        match self.gate(OpKind::FillImage)? {
            Route::Emulated => {
                tracing::debug!(version = %self.version(), "image fill emulated by walking");
                self.enqueue_rawfill_image_walking(image, color, region, wait, event)
            }
            _ => self.submit_fill(image, color, region, wait, event),
        }
    }

    fn submit_fill(
        &self,
        image: &Image,
        color: &FillColor,
        region: &ImageRegion,
        wait: &WaitList,
        event: Option<&mut Event>,
    ) -> Result<()> {
        let op = Operation::FillImage {
            image: image.clone(),
            color: *color,
            region: *region,
        };
        self.submit(op, wait, event).map(drop)
    }
}
