// tests/test_dispatch.rs — Integration tests for CommandQueue submission
//
// Everything here runs on the host reference device. Capability tiers are
// chosen per test through `DeviceProfile`, and the device's per-kind
// operation counters tell us what actually reached the transport.

use devqueue::host::{DeviceProfile, HostDevice};
use devqueue::*;

fn setup(profile: DeviceProfile) -> (HostDevice, Context, CommandQueue) {
    let host = HostDevice::new(profile);
    let device = Device::new(host.clone());
    let context = Context::new(&device);
    let queue = CommandQueue::new(&context, &device, QueueProperties::empty()).unwrap();
    (host, context, queue)
}

fn rgba8() -> ImageFormat {
    ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8)
}

fn r8() -> ImageFormat {
    ImageFormat::new(ChannelOrder::R, ChannelType::UnsignedInt8)
}

// ===== Blocking vs. event-returning submission =====

#[test]
fn test_blocking_write_then_read() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 16).unwrap();
    let data: Vec<u8> = (0..16).collect();

    queue.enqueue_write_buffer(&buf, 0, &data, &WaitList::new()).unwrap();
    let mut out = [0u8; 16];
    queue.enqueue_read_buffer(&buf, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out.as_slice(), data.as_slice());
}

#[test]
fn test_partial_read_at_offset() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 8).unwrap();
    queue
        .enqueue_write_buffer(&buf, 0, &[1, 2, 3, 4, 5, 6, 7, 8], &WaitList::new())
        .unwrap();

    let mut out = [0u8; 3];
    queue.enqueue_read_buffer(&buf, 4, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [5, 6, 7]);
}

#[test]
fn test_event_slot_receives_event() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 4).unwrap();
    let mut out = vec![0u8; 4];

    let mut event = Event::null();
    unsafe {
        queue
            .enqueue_read_buffer_raw(&buf, 0, 4, out.as_mut_ptr(), &WaitList::new(), Some(&mut event))
            .unwrap();
    }
    assert!(!event.is_null());
    event.wait().unwrap();
    assert_eq!(event.status(), EventStatus::Complete);
    assert_eq!(out, vec![0; 4]);
}

#[test]
fn test_async_write_owns_its_data() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 4).unwrap();

    let event = queue
        .enqueue_write_buffer_async(&buf, 0, vec![9, 8, 7, 6], &WaitList::new())
        .unwrap();
    let mut out = [0u8; 4];
    queue.enqueue_read_buffer(&buf, 0, &mut out, &WaitList::from(event)).unwrap();
    assert_eq!(out, [9, 8, 7, 6]);
}

#[test]
fn test_copy_buffer_async() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let a = Buffer::new(&ctx, 8).unwrap();
    let b = Buffer::new(&ctx, 8).unwrap();
    queue
        .enqueue_write_buffer(&a, 0, &[1, 2, 3, 4, 5, 6, 7, 8], &WaitList::new())
        .unwrap();

    let event = queue.enqueue_copy_buffer_async(&a, &b, 2, 4, 4, &WaitList::new()).unwrap();
    event.wait().unwrap();

    let mut out = [0u8; 8];
    queue.enqueue_read_buffer(&b, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [0, 0, 0, 0, 3, 4, 5, 6]);
}

#[test]
fn test_finish_drains_async_work() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 64).unwrap();
    let events: Vec<Event> = (0..8)
        .map(|i| {
            queue
                .enqueue_write_buffer_async(&buf, i * 8, vec![i as u8; 8], &WaitList::new())
                .unwrap()
        })
        .collect();

    queue.flush().unwrap();
    queue.finish().unwrap();
    assert!(events.iter().all(Event::is_finished));
}

/// Write, copy, emulated image fill and an in-place walk, either all
/// blocking or all chained through events. Returns the buffer and image
/// contents afterwards.
fn write_copy_fill_walk(blocking: bool) -> (Vec<u8>, Vec<u8>) {
    let (_, ctx, queue) = setup(DeviceProfile::Legacy);
    let src = Buffer::new(&ctx, 64).unwrap();
    let dst = Buffer::new(&ctx, 64).unwrap();
    let image = Image::new_2d(&ctx, 6, 5, rgba8()).unwrap();
    let data: Vec<u8> = (0..64).map(|i| (i * 7) as u8).collect();
    let color = FillColor::from([10u8, 20, 30, 40]);
    let fill_region = ImageRegion::new([1, 1], [4, 3]);
    let walk_region = ImageRegion::new([0, 2], [6, 2]);
    let invert = |px: &mut [u8], _: usize, _: usize, _: usize| px.iter_mut().for_each(|c| *c = !*c);

    if blocking {
        queue.enqueue_write_buffer(&src, 0, &data, &WaitList::new()).unwrap();
        queue
            .enqueue_copy_buffer(&src, &dst, 8, 16, 32, &WaitList::new(), None)
            .unwrap();
        queue
            .enqueue_fill_image(&image, &color, &fill_region, &WaitList::new(), None)
            .unwrap();
        queue
            .enqueue_walk_image(
                &image,
                invert,
                MapFlags::READ | MapFlags::WRITE,
                Some(&walk_region),
                &WaitList::new(),
                None,
            )
            .unwrap();
    } else {
        let written = queue
            .enqueue_write_buffer_async(&src, 0, data, &WaitList::new())
            .unwrap();
        let mut copied = Event::null();
        queue
            .enqueue_copy_buffer(&src, &dst, 8, 16, 32, &WaitList::from(written), Some(&mut copied))
            .unwrap();
        let mut filled = Event::null();
        queue
            .enqueue_fill_image(&image, &color, &fill_region, &WaitList::new(), Some(&mut filled))
            .unwrap();
        let mut walked = Event::null();
        queue
            .enqueue_walk_image(
                &image,
                invert,
                MapFlags::READ | MapFlags::WRITE,
                Some(&walk_region),
                &WaitList::from(filled),
                Some(&mut walked),
            )
            .unwrap();
        copied.wait().unwrap();
        walked.wait().unwrap();
    }

    let mut bytes = vec![0u8; 64];
    queue.enqueue_read_buffer(&dst, 0, &mut bytes, &WaitList::new()).unwrap();
    let full = ImageRegion::full(&image);
    let mut pixels = vec![0u8; full.packed_len(image.element_size())];
    queue
        .enqueue_read_image(&image, &full, &mut pixels, &WaitList::new())
        .unwrap();
    (bytes, pixels)
}

#[test]
fn test_blocking_and_async_produce_identical_results() {
    let (blocking_bytes, blocking_pixels) = write_copy_fill_walk(true);
    let (async_bytes, async_pixels) = write_copy_fill_walk(false);

    assert_eq!(blocking_bytes, async_bytes);
    assert_eq!(blocking_pixels, async_pixels);
    // Sanity: the work actually happened.
    assert_eq!(blocking_bytes[16], 8 * 7);
    assert_eq!(&blocking_pixels[(6 + 1) * 4..(6 + 1) * 4 + 4], &[10, 20, 30, 40]);
    assert_eq!(&blocking_pixels[(2 * 6 + 1) * 4..(2 * 6 + 1) * 4 + 4], &[245, 235, 225, 215]);
}

// ===== Transport errors =====

#[test]
fn test_overlapping_copy_reports_transport_code() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 16).unwrap();
    let err = queue
        .enqueue_copy_buffer(&buf, &buf, 0, 4, 8, &WaitList::new(), None)
        .unwrap_err();
    assert_eq!(err, QueueError::Transport { code: status::MEM_COPY_OVERLAP });
    assert_eq!(err.code(), status::MEM_COPY_OVERLAP);
    assert!(!err.is_unsupported());
}

#[test]
fn test_unmap_of_unknown_pointer_is_rejected() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 16).unwrap();
    let mut bogus = [0u8; 4];
    let mapping = MappedRegion::new(
        devqueue::memory::HostPtr::new(bogus.as_mut_ptr()),
        4,
        0,
        0,
    );
    let err = queue
        .enqueue_unmap_buffer(&buf, &mapping, &WaitList::new(), None)
        .unwrap_err();
    assert_eq!(err.code(), status::INVALID_VALUE);
}

#[test]
fn test_error_display_names_the_code() {
    let err = QueueError::Transport { code: status::MAP_FAILURE };
    assert!(err.to_string().contains("MAP_FAILURE"));
}

// ===== Capability gating =====

#[test]
fn test_fill_buffer_rejected_below_1_2_without_submission() {
    let (host, ctx, queue) = setup(DeviceProfile::Legacy);
    let buf = Buffer::new(&ctx, 16).unwrap();
    let before = host.ops_submitted();

    let err = queue
        .enqueue_fill_buffer(&buf, &[1, 2], 0, 16, &WaitList::new(), None)
        .unwrap_err();
    assert_eq!(
        err,
        QueueError::Unsupported {
            op: OpKind::FillBuffer,
            required: Version::V1_2,
            actual: Version::V1_1,
        }
    );
    assert!(err.is_unsupported());
    assert_eq!(err.code(), status::INVALID_DEVICE);
    assert_eq!(host.ops_submitted(), before);
}

#[test]
fn test_rect_ops_need_1_1() {
    let (host, ctx, queue) = setup(DeviceProfile::Minimal);
    let a = Buffer::new(&ctx, 16).unwrap();
    let b = Buffer::new(&ctx, 16).unwrap();
    let rect = RectCopy::new([4, 2, 1]);

    let err = queue
        .enqueue_copy_buffer_rect(&a, &b, &rect, &WaitList::new(), None)
        .unwrap_err();
    assert!(err.is_unsupported());
    let mut out = [0u8; 8];
    assert!(queue
        .enqueue_read_buffer_rect_into(&a, &rect, &mut out, &WaitList::new())
        .unwrap_err()
        .is_unsupported());
    assert_eq!(host.op_count(OpKind::CopyBufferRect), 0);
    assert_eq!(host.op_count(OpKind::ReadBufferRect), 0);
}

#[test]
fn test_migrate_needs_1_2() {
    let (host, ctx, queue) = setup(DeviceProfile::Legacy);
    let buf = Buffer::new(&ctx, 4).unwrap();
    let err = queue
        .enqueue_migrate_memory_objects(
            &[MemObject::from(&buf)],
            MigrationFlags::empty(),
            &WaitList::new(),
            None,
        )
        .unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(host.op_count(OpKind::MigrateMemObjects), 0);
}

#[test]
fn test_svm_rejected_below_2_0() {
    let (host, ctx, queue) = setup(DeviceProfile::Baseline);
    let mut a = [1u8; 4];
    let b = [2u8; 4];
    let err = unsafe {
        queue.enqueue_svm_memcpy(a.as_mut_ptr(), b.as_ptr(), 4, &WaitList::new(), None)
    }
    .unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(a, [1; 4]);
    assert_eq!(host.op_count(OpKind::SvmMemcpy), 0);

    assert_eq!(ctx.svm_alloc(16).unwrap_err().code(), status::INVALID_OPERATION);
}

#[test]
fn test_dispatch_table_reflects_queue_version() {
    let (_, _, queue) = setup(DeviceProfile::Legacy);
    let table = queue.dispatch_table();
    assert_eq!(table.version(), Version::V1_1);
    assert!(table.supports(OpKind::ReadBufferRect));
    assert!(!table.supports(OpKind::FillBuffer));
    assert!(queue.check_device_version(1, 1));
    assert!(!queue.check_device_version(1, 2));
}

// ===== Rectangular transfers =====

#[test]
fn test_read_buffer_rect_extracts_block() {
    let (_, ctx, queue) = setup(DeviceProfile::Legacy);
    let buf = Buffer::new(&ctx, 16).unwrap();
    let data: Vec<u8> = (0..16).collect();
    queue.enqueue_write_buffer(&buf, 0, &data, &WaitList::new()).unwrap();

    // 2×2 block at (1, 1) of a 4×4 byte grid, into a packed host block.
    let rect = RectCopy::new([2, 2, 1]).src_origin([1, 1, 0]).src_pitch(4, 16);
    let mut out = [0u8; 4];
    queue
        .enqueue_read_buffer_rect_into(&buf, &rect, &mut out, &WaitList::new())
        .unwrap();
    assert_eq!(out, [5, 6, 9, 10]);
}

#[test]
fn test_write_buffer_rect_scatters_rows() {
    let (_, ctx, queue) = setup(DeviceProfile::Legacy);
    let buf = Buffer::new(&ctx, 16).unwrap();

    let rect = RectCopy::new([2, 2, 1]).dst_origin([2, 2, 0]).dst_pitch(4, 16);
    queue
        .enqueue_write_buffer_rect_from(&buf, &rect, &[1, 2, 3, 4], &WaitList::new())
        .unwrap();

    let mut out = [0u8; 16];
    queue.enqueue_read_buffer(&buf, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(&out[8..12], &[0, 0, 1, 2]);
    assert_eq!(&out[12..16], &[0, 0, 3, 4]);
}

#[test]
fn test_copy_buffer_rect_between_pitches() {
    let (_, ctx, queue) = setup(DeviceProfile::Legacy);
    let src = Buffer::new(&ctx, 16).unwrap();
    let dst = Buffer::new(&ctx, 8).unwrap();
    let data: Vec<u8> = (0..16).collect();
    queue.enqueue_write_buffer(&src, 0, &data, &WaitList::new()).unwrap();

    let rect = RectCopy::new([3, 2, 1])
        .src_origin([1, 2, 0])
        .src_pitch(4, 16)
        .dst_pitch(4, 8);
    queue
        .enqueue_copy_buffer_rect(&src, &dst, &rect, &WaitList::new(), None)
        .unwrap();

    let mut out = [0u8; 8];
    queue.enqueue_read_buffer(&dst, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [9, 10, 11, 0, 13, 14, 15, 0]);
}

// ===== Fill =====

#[test]
fn test_fill_buffer_repeats_pattern() {
    let (host, ctx, queue) = setup(DeviceProfile::Baseline);
    let buf = Buffer::new(&ctx, 12).unwrap();
    queue
        .enqueue_fill_buffer(&buf, &[0xAA, 0xBB], 2, 8, &WaitList::new(), None)
        .unwrap();

    let mut out = [0u8; 12];
    queue.enqueue_read_buffer(&buf, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [0, 0, 0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB, 0xAA, 0xBB, 0, 0]);
    assert_eq!(host.op_count(OpKind::FillBuffer), 1);
}

#[test]
fn test_fill_buffer_misaligned_size_is_transport_error() {
    let (_, ctx, queue) = setup(DeviceProfile::Baseline);
    let buf = Buffer::new(&ctx, 12).unwrap();
    let err = queue
        .enqueue_fill_buffer(&buf, &[1, 2, 3, 4], 0, 6, &WaitList::new(), None)
        .unwrap_err();
    assert_eq!(err.code(), status::INVALID_VALUE);
}

// ===== Map / unmap =====

#[test]
fn test_map_buffer_write_then_unmap() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 8).unwrap();

    let mapping = queue
        .enqueue_map_buffer(&buf, MapFlags::WRITE, 2, 4, &WaitList::new(), None)
        .unwrap();
    assert_eq!(mapping.len(), 4);
    unsafe { mapping.as_slice_mut() }.copy_from_slice(&[1, 2, 3, 4]);
    queue.enqueue_unmap_buffer(&buf, &mapping, &WaitList::new(), None).unwrap();

    let mut out = [0u8; 8];
    queue.enqueue_read_buffer(&buf, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [0, 0, 1, 2, 3, 4, 0, 0]);
}

#[test]
fn test_map_buffer_async_returns_event() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 4).unwrap();
    queue.enqueue_write_buffer(&buf, 0, &[4, 3, 2, 1], &WaitList::new()).unwrap();

    let (mapping, event) = queue
        .enqueue_map_buffer_async(&buf, MapFlags::READ, 0, 4, &WaitList::new())
        .unwrap();
    event.wait().unwrap();
    assert_eq!(unsafe { mapping.as_slice() }, &[4, 3, 2, 1]);
    queue
        .enqueue_unmap_mem_object(&MemObject::from(&buf), &mapping, &WaitList::new(), None)
        .unwrap();
}

#[test]
fn test_map_image_reports_pitches() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_3d(&ctx, 4, 3, 2, rgba8()).unwrap();
    let region = ImageRegion::new([1, 1, 0], [2, 2, 2]);

    let mapping = queue
        .enqueue_map_image(&image, MapFlags::READ, &region, &WaitList::new(), None)
        .unwrap();
    assert_eq!(mapping.row_pitch(), 16);
    assert_eq!(mapping.slice_pitch(), 48);
    queue.enqueue_unmap_image(&image, &mapping, &WaitList::new(), None).unwrap();
}

// ===== Images =====

#[test]
fn test_image_write_read_region() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 4, 4, r8()).unwrap();
    let region = ImageRegion::new([1, 1], [2, 2]);

    queue
        .enqueue_write_image(&image, &region, &[1, 2, 3, 4], &WaitList::new())
        .unwrap();

    let mut full = [0u8; 16];
    queue
        .enqueue_read_image(&image, &ImageRegion::full(&image), &mut full, &WaitList::new())
        .unwrap();
    assert_eq!(&full[4..8], &[0, 1, 2, 0]);
    assert_eq!(&full[8..12], &[0, 3, 4, 0]);
}

#[test]
fn test_read_image_raw_with_host_pitch() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 2, 2, r8()).unwrap();
    queue
        .enqueue_write_image(&image, &ImageRegion::full(&image), &[1, 2, 3, 4], &WaitList::new())
        .unwrap();

    // Host rows are 3 bytes wide; the third byte of each row is untouched.
    let mut host = [0xFFu8; 6];
    unsafe {
        queue
            .enqueue_read_image_raw(
                &image,
                &ImageRegion::full(&image),
                3,
                0,
                host.as_mut_ptr(),
                &WaitList::new(),
                None,
            )
            .unwrap();
    }
    assert_eq!(host, [1, 2, 0xFF, 3, 4, 0xFF]);
}

#[test]
fn test_copy_image_between_images() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let a = Image::new_2d(&ctx, 2, 2, r8()).unwrap();
    let b = Image::new_2d(&ctx, 3, 3, r8()).unwrap();
    queue
        .enqueue_write_image(&a, &ImageRegion::full(&a), &[1, 2, 3, 4], &WaitList::new())
        .unwrap();

    queue
        .enqueue_copy_image(&a, &b, &ImageRegion::full(&a), [1, 1, 0], &WaitList::new(), None)
        .unwrap();

    let mut out = [0u8; 9];
    queue
        .enqueue_read_image(&b, &ImageRegion::full(&b), &mut out, &WaitList::new())
        .unwrap();
    assert_eq!(out, [0, 0, 0, 0, 1, 2, 0, 3, 4]);
}

#[test]
#[should_panic(expected = "image region out of bounds on axis 0")]
fn test_wrapping_image_region_panics() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 4, 4, rgba8()).unwrap();
    let region = ImageRegion {
        origin: [usize::MAX, 0, 0],
        region: [2, 1, 1],
    };
    let mut out = vec![0u8; 8];
    let _ = queue.enqueue_read_image(&image, &region, &mut out, &WaitList::new());
}

#[test]
#[should_panic(expected = "image copy needs matching formats")]
fn test_copy_image_format_mismatch_panics() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let a = Image::new_2d(&ctx, 2, 2, r8()).unwrap();
    let b = Image::new_2d(&ctx, 2, 2, rgba8()).unwrap();
    let _ = queue.enqueue_copy_image(&a, &b, &ImageRegion::full(&a), [0; 3], &WaitList::new(), None);
}

#[test]
fn test_image_buffer_round_trip() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 3, 2, r8()).unwrap();
    let buf = Buffer::new(&ctx, 8).unwrap();
    queue
        .enqueue_write_buffer(&buf, 0, &[0, 0, 1, 2, 3, 4, 5, 6], &WaitList::new())
        .unwrap();

    queue
        .enqueue_copy_buffer_to_image(&buf, &image, 2, &ImageRegion::full(&image), &WaitList::new(), None)
        .unwrap();

    let back = Buffer::new(&ctx, 6).unwrap();
    queue
        .enqueue_copy_image_to_buffer(&image, &back, &ImageRegion::full(&image), 0, &WaitList::new(), None)
        .unwrap();

    let mut out = [0u8; 6];
    queue.enqueue_read_buffer(&back, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_write_image_async_keeps_data_alive() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_1d(&ctx, 4, r8()).unwrap();
    let event = queue
        .enqueue_write_image_async(&image, &ImageRegion::full(&image), vec![7, 7, 7, 7], &WaitList::new())
        .unwrap();

    let mut out = [0u8; 4];
    queue
        .enqueue_read_image(&image, &ImageRegion::full(&image), &mut out, &WaitList::from(event))
        .unwrap();
    assert_eq!(out, [7; 4]);
}

#[test]
fn test_migrate_is_accepted_on_1_2() {
    let (host, ctx, queue) = setup(DeviceProfile::Baseline);
    let buf = Buffer::new(&ctx, 4).unwrap();
    let image = Image::new_1d(&ctx, 4, r8()).unwrap();
    queue
        .enqueue_migrate_memory_objects(
            &[MemObject::from(&buf), MemObject::from(&image)],
            MigrationFlags::CONTENT_UNDEFINED,
            &WaitList::new(),
            None,
        )
        .unwrap();
    assert_eq!(host.op_count(OpKind::MigrateMemObjects), 1);
}

// ===== Shared virtual memory =====

#[test]
fn test_svm_fill_map_memcpy_free() {
    let (host, ctx, queue) = setup(DeviceProfile::Modern);
    let svm = ctx.svm_alloc(16).unwrap();

    queue
        .enqueue_svm_fill(&svm, &[0x5A], 16, &WaitList::new(), None)
        .unwrap();
    queue
        .enqueue_svm_map(&svm, 16, MapFlags::READ, &WaitList::new(), None)
        .unwrap();
    let mut out = [0u8; 16];
    unsafe {
        queue
            .enqueue_svm_memcpy(out.as_mut_ptr(), svm.as_ptr(), 16, &WaitList::new(), None)
            .unwrap();
    }
    assert_eq!(out, [0x5A; 16]);
    queue.enqueue_svm_unmap(&svm, &WaitList::new(), None).unwrap();

    queue.enqueue_svm_free(svm, &WaitList::new(), None).unwrap();
    assert_eq!(host.op_count(OpKind::SvmFree), 1);
}

#[test]
fn test_svm_memcpy_async() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let svm = ctx.svm_alloc(4).unwrap();
    let src = [1u8, 2, 3, 4];
    let event = unsafe {
        queue.enqueue_svm_memcpy_async(svm.as_ptr(), src.as_ptr(), 4, &WaitList::new())
    }
    .unwrap();
    event.wait().unwrap();

    let mut out = [0u8; 4];
    unsafe {
        queue
            .enqueue_svm_memcpy(out.as_mut_ptr(), svm.as_ptr(), 4, &WaitList::new(), None)
            .unwrap();
    }
    assert_eq!(out, src);
    queue.enqueue_svm_free(svm, &WaitList::new(), None).unwrap();
}

// ===== Queue lifecycle =====

#[test]
fn test_legacy_creation_route_below_2_0() {
    let host = HostDevice::new(DeviceProfile::Baseline);
    let device = Device::new(host.clone());
    let ctx = Context::new(&device);
    let _queue = CommandQueue::new(&ctx, &device, QueueProperties::empty()).unwrap();
    assert_eq!(host.legacy_queue_creations(), 1);
    assert_eq!(host.modern_queue_creations(), 0);
}

#[test]
fn test_queue_properties_round_trip() {
    let host = HostDevice::new(DeviceProfile::Modern);
    let device = Device::new(host);
    let ctx = Context::new(&device);
    let props = QueueProperties::PROFILING_ENABLE | QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE;
    let queue = CommandQueue::new(&ctx, &device, props).unwrap();
    assert_eq!(queue.properties(), props);
    assert_eq!(queue.device(), &device);
    assert_eq!(queue.context(), &ctx);
}

#[test]
fn test_buffer_clone_on_queue() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let buf = Buffer::new(&ctx, 4).unwrap();
    queue.enqueue_write_buffer(&buf, 0, &[1, 2, 3, 4], &WaitList::new()).unwrap();

    let copy = buf.clone_on(&queue).unwrap();
    assert_ne!(copy.get(), buf.get());
    let mut out = [0u8; 4];
    queue.enqueue_read_buffer(&copy, 0, &mut out, &WaitList::new()).unwrap();
    assert_eq!(out, [1, 2, 3, 4]);
}

#[test]
#[should_panic(expected = "different context")]
fn test_foreign_context_buffer_panics() {
    let (_, _, queue) = setup(DeviceProfile::Modern);
    let other = Context::new(queue.device());
    let buf = Buffer::new(&other, 4).unwrap();
    let _ = queue.enqueue_write_buffer(&buf, 0, &[0; 4], &WaitList::new());
}
