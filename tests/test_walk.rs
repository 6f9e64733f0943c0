// tests/test_walk.rs — Integration tests for host-side image walking
//
// Walks are observed two ways: through the coordinates the callback sees,
// and through the image contents read back afterwards.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use devqueue::host::{DeviceProfile, HostDevice};
use devqueue::*;

fn setup(profile: DeviceProfile) -> (HostDevice, Context, CommandQueue) {
    let host = HostDevice::new(profile);
    let device = Device::new(host.clone());
    let context = Context::new(&device);
    let queue = CommandQueue::new(&context, &device, QueueProperties::empty()).unwrap();
    (host, context, queue)
}

fn r8() -> ImageFormat {
    ImageFormat::new(ChannelOrder::R, ChannelType::UnsignedInt8)
}

fn rgba8() -> ImageFormat {
    ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8)
}

fn read_all(queue: &CommandQueue, image: &Image) -> Vec<u8> {
    let region = ImageRegion::full(image);
    let mut out = vec![0u8; region.packed_len(image.element_size())];
    queue.enqueue_read_image(image, &region, &mut out, &WaitList::new()).unwrap();
    out
}

// ===== Coverage and order =====

#[test]
fn test_walk_visits_region_in_zyx_order() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_3d(&ctx, 5, 4, 3, r8()).unwrap();
    let region = ImageRegion::new([1, 2, 1], [3, 2, 2]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    queue
        .enqueue_walk_image(
            &image,
            move |element, x, y, z| {
                assert_eq!(element.len(), 1);
                sink.lock().unwrap().push((x, y, z));
            },
            MapFlags::READ,
            Some(&region),
            &WaitList::new(),
            None,
        )
        .unwrap();

    let mut expected = Vec::new();
    for z in 1..3 {
        for y in 2..4 {
            for x in 1..4 {
                expected.push((x, y, z));
            }
        }
    }
    assert_eq!(*seen.lock().unwrap(), expected);
}

#[test]
fn test_walk_sees_element_bytes() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 2, 2, rgba8()).unwrap();
    let data: Vec<u8> = (0..16).collect();
    queue
        .enqueue_write_image(&image, &ImageRegion::full(&image), &data, &WaitList::new())
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    queue
        .enqueue_walk_image(
            &image,
            move |element, x, y, _| sink.lock().unwrap().push((x, y, element.to_vec())),
            MapFlags::READ,
            None,
            &WaitList::new(),
            None,
        )
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], (0, 0, vec![0, 1, 2, 3]));
    assert_eq!(seen[3], (1, 1, vec![12, 13, 14, 15]));
}

#[test]
fn test_walk_writes_are_visible_after_unmap() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 4, 3, r8()).unwrap();

    queue
        .enqueue_walk_image(
            &image,
            |element, x, y, _| element[0] = (y * 10 + x) as u8,
            MapFlags::WRITE,
            None,
            &WaitList::new(),
            None,
        )
        .unwrap();

    assert_eq!(
        read_all(&queue, &image),
        vec![0, 1, 2, 3, 10, 11, 12, 13, 20, 21, 22, 23]
    );
}

#[test]
fn test_walk_on_1d_image() {
    let (_, ctx, queue) = setup(DeviceProfile::Minimal);
    let image = Image::new_1d(&ctx, 6, r8()).unwrap();
    let region = ImageRegion::new([2], [3]);

    queue
        .enqueue_walk_image(
            &image,
            |element, x, y, z| {
                assert_eq!((y, z), (0, 0));
                element[0] = x as u8;
            },
            MapFlags::WRITE,
            Some(&region),
            &WaitList::new(),
            None,
        )
        .unwrap();
    assert_eq!(read_all(&queue, &image), vec![0, 0, 2, 3, 4, 0]);
}

// ===== Asynchronous walks =====

#[test]
fn test_async_walk_event_waits_for_slow_walk() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 2, 2, r8()).unwrap();

    let mut event = Event::null();
    queue
        .enqueue_walk_image(
            &image,
            |element, _, _, _| {
                thread::sleep(Duration::from_millis(40));
                element[0] = 0xEE;
            },
            MapFlags::WRITE,
            None,
            &WaitList::new(),
            Some(&mut event),
        )
        .unwrap();

    assert!(!event.is_null());
    assert_eq!(event.wait_timeout(Duration::from_millis(20)).unwrap(), false);
    event.wait().unwrap();
    assert_eq!(event.status(), EventStatus::Complete);
    assert_eq!(read_all(&queue, &image), vec![0xEE; 4]);
}

#[test]
fn test_async_walk_honours_wait_list() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_1d(&ctx, 4, r8()).unwrap();
    let gate = UserEvent::new(&ctx);
    let visited = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&visited);
    let mut event = Event::null();
    queue
        .enqueue_walk_image(
            &image,
            move |_, _, _, _| *counter.lock().unwrap() += 1,
            MapFlags::READ,
            None,
            &WaitList::from(gate.event().clone()),
            Some(&mut event),
        )
        .unwrap();

    assert_eq!(event.wait_timeout(Duration::from_millis(50)).unwrap(), false);
    assert_eq!(*visited.lock().unwrap(), 0);

    gate.set_complete();
    event.wait().unwrap();
    assert_eq!(*visited.lock().unwrap(), 4);
}

#[test]
fn test_async_walk_inherits_failed_dependency() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_1d(&ctx, 4, r8()).unwrap();
    let gate = UserEvent::new(&ctx);

    let mut event = Event::null();
    queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| panic!("walk must not run after a failed map"),
            MapFlags::READ,
            None,
            &WaitList::from(gate.event().clone()),
            Some(&mut event),
        )
        .unwrap();

    gate.set_status(EventStatus::Error(-1000));
    assert!(event.wait().is_err());
}

// ===== Empty regions =====

#[test]
fn test_zero_extent_walk_is_a_no_op() {
    let (host, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 4, 4, r8()).unwrap();
    let region = ImageRegion::new([1, 1], [0, 3]);
    let before = host.ops_submitted();

    queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| panic!("nothing to visit"),
            MapFlags::WRITE,
            Some(&region),
            &WaitList::new(),
            None,
        )
        .unwrap();

    let mut event = Event::null();
    queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| panic!("nothing to visit"),
            MapFlags::WRITE,
            Some(&region),
            &WaitList::new(),
            Some(&mut event),
        )
        .unwrap();
    assert_eq!(event.status(), EventStatus::Complete);
    assert_eq!(host.ops_submitted(), before);
}

#[test]
fn test_zero_extent_walk_waits_for_pending_dependency() {
    let (host, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 4, 4, r8()).unwrap();
    let region = ImageRegion::new([0, 0], [4, 0]);
    let gate = UserEvent::new(&ctx);
    let before = host.ops_submitted();

    let mut event = Event::null();
    queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| panic!("nothing to visit"),
            MapFlags::READ,
            Some(&region),
            &WaitList::from(gate.event().clone()),
            Some(&mut event),
        )
        .unwrap();
    assert!(!event.wait_timeout(Duration::from_millis(20)).unwrap());

    gate.set_complete();
    event.wait().unwrap();
    assert_eq!(host.ops_submitted(), before);
}

#[test]
fn test_zero_extent_walk_reports_failed_dependency() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_2d(&ctx, 4, 4, r8()).unwrap();
    let region = ImageRegion::new([2, 2], [0, 0]);
    let ok = UserEvent::new(&ctx);
    let bad = UserEvent::new(&ctx);
    let wait: WaitList = [ok.event().clone(), bad.event().clone()].into_iter().collect();

    let mut event = Event::null();
    queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| {},
            MapFlags::READ,
            Some(&region),
            &wait,
            Some(&mut event),
        )
        .unwrap();
    bad.set_status(EventStatus::Error(-5));
    assert!(!event.is_finished());
    ok.set_complete();
    assert_eq!(
        event.wait().unwrap_err().code(),
        status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
    );

    // Blocking form, dependency already failed.
    let err = queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| {},
            MapFlags::READ,
            Some(&region),
            &WaitList::from(bad.event().clone()),
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
}

#[test]
fn test_blocking_zero_extent_walk_returns_after_dependency() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_1d(&ctx, 8, r8()).unwrap();
    let region = ImageRegion::new([3], [0]);
    let gate = UserEvent::new(&ctx);

    let releaser = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            gate.set_complete();
        })
    };
    queue
        .enqueue_walk_image(
            &image,
            |_, _, _, _| {},
            MapFlags::READ,
            Some(&region),
            &WaitList::from(gate.event().clone()),
            None,
        )
        .unwrap();
    assert!(gate.is_finished());
    releaser.join().unwrap();
}

// ===== Fill =====

#[test]
fn test_emulated_fill_matches_native_fill() {
    let color = FillColor::from([10u8, 20, 30, 40]);
    let region = ImageRegion::new([1, 0], [2, 3]);

    let (legacy_host, legacy_ctx, legacy) = setup(DeviceProfile::Legacy);
    let emulated = Image::new_2d(&legacy_ctx, 4, 3, rgba8()).unwrap();
    legacy
        .enqueue_fill_image(&emulated, &color, &region, &WaitList::new(), None)
        .unwrap();
    assert_eq!(legacy_host.op_count(OpKind::FillImage), 0);
    assert_eq!(legacy_host.op_count(OpKind::MapImage), 1);

    let (native_host, native_ctx, native) = setup(DeviceProfile::Baseline);
    let direct = Image::new_2d(&native_ctx, 4, 3, rgba8()).unwrap();
    native
        .enqueue_fill_image(&direct, &color, &region, &WaitList::new(), None)
        .unwrap();
    assert_eq!(native_host.op_count(OpKind::FillImage), 1);
    assert_eq!(native_host.op_count(OpKind::MapImage), 0);

    let a = read_all(&legacy, &emulated);
    let b = read_all(&native, &direct);
    assert_eq!(a, b);
    assert_eq!(&a[4..8], &[10, 20, 30, 40]);
    assert_eq!(&a[0..4], &[0, 0, 0, 0]);
}

#[test]
fn test_rawfill_walking_writes_only_element_size_bytes() {
    let (_, ctx, queue) = setup(DeviceProfile::Modern);
    let image = Image::new_1d(&ctx, 3, r8()).unwrap();
    let color = FillColor::from([0x42u8, 0x99, 0x99, 0x99]);

    queue
        .enqueue_rawfill_image_walking(&image, &color, &ImageRegion::full(&image), &WaitList::new(), None)
        .unwrap();
    assert_eq!(read_all(&queue, &image), vec![0x42; 3]);
}

#[test]
fn test_async_emulated_fill() {
    let (_, ctx, queue) = setup(DeviceProfile::Minimal);
    let image = Image::new_2d(&ctx, 3, 3, r8()).unwrap();
    let mut event = Event::null();
    queue
        .enqueue_fill_image(
            &image,
            &FillColor::from([7u8]),
            &ImageRegion::full(&image),
            &WaitList::new(),
            Some(&mut event),
        )
        .unwrap();
    event.wait().unwrap();
    assert_eq!(read_all(&queue, &image), vec![7; 9]);
}

#[test]
fn test_native_fill_refuses_legacy_device() {
    let (host, ctx, queue) = setup(DeviceProfile::Legacy);
    let image = Image::new_1d(&ctx, 4, r8()).unwrap();
    let err = queue
        .enqueue_fill_image_native(
            &image,
            &FillColor::from([1u8]),
            &ImageRegion::full(&image),
            &WaitList::new(),
            None,
        )
        .unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(host.op_count(OpKind::FillImage), 0);
}
