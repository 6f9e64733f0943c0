// gpu/memory.rs — Device storage for buffers and images, and the staging
// transfers that move bytes between them and the host.
//
// RESPONSIBILITIES
// ─────────────────
// 1. `GpuBuffer` / `GpuTexture` — what a `MemHandle` holds on this backend.
// 2. Format mapping — `ImageFormat` → `wgpu::TextureFormat`. Formats with no
//    wgpu equivalent are refused at allocation time.
// 3. Transfers — byte-exact reads and writes of buffer ranges and texture
//    regions, always blocking (they run on the channel's worker thread).
//
//
// THE ALIGNMENT PROBLEM
// ──────────────────────
// wgpu constrains transfers in ways the queue API does not:
//
//   buffer copies / write_buffer   offset and size multiples of 4
//                                  (COPY_BUFFER_ALIGNMENT)
//   texture → buffer copies        bytes_per_row a multiple of 256
//                                  (COPY_BYTES_PER_ROW_ALIGNMENT)
//
// Buffers are allocated rounded up to 4 bytes so an aligned window around
// any valid range always exists. Unaligned reads fetch the window and slice
// it; unaligned writes read the window, patch it, and write it back.
// Texture readback pads rows to 256 bytes in the staging buffer and strips
// the padding afterwards. Uploads go through `Queue::write_texture`, which
// has no row alignment requirement.

use std::sync::mpsc;

use crate::error::{status, TransportResult};
use crate::gpu::device::GpuDevice;
use crate::memory::{ChannelOrder, ChannelType, ImageDesc, ImageFormat, ImageRegion, ImageType};

const BUFFER_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;
const ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// A buffer allocation: a storage buffer usable by kernels and by copies.
pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    /// Size the caller asked for; the wgpu buffer may be up to 3 bytes
    /// larger.
    pub size: usize,
}

impl GpuBuffer {
    pub(crate) fn new(gpu: &GpuDevice, size: usize) -> Self {
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("devqueue buffer"),
            size: align_up(size, BUFFER_ALIGNMENT) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        GpuBuffer { buffer, size }
    }
}

/// An image allocation.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub desc: ImageDesc,
    pub format: wgpu::TextureFormat,
}

impl GpuTexture {
    pub(crate) fn new(gpu: &GpuDevice, desc: &ImageDesc) -> TransportResult<Self> {
        let format = texture_format(desc.format).ok_or(status::IMAGE_FORMAT_NOT_SUPPORTED)?;
        let [width, height, depth] = desc.extent();
        let dimension = match desc.image_type {
            ImageType::Image1d => wgpu::TextureDimension::D1,
            ImageType::Image2d => wgpu::TextureDimension::D2,
            ImageType::Image3d => wgpu::TextureDimension::D3,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("devqueue image"),
            size: wgpu::Extent3d {
                width: width as u32,
                height: height as u32,
                depth_or_array_layers: depth as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        Ok(GpuTexture {
            texture,
            desc: *desc,
            format,
        })
    }
}

/// wgpu equivalent of an image format, if there is one.
pub fn texture_format(format: ImageFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    use ChannelOrder as O;
    use ChannelType as T;
    let mapped = match (format.order, format.channel_type) {
        (O::R, T::UnormInt8) => F::R8Unorm,
        (O::R, T::SnormInt8) => F::R8Snorm,
        (O::R, T::UnsignedInt8) => F::R8Uint,
        (O::R, T::SignedInt8) => F::R8Sint,
        (O::R, T::UnsignedInt16) => F::R16Uint,
        (O::R, T::SignedInt16) => F::R16Sint,
        (O::R, T::HalfFloat) => F::R16Float,
        (O::R, T::UnsignedInt32) => F::R32Uint,
        (O::R, T::SignedInt32) => F::R32Sint,
        (O::R, T::Float) => F::R32Float,
        (O::Rg, T::UnormInt8) => F::Rg8Unorm,
        (O::Rg, T::SnormInt8) => F::Rg8Snorm,
        (O::Rg, T::UnsignedInt8) => F::Rg8Uint,
        (O::Rg, T::SignedInt8) => F::Rg8Sint,
        (O::Rg, T::UnsignedInt16) => F::Rg16Uint,
        (O::Rg, T::SignedInt16) => F::Rg16Sint,
        (O::Rg, T::HalfFloat) => F::Rg16Float,
        (O::Rg, T::UnsignedInt32) => F::Rg32Uint,
        (O::Rg, T::SignedInt32) => F::Rg32Sint,
        (O::Rg, T::Float) => F::Rg32Float,
        (O::Rgba, T::UnormInt8) => F::Rgba8Unorm,
        (O::Rgba, T::SnormInt8) => F::Rgba8Snorm,
        (O::Rgba, T::UnsignedInt8) => F::Rgba8Uint,
        (O::Rgba, T::SignedInt8) => F::Rgba8Sint,
        (O::Rgba, T::UnsignedInt16) => F::Rgba16Uint,
        (O::Rgba, T::SignedInt16) => F::Rgba16Sint,
        (O::Rgba, T::HalfFloat) => F::Rgba16Float,
        (O::Rgba, T::UnsignedInt32) => F::Rgba32Uint,
        (O::Rgba, T::SignedInt32) => F::Rgba32Sint,
        (O::Rgba, T::Float) => F::Rgba32Float,
        (O::Bgra, T::UnormInt8) => F::Bgra8Unorm,
        _ => return None,
    };
    Some(mapped)
}

// ---------------------------------------------------------------------------
// Buffer transfers
// ---------------------------------------------------------------------------

/// Read `len` bytes at `offset`.
pub(crate) fn read_buffer(
    gpu: &GpuDevice,
    src: &GpuBuffer,
    offset: usize,
    len: usize,
) -> TransportResult<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let start = align_down(offset, BUFFER_ALIGNMENT);
    let end = align_up(offset + len, BUFFER_ALIGNMENT);
    let window = (end - start) as u64;

    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("devqueue readback"),
        size: window,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("devqueue readback"),
        });
    encoder.copy_buffer_to_buffer(&src.buffer, start as u64, &staging, 0, window);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let mapped = map_blocking(gpu, &staging)?;
    let lead = offset - start;
    let out = mapped[lead..lead + len].to_vec();
    drop(mapped);
    staging.unmap();
    Ok(out)
}

/// Write `data` at `offset` and wait for it to land.
pub(crate) fn write_buffer(
    gpu: &GpuDevice,
    dst: &GpuBuffer,
    offset: usize,
    data: &[u8],
) -> TransportResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    let aligned = offset % BUFFER_ALIGNMENT == 0 && data.len() % BUFFER_ALIGNMENT == 0;
    if aligned {
        gpu.queue.write_buffer(&dst.buffer, offset as u64, data);
    } else {
        let start = align_down(offset, BUFFER_ALIGNMENT);
        let end = align_up(offset + data.len(), BUFFER_ALIGNMENT);
        let mut window = read_buffer(gpu, dst, start, end - start)?;
        let lead = offset - start;
        window[lead..lead + data.len()].copy_from_slice(data);
        gpu.queue.write_buffer(&dst.buffer, start as u64, &window);
    }
    gpu.wait_idle();
    Ok(())
}

// ---------------------------------------------------------------------------
// Texture transfers
// ---------------------------------------------------------------------------

/// Read an image region as tightly packed bytes.
pub(crate) fn read_texture(
    gpu: &GpuDevice,
    src: &GpuTexture,
    region: &ImageRegion,
) -> TransportResult<Vec<u8>> {
    let es = src.desc.format.element_size();
    let [w, h, d] = region.region;
    if w * h * d == 0 {
        return Ok(Vec::new());
    }
    let row_bytes = (w * es) as u32;
    let padded_row = align_to(row_bytes, ROW_ALIGNMENT);
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("devqueue texture readback"),
        size: padded_row as u64 * (h * d) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("devqueue texture readback"),
        });
    encoder.copy_texture_to_buffer(
        copy_texture(src, region),
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(h as u32),
            },
        },
        extent(region),
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));

    // Strip the per-row padding.
    let mapped = map_blocking(gpu, &staging)?;
    let row_bytes = row_bytes as usize;
    let mut out = vec![0u8; row_bytes * h * d];
    for row in 0..h * d {
        let s = row * padded_row as usize;
        out[row * row_bytes..(row + 1) * row_bytes].copy_from_slice(&mapped[s..s + row_bytes]);
    }
    drop(mapped);
    staging.unmap();
    Ok(out)
}

/// Write tightly packed bytes into an image region and wait for it to land.
pub(crate) fn write_texture(
    gpu: &GpuDevice,
    dst: &GpuTexture,
    region: &ImageRegion,
    data: &[u8],
) -> TransportResult<()> {
    let es = dst.desc.format.element_size();
    let [w, h, _] = region.region;
    if region.is_empty() {
        return Ok(());
    }
    gpu.queue.write_texture(
        copy_texture(dst, region),
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some((w * es) as u32),
            rows_per_image: Some(h as u32),
        },
        extent(region),
    );
    gpu.wait_idle();
    Ok(())
}

/// Device-side region copy between two textures of the same format.
pub(crate) fn copy_texture_region(
    gpu: &GpuDevice,
    src: &GpuTexture,
    dst: &GpuTexture,
    src_region: &ImageRegion,
    dst_origin: [usize; 3],
) {
    let dst_region = ImageRegion {
        origin: dst_origin,
        region: src_region.region,
    };
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("devqueue image copy"),
        });
    encoder.copy_texture_to_texture(
        copy_texture(src, src_region),
        copy_texture(dst, &dst_region),
        extent(src_region),
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));
    gpu.device.poll(wgpu::Maintain::Wait);
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn copy_texture<'a>(tex: &'a GpuTexture, region: &ImageRegion) -> wgpu::ImageCopyTexture<'a> {
    wgpu::ImageCopyTexture {
        texture: &tex.texture,
        mip_level: 0,
        origin: wgpu::Origin3d {
            x: region.origin[0] as u32,
            y: region.origin[1] as u32,
            z: region.origin[2] as u32,
        },
        aspect: wgpu::TextureAspect::All,
    }
}

fn extent(region: &ImageRegion) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: region.region[0] as u32,
        height: region.region[1] as u32,
        depth_or_array_layers: region.region[2] as u32,
    }
}

/// Map a staging buffer for reading, blocking until the GPU is done.
fn map_blocking(gpu: &GpuDevice, staging: &wgpu::Buffer) -> TransportResult<wgpu::BufferView<'_>> {
    let slice = staging.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    match receiver.recv() {
        Ok(Ok(())) => Ok(slice.get_mapped_range()),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "staging buffer map failed");
            Err(status::MAP_FAILURE)
        }
        Err(_) => Err(status::MAP_FAILURE),
    }
}

/// Round `value` up to the next multiple of `alignment`.
///
///   align_to(100, 256) = 256
///   align_to(256, 256) = 256
///   align_to(257, 256) = 512
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

#[inline]
fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[inline]
fn align_down(value: usize, alignment: usize) -> usize {
    value / alignment * alignment
}
