// gpu/kernel.rs — WGSL compute kernels.
//
// A `GpuProgram` is WGSL source, an entry point, and the buffers bound to
// it. Wrapped in a `Kernel` (see `gpu_kernel`) it can be launched with
// `enqueue_nd_range_kernel` / `enqueue_task` on a queue of a `GpuBackend`.
//
// BINDING CONVENTION (group 0)
// ─────────────────────────────
//   binding 0      uniform `Launch { offset: vec4<u32>, global: vec4<u32> }`
//   binding 1..=n  the program's buffer arguments, storage read_write,
//                  in the order they were added
//
// Workgroup size arrives as override constants WORKGROUP_X/Y/Z. A kernel
// looks like:
//
//   struct Launch { offset: vec4<u32>, global: vec4<u32> }
//   @group(0) @binding(0) var<uniform> launch: Launch;
//   @group(0) @binding(1) var<storage, read_write> data: array<u32>;
//
//   override WORKGROUP_X: u32 = 64u;
//   override WORKGROUP_Y: u32 = 1u;
//   override WORKGROUP_Z: u32 = 1u;
//
//   @compute @workgroup_size(WORKGROUP_X, WORKGROUP_Y, WORKGROUP_Z)
//   fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
//       if any(gid >= launch.global.xyz) { return; }
//       let i = gid.x + launch.offset.x;
//       data[i] = data[i] * 2u;
//   }
//
// Pipelines are built on first launch and cached per (kernel, workgroup
// size) by the executor.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::context::Context;
use crate::gpu::device::{GpuDevice, WorkgroupSize};
use crate::kernel::{Kernel, NdRange};
use crate::memory::Buffer;

// ---------------------------------------------------------------------------
// Launch uniform (must match WGSL struct Launch exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct LaunchParams {
    offset: [u32; 4],
    global: [u32; 4],
}

impl LaunchParams {
    pub(crate) fn for_range(range: &NdRange) -> Self {
        let offset = range.offset().unwrap_or([0; 3]);
        let global = range.global();
        LaunchParams {
            offset: [offset[0] as u32, offset[1] as u32, offset[2] as u32, 0],
            global: [global[0] as u32, global[1] as u32, global[2] as u32, 0],
        }
    }
}

// ---------------------------------------------------------------------------
// GpuProgram
// ---------------------------------------------------------------------------

/// WGSL source plus the buffers it is launched with.
#[derive(Clone, Debug)]
pub struct GpuProgram {
    source: Arc<str>,
    entry_point: String,
    args: Vec<Buffer>,
}

impl GpuProgram {
    pub fn new(source: &str, entry_point: &str) -> Self {
        GpuProgram {
            source: Arc::from(source),
            entry_point: entry_point.to_string(),
            args: Vec::new(),
        }
    }

    /// Bind `buffer` at the next storage binding.
    pub fn arg(mut self, buffer: &Buffer) -> Self {
        self.args.push(buffer.clone());
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn args(&self) -> &[Buffer] {
        &self.args
    }
}

/// Wrap a WGSL program as a launchable kernel.
pub fn gpu_kernel(context: &Context, program: GpuProgram) -> Kernel {
    let name = program.entry_point.clone();
    Kernel::from_program(context, &name, program)
}

// ---------------------------------------------------------------------------
// Compiled pipeline
// ---------------------------------------------------------------------------

/// A compute pipeline and its bind group layout.
pub(crate) struct CompiledKernel {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

impl CompiledKernel {
    pub(crate) fn new(gpu: &GpuDevice, program: &GpuProgram, size: WorkgroupSize) -> Self {
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.entry_point()),
            source: wgpu::ShaderSource::Wgsl(program.source().into()),
        });

        let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let mut entries = vec![
            // 0 — launch params uniform
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        entries.extend((1..=program.args().len() as u32).map(storage));

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("devqueue kernel BGL"),
            entries: &entries,
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("devqueue kernel layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let constants = size.as_constants();
        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(program.entry_point()),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: program.entry_point(),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &constants,
                ..Default::default()
            },
            cache: None,
        });

        CompiledKernel { pipeline, bgl }
    }

    /// Encode, submit and wait for one launch.
    pub(crate) fn dispatch(
        &self,
        gpu: &GpuDevice,
        args: &[&wgpu::Buffer],
        params: LaunchParams,
        groups: (u32, u32, u32),
    ) {
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("devqueue launch params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: params_buf.as_entire_binding(),
        }];
        entries.extend(args.iter().enumerate().map(|(i, buf)| wgpu::BindGroupEntry {
            binding: i as u32 + 1,
            resource: buf.as_entire_binding(),
        }));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("devqueue kernel BG"),
            layout: &self.bgl,
            entries: &entries,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("devqueue dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("devqueue dispatch"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.0, groups.1, groups.2);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);
    }
}
