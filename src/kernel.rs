// kernel.rs — Kernel objects and launch geometry.
//
// A `Kernel` is a named program bound to a context. The program itself is
// backend-specific and stored type-erased; each backend downcasts it to
// the program type it understands (`HostProgram` for the host device,
// a compiled compute pipeline for wgpu). Launching a kernel on a backend
// that does not understand its program fails with `INVALID_KERNEL`.
//
// LAUNCH GEOMETRY
// ───────────────
//   dims    1..=3
//   offset  optional global offset, per dimension
//   global  mandatory global extent
//   local   optional work-group extent; all zeros means "runtime chooses",
//           which is stored as `None`
//
// Unused dimensions carry offset 0 and extent 1 so that iteration code can
// always loop over three axes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;

/// Indices of one work item, as seen by a host kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub dims: u32,
    pub global_id: [usize; 3],
    pub local_id: [usize; 3],
    pub group_id: [usize; 3],
    pub global_size: [usize; 3],
    pub local_size: [usize; 3],
    pub global_offset: [usize; 3],
}

impl WorkItem {
    /// Row-major linear index of the work item, offset removed.
    pub fn global_linear_id(&self) -> usize {
        let [x, y, z] = self.global_id;
        let [ox, oy, oz] = self.global_offset;
        let [sx, sy, _] = self.global_size;
        ((z - oz) * sy + (y - oy)) * sx + (x - ox)
    }
}

/// Program run by the host reference device: called once per work item.
pub struct HostProgram {
    func: Box<dyn Fn(&WorkItem) + Send + Sync>,
}

impl HostProgram {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&WorkItem) + Send + Sync + 'static,
    {
        HostProgram {
            func: Box::new(func),
        }
    }

    pub fn run(&self, item: &WorkItem) {
        (self.func)(item)
    }
}

/// A kernel bound to a context.
#[derive(Clone)]
pub struct Kernel {
    context: Context,
    name: Arc<str>,
    program: Arc<dyn Any + Send + Sync>,
}

impl Kernel {
    /// Wrap a backend-specific program.
    pub fn from_program<P>(context: &Context, name: &str, program: P) -> Self
    where
        P: Any + Send + Sync,
    {
        Kernel {
            context: context.clone(),
            name: Arc::from(name),
            program: Arc::new(program),
        }
    }

    /// A kernel for the host reference device.
    pub fn host<F>(context: &Context, name: &str, func: F) -> Self
    where
        F: Fn(&WorkItem) + Send + Sync + 'static,
    {
        Self::from_program(context, name, HostProgram::new(func))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn program<P: Any>(&self) -> Option<&P> {
        self.program.downcast_ref::<P>()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("context", &self.context.id())
            .finish()
    }
}

/// An N-dimensional launch range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    dims: u32,
    offset: Option<[usize; 3]>,
    global: [usize; 3],
    local: Option<[usize; 3]>,
}

impl NdRange {
    /// A range of `N` dimensions (1..=3) with the given global extent.
    pub fn new<const N: usize>(global: [usize; N]) -> Self {
        assert!(
            (1..=3).contains(&N),
            "work dimension must be 1, 2 or 3, got {N}"
        );
        NdRange {
            dims: N as u32,
            offset: None,
            global: pad(&global, 1),
            local: None,
        }
    }

    /// Global offset, one component per dimension.
    pub fn with_offset<const N: usize>(mut self, offset: [usize; N]) -> Self {
        assert_eq!(N as u32, self.dims, "offset dimensionality must match range");
        self.offset = Some(pad(&offset, 0));
        self
    }

    /// Work-group extent. All zeros leaves the choice to the runtime.
    pub fn with_local<const N: usize>(mut self, local: [usize; N]) -> Self {
        assert_eq!(N as u32, self.dims, "local dimensionality must match range");
        self.local = if local.iter().all(|&l| l == 0) {
            None
        } else {
            Some(pad(&local, 1))
        };
        self
    }

    /// 1D range with an explicit offset and an optional local size
    /// (0 means runtime-chosen).
    pub fn linear(offset: usize, global: usize, local: usize) -> Self {
        let range = NdRange::new([global]).with_local([local]);
        if offset == 0 {
            range
        } else {
            range.with_offset([offset])
        }
    }

    /// One work item, one work group.
    pub fn single() -> Self {
        NdRange::new([1]).with_local([1])
    }

    pub fn dims(&self) -> u32 {
        self.dims
    }

    pub fn offset(&self) -> Option<[usize; 3]> {
        self.offset
    }

    pub fn global(&self) -> [usize; 3] {
        self.global
    }

    pub fn local(&self) -> Option<[usize; 3]> {
        self.local
    }

    /// Total number of work items.
    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }
}

fn pad<const N: usize>(values: &[usize; N], fill: usize) -> [usize; 3] {
    let mut out = [fill; 3];
    out[..N].copy_from_slice(values);
    out
}
