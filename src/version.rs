// version.rs — Capability tiers and the dispatch table.
//
// A device reports its protocol tier as `major * 100 + minor * 10` (1.2 → 120).
// Every operation kind has a requirement against that tier. Rather than
// scattering `if version < 120` checks through every enqueue call, the
// requirements live in one table, and the queue asks it for a `Route`:
//
//   Direct       → submit the operation as-is.
//   Legacy       → the device predates the modern entry point; use the old one.
//   Modern       → use the newer, wait-list-aware entry point.
//   Emulated     → no native opcode; the host-side walk engine stands in.
//   Unsupported  → fail with a capability error before touching the transport.
//
// Legacy and Modern produce identical caller-visible semantics. Only the
// transport entry point differs (e.g. `Marker` vs `MarkerWithWaitList`).

use std::fmt;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A device capability tier, encoded as `major * 100 + minor * 10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(u32);

impl Version {
    pub const V1_0: Version = Version(100);
    pub const V1_1: Version = Version(110);
    pub const V1_2: Version = Version(120);
    pub const V2_0: Version = Version(200);
    pub const V2_1: Version = Version(210);

    /// Build a tier from its major/minor parts.
    ///
    /// Minor versions are tens in this encoding (`1.2` → `120`), matching
    /// what devices report, so `Version::new(1, 2)` is `120`.
    pub const fn new(major: u32, minor: u32) -> Self {
        Version(major * 100 + minor * 10)
    }

    /// Wrap a raw encoded value (`120` for 1.2).
    pub const fn from_raw(raw: u32) -> Self {
        Version(raw)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u32 {
        self.0 / 100
    }

    pub const fn minor(self) -> u32 {
        (self.0 % 100) / 10
    }
}

impl From<u32> for Version {
    fn from(raw: u32) -> Self {
        Version(raw)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

// ---------------------------------------------------------------------------
// Operation kinds
// ---------------------------------------------------------------------------

/// Every kind of work a queue can submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    CreateQueue,
    ReadBuffer,
    WriteBuffer,
    CopyBuffer,
    ReadBufferRect,
    WriteBufferRect,
    CopyBufferRect,
    FillBuffer,
    MapBuffer,
    MapImage,
    Unmap,
    ReadImage,
    WriteImage,
    CopyImage,
    CopyImageToBuffer,
    CopyBufferToImage,
    FillImage,
    MigrateMemObjects,
    NdRangeKernel,
    Task,
    NativeKernel,
    Marker,
    MarkerWithWaitList,
    Barrier,
    BarrierWithWaitList,
    SvmMemcpy,
    SvmFill,
    SvmMap,
    SvmUnmap,
    SvmFree,
}

impl OpKind {
    /// Snake-case name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::CreateQueue => "create_queue",
            OpKind::ReadBuffer => "read_buffer",
            OpKind::WriteBuffer => "write_buffer",
            OpKind::CopyBuffer => "copy_buffer",
            OpKind::ReadBufferRect => "read_buffer_rect",
            OpKind::WriteBufferRect => "write_buffer_rect",
            OpKind::CopyBufferRect => "copy_buffer_rect",
            OpKind::FillBuffer => "fill_buffer",
            OpKind::MapBuffer => "map_buffer",
            OpKind::MapImage => "map_image",
            OpKind::Unmap => "unmap",
            OpKind::ReadImage => "read_image",
            OpKind::WriteImage => "write_image",
            OpKind::CopyImage => "copy_image",
            OpKind::CopyImageToBuffer => "copy_image_to_buffer",
            OpKind::CopyBufferToImage => "copy_buffer_to_image",
            OpKind::FillImage => "fill_image",
            OpKind::MigrateMemObjects => "migrate_mem_objects",
            OpKind::NdRangeKernel => "nd_range_kernel",
            OpKind::Task => "task",
            OpKind::NativeKernel => "native_kernel",
            OpKind::Marker => "marker",
            OpKind::MarkerWithWaitList => "marker_with_wait_list",
            OpKind::Barrier => "barrier",
            OpKind::BarrierWithWaitList => "barrier_with_wait_list",
            OpKind::SvmMemcpy => "svm_memcpy",
            OpKind::SvmFill => "svm_fill",
            OpKind::SvmMap => "svm_map",
            OpKind::SvmUnmap => "svm_unmap",
            OpKind::SvmFree => "svm_free",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Requirements and routes
// ---------------------------------------------------------------------------

/// What an operation kind needs from the device tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Available on every tier.
    Always,
    /// Rejected below the given tier.
    AtLeast(Version),
    /// Two entry points; the modern one from the given tier upward.
    Tiered { modern_from: Version },
    /// Native from the given tier upward, host emulation below it.
    EmulatedBelow(Version),
}

/// The submission strategy chosen for one operation on one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Legacy,
    Modern,
    Emulated,
    Unsupported { required: Version },
}

/// Static requirement table.
pub fn requirement(op: OpKind) -> Requirement {
    use OpKind::*;
    match op {
        CreateQueue | Task => Requirement::Tiered { modern_from: Version::V2_0 },
        Marker | Barrier => Requirement::Tiered { modern_from: Version::V1_2 },

        ReadBufferRect | WriteBufferRect | CopyBufferRect => Requirement::AtLeast(Version::V1_1),

        FillBuffer | MigrateMemObjects | MarkerWithWaitList | BarrierWithWaitList => {
            Requirement::AtLeast(Version::V1_2)
        }

        FillImage => Requirement::EmulatedBelow(Version::V1_2),

        SvmMemcpy | SvmFill | SvmMap | SvmUnmap | SvmFree => Requirement::AtLeast(Version::V2_0),

        ReadBuffer | WriteBuffer | CopyBuffer | MapBuffer | MapImage | Unmap | ReadImage
        | WriteImage | CopyImage | CopyImageToBuffer | CopyBufferToImage | NdRangeKernel
        | NativeKernel => Requirement::Always,
    }
}

/// Resolved routing for one device tier.
///
/// Built once per queue from its cached version; every enqueue call asks
/// it for a route instead of comparing versions inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTable {
    version: Version,
}

impl DispatchTable {
    pub fn new(version: Version) -> Self {
        DispatchTable { version }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Choose the submission strategy for `op`.
    pub fn route(&self, op: OpKind) -> Route {
        match requirement(op) {
            Requirement::Always => Route::Direct,
            Requirement::AtLeast(v) if self.version >= v => Route::Direct,
            Requirement::AtLeast(v) => Route::Unsupported { required: v },
            Requirement::Tiered { modern_from } if self.version >= modern_from => Route::Modern,
            Requirement::Tiered { .. } => Route::Legacy,
            Requirement::EmulatedBelow(v) if self.version >= v => Route::Direct,
            Requirement::EmulatedBelow(_) => Route::Emulated,
        }
    }

    /// `true` when `op` can be submitted at all on this tier.
    pub fn supports(&self, op: OpKind) -> bool {
        !matches!(self.route(op), Route::Unsupported { .. })
    }
}
