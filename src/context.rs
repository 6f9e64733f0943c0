// context.rs — Device and context identity.
//
// A `Device` is a thin, cloneable handle around a `Backend` trait object.
// A `Context` binds memory objects and queues to one device; every operand
// handed to a queue must come from the queue's own context.
//
// Contexts compare by identity, not by contents: two contexts created on
// the same device are different contexts, exactly like two `clCreateContext`
// calls on the same device.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::memory::SvmPtr;
use crate::transport::Backend;
use crate::version::Version;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A compute device, backed by a transport implementation.
#[derive(Clone)]
pub struct Device {
    backend: Arc<dyn Backend>,
}

impl Device {
    pub fn new<B: Backend>(backend: B) -> Self {
        Device {
            backend: Arc::new(backend),
        }
    }

    pub fn from_backend(backend: Arc<dyn Backend>) -> Self {
        Device { backend }
    }

    pub fn name(&self) -> String {
        self.backend.name()
    }

    /// Capability tier reported by the backend.
    ///
    /// This asks the backend every time. Queues cache the answer, so
    /// dispatch never calls this more than once per queue.
    pub fn version(&self) -> Version {
        self.backend.version()
    }

    /// `true` if the device reports at least `major.minor`.
    pub fn check_version(&self, major: u32, minor: u32) -> bool {
        self.version() >= Version::new(major, minor)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.backend) as *const ()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("name", &self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    id: u64,
    device: Device,
}

/// A device context: the ownership domain of buffers, images, kernels and
/// queues.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(device: &Device) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context = id, device = %device.name(), "context created");
        Context {
            inner: Arc::new(ContextInner {
                id,
                device: device.clone(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Allocate `size` bytes of shared virtual memory.
    ///
    /// The backend decides whether SVM is available; devices below tier 2.0
    /// reject the allocation.
    pub fn svm_alloc(&self, size: usize) -> Result<SvmPtr> {
        assert!(size > 0, "svm_alloc: size must be non-zero");
        self.inner
            .device
            .backend()
            .svm_alloc(size)
            .map_err(QueueError::from)
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .finish()
    }
}
