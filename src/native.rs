// native.rs — Host function submission through a C-ABI trampoline.
//
// The transport's native-call entry point has exactly one shape:
//
//     extern "C" fn(args: *mut c_void)
//
// called with a pointer to a private copy of an argument byte buffer. It
// cannot carry a Rust closure or a plain `fn()` directly, so every host
// call is lowered to that shape before submission:
//
//   HostCall::Raw      → the caller's own C-ABI function and argument bytes,
//                        passed through untouched.
//   HostCall::Fn       → the `fn()` pointer is copied by value into the
//                        argument buffer; `nullary_trampoline` copies it
//                        back out and calls it.
//   HostCall::Closure  → the boxed closure is leaked into a thin pointer
//                        stored in the argument buffer (next to a panic
//                        flag); `closure_trampoline` reclaims and runs it.
//
// The argument buffer is a `Vec<u8>`, so nothing in it is aligned: both
// trampolines read and write through `read_unaligned`/`write_unaligned`.
//
// PANICS
// ──────
// Unwinding out of an `extern "C"` function aborts the process. The Rust
// trampolines therefore catch panics themselves and report them through
// the argument buffer; `NativeCall::invoke` turns that into a status code.

use std::ffi::c_void;
use std::fmt;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use crate::error::{status, TransportResult};

/// The one function shape the transport can call.
pub type NativeFn = unsafe extern "C" fn(*mut c_void);

type BoxedCall = Box<dyn FnOnce() + Send + 'static>;

/// A host function to run on the device's host-execution facility.
pub enum HostCall {
    /// A C-ABI function and the bytes it receives (by pointer, copied).
    Raw { func: NativeFn, args: Vec<u8> },
    /// A plain nullary function.
    Fn(fn()),
    /// An owned closure.
    Closure(BoxedCall),
}

impl HostCall {
    /// # Safety
    /// `func` must be sound to call with a pointer to a buffer holding
    /// exactly `args`, from any thread.
    pub unsafe fn raw(func: NativeFn, args: Vec<u8>) -> Self {
        HostCall::Raw { func, args }
    }

    pub fn closure<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        HostCall::Closure(Box::new(f))
    }

    /// Lower to the fixed native-call shape.
    pub(crate) fn into_native(self) -> NativeCall {
        match self {
            HostCall::Raw { func, args } => NativeCall {
                func,
                args,
                kind: CallKind::Raw,
                invoked: false,
            },
            HostCall::Fn(f) => {
                let mut args = vec![0u8; mem::size_of::<fn()>()];
                // SAFETY: the buffer is exactly one fn pointer wide.
                unsafe { ptr::write_unaligned(args.as_mut_ptr() as *mut fn(), f) };
                NativeCall {
                    func: nullary_trampoline,
                    args,
                    kind: CallKind::Nullary,
                    invoked: false,
                }
            }
            HostCall::Closure(f) => {
                let frame = ClosureFrame {
                    call: Box::into_raw(Box::new(f)),
                    panicked: 0,
                };
                let mut args = vec![0u8; mem::size_of::<ClosureFrame>()];
                // SAFETY: the buffer is exactly one frame wide.
                unsafe { ptr::write_unaligned(args.as_mut_ptr() as *mut ClosureFrame, frame) };
                NativeCall {
                    func: closure_trampoline,
                    args,
                    kind: CallKind::Closure,
                    invoked: false,
                }
            }
        }
    }
}

impl From<fn()> for HostCall {
    fn from(f: fn()) -> Self {
        HostCall::Fn(f)
    }
}

impl fmt::Debug for HostCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCall::Raw { args, .. } => write!(f, "HostCall::Raw({} arg bytes)", args.len()),
            HostCall::Fn(_) => write!(f, "HostCall::Fn"),
            HostCall::Closure(_) => write!(f, "HostCall::Closure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Raw,
    Nullary,
    Closure,
}

/// Argument buffer layout for `closure_trampoline`.
#[repr(C)]
#[derive(Clone, Copy)]
struct ClosureFrame {
    call: *mut BoxedCall,
    panicked: u8,
}

/// A host call in transport form: a C-ABI function plus its argument bytes.
///
/// Dropping a `NativeCall` that never ran releases the closure it owns.
pub struct NativeCall {
    func: NativeFn,
    args: Vec<u8>,
    kind: CallKind,
    invoked: bool,
}

// SAFETY: the only non-Send content is the leaked `BoxedCall` pointer in a
// closure frame, and the boxed closure itself is `Send`.
unsafe impl Send for NativeCall {}

impl NativeCall {
    pub fn arg_bytes(&self) -> &[u8] {
        &self.args
    }

    /// Run the call on the current thread.
    ///
    /// Returns `OUT_OF_RESOURCES` if a Rust callee panicked.
    pub fn invoke(mut self) -> TransportResult<()> {
        self.invoked = true;
        // SAFETY: `func` and `args` were paired by `into_native` (or by the
        // caller of the unsafe `HostCall::raw`).
        unsafe { (self.func)(self.args.as_mut_ptr() as *mut c_void) };
        match self.kind {
            CallKind::Closure => {
                // SAFETY: frame-sized buffer written by `into_native`.
                let frame = unsafe { ptr::read_unaligned(self.args.as_ptr() as *const ClosureFrame) };
                if frame.panicked != 0 {
                    return Err(status::OUT_OF_RESOURCES);
                }
                Ok(())
            }
            CallKind::Nullary => {
                if self.args.iter().all(|&b| b == 0) {
                    // nullary_trampoline zeroes the slot on panic.
                    return Err(status::OUT_OF_RESOURCES);
                }
                Ok(())
            }
            CallKind::Raw => Ok(()),
        }
    }
}

impl Drop for NativeCall {
    fn drop(&mut self) {
        if self.invoked || self.kind != CallKind::Closure {
            return;
        }
        // SAFETY: the closure was leaked by `into_native` and never reclaimed
        // because the trampoline never ran.
        unsafe {
            let frame = ptr::read_unaligned(self.args.as_ptr() as *const ClosureFrame);
            drop(Box::from_raw(frame.call));
        }
    }
}

impl fmt::Debug for NativeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCall")
            .field("kind", &self.kind)
            .field("arg_bytes", &self.args.len())
            .finish()
    }
}

unsafe extern "C" fn nullary_trampoline(args: *mut c_void) {
    let slot = args as *mut fn();
    let f = ptr::read_unaligned(slot);
    if catch_unwind(f).is_err() {
        tracing::warn!("native host function panicked");
        ptr::write_bytes(args as *mut u8, 0, mem::size_of::<fn()>());
    }
}

unsafe extern "C" fn closure_trampoline(args: *mut c_void) {
    let slot = args as *mut ClosureFrame;
    let mut frame = ptr::read_unaligned(slot);
    let call: BoxedCall = *Box::from_raw(frame.call);
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        tracing::warn!("native host closure panicked");
        frame.panicked = 1;
    }
    ptr::write_unaligned(slot, frame);
}
