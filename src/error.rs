// error.rs — Error taxonomy for queue submissions.
//
// Three kinds of failure can come out of an enqueue call:
//
//   capability   → the queue's device is below the tier the operation needs.
//                  Raised before anything reaches the transport.
//   transport    → the transport (or a finished event) reported a non-success
//                  status code. The numeric code is preserved unchanged.
//   precondition → the caller broke an invariant (null queue, foreign
//                  context, out-of-bounds range, null host pointer). These
//                  are programming defects and panic via `assert!`; they are
//                  deliberately NOT represented in `QueueError`.
//
// Status codes follow the OpenCL numbering so that codes surfaced by a real
// driver and codes produced by the host reference device read the same.

use crate::version::{OpKind, Version};

/// Numeric status codes shared by every transport.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const MEM_COPY_OVERLAP: i32 = -8;
    pub const IMAGE_FORMAT_MISMATCH: i32 = -9;
    pub const IMAGE_FORMAT_NOT_SUPPORTED: i32 = -10;
    pub const MAP_FAILURE: i32 = -12;
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_CONTEXT: i32 = -34;
    pub const INVALID_QUEUE_PROPERTIES: i32 = -35;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_IMAGE_FORMAT_DESCRIPTOR: i32 = -39;
    pub const INVALID_IMAGE_SIZE: i32 = -40;
    pub const INVALID_KERNEL: i32 = -48;
    pub const INVALID_WORK_DIMENSION: i32 = -53;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_GLOBAL_OFFSET: i32 = -56;
    pub const INVALID_EVENT_WAIT_LIST: i32 = -57;
    pub const INVALID_EVENT: i32 = -58;
    pub const INVALID_OPERATION: i32 = -59;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;

    /// Symbolic name of a status code, for messages and logs.
    pub fn name(code: i32) -> &'static str {
        match code {
            SUCCESS => "SUCCESS",
            DEVICE_NOT_AVAILABLE => "DEVICE_NOT_AVAILABLE",
            MEM_OBJECT_ALLOCATION_FAILURE => "MEM_OBJECT_ALLOCATION_FAILURE",
            OUT_OF_RESOURCES => "OUT_OF_RESOURCES",
            MEM_COPY_OVERLAP => "MEM_COPY_OVERLAP",
            IMAGE_FORMAT_MISMATCH => "IMAGE_FORMAT_MISMATCH",
            IMAGE_FORMAT_NOT_SUPPORTED => "IMAGE_FORMAT_NOT_SUPPORTED",
            MAP_FAILURE => "MAP_FAILURE",
            EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
                "EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            INVALID_VALUE => "INVALID_VALUE",
            INVALID_DEVICE => "INVALID_DEVICE",
            INVALID_CONTEXT => "INVALID_CONTEXT",
            INVALID_QUEUE_PROPERTIES => "INVALID_QUEUE_PROPERTIES",
            INVALID_COMMAND_QUEUE => "INVALID_COMMAND_QUEUE",
            INVALID_MEM_OBJECT => "INVALID_MEM_OBJECT",
            INVALID_IMAGE_FORMAT_DESCRIPTOR => "INVALID_IMAGE_FORMAT_DESCRIPTOR",
            INVALID_IMAGE_SIZE => "INVALID_IMAGE_SIZE",
            INVALID_KERNEL => "INVALID_KERNEL",
            INVALID_WORK_DIMENSION => "INVALID_WORK_DIMENSION",
            INVALID_WORK_GROUP_SIZE => "INVALID_WORK_GROUP_SIZE",
            INVALID_GLOBAL_OFFSET => "INVALID_GLOBAL_OFFSET",
            INVALID_EVENT_WAIT_LIST => "INVALID_EVENT_WAIT_LIST",
            INVALID_EVENT => "INVALID_EVENT",
            INVALID_OPERATION => "INVALID_OPERATION",
            INVALID_BUFFER_SIZE => "INVALID_BUFFER_SIZE",
            INVALID_GLOBAL_WORK_SIZE => "INVALID_GLOBAL_WORK_SIZE",
            _ => "UNKNOWN",
        }
    }
}

/// Result of a transport-level call: a value or a raw status code.
pub type TransportResult<T> = std::result::Result<T, i32>;

/// Errors returned by every enqueue call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue's device capability tier is below what `op` requires.
    /// Nothing was submitted.
    #[error("{op} requires device version {required}, queue device reports {actual}")]
    Unsupported {
        op: OpKind,
        required: Version,
        actual: Version,
    },

    /// The transport rejected the submission, or the operation finished
    /// with an error status.
    #[error("transport error {code} ({})", status::name(*code))]
    Transport { code: i32 },
}

impl QueueError {
    pub(crate) fn transport(code: i32) -> Self {
        QueueError::Transport { code }
    }

    /// Numeric status code for this error. Capability errors report
    /// `INVALID_DEVICE`.
    pub fn code(&self) -> i32 {
        match self {
            QueueError::Unsupported { .. } => status::INVALID_DEVICE,
            QueueError::Transport { code } => *code,
        }
    }

    /// Returns `true` for capability (device tier) errors.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, QueueError::Unsupported { .. })
    }
}

impl From<i32> for QueueError {
    fn from(code: i32) -> Self {
        QueueError::transport(code)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Turn a raw status code into a `Result`.
pub(crate) fn check(code: i32) -> Result<()> {
    if code == status::SUCCESS {
        Ok(())
    } else {
        Err(QueueError::transport(code))
    }
}
