//! Utility modules

pub mod cancel;

pub use cancel::{CallSlot, CancelHandle, make_cancellable_stream, new_cancel_handle, with_cancel};
