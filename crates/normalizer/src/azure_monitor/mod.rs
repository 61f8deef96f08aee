//! Azure Monitor alert adapter.
//!
//! Rewrites common-alert-schema notifications for virtual machine start and
//! deallocate into canonical events.

mod adapter;

pub use adapter::{AlertAdapter, AlertError};
