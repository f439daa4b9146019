//! Hardware driver implementations
//!
//! Real drivers live out of tree; this module carries the mock used by
//! tests and the demo daemon.

pub mod mock;
