//! Test infrastructure for the lifecycle controller.
//!
//! | Module | Covers |
//! |--------|--------|
//! | [`mocks`] | Fake handlers, heap-backed table, recording write-protect toggle |
//! | `lifecycle` | Load and unload through the controller |
//!
//! The interception wrappers are process-wide, so any test that installs them
//! holds [`mocks::HOOK_LOCK`] for its whole body.


pub use mocks::{MockProtect, MockTable};
