//! Deterministic, pure logic shared by the rebuild pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod names;
pub mod reply;
pub mod session;
pub mod tail;
pub mod types;
pub mod version;
