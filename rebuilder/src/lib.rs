//! Unattended build-and-restart orchestration for a live editor session.
//!
//! The pipeline stops a running editor, rebuilds it with the external build
//! tool and relaunches it, then waits until the session answers again. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (types, name matching, output
//!   tails, version parsing, the phase log). No I/O.
//! - **[`io`]**: Side-effecting operations (session client, process control,
//!   engine discovery, build invocation, launch). Trait seams keep each one
//!   replaceable in tests.
//!
//! Orchestration modules ([`rebuild`], [`smoke`]) coordinate the two to
//! implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod rebuild;
pub mod smoke;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
