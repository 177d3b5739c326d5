//! Fatal runtime failures
//!
//! Unconditional cast failures, corrupt metadata and dead-object access are
//! unrecoverable: the process aborts with a diagnostic. Release builds are
//! compiled with `panic = "abort"`, so the panic below never unwinds into
//! generated code.

use crate::logging::error;

/// Abort the process with a diagnostic (cold path).
#[cold]
#[inline(never)]
pub(crate) fn fatal(message: &str) -> ! {
    error!(event = "fatal", "{message}");
    panic!("quill runtime fatal error: {message}");
}
