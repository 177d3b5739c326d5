//! C ABI entry points
//!
//! The functions in this module are what LLVM-generated Quill code calls.
//! They are null-safe where the ABI says so, take metadata and witness
//! pointers as opaque addresses, and never unwind into generated code
//! (release builds abort on panic).

mod cast;
mod object;
mod refcount;

#[cfg(test)]
mod tests;

pub use cast::*;
pub use object::*;
pub use refcount::*;
