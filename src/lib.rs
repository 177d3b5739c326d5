//! Quill Runtime - object & type system substrate for compiled Quill
//!
//! This crate provides the core runtime support statically linked into
//! compiled Quill programs: reference-counted heap objects, uniqued type
//! metadata (including generic instantiations), dynamic casting with
//! existential boxing, protocol conformance lookup, and space-efficient
//! enum discriminant encoding.

#![allow(dead_code)]

pub mod cast;
pub mod conformance;
pub mod enums;
pub mod ffi;
pub mod heap;
pub mod logging;
pub mod metadata;
pub mod runtime;
pub mod witness;

mod fatal;

// Re-export core types
pub use heap::{retain, release, HeapObject};
pub use metadata::{Metadata, MetadataRef};
pub use runtime::Runtime;
pub use witness::{ValueBuffer, ValueWitness};

/// Runtime initialization
#[no_mangle]
pub extern "C" fn quill_runtime_init() {
    logging::init();
    runtime::Runtime::global();
}
