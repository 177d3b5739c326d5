//! Object lifecycle - C API for allocation and deallocation

use crate::heap::{self, BoxPair, HeapObject};
use crate::metadata::Metadata;
use crate::runtime::Runtime;
use core::ptr;

/// Allocate a heap object of `size` bytes total (header included)
///
/// # Safety
/// - Returns null if `metadata` is null
/// - `metadata` must point to permanent heap metadata
/// - Allocation failure aborts the process
#[no_mangle]
pub extern "C" fn quill_alloc_object(
    metadata: *const Metadata,
    size: usize,
    align_mask: usize,
) -> *mut HeapObject {
    if metadata.is_null() {
        return ptr::null_mut();
    }
    unsafe { heap::alloc_object(&*metadata, size, align_mask) }
}

/// Free an object whose value has been destroyed, honoring outstanding
/// weak references.
///
/// # Safety
/// - No-op for null
/// - `size`/`align_mask` must match the original allocation
#[no_mangle]
pub extern "C" fn quill_dealloc_object(object: *mut HeapObject, size: usize, align_mask: usize) {
    if object.is_null() {
        return;
    }
    unsafe { heap::dealloc_object(object, size, align_mask) }
}

/// Allocate a reference-counted box for one value of `boxed_type`;
/// the value storage is returned uninitialized.
///
/// # Safety
/// `boxed_type` must point to permanent metadata.
#[no_mangle]
pub extern "C" fn quill_alloc_box(boxed_type: *const Metadata) -> BoxPair {
    if boxed_type.is_null() {
        return BoxPair {
            object: ptr::null_mut(),
            value: ptr::null_mut(),
        };
    }
    unsafe { heap::alloc_box(Runtime::global(), &*boxed_type) }
}

/// Free a box whose value has been destroyed or moved out
///
/// # Safety
/// No-op for null; `object` must be a box allocation.
#[no_mangle]
pub extern "C" fn quill_dealloc_box(object: *mut HeapObject) {
    if object.is_null() {
        return;
    }
    unsafe { heap::dealloc_box(object) }
}
