//! Reference counting - C API for retain/release and weak references
//!
//! Hot path operations with minimal overhead, inlined by the compiler.
//! Thread-safe atomic operations.

use crate::heap::{self, HeapObject, WeakReference};

/// Increment strong count and return the object (for chaining)
///
/// # Safety
/// - Null-safe (returns null for null)
/// - Object must be a valid heap object
#[no_mangle]
pub extern "C" fn quill_retain(object: *mut HeapObject) -> *mut HeapObject {
    unsafe { heap::retain(object) }
}

/// Decrement strong count, destroying the object at zero
///
/// # Safety
/// - Null-safe (no-op for null)
/// - Object must be a valid heap object
/// - Underflow checked in debug builds
#[no_mangle]
pub extern "C" fn quill_release(object: *mut HeapObject) {
    unsafe { heap::release(object) }
}

/// Strong-retain through an unowned reference; traps if the object is
/// already deallocated.
///
/// # Safety
/// - Null-safe (no-op for null)
/// - The referent's header must still be allocated
#[no_mangle]
pub extern "C" fn quill_retain_unowned(object: *mut HeapObject) {
    unsafe { heap::retain_unowned(object) }
}

/// Current strong count (for debugging/testing)
#[no_mangle]
pub extern "C" fn quill_strong_count(object: *const HeapObject) -> u32 {
    if object.is_null() {
        return 0;
    }
    unsafe { (*object).strong_count() }
}

/// Initialize weak storage with a (possibly null) referent
///
/// # Safety
/// `reference` must point to uninitialized weak storage.
#[no_mangle]
pub extern "C" fn quill_weak_init(reference: *mut WeakReference, value: *mut HeapObject) {
    unsafe { heap::weak_init(reference, value) }
}

/// Replace the referent of initialized weak storage
///
/// # Safety
/// `reference` must point to initialized weak storage.
#[no_mangle]
pub extern "C" fn quill_weak_assign(reference: *mut WeakReference, value: *mut HeapObject) {
    unsafe { heap::weak_assign(reference, value) }
}

/// Load a strong reference, or null if the referent is dead or dying
///
/// # Safety
/// `reference` must point to initialized weak storage.
#[no_mangle]
pub extern "C" fn quill_weak_load_strong(reference: *mut WeakReference) -> *mut HeapObject {
    unsafe { heap::weak_load_strong(reference) }
}

/// Load a strong reference and destroy the weak storage
///
/// # Safety
/// `reference` must point to initialized weak storage; it is
/// uninitialized afterwards.
#[no_mangle]
pub extern "C" fn quill_weak_take_strong(reference: *mut WeakReference) -> *mut HeapObject {
    unsafe { heap::weak_take_strong(reference) }
}

/// Destroy weak storage
///
/// # Safety
/// `reference` must point to initialized weak storage.
#[no_mangle]
pub extern "C" fn quill_weak_destroy(reference: *mut WeakReference) {
    unsafe { heap::weak_destroy(reference) }
}

/// Initialize `dest` as a copy of `src`
///
/// # Safety
/// `dest` uninitialized, `src` initialized.
#[no_mangle]
pub extern "C" fn quill_weak_copy_init(dest: *mut WeakReference, src: *mut WeakReference) {
    unsafe { heap::weak_copy_init(dest, src) }
}

/// Initialize `dest` by moving `src`
///
/// # Safety
/// `dest` uninitialized, `src` initialized and uninitialized afterwards.
#[no_mangle]
pub extern "C" fn quill_weak_take_init(dest: *mut WeakReference, src: *mut WeakReference) {
    unsafe { heap::weak_take_init(dest, src) }
}

/// Assign `dest` a copy of `src`
///
/// # Safety
/// Both must point to initialized weak storage.
#[no_mangle]
pub extern "C" fn quill_weak_copy_assign(dest: *mut WeakReference, src: *mut WeakReference) {
    unsafe { heap::weak_copy_assign(dest, src) }
}

/// Assign `dest` by moving `src`
///
/// # Safety
/// Both initialized; `src` uninitialized afterwards.
#[no_mangle]
pub extern "C" fn quill_weak_take_assign(dest: *mut WeakReference, src: *mut WeakReference) {
    unsafe { heap::weak_take_assign(dest, src) }
}
