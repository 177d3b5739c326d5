//! Weak references
//!
//! A weak reference holds a possibly-null object pointer plus one weak
//! unit on the referent. Every operation accepts a null referent; loads
//! observe object death and null the slot out rather than resurrecting a
//! dying object.

use super::{try_retain, weak_release_raw, weak_retain_raw, HeapObject};
use core::ptr;

/// One word of weak storage inside a container or closure context
#[repr(C)]
pub struct WeakReference {
    value: *mut HeapObject,
}

impl WeakReference {
    /// Fresh null reference
    #[inline]
    pub const fn null() -> Self {
        Self {
            value: ptr::null_mut(),
        }
    }

    /// Stored pointer (for debugging/testing); may already be dangling
    /// toward a deallocating object.
    #[inline]
    pub fn raw_value(&self) -> *mut HeapObject {
        self.value
    }
}

/// Initialize a weak reference to `value` (which may be null)
///
/// # Safety
/// `reference` points to uninitialized weak storage; `value`, if non-null,
/// is a live object.
pub unsafe fn weak_init(reference: *mut WeakReference, value: *mut HeapObject) {
    if !value.is_null() {
        weak_retain_raw(value);
    }
    (*reference).value = value;
}

/// Replace the referent of an initialized weak reference
///
/// # Safety
/// `reference` must be initialized; `value`, if non-null, is a live object.
pub unsafe fn weak_assign(reference: *mut WeakReference, value: *mut HeapObject) {
    if !value.is_null() {
        weak_retain_raw(value);
    }
    let old = (*reference).value;
    (*reference).value = value;
    if !old.is_null() {
        weak_release_raw(old);
    }
}

/// Load a strong reference out of weak storage, or null if the referent is
/// dead or dying.
///
/// A referent observed in the Deallocating state is released and the slot
/// nulled, so later loads are cheap. The final `try_retain` covers the
/// race where deallocation starts between the state check and the
/// increment.
///
/// # Safety
/// `reference` must be initialized.
pub unsafe fn weak_load_strong(reference: *mut WeakReference) -> *mut HeapObject {
    let object = (*reference).value;
    if object.is_null() {
        return ptr::null_mut();
    }

    if (*object).is_deallocating() {
        (*reference).value = ptr::null_mut();
        weak_release_raw(object);
        return ptr::null_mut();
    }

    if try_retain(object) {
        object
    } else {
        ptr::null_mut()
    }
}

/// Load a strong reference and destroy the weak storage in one step
///
/// # Safety
/// `reference` must be initialized; it is uninitialized afterwards.
pub unsafe fn weak_take_strong(reference: *mut WeakReference) -> *mut HeapObject {
    let result = weak_load_strong(reference);
    weak_destroy(reference);
    result
}

/// Destroy weak storage, dropping its weak unit
///
/// # Safety
/// `reference` must be initialized; it is uninitialized afterwards.
pub unsafe fn weak_destroy(reference: *mut WeakReference) {
    let object = (*reference).value;
    if !object.is_null() {
        weak_release_raw(object);
    }
}

/// Initialize `dest` as a copy of `src`
///
/// A dying referent is not propagated: the copy starts out null.
///
/// # Safety
/// `dest` is uninitialized weak storage; `src` is initialized.
pub unsafe fn weak_copy_init(dest: *mut WeakReference, src: *mut WeakReference) {
    let object = (*src).value;
    if object.is_null() || (*object).is_deallocating() {
        (*dest).value = ptr::null_mut();
        return;
    }
    weak_retain_raw(object);
    (*dest).value = object;
}

/// Initialize `dest` by moving `src`'s referent (no count traffic)
///
/// # Safety
/// `dest` is uninitialized, `src` initialized; `src` is uninitialized
/// afterwards.
pub unsafe fn weak_take_init(dest: *mut WeakReference, src: *mut WeakReference) {
    (*dest).value = (*src).value;
    (*src).value = ptr::null_mut();
}

/// Assign `dest` a copy of `src`
///
/// # Safety
/// Both references must be initialized.
pub unsafe fn weak_copy_assign(dest: *mut WeakReference, src: *mut WeakReference) {
    if dest == src {
        return;
    }
    weak_destroy(dest);
    weak_copy_init(dest, src);
}

/// Assign `dest` by moving out of `src`
///
/// # Safety
/// Both references must be initialized; `src` is uninitialized afterwards.
pub unsafe fn weak_take_assign(dest: *mut WeakReference, src: *mut WeakReference) {
    if dest == src {
        return;
    }
    weak_destroy(dest);
    weak_take_init(dest, src);
}
