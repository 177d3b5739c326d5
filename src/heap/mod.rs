//! Heap objects and atomic reference counting
//!
//! Design: Every heap allocation starts with a three-word header: metadata
//! pointer, strong count, weak count. Strong operations are lock-free
//! atomics; deallocation hands off to the weak protocol so that weak
//! references can outlive the object's value.
//!
//! Lifecycle: Live (strong >= 1) -> Deallocating (strong hit zero, exactly
//! once) -> Freed (weak count drained).

mod weak;


pub use weak::{
    weak_assign, weak_copy_assign, weak_copy_init, weak_destroy, weak_init, weak_load_strong,
    weak_take_assign, weak_take_init, weak_take_strong, WeakReference,
};

use crate::fatal::fatal;
use crate::logging::trace;
use crate::metadata::{Metadata, MetadataRef};
use crate::runtime::Runtime;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Destroy hook supplied by metadata: tears down the object's value and
/// returns the allocation size to free, or 0 to take over disposal.
pub type HeapDestroyer = unsafe fn(*mut HeapObject) -> usize;

/// Heap object header (three words) - prefixed before instance storage
///
/// The weak count starts at 1: the object's own existence holds one weak
/// unit, dropped exactly once when deallocation starts.
#[repr(C)]
pub struct HeapObject {
    metadata: *const Metadata,
    strong: AtomicU32,
    weak: AtomicU32,
}

impl HeapObject {
    /// Metadata for this object's dynamic type
    ///
    /// # Safety
    /// `self` must be part of a live or deallocating heap object whose
    /// metadata pointer was initialized by `alloc_object`.
    #[inline]
    pub unsafe fn metadata(&self) -> MetadataRef {
        &*self.metadata
    }

    /// Current strong count (for debugging/testing)
    #[inline]
    pub fn strong_count(&self) -> u32 {
        self.strong.load(Ordering::Relaxed)
    }

    /// Current weak count (for debugging/testing)
    #[inline]
    pub fn weak_count(&self) -> u32 {
        self.weak.load(Ordering::Relaxed)
    }

    /// True once the last strong reference is gone
    #[inline]
    pub fn is_deallocating(&self) -> bool {
        self.strong.load(Ordering::Relaxed) == 0
    }
}

/// Allocate a heap object of `size` bytes total (header included)
///
/// # Safety
/// `size` must cover the header; `align_mask` must be a power-of-two minus
/// one and at least the header alignment.
pub unsafe fn alloc_object(
    metadata: MetadataRef,
    size: usize,
    align_mask: usize,
) -> *mut HeapObject {
    debug_assert!(size >= core::mem::size_of::<HeapObject>());

    let layout = heap_layout(size, align_mask);
    let ptr = alloc(layout) as *mut HeapObject;
    if ptr.is_null() {
        handle_alloc_error(layout);
    }

    ptr.write(HeapObject {
        metadata: metadata as *const Metadata,
        strong: AtomicU32::new(1),
        weak: AtomicU32::new(1),
    });

    trace!(event = "object_alloc", size_bytes = size, address = ?ptr);
    ptr
}

/// Increment the strong count and return the object (for chaining).
/// No-op for null.
#[inline]
pub unsafe fn retain(object: *mut HeapObject) -> *mut HeapObject {
    if object.is_null() {
        return object;
    }

    let old = (*object).strong.fetch_add(1, Ordering::Relaxed);
    debug_assert!(old > 0, "retain of deallocating object");
    debug_assert!(old < u32::MAX, "strong refcount overflow");
    object
}

/// Decrement the strong count, destroying the object when it hits zero.
/// No-op for null.
#[inline]
pub unsafe fn release(object: *mut HeapObject) {
    if object.is_null() {
        return;
    }

    let old = (*object).strong.fetch_sub(1, Ordering::Release);
    debug_assert!(old > 0, "strong refcount underflow");

    if old == 1 {
        // Synchronize with all previous releases
        fence(Ordering::Acquire);
        destroy_object(object);
    }
}

/// Strong-retain through an unowned reference.
///
/// The referent's storage must still be valid to inspect, but the object
/// may already be deallocating; that case is a fatal trap, never undefined
/// behavior.
pub unsafe fn retain_unowned(object: *mut HeapObject) {
    if object.is_null() {
        return;
    }

    if !try_retain(object) {
        fatal("attempted to read an unowned reference to a deallocated object");
    }
}

/// Conditional strong increment: succeeds only while the object is Live.
///
/// # Safety
/// The header must still be allocated (a weak unit or the initial bias
/// keeps it so).
#[inline]
pub unsafe fn try_retain(object: *mut HeapObject) -> bool {
    let strong = &(*object).strong;
    let mut count = strong.load(Ordering::Relaxed);
    loop {
        if count == 0 {
            return false;
        }
        match strong.compare_exchange_weak(
            count,
            count + 1,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => return true,
            Err(observed) => count = observed,
        }
    }
}

/// Free an object's allocation once the value is destroyed.
///
/// Drops the initial weak bias: if no outstanding weak references remain
/// (plain load - a race here means the program already had undefined
/// behavior), the memory is freed directly; otherwise the free is deferred
/// to the weak count reaching zero.
///
/// # Safety
/// The object must be in the Deallocating state with its value already
/// torn down; `size`/`align_mask` must match the original allocation.
pub unsafe fn dealloc_object(object: *mut HeapObject, size: usize, align_mask: usize) {
    if (*object).weak.load(Ordering::Relaxed) == 1 {
        free_object(object, heap_layout(size, align_mask));
    } else {
        weak_release_raw(object);
    }
}

/// Pair returned by `alloc_box`
#[repr(C)]
pub struct BoxPair {
    pub object: *mut HeapObject,
    pub value: *mut u8,
}

/// Allocate a reference-counted box holding one value of `boxed_type`.
/// The value storage is uninitialized.
pub unsafe fn alloc_box(runtime: &Runtime, boxed_type: MetadataRef) -> BoxPair {
    let metadata = runtime.box_metadata(boxed_type);
    let details = metadata
        .box_details()
        .unwrap_or_else(|| fatal("box metadata without box details"));

    let object = alloc_object(metadata, details.allocation_size, details.align_mask);
    let value = (object as *mut u8).add(details.value_offset);
    BoxPair { object, value }
}

/// Free a box allocation without destroying the boxed value
///
/// # Safety
/// The boxed value must already be destroyed or moved out, and the box
/// must be in the Deallocating state.
pub unsafe fn dealloc_box(object: *mut HeapObject) {
    let details = (*object)
        .metadata()
        .box_details()
        .unwrap_or_else(|| fatal("dealloc_box on a non-box object"));
    dealloc_object(object, details.allocation_size, details.align_mask);
}

/// Add one weak unit
#[inline]
pub(crate) unsafe fn weak_retain_raw(object: *mut HeapObject) {
    let old = (*object).weak.fetch_add(1, Ordering::Relaxed);
    debug_assert!(old > 0, "weak retain of freed object");
}

/// Drop one weak unit, freeing the allocation when it is the last and the
/// object is already deallocating.
pub(crate) unsafe fn weak_release_raw(object: *mut HeapObject) {
    let old = (*object).weak.fetch_sub(1, Ordering::Release);
    debug_assert!(old > 0, "weak refcount underflow");

    if old == 1 {
        fence(Ordering::Acquire);
        // Only reachable after dealloc_object dropped the initial bias, so
        // the value is gone and the metadata knows the allocation extent.
        let (size, align_mask) = (*object).metadata().heap_allocation_extent();
        free_object(object, heap_layout(size, align_mask));
    }
}

/// Strong count hit zero: run the metadata-supplied destroyer (cold path)
#[cold]
#[inline(never)]
unsafe fn destroy_object(object: *mut HeapObject) {
    let metadata = (*object).metadata();
    trace!(event = "object_destroy", address = ?object);

    let destroyer = metadata
        .heap_destroyer()
        .unwrap_or_else(|| fatal("release of object with non-heap metadata"));

    // A zero return means the destroyer took over disposal.
    let size = destroyer(object);
    if size != 0 {
        let (_, align_mask) = metadata.heap_allocation_extent();
        dealloc_object(object, size, align_mask);
    }
}

#[inline]
unsafe fn free_object(object: *mut HeapObject, layout: Layout) {
    trace!(event = "object_free", address = ?object);
    dealloc(object as *mut u8, layout);
}

#[inline]
fn heap_layout(size: usize, align_mask: usize) -> Layout {
    let align = (align_mask + 1).max(core::mem::align_of::<HeapObject>());
    Layout::from_size_align(size.max(core::mem::size_of::<HeapObject>()), align)
        .unwrap_or_else(|_| fatal("invalid heap allocation layout"))
}
