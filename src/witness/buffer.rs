//! Fixed-size value buffers
//!
//! A `ValueBuffer` is three pointer words of storage. Values that fit
//! inline (per `is_value_inline`) live directly in the words; anything
//! larger or over-aligned stores a heap pointer in word 0. A buffer moves
//! through three states: unallocated, allocated (owns uninitialized
//! storage), initialized.

use super::{is_value_inline, ValueWitness, WORD_SIZE};
use crate::logging::trace;
use std::alloc::{alloc, dealloc, handle_alloc_error};

/// Number of words in the inline buffer
pub const INLINE_BUFFER_WORDS: usize = 3;

/// Three-word opaque value storage
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ValueBuffer {
    pub words: [usize; INLINE_BUFFER_WORDS],
}

impl ValueBuffer {
    /// Fresh unallocated buffer
    #[inline]
    pub const fn new() -> Self {
        Self {
            words: [0; INLINE_BUFFER_WORDS],
        }
    }
}

impl Default for ValueBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate storage for one value of the witnessed type, returning the
/// address where it should be initialized.
///
/// # Safety
/// `buffer` must point to an unallocated buffer; it transitions to the
/// allocated state.
pub unsafe fn allocate_value_buffer(witness: &dyn ValueWitness, buffer: *mut ValueBuffer) -> *mut u8 {
    let layout = witness.layout();
    if is_value_inline(layout.size, layout.alignment) {
        return buffer as *mut u8;
    }

    let alloc_layout = layout.alloc_layout();
    let storage = alloc(alloc_layout);
    if storage.is_null() {
        handle_alloc_error(alloc_layout);
    }

    trace!(event = "buffer_alloc", size_bytes = layout.size, address = ?storage);
    (*buffer).words[0] = storage as usize;
    storage
}

/// Address of the value held by an allocated or initialized buffer
///
/// # Safety
/// `buffer` must have been allocated for a value of the witnessed type.
#[inline]
pub unsafe fn project_value_buffer(
    witness: &dyn ValueWitness,
    buffer: *mut ValueBuffer,
) -> *mut u8 {
    let layout = witness.layout();
    if is_value_inline(layout.size, layout.alignment) {
        buffer as *mut u8
    } else {
        (*buffer).words[0] as *mut u8
    }
}

/// Release the storage owned by an allocated buffer without touching the
/// value; the buffer returns to the unallocated state.
///
/// # Safety
/// The held value (if any) must already be destroyed or moved out.
pub unsafe fn deallocate_value_buffer(witness: &dyn ValueWitness, buffer: *mut ValueBuffer) {
    let layout = witness.layout();
    if is_value_inline(layout.size, layout.alignment) {
        return;
    }

    let storage = (*buffer).words[0] as *mut u8;
    if !storage.is_null() {
        trace!(event = "buffer_dealloc", address = ?storage);
        dealloc(storage, layout.alloc_layout());
        (*buffer).words[0] = 0;
    }
}

/// Destroy the held value and release the buffer's storage
///
/// # Safety
/// `buffer` must hold an initialized value of the witnessed type.
pub unsafe fn destroy_value_buffer(witness: &dyn ValueWitness, buffer: *mut ValueBuffer) {
    let value = project_value_buffer(witness, buffer);
    witness.destroy(value);
    deallocate_value_buffer(witness, buffer);
}

// Buffers are moved by plain word copies; the inline/outline split is
// recomputed from the witness at every use.
const _: () = assert!(core::mem::size_of::<ValueBuffer>() == WORD_SIZE * INLINE_BUFFER_WORDS);
