//! Existential containers and their witnesses
//!
//! Two container shapes exist. Class-bounded existentials hold one
//! retained reference followed by witness-table slots. Opaque existentials
//! hold a three-word value buffer, the boxed value's dynamic type, and the
//! witness-table slots. Slot count is fixed per existential type, so the
//! containers are manipulated through raw pointers sized by the metadata.

use crate::conformance::WitnessTable;
use crate::heap::{release, retain, HeapObject};
use crate::metadata::{Metadata, MetadataRef};
use crate::witness::{
    allocate_value_buffer, destroy_value_buffer, project_value_buffer, TypeLayout, ValueBuffer,
    ValueWitness, WORD_SIZE,
};
use core::ptr;

/// Fixed prefix of an opaque existential container; `witness_table_count`
/// pointer slots follow it.
#[repr(C)]
pub struct OpaqueExistentialContainer {
    pub buffer: ValueBuffer,
    pub dynamic_type: *const Metadata,
}

/// Fixed prefix of a class-bounded existential container
#[repr(C)]
pub struct ClassExistentialContainer {
    pub object: *mut HeapObject,
}

/// Address of the witness-table slot array trailing an opaque container
///
/// # Safety
/// `container` must point to storage sized for its existential type.
#[inline]
pub unsafe fn opaque_witness_tables(
    container: *mut OpaqueExistentialContainer,
) -> *mut *const WitnessTable {
    container.add(1) as *mut *const WitnessTable
}

/// Address of the witness-table slot array trailing a class container
///
/// # Safety
/// `container` must point to storage sized for its existential type.
#[inline]
pub unsafe fn class_witness_tables(
    container: *mut ClassExistentialContainer,
) -> *mut *const WitnessTable {
    container.add(1) as *mut *const WitnessTable
}

/// Container size in bytes for an opaque existential with `count` tables
#[inline]
pub const fn opaque_container_size(count: usize) -> usize {
    core::mem::size_of::<OpaqueExistentialContainer>() + count * WORD_SIZE
}

/// Container size in bytes for a class existential with `count` tables
#[inline]
pub const fn class_container_size(count: usize) -> usize {
    core::mem::size_of::<ClassExistentialContainer>() + count * WORD_SIZE
}

/// Witness for opaque existential containers: delegates value lifecycle to
/// the boxed type's witness through the buffer.
pub struct OpaqueExistentialWitness {
    witness_table_count: usize,
}

impl OpaqueExistentialWitness {
    pub fn new(witness_table_count: usize) -> Self {
        Self {
            witness_table_count,
        }
    }
}

impl ValueWitness for OpaqueExistentialWitness {
    fn layout(&self) -> TypeLayout {
        TypeLayout::new(opaque_container_size(self.witness_table_count), WORD_SIZE, false)
    }

    unsafe fn destroy(&self, value: *mut u8) {
        let container = value as *mut OpaqueExistentialContainer;
        let boxed = &*(*container).dynamic_type;
        destroy_value_buffer(boxed.witness, &mut (*container).buffer);
    }

    unsafe fn initialize_with_copy(&self, dest: *mut u8, src: *const u8) {
        let src_container = src as *mut OpaqueExistentialContainer;
        let dest_container = dest as *mut OpaqueExistentialContainer;
        let boxed = &*(*src_container).dynamic_type;

        (*dest_container).buffer = ValueBuffer::new();
        (*dest_container).dynamic_type = boxed as *const Metadata;
        ptr::copy_nonoverlapping(
            opaque_witness_tables(src_container),
            opaque_witness_tables(dest_container),
            self.witness_table_count,
        );

        let dest_value = allocate_value_buffer(boxed.witness, &mut (*dest_container).buffer);
        let src_value = project_value_buffer(boxed.witness, &mut (*src_container).buffer);
        boxed.witness.initialize_with_copy(dest_value, src_value);
    }

    // initialize_with_take: the default bitwise move transfers the buffer
    // (inline value or heap pointer) together with type and tables.

    unsafe fn dynamic_type(&self, value: *const u8) -> Option<MetadataRef> {
        let container = value as *const OpaqueExistentialContainer;
        Some(&*(*container).dynamic_type)
    }
}

/// Witness for class-bounded existential containers: a retained reference
/// plus POD table slots.
pub struct ClassExistentialWitness {
    witness_table_count: usize,
}

impl ClassExistentialWitness {
    pub fn new(witness_table_count: usize) -> Self {
        Self {
            witness_table_count,
        }
    }
}

impl ValueWitness for ClassExistentialWitness {
    fn layout(&self) -> TypeLayout {
        TypeLayout::new(class_container_size(self.witness_table_count), WORD_SIZE, false)
    }

    unsafe fn destroy(&self, value: *mut u8) {
        let container = value as *mut ClassExistentialContainer;
        release((*container).object);
    }

    unsafe fn initialize_with_copy(&self, dest: *mut u8, src: *const u8) {
        let src_container = src as *mut ClassExistentialContainer;
        let dest_container = dest as *mut ClassExistentialContainer;
        (*dest_container).object = retain((*src_container).object);
        ptr::copy_nonoverlapping(
            class_witness_tables(src_container),
            class_witness_tables(dest_container),
            self.witness_table_count,
        );
    }

    unsafe fn dynamic_type(&self, value: *const u8) -> Option<MetadataRef> {
        let object = (*(value as *const ClassExistentialContainer)).object;
        if object.is_null() {
            None
        } else {
            Some((*object).metadata())
        }
    }

    fn extra_inhabitant_count(&self) -> u32 {
        1
    }

    unsafe fn store_extra_inhabitant(&self, value: *mut u8, index: u32) {
        debug_assert_eq!(index, 0);
        (*(value as *mut ClassExistentialContainer)).object = ptr::null_mut();
    }

    unsafe fn extra_inhabitant_index(&self, value: *const u8) -> i32 {
        if (*(value as *const ClassExistentialContainer)).object.is_null() {
            0
        } else {
            -1
        }
    }
}

/// Witness for existential-metatype containers: a POD metadata word plus
/// table slots.
pub struct ExistentialMetatypeWitness {
    witness_table_count: usize,
}

impl ExistentialMetatypeWitness {
    pub fn new(witness_table_count: usize) -> Self {
        Self {
            witness_table_count,
        }
    }
}

impl ValueWitness for ExistentialMetatypeWitness {
    fn layout(&self) -> TypeLayout {
        TypeLayout::new(WORD_SIZE + self.witness_table_count * WORD_SIZE, WORD_SIZE, true)
    }

    unsafe fn destroy(&self, _value: *mut u8) {}

    unsafe fn initialize_with_copy(&self, dest: *mut u8, src: *const u8) {
        ptr::copy_nonoverlapping(src, dest, self.layout().size);
    }
}
