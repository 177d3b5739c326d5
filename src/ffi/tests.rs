//! Tests for the C ABI surface

use super::*;
use crate::cast::{CastFlags, CAST_FLAG_DESTROY_ON_FAILURE, CAST_FLAG_TAKE_ON_SUCCESS, CAST_FLAG_UNCONDITIONAL};
use crate::heap::WeakReference;
use crate::metadata::{ClassMetadata, Metadata, MetadataDetails, NominalDescriptor, CLASS_REFERENCE_WITNESS, INT32, INT64};
use core::ptr;

static NODE_DESCRIPTOR: NominalDescriptor = NominalDescriptor::class("Node", None);

static NODE: Metadata = Metadata {
    witness: &CLASS_REFERENCE_WITNESS,
    details: MetadataDetails::Class(ClassMetadata {
        descriptor: &NODE_DESCRIPTOR,
        superclass: None,
        instance_size: 48,
        instance_align_mask: 7,
    }),
};

#[test]
fn test_cast_flag_bits_round_trip() {
    let flags = CastFlags::from_bits(
        CAST_FLAG_UNCONDITIONAL | CAST_FLAG_TAKE_ON_SUCCESS | CAST_FLAG_DESTROY_ON_FAILURE,
    );
    assert!(flags.unconditional);
    assert!(flags.take_on_success);
    assert!(flags.destroy_on_failure);
    assert_eq!(CastFlags::from_bits(flags.bits()), flags);

    assert_eq!(CastFlags::from_bits(0), CastFlags::CONDITIONAL);
}

#[test]
fn test_null_safety() {
    assert!(quill_retain(ptr::null_mut()).is_null());
    quill_release(ptr::null_mut());
    quill_retain_unowned(ptr::null_mut());
    assert_eq!(quill_strong_count(ptr::null()), 0);
    quill_dealloc_object(ptr::null_mut(), 0, 0);
    quill_dealloc_box(ptr::null_mut());
    quill_register_conformances(ptr::null(), 0);

    assert!(quill_alloc_object(ptr::null(), 48, 7).is_null());
    let pair = quill_alloc_box(ptr::null());
    assert!(pair.object.is_null());
}

#[test]
fn test_object_lifecycle_through_ffi() {
    let object = quill_alloc_object(&NODE, 48, 7);
    assert!(!object.is_null());
    assert_eq!(quill_strong_count(object), 1);

    let chained = quill_retain(object);
    assert_eq!(chained, object);
    assert_eq!(quill_strong_count(object), 2);

    quill_release(object);
    assert_eq!(quill_strong_count(object), 1);
    quill_release(object);
}

#[test]
fn test_weak_through_ffi() {
    let object = quill_alloc_object(&NODE, 48, 7);
    let mut weak = WeakReference::null();

    quill_weak_init(&mut weak, object);
    let loaded = quill_weak_load_strong(&mut weak);
    assert_eq!(loaded, object);
    quill_release(loaded);

    quill_release(object);
    assert!(quill_weak_load_strong(&mut weak).is_null());
    quill_weak_destroy(&mut weak);
}

#[test]
fn test_box_through_ffi() {
    let pair = quill_alloc_box(&INT64);
    assert!(!pair.object.is_null());
    unsafe { (pair.value as *mut i64).write(41) };
    quill_release(pair.object);
}

#[test]
fn test_class_cast_through_ffi() {
    let object = quill_alloc_object(&NODE, 48, 7);
    assert_eq!(quill_dynamic_cast_class(object, &NODE), object);
    assert!(quill_dynamic_cast_class(ptr::null_mut(), &NODE).is_null());
    quill_release(object);
}

#[test]
fn test_dynamic_type_through_ffi() {
    let mut value: i32 = 5;
    let ty = quill_get_dynamic_type(&mut value as *mut i32 as *mut u8, &INT32);
    assert!(core::ptr::eq(ty, &INT32 as *const Metadata));
}

#[test]
fn test_enum_codec_through_ffi() {
    let mut storage = [0u8; 8];
    let value = storage.as_mut_ptr();

    quill_store_enum_tag_single_payload(value, &INT32, 0, 1);
    assert_eq!(quill_get_enum_case_single_payload(value, &INT32, 1), 0);

    quill_store_enum_tag_single_payload(value, &INT32, -1, 1);
    assert_eq!(quill_get_enum_case_single_payload(value, &INT32, 1), -1);

    let witness = quill_init_enum_witness_single_payload(&INT32, 1);
    unsafe {
        assert_eq!((*witness).empty_cases(), 1);
    }
}
