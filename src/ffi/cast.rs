//! Casting, generics, conformances and enum tags - C API

use crate::cast::{self, CastFlags};
use crate::conformance::{ConformanceRecord, ProtocolDescriptor, WitnessTable};
use crate::enums;
use crate::heap::HeapObject;
use crate::metadata::generic::GenericMetadataPattern;
use crate::metadata::{Metadata, MetadataRef};
use crate::runtime::Runtime;
use core::ptr;

/// Sentinel returned by `quill_conforms_to_protocol` for abstract
/// conformances (marker protocols that need no table).
pub static ABSTRACT_CONFORMANCE: WitnessTable = WitnessTable {
    protocol: &crate::conformance::ANY_CLASS_PROTOCOL,
    entries: &[],
};

/// Cast the value at `src` to `target_type`, writing `dest` on success
///
/// # Safety
/// - All pointers must be non-null and valid for their types
/// - `flags` is a combination of the `CAST_FLAG_*` bits
#[no_mangle]
pub extern "C" fn quill_dynamic_cast(
    dest: *mut u8,
    src: *mut u8,
    src_type: *const Metadata,
    target_type: *const Metadata,
    flags: u32,
) -> bool {
    unsafe {
        cast::dynamic_cast(
            Runtime::global(),
            dest,
            src,
            &*src_type,
            &*target_type,
            CastFlags::from_bits(flags),
        )
    }
}

/// Class-only fast path: returns the object or null, no refcount traffic
///
/// # Safety
/// Null-safe; `target_type` must point to class metadata.
#[no_mangle]
pub extern "C" fn quill_dynamic_cast_class(
    object: *mut HeapObject,
    target_type: *const Metadata,
) -> *mut HeapObject {
    unsafe { cast::dynamic_cast_class(object, &*target_type) }
}

/// Class-only fast path that traps on failure
///
/// # Safety
/// Same as `quill_dynamic_cast_class`.
#[no_mangle]
pub extern "C" fn quill_dynamic_cast_class_unconditional(
    object: *mut HeapObject,
    target_type: *const Metadata,
) -> *mut HeapObject {
    unsafe { cast::dynamic_cast_class_unconditional(object, &*target_type) }
}

/// Dynamic type of the value at `value`
///
/// # Safety
/// `value` must hold an initialized value of `ty`.
#[no_mangle]
pub extern "C" fn quill_get_dynamic_type(value: *mut u8, ty: *const Metadata) -> *const Metadata {
    unsafe { cast::dynamic_type_of(Runtime::global(), value, &*ty) as *const Metadata }
}

/// Instantiate (or fetch) generic metadata for an argument vector
///
/// # Safety
/// `arguments` must point to at least the pattern's argument count of
/// metadata pointers.
#[no_mangle]
pub extern "C" fn quill_get_generic_metadata(
    pattern: *const GenericMetadataPattern,
    arguments: *const *const Metadata,
) -> *const Metadata {
    unsafe {
        let pattern = &*pattern;
        let args: Vec<MetadataRef> = (0..pattern.num_key_arguments)
            .map(|i| &**arguments.add(i))
            .collect();
        pattern.get_or_instantiate(&args) as *const Metadata
    }
}

/// Does `ty` conform to `protocol`? Returns the witness table, the
/// `ABSTRACT_CONFORMANCE` sentinel for table-less conformances, or null.
///
/// # Safety
/// Both pointers must be valid.
#[no_mangle]
pub extern "C" fn quill_conforms_to_protocol(
    ty: *const Metadata,
    protocol: *const ProtocolDescriptor,
) -> *const WitnessTable {
    let conformance = unsafe {
        Runtime::global()
            .conformances
            .conforms_to(&*ty, &*protocol)
    };
    match conformance {
        Some(c) => c
            .witness_table()
            .map_or(&ABSTRACT_CONFORMANCE as *const WitnessTable, |t| {
                t as *const WitnessTable
            }),
        None => ptr::null(),
    }
}

/// Registration feed: push `count` conformance records from the loader
///
/// # Safety
/// `records` must point to `count` valid records; the referenced metadata,
/// descriptors, protocols and tables must be permanent.
#[no_mangle]
pub extern "C" fn quill_register_conformances(records: *const ConformanceRecord, count: usize) {
    if records.is_null() || count == 0 {
        return;
    }
    let batch = unsafe { core::slice::from_raw_parts(records, count) };
    Runtime::global().conformances.register(batch);
}

/// Build the value witness for a single-payload enum over `payload_type`
/// with `empty_cases` payload-less cases. The witness is permanent.
///
/// # Safety
/// `payload_type` must point to permanent metadata.
#[no_mangle]
pub extern "C" fn quill_init_enum_witness_single_payload(
    payload_type: *const Metadata,
    empty_cases: u32,
) -> *const enums::SinglePayloadEnumWitness {
    let witness = unsafe { enums::SinglePayloadEnumWitness::new((*payload_type).witness, empty_cases) };
    Box::leak(Box::new(witness)) as *const enums::SinglePayloadEnumWitness
}

/// Read a single-payload enum discriminant: -1 for the payload case
///
/// # Safety
/// `value` must hold an enum laid out for `payload_type`/`empty_cases`.
#[no_mangle]
pub extern "C" fn quill_get_enum_case_single_payload(
    value: *const u8,
    payload_type: *const Metadata,
    empty_cases: u32,
) -> i32 {
    unsafe { enums::get_enum_case_single_payload(value, (*payload_type).witness, empty_cases) }
}

/// Write a single-payload enum discriminant
///
/// # Safety
/// Same as `quill_get_enum_case_single_payload`.
#[no_mangle]
pub extern "C" fn quill_store_enum_tag_single_payload(
    value: *mut u8,
    payload_type: *const Metadata,
    case_index: i32,
    empty_cases: u32,
) {
    unsafe {
        enums::store_enum_tag_single_payload(value, (*payload_type).witness, case_index, empty_cases)
    }
}
