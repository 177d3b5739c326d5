//! Dynamic casting
//!
//! Design: One entry point dispatching on the target metadata kind. The
//! source is first resolved to its dynamic value and type by iteratively
//! unwrapping existential wrappers; each target family then applies its own
//! rule: superclass-chain walk for classes, conformance lookup plus boxing
//! for existentials, structural recursion for metatypes, and canonical
//! pointer identity for value types.

pub mod existential;


use crate::conformance::WitnessTable;
use crate::fatal::fatal;
use crate::heap::{retain, HeapObject};
use crate::logging::trace;
use crate::metadata::{Metadata, MetadataDetails, MetadataKind, MetadataRef};
use crate::runtime::Runtime;
use crate::witness::{allocate_value_buffer, project_value_buffer, ValueBuffer, ValueWitness, WitnessRef};
use existential::{
    class_witness_tables, opaque_witness_tables, ClassExistentialContainer,
    OpaqueExistentialContainer,
};
use core::ptr;

/// Existential nesting bound; deeper chains indicate corrupt metadata
const MAX_UNWRAP_DEPTH: usize = 64;

/// Flag bits accepted by the C entry point
pub const CAST_FLAG_UNCONDITIONAL: u32 = 1 << 0;
pub const CAST_FLAG_TAKE_ON_SUCCESS: u32 = 1 << 1;
pub const CAST_FLAG_DESTROY_ON_FAILURE: u32 = 1 << 2;

/// Cast behavior flags, independently combinable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CastFlags {
    /// Failure is a fatal trap instead of a false return
    pub unconditional: bool,
    /// Success consumes the source value
    pub take_on_success: bool,
    /// Failure destroys the source value in place
    pub destroy_on_failure: bool,
}

impl CastFlags {
    pub const CONDITIONAL: CastFlags = CastFlags {
        unconditional: false,
        take_on_success: false,
        destroy_on_failure: false,
    };

    pub const UNCONDITIONAL: CastFlags = CastFlags {
        unconditional: true,
        take_on_success: false,
        destroy_on_failure: false,
    };

    pub fn from_bits(bits: u32) -> Self {
        Self {
            unconditional: bits & CAST_FLAG_UNCONDITIONAL != 0,
            take_on_success: bits & CAST_FLAG_TAKE_ON_SUCCESS != 0,
            destroy_on_failure: bits & CAST_FLAG_DESTROY_ON_FAILURE != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.unconditional {
            bits |= CAST_FLAG_UNCONDITIONAL;
        }
        if self.take_on_success {
            bits |= CAST_FLAG_TAKE_ON_SUCCESS;
        }
        if self.destroy_on_failure {
            bits |= CAST_FLAG_DESTROY_ON_FAILURE;
        }
        bits
    }
}

/// A source resolved to its dynamic value and type
pub struct DynamicValue {
    pub value: *mut u8,
    pub ty: MetadataRef,
    /// True if at least one existential wrapper was opened; the value then
    /// lives inside the original source rather than being the source.
    pub unwrapped: bool,
}

/// Resolve `value` to the concrete value and type beneath any existential
/// or existential-metatype wrappers.
///
/// # Safety
/// `value` must hold an initialized value of `ty`.
pub unsafe fn find_dynamic_value(runtime: &Runtime, value: *mut u8, ty: MetadataRef) -> DynamicValue {
    let mut current_value = value;
    let mut current_ty = ty;
    let mut unwrapped = false;

    for _ in 0..MAX_UNWRAP_DEPTH {
        match &current_ty.details {
            MetadataDetails::Existential(e) => {
                if e.class_bounded {
                    let container = current_value as *mut ClassExistentialContainer;
                    let object = (*container).object;
                    current_ty = (*object).metadata();
                    // The object slot doubles as a class-reference value.
                    current_value = container as *mut u8;
                } else {
                    let container = current_value as *mut OpaqueExistentialContainer;
                    let inner = &*(*container).dynamic_type;
                    current_value = project_value_buffer(inner.witness, &mut (*container).buffer);
                    current_ty = inner;
                }
                unwrapped = true;
            }
            MetadataDetails::ExistentialMetatype(_) => {
                // Word 0 already holds the instance metadata pointer.
                let stored = &**(current_value as *mut *const Metadata);
                current_ty = runtime.metatype_metadata(stored);
                unwrapped = true;
            }
            _ => {
                return DynamicValue {
                    value: current_value,
                    ty: current_ty,
                    unwrapped,
                }
            }
        }
    }

    fatal("existential nesting exceeds the runtime unwrap limit");
}

/// Dynamic type of a value, unwrapping existentials and reading class
/// references through their headers.
///
/// # Safety
/// `value` must hold an initialized value of `ty`.
pub unsafe fn dynamic_type_of(runtime: &Runtime, value: *mut u8, ty: MetadataRef) -> MetadataRef {
    let resolved = find_dynamic_value(runtime, value, ty);
    resolved
        .ty
        .witness
        .dynamic_type(resolved.value)
        .unwrap_or(resolved.ty)
}

/// Cast the value at `src` (of `src_type`) to `target`, writing the result
/// to `dest` on success.
///
/// # Safety
/// `src` must hold an initialized value of `src_type`; `dest` must be
/// uninitialized storage sized for `target`.
pub unsafe fn dynamic_cast(
    runtime: &Runtime,
    dest: *mut u8,
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    trace!(
        event = "dynamic_cast",
        src = %src_type.type_name(),
        target = %target.type_name(),
    );

    match target.kind() {
        MetadataKind::Class | MetadataKind::ForeignClass => {
            cast_to_class_family(runtime, dest, src, src_type, target, flags)
        }
        MetadataKind::Existential => {
            cast_to_existential(runtime, dest, src, src_type, target, flags)
        }
        MetadataKind::Metatype => cast_to_metatype(runtime, dest, src, src_type, target, flags),
        MetadataKind::ExistentialMetatype => {
            cast_to_existential_metatype(runtime, dest, src, src_type, target, flags)
        }
        MetadataKind::Struct
        | MetadataKind::Enum
        | MetadataKind::Tuple
        | MetadataKind::Function
        | MetadataKind::Opaque => cast_to_value_type(runtime, dest, src, src_type, target, flags),
        MetadataKind::HeapLocalVariable => cast_fail(src, src_type, target, flags),
    }
}

/// Class-only fast path: no flags, no value transfer, no retain
///
/// # Safety
/// `object`, if non-null, must be a live heap object.
pub unsafe fn dynamic_cast_class(object: *mut HeapObject, target: MetadataRef) -> *mut HeapObject {
    if object.is_null() {
        return ptr::null_mut();
    }
    if class_chain_contains((*object).metadata(), target) {
        object
    } else {
        ptr::null_mut()
    }
}

/// Class-only fast path that traps on failure
///
/// # Safety
/// Same as `dynamic_cast_class`.
pub unsafe fn dynamic_cast_class_unconditional(
    object: *mut HeapObject,
    target: MetadataRef,
) -> *mut HeapObject {
    let result = dynamic_cast_class(object, target);
    if result.is_null() && !object.is_null() {
        fatal(&format!(
            "unconditional cast failed: {} is not a {}",
            (*object).metadata().type_name(),
            target.type_name()
        ));
    }
    result
}

// ============================================================================
// Target family handlers
// ============================================================================

unsafe fn cast_to_class_family(
    runtime: &Runtime,
    dest: *mut u8,
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    let source = find_dynamic_value(runtime, src, src_type);

    if source.ty.is_class_family() {
        let object = *(source.value as *mut *mut HeapObject);
        let dynamic = (*object).metadata();
        if class_chain_contains(dynamic, target) {
            let take_direct = flags.take_on_success && !source.unwrapped;
            if !take_direct {
                retain(object);
            }
            *(dest as *mut *mut HeapObject) = object;
            finish_success(src, src_type, &source, flags);
            return true;
        }
        return cast_fail(src, src_type, target, flags);
    }

    // Value-type source: a bridged representation may still reach the
    // class target.
    if let Some(bridge) = runtime.bridge() {
        if bridge.is_bridged(source.ty) {
            if let Some(foreign) = bridge.foreign_type(source.ty) {
                if class_chain_contains(foreign, target)
                    && bridge.bridge_to_foreign(dest, source.value, source.ty)
                {
                    finish_success(src, src_type, &source, flags);
                    return true;
                }
            }
        }
    }

    cast_fail(src, src_type, target, flags)
}

unsafe fn cast_to_value_type(
    runtime: &Runtime,
    dest: *mut u8,
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    let source = find_dynamic_value(runtime, src, src_type);

    if Metadata::same_type(source.ty, target) {
        write_value(target.witness, dest, &source, flags);
        finish_success(src, src_type, &source, flags);
        return true;
    }

    // Class-family source: the bridge may recover a native value.
    if source.ty.is_class_family() {
        if let Some(bridge) = runtime.bridge() {
            if bridge.is_bridged(target) {
                let object = *(source.value as *mut *mut HeapObject);
                let bridged = if flags.unconditional {
                    bridge.force_bridge_from_foreign(dest, object, target)
                } else {
                    bridge.conditionally_bridge_from_foreign(dest, object, target)
                };
                if bridged {
                    finish_success(src, src_type, &source, flags);
                    return true;
                }
            }
        }
    }

    cast_fail(src, src_type, target, flags)
}

unsafe fn cast_to_existential(
    runtime: &Runtime,
    dest: *mut u8,
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    let existential = match &target.details {
        MetadataDetails::Existential(e) => e,
        _ => return cast_fail(src, src_type, target, flags),
    };
    let source = find_dynamic_value(runtime, src, src_type);

    // Conformance checks precede any container mutation, so a failed cast
    // leaves `dest` untouched.
    let mut tables: Vec<*const WitnessTable> = Vec::with_capacity(existential.witness_table_count);
    for protocol in &existential.protocols {
        match runtime.conformances.conforms_to(source.ty, protocol) {
            Some(conformance) => {
                if protocol.flags.needs_witness_table {
                    match conformance.witness_table() {
                        Some(table) => tables.push(table as *const WitnessTable),
                        None => return cast_fail(src, src_type, target, flags),
                    }
                }
            }
            None => return cast_fail(src, src_type, target, flags),
        }
    }

    if existential.class_bounded {
        if !source.ty.is_class_family() {
            return cast_fail(src, src_type, target, flags);
        }
        let object = *(source.value as *mut *mut HeapObject);
        let container = dest as *mut ClassExistentialContainer;
        let take_direct = flags.take_on_success && !source.unwrapped;
        (*container).object = if take_direct { object } else { retain(object) };
        copy_tables(class_witness_tables(container), &tables);
    } else {
        let container = dest as *mut OpaqueExistentialContainer;
        (*container).buffer = ValueBuffer::new();
        (*container).dynamic_type = source.ty as *const Metadata;
        copy_tables(opaque_witness_tables(container), &tables);
        let value_dest = allocate_value_buffer(source.ty.witness, &mut (*container).buffer);
        write_value(source.ty.witness, value_dest, &source, flags);
    }

    finish_success(src, src_type, &source, flags);
    true
}

unsafe fn cast_to_metatype(
    runtime: &Runtime,
    dest: *mut u8,
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    let target_instance = match &target.details {
        MetadataDetails::Metatype(m) => m.instance_type,
        _ => return cast_fail(src, src_type, target, flags),
    };
    let source = find_dynamic_value(runtime, src, src_type);

    if source.ty.kind() != MetadataKind::Metatype {
        return cast_fail(src, src_type, target, flags);
    }

    let stored = &**(source.value as *mut *const Metadata);
    if metatype_instance_compatible(stored, target_instance) {
        *(dest as *mut *const Metadata) = stored as *const Metadata;
        finish_success(src, src_type, &source, flags);
        true
    } else {
        cast_fail(src, src_type, target, flags)
    }
}

unsafe fn cast_to_existential_metatype(
    runtime: &Runtime,
    dest: *mut u8,
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    let target_details = match &target.details {
        MetadataDetails::ExistentialMetatype(m) => m,
        _ => return cast_fail(src, src_type, target, flags),
    };
    let existential = match target_details.instance_type.existential_details() {
        Some(e) => e,
        None => return cast_fail(src, src_type, target, flags),
    };
    let source = find_dynamic_value(runtime, src, src_type);

    if source.ty.kind() != MetadataKind::Metatype {
        return cast_fail(src, src_type, target, flags);
    }
    let stored = &**(source.value as *mut *const Metadata);

    if existential.class_bounded && !stored.is_class_family() {
        return cast_fail(src, src_type, target, flags);
    }

    let mut tables: Vec<*const WitnessTable> = Vec::with_capacity(existential.witness_table_count);
    for protocol in &existential.protocols {
        match runtime.conformances.conforms_to(stored, protocol) {
            Some(conformance) => {
                if protocol.flags.needs_witness_table {
                    match conformance.witness_table() {
                        Some(table) => tables.push(table as *const WitnessTable),
                        None => return cast_fail(src, src_type, target, flags),
                    }
                }
            }
            None => return cast_fail(src, src_type, target, flags),
        }
    }

    *(dest as *mut *const Metadata) = stored as *const Metadata;
    copy_tables((dest as *mut *const WitnessTable).add(1), &tables);
    finish_success(src, src_type, &source, flags);
    true
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Does `target` appear on `dynamic`'s superclass chain (inclusive)?
fn class_chain_contains(dynamic: MetadataRef, target: MetadataRef) -> bool {
    let mut cursor = Some(dynamic);
    while let Some(class) = cursor {
        if Metadata::same_type(class, target) {
            return true;
        }
        cursor = class.superclass();
    }
    false
}

fn metatype_instance_compatible(stored: MetadataRef, target_instance: MetadataRef) -> bool {
    if Metadata::same_type(stored, target_instance) {
        return true;
    }
    if stored.is_class_family() && target_instance.is_class_family() {
        return class_chain_contains(stored, target_instance);
    }
    // Metatype-of-metatype chains recurse one structural level per
    // indirection.
    if let (MetadataDetails::Metatype(a), MetadataDetails::Metatype(b)) =
        (&stored.details, &target_instance.details)
    {
        return metatype_instance_compatible(a.instance_type, b.instance_type);
    }
    false
}

/// Move or copy the resolved value into `dest`. A value unwrapped out of an
/// existential is always copied; the container is destroyed afterwards by
/// `finish_success` when the cast takes its source.
unsafe fn write_value(witness: WitnessRef, dest: *mut u8, source: &DynamicValue, flags: CastFlags) {
    if flags.take_on_success && !source.unwrapped {
        witness.initialize_with_take(dest, source.value);
    } else {
        witness.initialize_with_copy(dest, source.value);
    }
}

/// Post-success source disposal for the unwrapped-and-taking case
unsafe fn finish_success(
    src: *mut u8,
    src_type: MetadataRef,
    source: &DynamicValue,
    flags: CastFlags,
) {
    if flags.take_on_success && source.unwrapped {
        src_type.witness.destroy(src);
    }
}

unsafe fn copy_tables(dest: *mut *const WitnessTable, tables: &[*const WitnessTable]) {
    for (i, table) in tables.iter().enumerate() {
        dest.add(i).write(*table);
    }
}

/// Shared failure path: trap, or optionally destroy the source, then
/// report false.
unsafe fn cast_fail(
    src: *mut u8,
    src_type: MetadataRef,
    target: MetadataRef,
    flags: CastFlags,
) -> bool {
    if flags.unconditional {
        fatal(&format!(
            "unconditional cast failed: {} is not a {}",
            src_type.type_name(),
            target.type_name()
        ));
    }
    if flags.destroy_on_failure {
        src_type.witness.destroy(src);
    }
    false
}
