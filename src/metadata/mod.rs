//! Type metadata - descriptors for every runtime type
//!
//! Design: One `Metadata` record per canonical type, tagged by kind and
//! carrying the type's value witness. Non-generic metadata is static data;
//! generic and derived metadata is created on first use, uniqued, and never
//! freed, so `&'static Metadata` pointer identity is type identity.

pub mod generic;

#[cfg(test)]
mod tests;

use crate::conformance::ProtocolDescriptor;
use crate::heap::{release, retain, HeapDestroyer, HeapObject};
use crate::witness::{
    RawPointerWitness, TypeLayout, ValueWitness, WitnessRef, POD_EMPTY, POD_F64, POD_I16, POD_I32,
    POD_I64, POD_I8, WORD_SIZE,
};
use core::ptr;

/// Shared reference to canonical metadata; metadata is never freed.
pub type MetadataRef = &'static Metadata;

/// Discriminates the metadata hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MetadataKind {
    Class,
    Struct,
    Enum,
    Opaque,
    Tuple,
    Function,
    Existential,
    Metatype,
    ExistentialMetatype,
    ForeignClass,
    HeapLocalVariable,
}

/// Canonical type descriptor: a kind-tagged body plus the type's witness
#[derive(Clone)]
pub struct Metadata {
    pub witness: WitnessRef,
    pub details: MetadataDetails,
}

/// Kind-specific metadata bodies
#[derive(Clone)]
pub enum MetadataDetails {
    Class(ClassMetadata),
    Struct(StructMetadata),
    Enum(EnumMetadata),
    Opaque(OpaqueMetadata),
    Tuple(TupleMetadata),
    Function(FunctionMetadata),
    Existential(ExistentialMetadata),
    Metatype(MetatypeMetadata),
    ExistentialMetatype(ExistentialMetatypeMetadata),
    ForeignClass(ForeignClassMetadata),
    HeapBox(BoxMetadata),
}

/// Out-of-line nominal type descriptor shared by class, struct and enum
/// metadata. Generic instantiations of one declaration share a descriptor,
/// which is what conformance records for generic patterns key on.
pub struct NominalDescriptor {
    pub name: &'static str,
    /// Destroy override for class instances (runs the deinit); value types
    /// leave this unset.
    pub destroy: Option<HeapDestroyer>,
}

impl NominalDescriptor {
    pub const fn value_type(name: &'static str) -> Self {
        Self {
            name,
            destroy: None,
        }
    }

    pub const fn class(name: &'static str, destroy: Option<HeapDestroyer>) -> Self {
        Self { name, destroy }
    }
}

#[derive(Clone)]
pub struct ClassMetadata {
    pub descriptor: &'static NominalDescriptor,
    pub superclass: Option<MetadataRef>,
    /// Total instance allocation size, header included
    pub instance_size: usize,
    pub instance_align_mask: usize,
}

#[derive(Clone)]
pub struct FieldLayout {
    pub ty: MetadataRef,
    pub offset: usize,
}

#[derive(Clone)]
pub struct StructMetadata {
    pub descriptor: &'static NominalDescriptor,
    pub fields: Vec<FieldLayout>,
    /// Key arguments this instantiation was stamped from (empty for
    /// non-generic structs)
    pub generic_args: Vec<MetadataRef>,
}

#[derive(Clone)]
pub struct EnumMetadata {
    pub descriptor: &'static NominalDescriptor,
    pub payload: Option<MetadataRef>,
    pub empty_cases: u32,
    pub generic_args: Vec<MetadataRef>,
}

#[derive(Clone)]
pub struct OpaqueMetadata {
    pub name: &'static str,
}

#[derive(Clone)]
pub struct TupleElement {
    pub ty: MetadataRef,
    pub offset: usize,
}

#[derive(Clone)]
pub struct TupleMetadata {
    pub elements: Vec<TupleElement>,
}

#[derive(Clone)]
pub struct FunctionMetadata {
    pub parameters: Vec<MetadataRef>,
    pub result: MetadataRef,
}

#[derive(Clone)]
pub struct ExistentialMetadata {
    pub protocols: Vec<&'static ProtocolDescriptor>,
    /// Class-bounded existentials store a single retained reference
    /// instead of a value buffer
    pub class_bounded: bool,
    /// Number of trailing witness-table slots in the container
    pub witness_table_count: usize,
}

#[derive(Clone)]
pub struct MetatypeMetadata {
    pub instance_type: MetadataRef,
}

#[derive(Clone)]
pub struct ExistentialMetatypeMetadata {
    /// The underlying existential whose conforming types' metatypes are
    /// admissible values
    pub instance_type: MetadataRef,
}

#[derive(Clone)]
pub struct ForeignClassMetadata {
    pub descriptor: &'static NominalDescriptor,
    pub superclass: Option<MetadataRef>,
}

#[derive(Clone)]
pub struct BoxMetadata {
    pub boxed: MetadataRef,
    pub value_offset: usize,
    pub allocation_size: usize,
    pub align_mask: usize,
}

impl Metadata {
    #[inline]
    pub fn kind(&self) -> MetadataKind {
        match self.details {
            MetadataDetails::Class(_) => MetadataKind::Class,
            MetadataDetails::Struct(_) => MetadataKind::Struct,
            MetadataDetails::Enum(_) => MetadataKind::Enum,
            MetadataDetails::Opaque(_) => MetadataKind::Opaque,
            MetadataDetails::Tuple(_) => MetadataKind::Tuple,
            MetadataDetails::Function(_) => MetadataKind::Function,
            MetadataDetails::Existential(_) => MetadataKind::Existential,
            MetadataDetails::Metatype(_) => MetadataKind::Metatype,
            MetadataDetails::ExistentialMetatype(_) => MetadataKind::ExistentialMetatype,
            MetadataDetails::ForeignClass(_) => MetadataKind::ForeignClass,
            MetadataDetails::HeapBox(_) => MetadataKind::HeapLocalVariable,
        }
    }

    /// Class, and foreign class, references share representation and cast
    /// rules.
    #[inline]
    pub fn is_class_family(&self) -> bool {
        matches!(
            self.details,
            MetadataDetails::Class(_) | MetadataDetails::ForeignClass(_)
        )
    }

    #[inline]
    pub fn witness(&self) -> WitnessRef {
        self.witness
    }

    /// Canonical identity: metadata is uniqued, so identity is address
    /// identity.
    #[inline]
    pub fn same_type(a: MetadataRef, b: MetadataRef) -> bool {
        ptr::eq(a, b)
    }

    pub fn class_details(&self) -> Option<&ClassMetadata> {
        match &self.details {
            MetadataDetails::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn existential_details(&self) -> Option<&ExistentialMetadata> {
        match &self.details {
            MetadataDetails::Existential(e) => Some(e),
            _ => None,
        }
    }

    pub fn box_details(&self) -> Option<&BoxMetadata> {
        match &self.details {
            MetadataDetails::HeapBox(b) => Some(b),
            _ => None,
        }
    }

    /// Nominal descriptor, for types that have one
    pub fn descriptor(&self) -> Option<&'static NominalDescriptor> {
        match &self.details {
            MetadataDetails::Class(c) => Some(c.descriptor),
            MetadataDetails::Struct(s) => Some(s.descriptor),
            MetadataDetails::Enum(e) => Some(e.descriptor),
            MetadataDetails::ForeignClass(f) => Some(f.descriptor),
            _ => None,
        }
    }

    /// Superclass link for class-family metadata
    pub fn superclass(&self) -> Option<MetadataRef> {
        match &self.details {
            MetadataDetails::Class(c) => c.superclass,
            MetadataDetails::ForeignClass(f) => f.superclass,
            _ => None,
        }
    }

    /// Destroy hook for heap metadata kinds
    pub(crate) fn heap_destroyer(&self) -> Option<HeapDestroyer> {
        match &self.details {
            MetadataDetails::Class(c) => Some(c.descriptor.destroy.unwrap_or(plain_class_destroy)),
            MetadataDetails::HeapBox(_) => Some(box_destroy),
            _ => None,
        }
    }

    /// (size, align_mask) of a heap allocation described by this metadata
    pub(crate) fn heap_allocation_extent(&self) -> (usize, usize) {
        match &self.details {
            MetadataDetails::Class(c) => (c.instance_size, c.instance_align_mask),
            MetadataDetails::HeapBox(b) => (b.allocation_size, b.align_mask),
            _ => (core::mem::size_of::<HeapObject>(), WORD_SIZE - 1),
        }
    }

    /// Human-readable type name for diagnostics
    pub fn type_name(&self) -> String {
        let mut out = String::new();
        render_type_name(self, &mut out, TYPE_NAME_RECURSION_LIMIT);
        out
    }
}

/// Destroyer for classes without a deinit: nothing to tear down beyond the
/// instance storage itself.
unsafe fn plain_class_destroy(object: *mut HeapObject) -> usize {
    let (size, _) = (*object).metadata().heap_allocation_extent();
    size
}

/// Destroyer for boxes: destroy the boxed value through its witness, then
/// request the allocation be freed.
unsafe fn box_destroy(object: *mut HeapObject) -> usize {
    let metadata = (*object).metadata();
    match &metadata.details {
        MetadataDetails::HeapBox(details) => {
            let value = (object as *mut u8).add(details.value_offset);
            details.boxed.witness.destroy(value);
            details.allocation_size
        }
        _ => 0,
    }
}

// ============================================================================
// Class reference witness
// ============================================================================

/// Witness shared by all class references: one retained word, null as the
/// single extra inhabitant, dynamic type read from the object header.
pub struct ClassReferenceWitness;

pub static CLASS_REFERENCE_WITNESS: ClassReferenceWitness = ClassReferenceWitness;

impl ValueWitness for ClassReferenceWitness {
    #[inline]
    fn layout(&self) -> TypeLayout {
        TypeLayout::new(WORD_SIZE, WORD_SIZE, false)
    }

    unsafe fn destroy(&self, value: *mut u8) {
        release(*(value as *mut *mut HeapObject));
    }

    unsafe fn initialize_with_copy(&self, dest: *mut u8, src: *const u8) {
        let object = *(src as *const *mut HeapObject);
        retain(object);
        *(dest as *mut *mut HeapObject) = object;
    }

    unsafe fn dynamic_type(&self, value: *const u8) -> Option<MetadataRef> {
        let object = *(value as *const *mut HeapObject);
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
        *(value as *mut usize) = 0;
    }

    unsafe fn extra_inhabitant_index(&self, value: *const u8) -> i32 {
        if *(value as *const usize) == 0 {
            0
        } else {
            -1
        }
    }
}

/// Witness for metatype values: a single non-null metadata word
pub static METATYPE_WITNESS: RawPointerWitness = RawPointerWitness;

// ============================================================================
// Builtin metadata
// ============================================================================

pub static INT8: Metadata = Metadata {
    witness: &POD_I8,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "Int8" }),
};

pub static INT16: Metadata = Metadata {
    witness: &POD_I16,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "Int16" }),
};

pub static INT32: Metadata = Metadata {
    witness: &POD_I32,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "Int32" }),
};

pub static INT64: Metadata = Metadata {
    witness: &POD_I64,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "Int64" }),
};

pub static FLOAT64: Metadata = Metadata {
    witness: &POD_F64,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "Float64" }),
};

pub static BOOL: Metadata = Metadata {
    witness: &crate::witness::BOOL_WITNESS,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "Bool" }),
};

pub static RAW_POINTER: Metadata = Metadata {
    witness: &crate::witness::RAW_POINTER_WITNESS,
    details: MetadataDetails::Opaque(OpaqueMetadata { name: "RawPointer" }),
};

pub static UNIT: Metadata = Metadata {
    witness: &POD_EMPTY,
    details: MetadataDetails::Tuple(TupleMetadata {
        elements: Vec::new(),
    }),
};

// ============================================================================
// Type name rendering
// ============================================================================

/// Nesting depth at which name rendering gives up and prints `...`
const TYPE_NAME_RECURSION_LIMIT: u32 = 8;

fn render_type_name(metadata: &Metadata, out: &mut String, depth: u32) {
    if depth == 0 {
        out.push_str("...");
        return;
    }
    let next = depth - 1;

    match &metadata.details {
        MetadataDetails::Opaque(o) => out.push_str(o.name),
        MetadataDetails::Class(c) => out.push_str(c.descriptor.name),
        MetadataDetails::ForeignClass(f) => out.push_str(f.descriptor.name),
        MetadataDetails::Struct(s) => {
            out.push_str(s.descriptor.name);
            render_generic_args(&s.generic_args, out, next);
        }
        MetadataDetails::Enum(e) => {
            out.push_str(e.descriptor.name);
            render_generic_args(&e.generic_args, out, next);
        }
        MetadataDetails::Tuple(t) => {
            out.push('(');
            for (i, element) in t.elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_type_name(element.ty, out, next);
            }
            out.push(')');
        }
        MetadataDetails::Function(f) => {
            out.push('(');
            for (i, parameter) in f.parameters.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_type_name(parameter, out, next);
            }
            out.push_str(") -> ");
            render_type_name(f.result, out, next);
        }
        MetadataDetails::Existential(e) => {
            if e.protocols.is_empty() {
                out.push_str("Any");
            } else {
                for (i, protocol) in e.protocols.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" & ");
                    }
                    out.push_str(protocol.name);
                }
            }
        }
        MetadataDetails::Metatype(m) => {
            render_type_name(m.instance_type, out, next);
            out.push_str(".Type");
        }
        MetadataDetails::ExistentialMetatype(m) => {
            render_type_name(m.instance_type, out, next);
            out.push_str(".Type");
        }
        MetadataDetails::HeapBox(b) => {
            out.push_str("Box<");
            render_type_name(b.boxed, out, next);
            out.push('>');
        }
    }
}

fn render_generic_args(args: &[MetadataRef], out: &mut String, depth: u32) {
    if args.is_empty() {
        return;
    }
    out.push('<');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render_type_name(arg, out, depth);
    }
    out.push('>');
}
