//! Runtime context - process-wide caches as an explicit owned object
//!
//! Design: All mutable runtime state (conformance cache, derived-metadata
//! uniquing caches, the optional foreign bridge) lives in one `Runtime`
//! value. The process uses a lazily constructed global; tests build their
//! own instances. Nothing is torn down during the process lifetime.

use crate::cast::existential::{ClassExistentialWitness, ExistentialMetatypeWitness, OpaqueExistentialWitness};
use crate::conformance::{ConformanceCache, ProtocolDescriptor};
use crate::heap::HeapObject;
use crate::logging::debug;
use crate::metadata::{
    BoxMetadata, ExistentialMetadata, ExistentialMetatypeMetadata, FunctionMetadata, Metadata,
    MetadataDetails, MetadataRef, MetatypeMetadata, TupleElement, TupleMetadata, METATYPE_WITNESS,
};
use crate::witness::{aggregate_layout, round_up, AggregateWitness, ValueWitness, WitnessRef, WORD_SIZE};
use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Foreign bridging capability, supplied by an embedder that can convert
/// between native values and foreign-class references. Consulted
/// opportunistically during class-family <-> value-type casts; absent by
/// default.
pub trait ForeignBridge: Send + Sync {
    fn is_bridged(&self, ty: MetadataRef) -> bool;
    fn foreign_type(&self, ty: MetadataRef) -> Option<MetadataRef>;

    /// Convert the value at `src` into a retained foreign reference
    /// written to `dest`.
    ///
    /// # Safety
    /// `src` must hold an initialized value of `src_type`.
    unsafe fn bridge_to_foreign(&self, dest: *mut u8, src: *mut u8, src_type: MetadataRef) -> bool;

    /// Convert a foreign reference into a value of `target` at `dest`,
    /// trapping on failure.
    ///
    /// # Safety
    /// `object` must be a live foreign-class reference.
    unsafe fn force_bridge_from_foreign(
        &self,
        dest: *mut u8,
        object: *mut HeapObject,
        target: MetadataRef,
    ) -> bool;

    /// Like `force_bridge_from_foreign` but failure returns false.
    ///
    /// # Safety
    /// `object` must be a live foreign-class reference.
    unsafe fn conditionally_bridge_from_foreign(
        &self,
        dest: *mut u8,
        object: *mut HeapObject,
        target: MetadataRef,
    ) -> bool;
}

static GLOBAL_RUNTIME: Lazy<Runtime> = Lazy::new(Runtime::new);

/// Owned runtime state: conformance cache plus uniquing caches for every
/// derived metadata shape, keyed by component addresses.
pub struct Runtime {
    pub conformances: ConformanceCache,
    tuples: DashMap<Vec<usize>, MetadataRef>,
    functions: DashMap<(Vec<usize>, usize), MetadataRef>,
    metatypes: DashMap<usize, MetadataRef>,
    existential_metatypes: DashMap<usize, MetadataRef>,
    existentials: DashMap<Vec<usize>, MetadataRef>,
    boxes: DashMap<usize, MetadataRef>,
    bridge: Option<&'static dyn ForeignBridge>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            conformances: ConformanceCache::new(),
            tuples: DashMap::new(),
            functions: DashMap::new(),
            metatypes: DashMap::new(),
            existential_metatypes: DashMap::new(),
            existentials: DashMap::new(),
            boxes: DashMap::new(),
            bridge: None,
        }
    }

    pub fn with_bridge(bridge: &'static dyn ForeignBridge) -> Self {
        Self {
            bridge: Some(bridge),
            ..Self::new()
        }
    }

    /// The process-wide runtime, constructed on first use
    pub fn global() -> &'static Runtime {
        &GLOBAL_RUNTIME
    }

    pub fn bridge(&self) -> Option<&'static dyn ForeignBridge> {
        self.bridge
    }

    /// Canonical tuple metadata for the given element types
    pub fn tuple_metadata(&self, elements: &[MetadataRef]) -> MetadataRef {
        if elements.is_empty() {
            return &crate::metadata::UNIT;
        }
        let key: Vec<usize> = elements.iter().map(|m| address(m)).collect();
        *self.tuples.entry(key).or_insert_with(|| {
            let witnesses: Vec<WitnessRef> = elements.iter().map(|m| m.witness).collect();
            let (_, offsets) = aggregate_layout(&witnesses);
            let witness: WitnessRef = Box::leak(Box::new(AggregateWitness::new(&witnesses)));
            debug!(arity = elements.len(), "tuple metadata created");
            leak(Metadata {
                witness,
                details: MetadataDetails::Tuple(TupleMetadata {
                    elements: elements
                        .iter()
                        .zip(offsets)
                        .map(|(ty, offset)| TupleElement { ty: *ty, offset })
                        .collect(),
                }),
            })
        })
    }

    /// Canonical function type metadata. Function values are opaque
    /// word-sized entry points; parameter and result types only matter for
    /// identity.
    pub fn function_metadata(&self, parameters: &[MetadataRef], result: MetadataRef) -> MetadataRef {
        let key = (
            parameters.iter().map(|m| address(m)).collect::<Vec<_>>(),
            address(result),
        );
        *self.functions.entry(key).or_insert_with(|| {
            leak(Metadata {
                witness: &crate::witness::RAW_POINTER_WITNESS,
                details: MetadataDetails::Function(FunctionMetadata {
                    parameters: parameters.to_vec(),
                    result,
                }),
            })
        })
    }

    /// Canonical metatype metadata for `instance_type`
    pub fn metatype_metadata(&self, instance_type: MetadataRef) -> MetadataRef {
        *self
            .metatypes
            .entry(address(instance_type))
            .or_insert_with(|| {
                leak(Metadata {
                    witness: &METATYPE_WITNESS,
                    details: MetadataDetails::Metatype(MetatypeMetadata { instance_type }),
                })
            })
    }

    /// Canonical existential-metatype metadata over an existential
    pub fn existential_metatype_metadata(&self, instance_type: MetadataRef) -> MetadataRef {
        debug_assert!(instance_type.existential_details().is_some());
        *self
            .existential_metatypes
            .entry(address(instance_type))
            .or_insert_with(|| {
                let count = instance_type
                    .existential_details()
                    .map_or(0, |e| e.witness_table_count);
                let witness: WitnessRef =
                    Box::leak(Box::new(ExistentialMetatypeWitness::new(count)));
                leak(Metadata {
                    witness,
                    details: MetadataDetails::ExistentialMetatype(ExistentialMetatypeMetadata {
                        instance_type,
                    }),
                })
            })
    }

    /// Canonical existential metadata for a protocol composition
    pub fn existential_metadata(
        &self,
        protocols: &[&'static ProtocolDescriptor],
    ) -> MetadataRef {
        let key: Vec<usize> = protocols
            .iter()
            .map(|p| *p as *const ProtocolDescriptor as usize)
            .collect();
        *self.existentials.entry(key).or_insert_with(|| {
            let class_bounded = protocols.iter().any(|p| p.flags.class_constrained);
            let witness_table_count = protocols
                .iter()
                .filter(|p| p.flags.needs_witness_table)
                .count();
            let witness: WitnessRef = if class_bounded {
                Box::leak(Box::new(ClassExistentialWitness::new(witness_table_count)))
            } else {
                Box::leak(Box::new(OpaqueExistentialWitness::new(witness_table_count)))
            };
            debug!(
                protocols = protocols.len(),
                class_bounded, "existential metadata created"
            );
            leak(Metadata {
                witness,
                details: MetadataDetails::Existential(ExistentialMetadata {
                    protocols: protocols.to_vec(),
                    class_bounded,
                    witness_table_count,
                }),
            })
        })
    }

    /// Heap metadata for a box holding one value of `boxed`
    pub fn box_metadata(&self, boxed: MetadataRef) -> MetadataRef {
        *self.boxes.entry(address(boxed)).or_insert_with(|| {
            let layout = boxed.witness.layout();
            let header = core::mem::size_of::<HeapObject>();
            let value_offset = round_up(header, layout.alignment.max(1));
            leak(Metadata {
                witness: &crate::metadata::CLASS_REFERENCE_WITNESS,
                details: MetadataDetails::HeapBox(BoxMetadata {
                    boxed,
                    value_offset,
                    allocation_size: value_offset + layout.size,
                    align_mask: layout.alignment.max(WORD_SIZE) - 1,
                }),
            })
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn address(metadata: MetadataRef) -> usize {
    metadata as *const Metadata as usize
}

/// Derived metadata is uniqued and permanent
fn leak(metadata: Metadata) -> MetadataRef {
    Box::leak(Box::new(metadata))
}
