//! Tests for conformance lookup, caching and invalidation

use super::*;
use crate::metadata::{
    ClassMetadata, FieldLayout, Metadata, MetadataDetails, StructMetadata, CLASS_REFERENCE_WITNESS,
};
use crate::witness::POD_I64;

static DRAWABLE: ProtocolDescriptor = ProtocolDescriptor::new("Drawable", ProtocolFlags::regular());
static SERIALIZABLE: ProtocolDescriptor =
    ProtocolDescriptor::new("Serializable", ProtocolFlags::regular());

static DRAWABLE_TABLE: WitnessTable = WitnessTable {
    protocol: &DRAWABLE,
    entries: &[0x1000, 0x1008],
};

static SHAPE_DESCRIPTOR: NominalDescriptor = NominalDescriptor::class("Shape", None);
static CIRCLE_DESCRIPTOR: NominalDescriptor = NominalDescriptor::class("Circle", None);
static POINT_DESCRIPTOR: NominalDescriptor = NominalDescriptor::value_type("Point");

static SHAPE: Metadata = Metadata {
    witness: &CLASS_REFERENCE_WITNESS,
    details: MetadataDetails::Class(ClassMetadata {
        descriptor: &SHAPE_DESCRIPTOR,
        superclass: None,
        instance_size: 64,
        instance_align_mask: 7,
    }),
};

static CIRCLE: Metadata = Metadata {
    witness: &CLASS_REFERENCE_WITNESS,
    details: MetadataDetails::Class(ClassMetadata {
        descriptor: &CIRCLE_DESCRIPTOR,
        superclass: Some(&SHAPE),
        instance_size: 80,
        instance_align_mask: 7,
    }),
};

fn point_metadata() -> Metadata {
    Metadata {
        witness: &POD_I64,
        details: MetadataDetails::Struct(StructMetadata {
            descriptor: &POINT_DESCRIPTOR,
            fields: vec![FieldLayout {
                ty: &crate::metadata::INT64,
                offset: 0,
            }],
            generic_args: Vec::new(),
        }),
    }
}

#[test]
fn test_positive_lookup_after_registration() {
    let cache = ConformanceCache::new();
    cache.register(&[ConformanceRecord::concrete(
        &SHAPE,
        &DRAWABLE,
        Some(&DRAWABLE_TABLE),
    )]);

    let conformance = cache.conforms_to(&SHAPE, &DRAWABLE).expect("conforms");
    let table = conformance.witness_table().expect("has table");
    assert!(core::ptr::eq(table, &DRAWABLE_TABLE));
}

#[test]
fn test_negative_lookup_without_records() {
    let cache = ConformanceCache::new();
    assert!(cache.conforms_to(&SHAPE, &SERIALIZABLE).is_none());

    // The negative answer is cached at the current generation
    let stats = cache.stats();
    assert!(stats.entries >= 1);
}

#[test]
fn test_negative_invalidated_by_registration() {
    // A negative at generation G must not survive a registration that
    // adds the conformance.
    let cache = ConformanceCache::new();

    assert!(cache.conforms_to(&SHAPE, &DRAWABLE).is_none());
    let before = cache.stats().generation;

    cache.register(&[ConformanceRecord::concrete(
        &SHAPE,
        &DRAWABLE,
        Some(&DRAWABLE_TABLE),
    )]);
    assert!(cache.stats().generation > before);

    let conformance = cache.conforms_to(&SHAPE, &DRAWABLE).expect("conforms now");
    assert!(conformance.witness_table().is_some());
}

#[test]
fn test_positive_entries_are_permanent() {
    let cache = ConformanceCache::new();
    cache.register(&[ConformanceRecord::concrete(
        &SHAPE,
        &DRAWABLE,
        Some(&DRAWABLE_TABLE),
    )]);

    assert!(cache.conforms_to(&SHAPE, &DRAWABLE).is_some());

    // Later registrations never evict positives
    cache.register(&[ConformanceRecord::concrete(&CIRCLE, &SERIALIZABLE, None)]);
    assert!(cache.conforms_to(&SHAPE, &DRAWABLE).is_some());
}

#[test]
fn test_superclass_chain_conformance() {
    let cache = ConformanceCache::new();
    cache.register(&[ConformanceRecord::concrete(
        &SHAPE,
        &DRAWABLE,
        Some(&DRAWABLE_TABLE),
    )]);

    // Circle inherits Shape's conformance
    let conformance = cache.conforms_to(&CIRCLE, &DRAWABLE).expect("inherited");
    let table = conformance.witness_table().expect("has table");
    assert!(core::ptr::eq(table, &DRAWABLE_TABLE));

    // The subclass answer is now cached directly
    let entries = cache.stats().entries;
    cache.conforms_to(&CIRCLE, &DRAWABLE).expect("cached");
    assert_eq!(cache.stats().entries, entries);
}

#[test]
fn test_class_marker_protocol_shortcut() {
    let cache = ConformanceCache::new();

    // Class-family types conform without any registration or table
    let conformance = cache
        .conforms_to(&SHAPE, &ANY_CLASS_PROTOCOL)
        .expect("class conforms");
    assert!(conformance.witness_table().is_none());

    // Value types never do
    let point: &'static Metadata = Box::leak(Box::new(point_metadata()));
    assert!(cache.conforms_to(point, &ANY_CLASS_PROTOCOL).is_none());

    // The shortcut bypasses the cache entirely
    assert_eq!(cache.stats().entries, 1); // only the Point negative
}

#[test]
fn test_pattern_record_shared_by_instantiations() {
    // Records keyed by a nominal descriptor answer for every
    // instantiation of that declaration.
    let cache = ConformanceCache::new();
    cache.register(&[ConformanceRecord::pattern(
        &POINT_DESCRIPTOR,
        &DRAWABLE,
        Some(&DRAWABLE_TABLE),
    )]);

    let first: &'static Metadata = Box::leak(Box::new(point_metadata()));
    let second: &'static Metadata = Box::leak(Box::new(point_metadata()));
    assert!(!core::ptr::eq(first, second));

    assert!(cache.conforms_to(first, &DRAWABLE).is_some());
    assert!(cache.conforms_to(second, &DRAWABLE).is_some());
}

#[test]
fn test_abstract_conformance_record() {
    let cache = ConformanceCache::new();
    cache.register(&[ConformanceRecord::concrete(&SHAPE, &SERIALIZABLE, None)]);

    let conformance = cache
        .conforms_to(&SHAPE, &SERIALIZABLE)
        .expect("abstract conformance");
    assert!(conformance.witness_table().is_none());
}

#[test]
fn test_registration_batches_drain_once() {
    let cache = ConformanceCache::new();
    cache.register(&[ConformanceRecord::concrete(
        &SHAPE,
        &DRAWABLE,
        Some(&DRAWABLE_TABLE),
    )]);
    cache.register(&[ConformanceRecord::concrete(&CIRCLE, &SERIALIZABLE, None)]);

    assert!(cache.conforms_to(&SHAPE, &DRAWABLE).is_some());
    assert!(cache.conforms_to(&CIRCLE, &SERIALIZABLE).is_some());
    assert!(cache.conforms_to(&SHAPE, &SERIALIZABLE).is_none());
}
