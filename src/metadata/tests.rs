//! Tests for metadata identity, generic instantiation and uniquing

use super::generic::GenericMetadataPattern;
use super::*;
use crate::runtime::Runtime;
use crate::witness::{aggregate_layout, AggregateWitness, ValueWitness, WitnessRef, POD_EMPTY};
use std::thread;

static PAIR_DESCRIPTOR: NominalDescriptor = NominalDescriptor::value_type("Pair");

fn fill_pair(metadata: &mut Metadata, args: &[MetadataRef]) {
    let witnesses: Vec<WitnessRef> = args.iter().map(|m| m.witness).collect();
    let (_, offsets) = aggregate_layout(&witnesses);
    metadata.witness = Box::leak(Box::new(AggregateWitness::new(&witnesses)));
    if let MetadataDetails::Struct(s) = &mut metadata.details {
        s.fields = args
            .iter()
            .zip(offsets)
            .map(|(ty, offset)| FieldLayout { ty: *ty, offset })
            .collect();
        s.generic_args = args.to_vec();
    }
}

fn pair_pattern() -> GenericMetadataPattern {
    let template = Metadata {
        witness: &POD_EMPTY,
        details: MetadataDetails::Struct(StructMetadata {
            descriptor: &PAIR_DESCRIPTOR,
            fields: Vec::new(),
            generic_args: Vec::new(),
        }),
    };
    GenericMetadataPattern::new(template, 2, fill_pair)
}

#[test]
fn test_instantiation_is_idempotent() {
    // Scenario: Pair<Int64, Bool> twice yields the identical pointer;
    // Pair<Int64, Int64> yields a different one.
    let pattern = pair_pattern();

    let first = pattern.get_or_instantiate(&[&INT64, &BOOL]);
    let second = pattern.get_or_instantiate(&[&INT64, &BOOL]);
    assert!(Metadata::same_type(first, second));

    let other = pattern.get_or_instantiate(&[&INT64, &INT64]);
    assert!(!Metadata::same_type(first, other));

    assert_eq!(pattern.cache_entry_count(), 2);
}

#[test]
fn test_fill_patches_template() {
    let pattern = pair_pattern();
    let instantiated = pattern.get_or_instantiate(&[&INT64, &BOOL]);

    match &instantiated.details {
        MetadataDetails::Struct(s) => {
            assert_eq!(s.fields.len(), 2);
            assert_eq!(s.fields[0].offset, 0);
            assert_eq!(s.fields[1].offset, 8);
            assert!(Metadata::same_type(s.generic_args[0], &INT64));
            assert!(Metadata::same_type(s.generic_args[1], &BOOL));
        }
        _ => panic!("expected struct metadata"),
    }

    // The synthesized witness reflects the argument layout
    let layout = instantiated.witness.layout();
    assert_eq!(layout.size, 9);
    assert_eq!(layout.alignment, 8);
}

#[test]
fn test_argument_vectors_compared_by_address() {
    let pattern = pair_pattern();

    // Same metadata through different slices still hits the same entry
    let args_a: [MetadataRef; 2] = [&INT32, &INT32];
    let args_b: [MetadataRef; 2] = [&INT32, &INT32];
    let first = pattern.get_or_instantiate(&args_a);
    let second = pattern.get_or_instantiate(&args_b);
    assert!(Metadata::same_type(first, second));
    assert_eq!(pattern.cache_entry_count(), 1);
}

#[test]
fn test_concurrent_instantiation_single_canonical_pointer() {
    // Racing first use may build duplicate blocks, but losers discard
    // theirs: every thread observes the same canonical pointer.
    let pattern: &'static GenericMetadataPattern = Box::leak(Box::new(pair_pattern()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(move || {
                pattern.get_or_instantiate(&[&INT64, &BOOL]) as *const Metadata as usize
            })
        })
        .collect();

    let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for window in results.windows(2) {
        assert_eq!(window[0], window[1]);
    }
    assert_eq!(pattern.cache_entry_count(), 1);
}

#[test]
fn test_tuple_metadata_uniqued() {
    let runtime = Runtime::new();

    let first = runtime.tuple_metadata(&[&INT32, &BOOL]);
    let second = runtime.tuple_metadata(&[&INT32, &BOOL]);
    assert!(Metadata::same_type(first, second));

    let reversed = runtime.tuple_metadata(&[&BOOL, &INT32]);
    assert!(!Metadata::same_type(first, reversed));

    match &first.details {
        MetadataDetails::Tuple(t) => {
            assert_eq!(t.elements.len(), 2);
            assert_eq!(t.elements[0].offset, 0);
            assert_eq!(t.elements[1].offset, 4);
        }
        _ => panic!("expected tuple metadata"),
    }
}

#[test]
fn test_empty_tuple_is_unit() {
    let runtime = Runtime::new();
    let unit = runtime.tuple_metadata(&[]);
    assert!(Metadata::same_type(unit, &UNIT));
    assert_eq!(unit.witness.layout().size, 0);
}

#[test]
fn test_metatype_metadata_uniqued() {
    let runtime = Runtime::new();

    let first = runtime.metatype_metadata(&INT32);
    let second = runtime.metatype_metadata(&INT32);
    assert!(Metadata::same_type(first, second));
    assert_eq!(first.kind(), MetadataKind::Metatype);

    let other = runtime.metatype_metadata(&INT64);
    assert!(!Metadata::same_type(first, other));
}

#[test]
fn test_function_metadata_identity() {
    let runtime = Runtime::new();

    let first = runtime.function_metadata(&[&INT32], &BOOL);
    let second = runtime.function_metadata(&[&INT32], &BOOL);
    assert!(Metadata::same_type(first, second));

    let different_result = runtime.function_metadata(&[&INT32], &INT32);
    assert!(!Metadata::same_type(first, different_result));
}

#[test]
fn test_kind_tags() {
    assert_eq!(INT32.kind(), MetadataKind::Opaque);
    assert_eq!(UNIT.kind(), MetadataKind::Tuple);
    assert!(!INT32.is_class_family());
}

#[test]
fn test_type_names() {
    let runtime = Runtime::new();

    assert_eq!(INT32.type_name(), "Int32");
    assert_eq!(BOOL.type_name(), "Bool");

    let tuple = runtime.tuple_metadata(&[&INT32, &BOOL]);
    assert_eq!(tuple.type_name(), "(Int32, Bool)");

    let function = runtime.function_metadata(&[&INT32], &BOOL);
    assert_eq!(function.type_name(), "(Int32) -> Bool");

    let metatype = runtime.metatype_metadata(&INT32);
    assert_eq!(metatype.type_name(), "Int32.Type");

    let pattern = pair_pattern();
    let pair = pattern.get_or_instantiate(&[&INT64, &BOOL]);
    assert_eq!(pair.type_name(), "Pair<Int64, Bool>");
}
