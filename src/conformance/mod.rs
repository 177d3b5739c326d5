//! Protocol conformance registry and cache
//!
//! Design: Conformance facts arrive in batches through a registration
//! feed (the loader pushes records for newly visible code). Lookups go
//! through a concurrent map; positive answers are permanent, negative
//! answers carry the generation they were computed at and die when new
//! records are registered.

#[cfg(test)]
mod tests;

use crate::logging::{debug, info};
use crate::metadata::{Metadata, MetadataRef, NominalDescriptor};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker protocols the runtime answers without any table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialProtocol {
    /// "Any class conforms": satisfied by every class-family type,
    /// requires no witness table
    AnyClass,
}

#[derive(Debug, Clone, Copy)]
pub struct ProtocolFlags {
    /// Only class-family types may conform
    pub class_constrained: bool,
    /// Conforming types must supply a witness table
    pub needs_witness_table: bool,
    pub special: Option<SpecialProtocol>,
}

impl ProtocolFlags {
    pub const fn regular() -> Self {
        Self {
            class_constrained: false,
            needs_witness_table: true,
            special: None,
        }
    }

    pub const fn class_marker() -> Self {
        Self {
            class_constrained: true,
            needs_witness_table: false,
            special: Some(SpecialProtocol::AnyClass),
        }
    }
}

/// Protocol descriptor referenced by records and existential metadata
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub flags: ProtocolFlags,
}

impl ProtocolDescriptor {
    pub const fn new(name: &'static str, flags: ProtocolFlags) -> Self {
        Self { name, flags }
    }
}

/// The builtin "any class conforms" marker protocol
pub static ANY_CLASS_PROTOCOL: ProtocolDescriptor =
    ProtocolDescriptor::new("AnyClass", ProtocolFlags::class_marker());

/// Witness table supplied by the compiler for one (type, protocol) pair.
/// The entries are opaque to the runtime: function addresses in the
/// protocol's requirement order.
pub struct WitnessTable {
    pub protocol: &'static ProtocolDescriptor,
    pub entries: &'static [usize],
}

/// A successful conformance lookup
#[derive(Clone, Copy)]
pub enum Conformance {
    /// Conforms with a witness table
    Witness(&'static WitnessTable),
    /// Conforms abstractly (marker protocols, no table required)
    Abstract,
}

impl Conformance {
    pub fn witness_table(&self) -> Option<&'static WitnessTable> {
        match self {
            Conformance::Witness(table) => Some(table),
            Conformance::Abstract => None,
        }
    }
}

/// One registered conformance fact. Exactly one of `metadata` (a concrete
/// type) and `descriptor` (a generic pattern: all instantiations share the
/// answer) is non-null. A null `witness_table` records an abstract
/// conformance.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ConformanceRecord {
    pub metadata: *const Metadata,
    pub descriptor: *const NominalDescriptor,
    pub protocol: *const ProtocolDescriptor,
    pub witness_table: *const WitnessTable,
}

impl ConformanceRecord {
    pub fn concrete(
        metadata: MetadataRef,
        protocol: &'static ProtocolDescriptor,
        witness_table: Option<&'static WitnessTable>,
    ) -> Self {
        Self {
            metadata,
            descriptor: core::ptr::null(),
            protocol,
            witness_table: witness_table.map_or(core::ptr::null(), |t| t as *const WitnessTable),
        }
    }

    pub fn pattern(
        descriptor: &'static NominalDescriptor,
        protocol: &'static ProtocolDescriptor,
        witness_table: Option<&'static WitnessTable>,
    ) -> Self {
        Self {
            metadata: core::ptr::null(),
            descriptor,
            protocol,
            witness_table: witness_table.map_or(core::ptr::null(), |t| t as *const WitnessTable),
        }
    }
}

// Records point at 'static immutable runtime structures.
unsafe impl Send for ConformanceRecord {}
unsafe impl Sync for ConformanceRecord {}

enum CacheValue {
    /// Permanent: conformances never become false
    Positive(Option<&'static WitnessTable>),
    /// Valid only while the generation matches
    Negative(u64),
}

/// Cache statistics (for debugging/testing)
#[derive(Debug, Clone, Copy)]
pub struct ConformanceCacheStats {
    pub entries: usize,
    pub generation: u64,
}

/// Concurrent (type, protocol) -> witness table cache fed by the
/// registration stream
pub struct ConformanceCache {
    map: DashMap<(usize, usize), CacheValue>,
    generation: AtomicU64,
    pending: Mutex<Vec<Vec<ConformanceRecord>>>,
    scan_lock: Mutex<()>,
}

impl ConformanceCache {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            generation: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            scan_lock: Mutex::new(()),
        }
    }

    /// Registration feed: queue a batch of records and publish a new
    /// generation so stale negative entries fall through to a rescan.
    pub fn register(&self, records: &[ConformanceRecord]) {
        if records.is_empty() {
            return;
        }
        self.pending.lock().push(records.to_vec());
        self.generation.fetch_add(1, Ordering::Release);
        info!(count = records.len(), "conformance records registered");
    }

    /// Does `ty` conform to `protocol`?
    pub fn conforms_to(
        &self,
        ty: MetadataRef,
        protocol: &'static ProtocolDescriptor,
    ) -> Option<Conformance> {
        // Constant-time shortcut: the class marker needs no table and no
        // cache traffic.
        if let Some(SpecialProtocol::AnyClass) = protocol.flags.special {
            return ty.is_class_family().then_some(Conformance::Abstract);
        }

        loop {
            let generation = self.generation.load(Ordering::Acquire);

            match self.lookup(ty, protocol) {
                Some(CacheValue::Positive(table)) => {
                    return Some(table.map_or(Conformance::Abstract, Conformance::Witness));
                }
                Some(CacheValue::Negative(stamped)) if stamped == generation => {
                    // A previous lookup already searched the superclass
                    // chain at this generation.
                    return None;
                }
                _ => {}
            }

            if self.rescan() {
                // New records were ingested (by us or a concurrent
                // caller); retry from the top.
                continue;
            }
            if self.generation.load(Ordering::Acquire) != generation {
                continue;
            }

            // Nothing new anywhere. A class may still inherit the
            // conformance from an ancestor.
            if let Some(superclass) = ty.superclass() {
                if let Some(found) = self.conforms_to(superclass, protocol) {
                    self.map.insert(
                        Self::concrete_key(ty, protocol),
                        CacheValue::Positive(found.witness_table()),
                    );
                    return Some(found);
                }
            }

            debug!(ty = %ty.type_name(), protocol = protocol.name, "negative conformance cached");
            self.map.insert(
                Self::concrete_key(ty, protocol),
                CacheValue::Negative(generation),
            );
            return None;
        }
    }

    pub fn stats(&self) -> ConformanceCacheStats {
        ConformanceCacheStats {
            entries: self.map.len(),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    fn lookup(&self, ty: MetadataRef, protocol: &'static ProtocolDescriptor) -> Option<CacheValue> {
        let concrete = self.map.get(&Self::concrete_key(ty, protocol));
        if let Some(value) = concrete {
            return Some(Self::copy_value(&value));
        }

        // Generic instantiations share their declaration's answer.
        if let Some(descriptor) = ty.descriptor() {
            let key = (
                descriptor as *const NominalDescriptor as usize,
                protocol as *const ProtocolDescriptor as usize,
            );
            if let Some(value) = self.map.get(&key) {
                // Only positive pattern answers apply to every
                // instantiation.
                if matches!(*value, CacheValue::Positive(_)) {
                    return Some(Self::copy_value(&value));
                }
            }
        }
        None
    }

    /// Drain the pending queue under the scan lock. Returns true if any
    /// records were ingested.
    fn rescan(&self) -> bool {
        let _guard = self.scan_lock.lock();
        let batches = std::mem::take(&mut *self.pending.lock());
        if batches.is_empty() {
            return false;
        }

        let mut ingested = 0usize;
        for record in batches.iter().flatten() {
            let type_key = if record.metadata.is_null() {
                record.descriptor as usize
            } else {
                record.metadata as usize
            };
            let table = if record.witness_table.is_null() {
                None
            } else {
                Some(unsafe { &*record.witness_table })
            };
            self.map.insert(
                (type_key, record.protocol as usize),
                CacheValue::Positive(table),
            );
            ingested += 1;
        }

        self.generation.fetch_add(1, Ordering::Release);
        debug!(records = ingested, "conformance rescan complete");
        true
    }

    fn concrete_key(ty: MetadataRef, protocol: &'static ProtocolDescriptor) -> (usize, usize) {
        (
            ty as *const Metadata as usize,
            protocol as *const ProtocolDescriptor as usize,
        )
    }

    fn copy_value(value: &CacheValue) -> CacheValue {
        match value {
            CacheValue::Positive(table) => CacheValue::Positive(*table),
            CacheValue::Negative(generation) => CacheValue::Negative(*generation),
        }
    }
}

impl Default for ConformanceCache {
    fn default() -> Self {
        Self::new()
    }
}
