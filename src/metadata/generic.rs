//! Generic metadata instantiation and uniquing
//!
//! A pattern stamps out concrete metadata for one generic declaration:
//! clone the template, run the pattern's fill routine over the argument
//! vector, and publish the block at the head of the pattern's private
//! entry list. Publication is a single compare-and-swap with no lock:
//! two threads instantiating the same arguments can both build a block,
//! but the loser observes the winner's entry during the retry scan and
//! drops its own block, so equal argument vectors always resolve to one
//! canonical pointer.

use super::{Metadata, MetadataRef};
use crate::logging::debug;
use core::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Patch routine run over the freshly copied template
pub type MetadataFill = fn(&mut Metadata, &[MetadataRef]);

/// Instantiation template for one generic declaration
pub struct GenericMetadataPattern {
    /// Prefix of the argument vector that participates in uniquing
    pub num_key_arguments: usize,
    /// Block copied for each instantiation
    pub template: Metadata,
    /// Patches type-specific fields (field offsets, witnesses, argument
    /// vector) after the template copy
    pub fill: MetadataFill,
    cache: GenericCache,
}

impl GenericMetadataPattern {
    pub fn new(template: Metadata, num_key_arguments: usize, fill: MetadataFill) -> Self {
        Self {
            num_key_arguments,
            template,
            fill,
            cache: GenericCache::new(),
        }
    }

    /// Return the canonical metadata for `arguments`, instantiating on
    /// first use. `arguments` must carry at least `num_key_arguments`
    /// entries; the key prefix is compared element-wise by address.
    pub fn get_or_instantiate(&self, arguments: &[MetadataRef]) -> MetadataRef {
        debug_assert!(arguments.len() >= self.num_key_arguments);
        let key = &arguments[..self.num_key_arguments];

        let head = self.cache.head.load(Ordering::Acquire);
        if let Some(found) = unsafe { find_entry(head, ptr::null(), key) } {
            return found;
        }

        // Miss: build a block off-list, then race to publish it.
        let mut metadata = self.template.clone();
        (self.fill)(&mut metadata, arguments);

        let entry = Box::into_raw(Box::new(GenericCacheEntry {
            arguments: key.to_vec().into_boxed_slice(),
            metadata: Box::new(metadata),
            next: head,
        }));

        let mut observed = head;
        loop {
            unsafe { (*entry).next = observed };
            match self.cache.head.compare_exchange_weak(
                observed as *mut GenericCacheEntry,
                entry,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(entries = self.cache_entry_count(), "generic metadata instantiated");
                    return unsafe { entry_metadata(entry) };
                }
                Err(newer) => {
                    // Another thread published first. Scan only the new
                    // prefix; on an equal key, discard our block cleanly
                    // and hand back the winner.
                    if let Some(winner) = unsafe { find_entry(newer, observed, key) } {
                        unsafe { drop(Box::from_raw(entry)) };
                        return winner;
                    }
                    observed = newer;
                }
            }
        }
    }

    /// Number of published entries (for debugging/testing)
    pub fn cache_entry_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.cache.head.load(Ordering::Acquire) as *const GenericCacheEntry;
        while !cursor.is_null() {
            count += 1;
            cursor = unsafe { (*cursor).next };
        }
        count
    }
}

struct GenericCache {
    head: AtomicPtr<GenericCacheEntry>,
}

impl GenericCache {
    const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

struct GenericCacheEntry {
    arguments: Box<[MetadataRef]>,
    metadata: Box<Metadata>,
    next: *const GenericCacheEntry,
}

// Entries are immutable once published and never freed afterwards.
unsafe impl Send for GenericCacheEntry {}
unsafe impl Sync for GenericCacheEntry {}

/// Walk entries from `from` until `until` (exclusive), returning the
/// metadata whose key equals `key` element-wise by address.
unsafe fn find_entry(
    from: *const GenericCacheEntry,
    until: *const GenericCacheEntry,
    key: &[MetadataRef],
) -> Option<MetadataRef> {
    let mut cursor = from;
    while !cursor.is_null() && cursor != until {
        let entry = &*cursor;
        if entry.arguments.len() == key.len()
            && entry
                .arguments
                .iter()
                .zip(key)
                .all(|(a, b)| ptr::eq(*a, *b))
        {
            return Some(entry_metadata(cursor));
        }
        cursor = entry.next;
    }
    None
}

/// Published entries are permanent, so the boxed metadata lives for the
/// rest of the process.
unsafe fn entry_metadata(entry: *const GenericCacheEntry) -> MetadataRef {
    &*(&*(*entry).metadata as *const Metadata)
}
