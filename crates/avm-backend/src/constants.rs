//! Process-wide constant pool
//!
//! Non-primitive constants are not expressible as literals, so generated
//! code reads them from a runtime table (`$C[index]`). The pool maps each
//! object, by identity, to its slot in that table. Entries are never
//! removed: code compiled arbitrarily long ago may still reference them.

use avm_ir::ObjectHandle;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

static GLOBAL_POOL: Lazy<ConstantPool> = Lazy::new(ConstantPool::new);

#[derive(Default)]
struct PoolInner {
    /// Index → object; keeps every interned object alive
    objects: Vec<ObjectHandle>,
    /// Object identity → index
    indices: FxHashMap<usize, u32>,
}

/// Thread-safe, append-only table of interned runtime objects
#[derive(Default)]
pub struct ConstantPool {
    inner: Mutex<PoolInner>,
}

impl ConstantPool {
    /// Create an empty pool, independent of the global one
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool shared by every compilation in the process
    pub fn global() -> &'static ConstantPool {
        &GLOBAL_POOL
    }

    /// Return the index of `object`, appending it on first sight.
    ///
    /// The lookup and the append happen under one lock, so racing interns
    /// of the same object agree on its index.
    pub fn intern(&self, object: &ObjectHandle) -> u32 {
        let mut inner = self.inner.lock();
        let key = object.identity();
        if let Some(&index) = inner.indices.get(&key) {
            return index;
        }
        let index = inner.objects.len() as u32;
        inner.objects.push(object.clone());
        inner.indices.insert(key, index);
        tracing::trace!(index, "interned constant");
        index
    }

    /// Index of an already interned object
    pub fn index_of(&self, object: &ObjectHandle) -> Option<u32> {
        self.inner.lock().indices.get(&object.identity()).copied()
    }

    /// Object at `index`, for the loader populating the runtime table
    pub fn get(&self, index: u32) -> Option<ObjectHandle> {
        self.inner.lock().objects.get(index as usize).cloned()
    }

    /// Objects from `start` onwards, in index order
    pub fn snapshot_from(&self, start: u32) -> Vec<ObjectHandle> {
        let inner = self.inner.lock();
        inner.objects.iter().skip(start as usize).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantPool").field("len", &self.len()).finish()
    }
}
