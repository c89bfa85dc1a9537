//! Session-owned string interning and type id allocation.
//!
//! Both live as fields of the query context rather than module-level state,
//! so multiple compilation sessions can coexist in one process (tests,
//! language servers).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Handle to an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
struct InternerInner {
    map: HashMap<Arc<str>, Symbol>,
    strings: Vec<Arc<str>>,
}

/// Deduplicating string table.
#[derive(Debug, Default)]
pub struct Interner {
    inner: Mutex<InternerInner>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Symbol {
        let mut inner = self.inner.lock().expect("failed to acquire interner mutex");
        if let Some(&sym) = inner.map.get(s) {
            return sym;
        }
        let sym = Symbol(u32::try_from(inner.strings.len()).expect("interner overflow"));
        let arc: Arc<str> = Arc::from(s);
        inner.strings.push(arc.clone());
        inner.map.insert(arc, sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> Arc<str> {
        let inner = self.inner.lock().expect("failed to acquire interner mutex");
        inner.strings[sym.index()].clone()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("failed to acquire interner mutex");
        inner.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Monotonic allocator for type identifiers.
#[derive(Debug, Default)]
pub struct TypeIdGen {
    next: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self) -> TypeId {
        TypeId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let interner = Interner::new();
        let a = interner.intern("loop");
        let b = interner.intern("loop");
        let c = interner.intern("break");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*interner.resolve(a), "loop");
        assert_eq!(&*interner.resolve(c), "break");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn type_ids_are_distinct_per_generator() {
        let generator = TypeIdGen::new();
        let a = generator.fresh();
        let b = generator.fresh();
        assert_ne!(a, b);

        // A separate generator starts over: no process-global counter.
        let other = TypeIdGen::new();
        assert_eq!(other.fresh(), a);
    }
}
