//! Shared-ownership identifiers for functions and classes
//!
//! A [`Symbol`] is a reference-counted immutable string with its hash
//! computed once at construction, so the hot path never rehashes names.
//! Cloning bumps a refcount; dropping the last clone frees the text.

use fnv::FnvHashMap;
use std::fmt;
use std::sync::Arc;

/// Interned function or class name
#[derive(Clone)]
pub struct Symbol {
    text: Arc<str>,
    hash: u64,
}

impl Symbol {
    pub fn new(text: &str) -> Self {
        Symbol {
            hash: name_hash(text.as_bytes()),
            text: Arc::from(text),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Precomputed name hash (DJB "times 33")
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// True when both handles point at the same interned text
    pub fn same_instance(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.text, &other.text)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other) || (self.hash == other.hash && self.text == other.text)
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.text)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Symbol {
    fn from(text: &str) -> Self {
        Symbol::new(text)
    }
}

fn name_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(5381u64, |hash, &b| {
        hash.wrapping_mul(33).wrapping_add(u64::from(b))
    })
}

/// Deduplicating symbol table
///
/// Hosts that resolve the same name repeatedly should intern through this
/// so equal names share one allocation and compare by pointer.
#[derive(Debug, Default)]
pub struct Interner {
    table: FnvHashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(symbol) = self.table.get(text) {
            return symbol.clone();
        }
        let symbol = Symbol::new(text);
        self.table.insert(Box::from(text), symbol.clone());
        symbol
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
