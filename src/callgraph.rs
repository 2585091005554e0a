//! Call-graph aggregation
//!
//! Parent->child edges are deduplicated in a fixed table of hash slots.
//! Each slot heads a chain of buckets; a lookup matches only when the
//! stored key and the full parent/child identity both agree, so two edges
//! whose keys collide still get separate buckets.

use crate::flags::TraceFlags;
use crate::frame::Frame;
use crate::symbol::Symbol;
use serde::Serialize;

/// Number of hash slots in the edge table
pub const CALLGRAPH_SLOTS: usize = 8192;

const HASH_SEED: u64 = 5381;

/// Index of a bucket in the graph's bucket arena
pub type BucketId = usize;

/// Accumulated measurements for one edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeStats {
    pub count: u64,
    /// Wall time in milliseconds
    pub wall_time: u64,
    /// Thread CPU time in microseconds
    pub cpu_time: u64,
    pub memory: i64,
    pub memory_peak: i64,
    pub num_alloc: u64,
    pub num_free: u64,
    pub amount_alloc: u64,
}

/// One aggregated parent->child edge
#[derive(Debug, Clone)]
pub struct CallGraphBucket {
    pub key: u64,
    pub parent_class: Option<Symbol>,
    pub parent_function: Option<Symbol>,
    pub parent_recurse_level: u32,
    pub child_class: Option<Symbol>,
    pub child_function: Option<Symbol>,
    pub child_recurse_level: u32,
    pub stats: EdgeStats,
    next: Option<BucketId>,
}

impl CallGraphBucket {
    pub fn is_root_edge(&self) -> bool {
        self.parent_class.is_none() && self.parent_function.is_none()
    }

    fn matches(&self, key: u64, current: &Frame, previous: Option<&Frame>) -> bool {
        if self.key != key
            || self.child_recurse_level != current.recurse_level
            || self.child_class != current.class
            || self.child_function != current.function
        {
            return false;
        }
        match previous {
            None => self.is_root_edge(),
            Some(parent) => {
                parent.recurse_level == self.parent_recurse_level
                    && parent.class == self.parent_class
                    && parent.function.is_some()
                    && parent.function == self.parent_function
            }
        }
    }
}

#[inline]
fn hash_int(hash: u64, value: u64) -> u64 {
    // Names contribute the low 32 bits of their hash, byte by byte
    (value as u32)
        .to_le_bytes()
        .iter()
        .fold(hash, |h, &b| h.wrapping_mul(33).wrapping_add(u64::from(b)))
}

/// Rolling hash of the edge from `frame`'s caller to `frame`
///
/// Absent class or function names are skipped rather than hashed.
pub fn edge_key(frame: &Frame) -> u64 {
    let mut hash = HASH_SEED;

    if let Some(previous) = frame.caller() {
        if let Some(class) = &previous.class {
            hash = hash_int(hash, class.hash_value());
        }
        if let Some(function) = &previous.function {
            hash = hash_int(hash, function.hash_value());
        }
        hash = hash.wrapping_add(u64::from(previous.recurse_level));
    }

    if let Some(class) = &frame.class {
        hash = hash_int(hash, class.hash_value());
    }
    if let Some(function) = &frame.function {
        hash = hash_int(hash, function.hash_value());
    }
    hash.wrapping_add(u64::from(frame.recurse_level))
}

fn push_symbol(out: &mut String, class: Option<&Symbol>, function: Option<&Symbol>, level: u32) {
    match (class, function) {
        (Some(class), function) => {
            out.push_str(class.as_str());
            out.push_str("::");
            out.push_str(function.map(Symbol::as_str).unwrap_or(""));
        }
        (None, Some(function)) => out.push_str(function.as_str()),
        (None, None) => return,
    }
    if level > 0 {
        out.push('@');
        out.push_str(&level.to_string());
    }
}

/// Human-readable `parent[@N]==>child[@M]` label; root edges have no parent part
pub fn format_edge_label(bucket: &CallGraphBucket) -> String {
    let mut label = String::new();
    if !bucket.is_root_edge() {
        push_symbol(
            &mut label,
            bucket.parent_class.as_ref(),
            bucket.parent_function.as_ref(),
            bucket.parent_recurse_level,
        );
        label.push_str("==>");
    }
    push_symbol(
        &mut label,
        bucket.child_class.as_ref(),
        bucket.child_function.as_ref(),
        bucket.child_recurse_level,
    );
    label
}

/// Fixed-slot edge table with chained collision handling
#[derive(Debug)]
pub struct CallGraph {
    slots: Box<[Option<BucketId>]>,
    buckets: Vec<CallGraphBucket>,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph {
            slots: vec![None; CALLGRAPH_SLOTS].into_boxed_slice(),
            buckets: Vec::new(),
        }
    }

    #[inline]
    fn slot_of(key: u64) -> usize {
        (key % CALLGRAPH_SLOTS as u64) as usize
    }

    /// Walk the chain at `key`'s slot for the bucket of edge `previous -> current`
    ///
    /// `previous == None` looks up the root edge, which only matches buckets
    /// with no parent identity.
    pub fn find_bucket(&self, key: u64, current: &Frame, previous: Option<&Frame>) -> Option<BucketId> {
        let mut cursor = self.slots[Self::slot_of(key)];
        while let Some(id) = cursor {
            let bucket = &self.buckets[id];
            if bucket.matches(key, current, previous) {
                return Some(id);
            }
            cursor = bucket.next;
        }
        None
    }

    /// Add a bucket for `previous -> current` at the head of `key`'s chain
    pub fn insert(&mut self, key: u64, current: &Frame, previous: Option<&Frame>) -> BucketId {
        let slot = Self::slot_of(key);
        let id = self.buckets.len();
        self.buckets.push(CallGraphBucket {
            key,
            parent_class: previous.and_then(|p| p.class.clone()),
            parent_function: previous.and_then(|p| p.function.clone()),
            parent_recurse_level: previous.map_or(0, |p| p.recurse_level),
            child_class: current.class.clone(),
            child_function: current.function.clone(),
            child_recurse_level: current.recurse_level,
            stats: EdgeStats::default(),
            next: self.slots[slot],
        });
        self.slots[slot] = Some(id);
        id
    }

    /// Bucket of the edge ending at the stack frame `current`, created on first sight
    pub fn resolve(&mut self, current: &Frame) -> BucketId {
        let key = edge_key(current);
        let previous = current.caller();
        match self.find_bucket(key, current, previous) {
            Some(id) => id,
            None => self.insert(key, current, previous),
        }
    }

    pub fn bucket(&self, id: BucketId) -> &CallGraphBucket {
        &self.buckets[id]
    }

    pub fn bucket_mut(&mut self, id: BucketId) -> &mut CallGraphBucket {
        &mut self.buckets[id]
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Forget every edge
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.buckets.clear();
    }

    /// Buckets in slot order, then chain order within a slot
    pub fn iter(&self) -> impl Iterator<Item = &CallGraphBucket> {
        self.slots.iter().flat_map(move |head| {
            let mut cursor = *head;
            std::iter::from_fn(move || {
                let bucket = &self.buckets[cursor?];
                cursor = bucket.next;
                Some(bucket)
            })
        })
    }

    /// Exported view of every edge; measurements not requested by `flags` are omitted
    pub fn edges(&self, flags: TraceFlags) -> Vec<EdgeRecord> {
        self.iter().map(|b| EdgeRecord::new(b, flags)).collect()
    }
}

impl Default for CallGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Exported view of one edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeRecord {
    pub edge: String,
    pub ct: u64,
    pub wt: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mu: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmu: Option<i64>,
    #[serde(rename = "mem.na", skip_serializing_if = "Option::is_none")]
    pub mem_na: Option<u64>,
    #[serde(rename = "mem.nf", skip_serializing_if = "Option::is_none")]
    pub mem_nf: Option<u64>,
    #[serde(rename = "mem.aa", skip_serializing_if = "Option::is_none")]
    pub mem_aa: Option<u64>,
}

impl EdgeRecord {
    fn new(bucket: &CallGraphBucket, flags: TraceFlags) -> Self {
        let stats = &bucket.stats;
        let alloc = flags.tracks_allocations();
        EdgeRecord {
            edge: format_edge_label(bucket),
            ct: stats.count,
            wt: stats.wall_time,
            cpu: flags.tracks_cpu().then_some(stats.cpu_time),
            mu: (flags.contains(TraceFlags::MEMORY_MU) || flags.alloc_as_memory_usage())
                .then_some(stats.memory),
            pmu: flags.contains(TraceFlags::MEMORY_PMU).then_some(stats.memory_peak),
            mem_na: alloc.then_some(stats.num_alloc),
            mem_nf: alloc.then_some(stats.num_free),
            mem_aa: alloc.then_some(stats.amount_alloc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameLink;

    fn frame(class: Option<&str>, function: &str, level: u32) -> Frame {
        let mut frame = Frame::default();
        frame.function = Some(Symbol::new(function));
        frame.class = class.map(Symbol::new);
        frame.recurse_level = level;
        frame
    }

    fn with_caller(mut child: Frame, parent: Frame) -> Frame {
        child.link = FrameLink::OnStack(Some(Box::new(parent)));
        child
    }

    fn root_bucket(child: &str) -> CallGraphBucket {
        CallGraphBucket {
            key: 1,
            parent_class: None,
            parent_function: None,
            parent_recurse_level: 0,
            child_class: None,
            child_function: Some(Symbol::new(child)),
            child_recurse_level: 0,
            stats: EdgeStats::default(),
            next: None,
        }
    }

    #[test]
    fn test_edge_key_is_deterministic() {
        let a = with_caller(frame(Some("Foo"), "bar", 0), frame(None, "main()", 0));
        let b = with_caller(frame(Some("Foo"), "bar", 0), frame(None, "main()", 0));
        assert_eq!(edge_key(&a), edge_key(&b));
    }

    #[test]
    fn test_edge_key_depends_on_levels_and_parent() {
        let base = with_caller(frame(None, "f", 0), frame(None, "g", 0));
        let deeper = with_caller(frame(None, "f", 1), frame(None, "g", 0));
        let other_parent = with_caller(frame(None, "f", 0), frame(None, "h", 0));
        let root = frame(None, "f", 0);
        assert_ne!(edge_key(&base), edge_key(&deeper));
        assert_ne!(edge_key(&base), edge_key(&other_parent));
        assert_ne!(edge_key(&base), edge_key(&root));
    }

    #[test]
    fn test_edge_key_skips_absent_class() {
        let free = frame(None, "", 0);
        let method = frame(Some(""), "", 0);
        // an empty class name still contributes its hash
        assert_ne!(edge_key(&free), edge_key(&method));
    }

    #[test]
    fn test_find_after_insert() {
        let mut graph = CallGraph::new();
        let child = with_caller(frame(Some("Foo"), "bar", 0), frame(None, "main()", 0));
        let key = edge_key(&child);
        assert!(graph.find_bucket(key, &child, child.caller()).is_none());
        let id = graph.insert(key, &child, child.caller());
        assert_eq!(graph.find_bucket(key, &child, child.caller()), Some(id));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_forced_collision_keeps_edges_apart() {
        let mut graph = CallGraph::new();
        let a = with_caller(frame(None, "alpha", 0), frame(None, "main()", 0));
        let b = with_caller(frame(None, "beta", 0), frame(None, "main()", 0));
        let key = 42;

        let id_a = graph.insert(key, &a, a.caller());
        assert!(graph.find_bucket(key, &b, b.caller()).is_none());
        let id_b = graph.insert(key, &b, b.caller());
        assert_ne!(id_a, id_b);

        assert_eq!(graph.find_bucket(key, &a, a.caller()), Some(id_a));
        assert_eq!(graph.find_bucket(key, &b, b.caller()), Some(id_b));
    }

    #[test]
    fn test_root_lookup_never_matches_child_edge() {
        let mut graph = CallGraph::new();
        let nested = with_caller(frame(None, "work", 0), frame(None, "main()", 0));
        let bare = frame(None, "work", 0);
        let key = 7;

        graph.insert(key, &nested, nested.caller());
        assert!(graph.find_bucket(key, &bare, None).is_none());

        let root_id = graph.insert(key, &bare, None);
        assert_eq!(graph.find_bucket(key, &bare, None), Some(root_id));
        assert_ne!(graph.find_bucket(key, &nested, nested.caller()), Some(root_id));
    }

    #[test]
    fn test_parent_level_must_match() {
        let mut graph = CallGraph::new();
        let shallow = with_caller(frame(None, "f", 1), frame(None, "f", 0));
        let deep = with_caller(frame(None, "f", 1), frame(None, "f", 2));
        let key = 99;
        graph.insert(key, &shallow, shallow.caller());
        assert!(graph.find_bucket(key, &deep, deep.caller()).is_none());
    }

    #[test]
    fn test_key_mismatch_in_same_slot() {
        let mut graph = CallGraph::new();
        let child = frame(None, "f", 0);
        graph.insert(5, &child, None);
        // same slot, different key
        assert!(graph
            .find_bucket(5 + CALLGRAPH_SLOTS as u64, &child, None)
            .is_none());
    }

    #[test]
    fn test_resolve_reuses_bucket_per_edge() {
        let mut graph = CallGraph::new();
        let child = with_caller(frame(Some("Foo"), "bar", 0), frame(None, "main()", 0));
        let first = graph.resolve(&child);
        graph.bucket_mut(first).stats.count += 1;
        let second = graph.resolve(&child);
        graph.bucket_mut(second).stats.count += 1;
        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.bucket(first).stats.count, 2);
    }

    #[test]
    fn test_format_root_edge() {
        assert_eq!(format_edge_label(&root_bucket("main()")), "main()");
    }

    #[test]
    fn test_format_method_edges_with_recursion() {
        let mut bucket = root_bucket("bar");
        bucket.parent_function = Some(Symbol::new("bar"));
        bucket.parent_class = Some(Symbol::new("Foo"));
        bucket.parent_recurse_level = 1;
        bucket.child_class = Some(Symbol::new("Foo"));
        bucket.child_recurse_level = 2;
        assert_eq!(format_edge_label(&bucket), "Foo::bar@1==>Foo::bar@2");
    }

    #[test]
    fn test_format_function_edge() {
        let mut bucket = root_bucket("strlen");
        bucket.parent_function = Some(Symbol::new("main()"));
        assert_eq!(format_edge_label(&bucket), "main()==>strlen");
    }

    #[test]
    fn test_clear_empties_table() {
        let mut graph = CallGraph::new();
        let child = frame(None, "f", 0);
        let key = edge_key(&child);
        graph.insert(key, &child, None);
        graph.clear();
        assert!(graph.is_empty());
        assert!(graph.find_bucket(key, &child, None).is_none());
        assert_eq!(graph.iter().count(), 0);
    }

    #[test]
    fn test_edges_respect_flags() {
        let mut graph = CallGraph::new();
        let child = frame(None, "f", 0);
        let id = graph.resolve(&child);
        graph.bucket_mut(id).stats.count = 3;

        let plain = graph.edges(TraceFlags::empty());
        assert_eq!(plain[0].ct, 3);
        assert!(plain[0].cpu.is_none());
        assert!(plain[0].mem_na.is_none());

        let json = serde_json::to_value(&graph.edges(TraceFlags::CPU | TraceFlags::MEMORY_ALLOC))
            .unwrap();
        assert_eq!(json[0]["edge"], "f");
        assert_eq!(json[0]["cpu"], 0);
        assert_eq!(json[0]["mem.na"], 0);
        assert!(json[0].get("mu").is_none());
    }
}
