use smallvec::SmallVec;

use crate::graph::Edge;
use crate::types::NodeId;

use super::value::Value;

/// One slot of a [`Record`].
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Entry {
    /// Nothing bound.
    #[default]
    Unset,
    /// A node.
    Node(NodeId),
    /// An edge.
    Edge(Edge),
    /// A scalar.
    Scalar(Value),
}

/// A row of bindings addressed by slot offset.
///
/// Cloning is cheap: scalar strings and lists are reference counted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    entries: SmallVec<[Entry; 4]>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record with one node bound at `slot`.
    pub fn with_node(slot: usize, node: NodeId) -> Self {
        let mut record = Self::new();
        record.set(slot, Entry::Node(node));
        record
    }

    /// Entry at `slot`; [`Entry::Unset`] beyond the end.
    pub fn get(&self, slot: usize) -> &Entry {
        static UNSET: Entry = Entry::Unset;
        self.entries.get(slot).unwrap_or(&UNSET)
    }

    /// Binds `slot`, growing the record as needed.
    pub fn set(&mut self, slot: usize, entry: Entry) {
        if slot >= self.entries.len() {
            self.entries.resize(slot + 1, Entry::Unset);
        }
        self.entries[slot] = entry;
    }

    /// Node at `slot`, if one is bound there.
    pub fn node(&self, slot: usize) -> Option<NodeId> {
        match self.get(slot) {
            Entry::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Edge at `slot`, if one is bound there.
    pub fn edge(&self, slot: usize) -> Option<&Edge> {
        match self.get(slot) {
            Entry::Edge(edge) => Some(edge),
            _ => None,
        }
    }

    /// Scalar view of `slot` used for ordering. Nodes and edges order by id.
    pub fn value(&self, slot: usize) -> Value {
        match self.get(slot) {
            Entry::Unset => Value::Null,
            Entry::Node(id) => Value::Int(id.0 as i64),
            Entry::Edge(edge) => Value::Int(edge.id.0 as i64),
            Entry::Scalar(value) => value.clone(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no slot exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_grows_and_get_defaults_to_unset() {
        let mut record = Record::new();
        record.set(3, Entry::Scalar(Value::Int(7)));
        assert_eq!(record.len(), 4);
        assert_eq!(record.get(1), &Entry::Unset);
        assert_eq!(record.get(10), &Entry::Unset);
        assert_eq!(record.value(3), Value::Int(7));
        assert!(record.node(3).is_none());
    }

    #[test]
    fn clones_are_independent() {
        let original = Record::with_node(0, NodeId(7));
        let mut copy = original.clone();
        copy.set(1, Entry::Node(NodeId(9)));
        assert_eq!(original.len(), 1);
        assert_eq!(original.node(0), Some(NodeId(7)));
        assert_eq!(copy.node(1), Some(NodeId(9)));
    }
}
