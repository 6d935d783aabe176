#![forbid(unsafe_code)]

//! In-memory property graph backed by one boolean adjacency matrix per relation.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::matrix::{MatrixOptions, ScalarType, TypedMatrix};
use crate::query::Value;
use crate::types::{EdgeId, GraphError, LabelId, NodeId, RelationId, Result};

/// Read access a query needs from graph storage.
///
/// Matrix handles are borrowed from the implementor; callers hold the graph-wide
/// lock for as long as they use them.
pub trait GraphView {
    /// Square dimension every relation and label matrix currently has.
    fn required_matrix_dim(&self) -> u64;
    /// Adjacency matrix of a relation, or its transpose.
    fn relation_matrix(&self, id: RelationId, transposed: bool) -> Result<&TypedMatrix>;
    /// Diagonal membership matrix of a label.
    fn label_matrix(&self, id: LabelId) -> Result<&TypedMatrix>;
    /// Node by id.
    fn node(&self, id: NodeId) -> Option<&Node>;
    /// Ids of all nodes, or of those carrying `label`, ascending.
    fn node_ids(&self, label: Option<LabelId>) -> Vec<NodeId>;
    /// Appends every edge `src -> dst` in the given relations (all relations when empty).
    fn edges_between(&self, src: NodeId, dst: NodeId, relations: &[RelationId], out: &mut Vec<Edge>);
}

/// A stored node.
#[derive(Clone, Debug, Default)]
pub struct Node {
    /// Labels attached to the node.
    pub labels: SmallVec<[LabelId; 2]>,
    /// Scalar properties.
    pub properties: FxHashMap<String, Value>,
}

impl Node {
    /// Property value, `Null` when missing.
    pub fn property(&self, key: &str) -> Value {
        self.properties.get(key).cloned().unwrap_or(Value::Null)
    }
}

/// A stored edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Edge {
    /// Edge id.
    pub id: EdgeId,
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Relation type.
    pub relation: RelationId,
}

/// Graph tuning.
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Matrices grow in multiples of this many nodes.
    pub node_block: u64,
    /// Options given to every relation and label matrix.
    pub matrix: MatrixOptions,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            node_block: 1024,
            matrix: MatrixOptions::default(),
        }
    }
}

impl GraphOptions {
    /// Sets the growth block.
    pub fn node_block(mut self, block: u64) -> Self {
        self.node_block = block.max(1);
        self
    }

    /// Sets the matrix options.
    pub fn matrix(mut self, options: MatrixOptions) -> Self {
        self.matrix = options;
        self
    }
}

#[derive(Clone, Debug)]
struct Relation {
    name: String,
    matrix: TypedMatrix,
    transposed: TypedMatrix,
    pairs: FxHashMap<(u64, u64), SmallVec<[EdgeId; 1]>>,
}

#[derive(Clone, Debug)]
struct Label {
    name: String,
    matrix: TypedMatrix,
}

/// Graph storage: nodes, edges, and their matrices.
#[derive(Clone, Debug)]
pub struct Graph {
    options: GraphOptions,
    dim: u64,
    nodes: Vec<Node>,
    labels: Vec<Label>,
    relations: Vec<Relation>,
    edges: FxHashMap<EdgeId, Edge>,
    next_edge: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(GraphOptions::default())
    }
}

impl Graph {
    /// Creates an empty graph.
    pub fn new(mut options: GraphOptions) -> Self {
        options.node_block = options.node_block.max(1);
        Self {
            dim: options.node_block,
            options,
            nodes: Vec::new(),
            labels: Vec::new(),
            relations: Vec::new(),
            edges: FxHashMap::default(),
            next_edge: 0,
        }
    }

    fn new_matrix(&self) -> Result<TypedMatrix> {
        TypedMatrix::with_options(ScalarType::Bool, self.dim, self.dim, self.options.matrix.clone())
    }

    /// Returns the id of label `name`, registering it on first use.
    pub fn add_label(&mut self, name: &str) -> Result<LabelId> {
        if let Some(id) = self.label_id(name) {
            return Ok(id);
        }
        let matrix = self.new_matrix()?;
        self.labels.push(Label {
            name: name.to_owned(),
            matrix,
        });
        Ok(LabelId((self.labels.len() - 1) as u32))
    }

    /// Returns the id of relation `name`, registering it on first use.
    pub fn add_relation(&mut self, name: &str) -> Result<RelationId> {
        if let Some(id) = self.relation_id(name) {
            return Ok(id);
        }
        let matrix = self.new_matrix()?;
        let transposed = self.new_matrix()?;
        self.relations.push(Relation {
            name: name.to_owned(),
            matrix,
            transposed,
            pairs: FxHashMap::default(),
        });
        Ok(RelationId((self.relations.len() - 1) as u32))
    }

    /// Looks up a label by name.
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.labels
            .iter()
            .position(|label| label.name == name)
            .map(|idx| LabelId(idx as u32))
    }

    /// Looks up a relation by name.
    pub fn relation_id(&self, name: &str) -> Option<RelationId> {
        self.relations
            .iter()
            .position(|rel| rel.name == name)
            .map(|idx| RelationId(idx as u32))
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Creates a node with labels and properties.
    pub fn create_node<I, K>(&mut self, labels: &[LabelId], properties: I) -> Result<NodeId>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for label in labels {
            if label.0 as usize >= self.labels.len() {
                return Err(GraphError::NotFound("label"));
            }
        }
        let id = self.nodes.len() as u64;
        if id >= self.dim {
            let blocks = id / self.options.node_block + 1;
            self.grow(blocks * self.options.node_block)?;
        }
        for label in labels {
            self.labels[label.0 as usize]
                .matrix
                .set_element(true, id, id)?;
        }
        self.nodes.push(Node {
            labels: labels.iter().copied().collect(),
            properties: properties
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        });
        Ok(NodeId(id))
    }

    /// Sets one node property.
    pub fn set_property(&mut self, node: NodeId, key: &str, value: Value) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node.0 as usize)
            .ok_or(GraphError::NotFound("node"))?;
        node.properties.insert(key.to_owned(), value);
        Ok(())
    }

    /// Creates an edge `src -[relation]-> dst`. Parallel edges are allowed.
    pub fn create_edge(&mut self, src: NodeId, dst: NodeId, relation: RelationId) -> Result<EdgeId> {
        let count = self.nodes.len() as u64;
        if src.0 >= count || dst.0 >= count {
            return Err(GraphError::NotFound("node"));
        }
        let rel = self
            .relations
            .get_mut(relation.0 as usize)
            .ok_or(GraphError::NotFound("relation"))?;
        rel.matrix.set_element(true, src.0, dst.0)?;
        rel.transposed.set_element(true, dst.0, src.0)?;
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        rel.pairs.entry((src.0, dst.0)).or_default().push(id);
        self.edges.insert(
            id,
            Edge {
                id,
                src,
                dst,
                relation,
            },
        );
        Ok(id)
    }

    /// Deletes an edge. The matrix entry goes away with the last edge of its pair.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<bool> {
        let Some(edge) = self.edges.remove(&id) else {
            return Ok(false);
        };
        let rel = self
            .relations
            .get_mut(edge.relation.0 as usize)
            .ok_or(GraphError::ContractViolation("edge with unknown relation"))?;
        let key = (edge.src.0, edge.dst.0);
        let emptied = match rel.pairs.get_mut(&key) {
            Some(ids) => {
                ids.retain(|existing| *existing != id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            rel.pairs.remove(&key);
            rel.matrix.remove_element(edge.src.0, edge.dst.0)?;
            rel.transposed.remove_element(edge.dst.0, edge.src.0)?;
        }
        Ok(true)
    }

    /// Commits every matrix. Run before handing the graph to readers so queries see
    /// canonical storage.
    pub fn sync(&mut self) -> Result<()> {
        for rel in &mut self.relations {
            rel.matrix.wait()?;
            rel.transposed.wait()?;
        }
        for label in &mut self.labels {
            label.matrix.wait()?;
        }
        Ok(())
    }

    fn grow(&mut self, dim: u64) -> Result<()> {
        debug!(from = self.dim, to = dim, "graph matrices growing");
        for rel in &mut self.relations {
            rel.matrix.resize(dim, dim)?;
            rel.transposed.resize(dim, dim)?;
        }
        for label in &mut self.labels {
            label.matrix.resize(dim, dim)?;
        }
        self.dim = dim;
        Ok(())
    }
}

impl GraphView for Graph {
    fn required_matrix_dim(&self) -> u64 {
        self.dim
    }

    fn relation_matrix(&self, id: RelationId, transposed: bool) -> Result<&TypedMatrix> {
        let rel = self
            .relations
            .get(id.0 as usize)
            .ok_or(GraphError::NotFound("relation"))?;
        Ok(if transposed {
            &rel.transposed
        } else {
            &rel.matrix
        })
    }

    fn label_matrix(&self, id: LabelId) -> Result<&TypedMatrix> {
        self.labels
            .get(id.0 as usize)
            .map(|label| &label.matrix)
            .ok_or(GraphError::NotFound("label"))
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    fn node_ids(&self, label: Option<LabelId>) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| label.map_or(true, |l| node.labels.contains(&l)))
            .map(|(idx, _)| NodeId(idx as u64))
            .collect()
    }

    fn edges_between(&self, src: NodeId, dst: NodeId, relations: &[RelationId], out: &mut Vec<Edge>) {
        let key = (src.0, dst.0);
        for (idx, rel) in self.relations.iter().enumerate() {
            let id = RelationId(idx as u32);
            if !relations.is_empty() && !relations.contains(&id) {
                continue;
            }
            if let Some(ids) = rel.pairs.get(&key) {
                out.extend(ids.iter().filter_map(|edge| self.edges.get(edge)).copied());
            }
        }
    }
}

/// A graph behind one graph-wide reader/writer lock.
///
/// Read-only queries hold the read guard for their whole execution; writers take
/// the write guard, and matrices are only mutated under it.
#[derive(Clone, Debug, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<Graph>>,
}

impl SharedGraph {
    /// Wraps a graph.
    pub fn new(graph: Graph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Acquires the shared read guard.
    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.inner.read()
    }

    /// Acquires the exclusive write guard.
    pub fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Scalar;

    fn no_props() -> Vec<(String, Value)> {
        Vec::new()
    }

    #[test]
    fn edges_populate_matrix_and_transpose() {
        let mut g = Graph::default();
        let knows = g.add_relation("knows").unwrap();
        let a = g.create_node(&[], no_props()).unwrap();
        let b = g.create_node(&[], no_props()).unwrap();
        g.create_edge(a, b, knows).unwrap();
        assert_eq!(
            g.relation_matrix(knows, false).unwrap().extract_element(0, 1).unwrap(),
            Some(Scalar::Bool(true))
        );
        assert_eq!(
            g.relation_matrix(knows, true).unwrap().extract_element(1, 0).unwrap(),
            Some(Scalar::Bool(true))
        );
    }

    #[test]
    fn parallel_edges_share_one_entry() {
        let mut g = Graph::default();
        let knows = g.add_relation("knows").unwrap();
        let a = g.create_node(&[], no_props()).unwrap();
        let b = g.create_node(&[], no_props()).unwrap();
        let e1 = g.create_edge(a, b, knows).unwrap();
        let e2 = g.create_edge(a, b, knows).unwrap();
        let mut out = Vec::new();
        g.edges_between(a, b, &[], &mut out);
        assert_eq!(out.len(), 2);

        g.sync().unwrap();
        assert!(g.delete_edge(e1).unwrap());
        assert!(g.relation_matrix(knows, false).unwrap().extract_element(0, 1).unwrap().is_some());
        assert!(g.delete_edge(e2).unwrap());
        assert!(g.relation_matrix(knows, false).unwrap().extract_element(0, 1).unwrap().is_none());
        assert!(!g.delete_edge(e2).unwrap());
    }

    #[test]
    fn matrices_grow_in_blocks() {
        let mut g = Graph::new(GraphOptions::default().node_block(4));
        let person = g.add_label("Person").unwrap();
        let knows = g.add_relation("knows").unwrap();
        let mut ids = Vec::new();
        for _ in 0..9 {
            ids.push(g.create_node(&[person], no_props()).unwrap());
        }
        assert_eq!(g.required_matrix_dim(), 12);
        g.create_edge(ids[8], ids[0], knows).unwrap();
        assert_eq!(g.relation_matrix(knows, false).unwrap().nrows(), 12);
        assert_eq!(g.node_ids(Some(person)).len(), 9);
        assert_eq!(
            g.label_matrix(person).unwrap().extract_element(8, 8).unwrap(),
            Some(Scalar::Bool(true))
        );
    }

    #[test]
    fn unknown_endpoints_are_rejected() {
        let mut g = Graph::default();
        let knows = g.add_relation("knows").unwrap();
        let a = g.create_node(&[], no_props()).unwrap();
        assert_eq!(g.create_edge(a, NodeId(5), knows), Err(GraphError::NotFound("node")));
        assert_eq!(
            g.create_edge(a, a, RelationId(3)),
            Err(GraphError::NotFound("relation"))
        );
    }
}
