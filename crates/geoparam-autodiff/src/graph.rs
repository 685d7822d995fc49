//! Computation graph for automatic differentiation.
//!
//! The graph is eager: every operation is evaluated when it is recorded, so
//! node values are always available. Node ids are handed out sequentially,
//! which makes id order a valid topological order.

use crate::backward::GradientMap;
use crate::ops::Op;
use crate::tensor::Tensor;
use std::cell::{Cell, Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for nodes in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in its graph.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node{}", self.0)
    }
}

/// Process-unique identifier of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

/// Process-unique identifier of a trainable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Param{}", self.0)
    }
}

/// An owned trainable tensor.
///
/// Parameters live outside any graph. [`Graph::parameter`] binds a parameter
/// to a leaf node; reading the same parameter twice in one graph yields the
/// same leaf so gradients accumulate in one place.
#[derive(Debug)]
pub struct Parameter {
    id: ParamId,
    value: Tensor,
    name: Option<String>,
    requires_grad: bool,
}

impl Parameter {
    /// Creates a trainable parameter with a fresh id.
    pub fn new(value: Tensor) -> Self {
        Self {
            id: ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed)),
            value,
            name: None,
            requires_grad: true,
        }
    }

    /// Sets the name of the parameter.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets whether the parameter receives gradients.
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    /// The parameter id.
    pub fn id(&self) -> ParamId {
        self.id
    }

    /// Current value.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Mutable access to the value.
    pub fn value_mut(&mut self) -> &mut Tensor {
        &mut self.value
    }

    /// Replaces the value, keeping the id.
    pub fn set_value(&mut self, value: Tensor) {
        self.value = value;
    }

    /// Optional name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the parameter receives gradients.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Shape of the value.
    pub fn shape(&self) -> Vec<usize> {
        self.value.shape()
    }
}

/// A node in the computation graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    /// The value computed at this node
    pub value: Tensor,
    /// The operation that produced this node
    pub op: Option<Box<dyn Op>>,
    /// Input nodes to this operation
    pub inputs: Vec<NodeId>,
    /// Whether this node requires gradient
    pub requires_grad: bool,
    /// Optional name for debugging
    pub name: Option<String>,
}

impl Node {
    /// Checks if this node is a leaf (has no operation).
    pub fn is_leaf(&self) -> bool {
        self.op.is_none()
    }
}

/// The computation graph structure.
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    nodes: RefCell<Vec<Node>>,
    params: RefCell<HashMap<ParamId, NodeId>>,
    track_gradients: Cell<bool>,
}

impl Graph {
    /// Creates a new empty computation graph.
    pub fn new() -> Self {
        Self::with_tracking(true)
    }

    /// Creates a new graph with gradient tracking disabled.
    pub fn no_grad() -> Self {
        Self::with_tracking(false)
    }

    fn with_tracking(track_gradients: bool) -> Self {
        Self {
            id: GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)),
            nodes: RefCell::new(Vec::new()),
            params: RefCell::new(HashMap::new()),
            track_gradients: Cell::new(track_gradients),
        }
    }

    /// Process-unique id of this graph.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Whether new nodes currently record gradient requirements.
    pub fn is_tracking(&self) -> bool {
        self.track_gradients.get()
    }

    /// Suspends gradient tracking until the returned guard is dropped.
    pub fn no_grad_scope(&self) -> NoGradGuard<'_> {
        let previous = self.track_gradients.replace(false);
        NoGradGuard {
            graph: self,
            previous,
        }
    }

    fn push(&self, mut node: Node) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId(nodes.len());
        node.id = id;
        nodes.push(node);
        id
    }

    fn leaf(&self, value: Tensor, requires_grad: bool, name: Option<String>) -> NodeId {
        self.push(Node {
            id: NodeId(0),
            value,
            op: None,
            inputs: Vec::new(),
            requires_grad,
            name,
        })
    }

    /// Creates a new variable (input node) in the graph.
    pub fn variable(&self, value: Tensor) -> NodeId {
        self.leaf(value, self.is_tracking(), None)
    }

    /// Creates a new variable with a name.
    pub fn named_variable(&self, value: Tensor, name: impl Into<String>) -> NodeId {
        self.leaf(value, self.is_tracking(), Some(name.into()))
    }

    /// Creates a constant (non-differentiable) node in the graph.
    pub fn constant(&self, value: Tensor) -> NodeId {
        self.leaf(value, false, None)
    }

    /// Binds `param` to its leaf node, creating the leaf on first use.
    ///
    /// A leaf created while tracking was suspended is replaced once tracking
    /// resumes, so later reads still reach the parameter's gradient.
    pub fn parameter(&self, param: &Parameter) -> NodeId {
        let wants_grad = self.is_tracking() && param.requires_grad();
        if let Some(&id) = self.params.borrow().get(&param.id()) {
            if !wants_grad || self.nodes.borrow()[id.0].requires_grad {
                return id;
            }
        }
        let id = self.leaf(param.value().clone(), wants_grad, param.name.clone());
        self.params.borrow_mut().insert(param.id(), id);
        id
    }

    /// Leaf node bound to `param`, if it was read in this graph.
    pub fn param_node(&self, param: &Parameter) -> Option<NodeId> {
        self.params.borrow().get(&param.id()).copied()
    }

    /// Gradient of `param` in `grads`, if any reached it.
    pub fn grad_of<'g>(&self, grads: &'g GradientMap, param: &Parameter) -> Option<&'g Tensor> {
        self.param_node(param).and_then(|id| grads.get(&id))
    }

    /// Records `op` applied to `inputs` and evaluates it.
    ///
    /// # Panics
    /// Panics if an input id does not belong to this graph.
    pub fn apply_op(&self, op: Box<dyn Op>, inputs: &[NodeId]) -> NodeId {
        let (value, requires_grad) = {
            let nodes = self.nodes.borrow();
            let values: Vec<&Tensor> = inputs.iter().map(|id| &nodes[id.0].value).collect();
            let requires_grad =
                self.is_tracking() && inputs.iter().any(|id| nodes[id.0].requires_grad);
            (op.forward(&values), requires_grad)
        };
        self.push(Node {
            id: NodeId(0),
            value,
            op: Some(op),
            inputs: inputs.to_vec(),
            requires_grad,
            name: None,
        })
    }

    /// Borrows the node table.
    pub fn nodes(&self) -> Ref<'_, Vec<Node>> {
        self.nodes.borrow()
    }

    /// Gets the value of a node.
    pub fn get_value(&self, id: NodeId) -> Option<Tensor> {
        self.nodes.borrow().get(id.0).map(|node| node.value.clone())
    }

    /// Shape of a node's value.
    pub fn shape(&self, id: NodeId) -> Option<Vec<usize>> {
        self.nodes.borrow().get(id.0).map(|node| node.value.shape())
    }

    /// Whether gradients flow into a node.
    pub fn requires_grad(&self, id: NodeId) -> bool {
        self.nodes
            .borrow()
            .get(id.0)
            .is_some_and(|node| node.requires_grad)
    }

    /// Sets the value of a node. Dependent nodes keep their old values until
    /// [`Graph::forward`] recomputes them.
    pub fn set_value(&self, id: NodeId, value: Tensor) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(id.0) {
            node.value = value;
        }
    }

    /// Recomputes every ancestor of `target` and returns its value.
    pub fn forward(&self, target: NodeId) -> Option<Tensor> {
        let ancestors = self.ancestors(target)?;
        let mut nodes = self.nodes.borrow_mut();
        for index in 0..=target.0 {
            if !ancestors.contains(&index) {
                continue;
            }
            let recomputed = {
                let node = &nodes[index];
                node.op.as_ref().map(|op| {
                    let values: Vec<&Tensor> =
                        node.inputs.iter().map(|id| &nodes[id.0].value).collect();
                    op.forward(&values)
                })
            };
            if let Some(value) = recomputed {
                nodes[index].value = value;
            }
        }
        Some(nodes[target.0].value.clone())
    }

    fn ancestors(&self, target: NodeId) -> Option<HashSet<usize>> {
        let nodes = self.nodes.borrow();
        nodes.get(target.0)?;
        let mut seen = HashSet::new();
        let mut stack = vec![target.0];
        while let Some(index) = stack.pop() {
            if seen.insert(index) {
                stack.extend(nodes[index].inputs.iter().map(|id| id.0));
            }
        }
        Some(seen)
    }

    /// Gets all nodes in topological order.
    pub fn topological_order(&self) -> Vec<NodeId> {
        (0..self.num_nodes()).map(NodeId).collect()
    }

    /// Returns the number of nodes in the graph.
    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previous tracking state of a graph on drop.
#[derive(Debug)]
pub struct NoGradGuard<'a> {
    graph: &'a Graph,
    previous: bool,
}

impl Drop for NoGradGuard<'_> {
    fn drop(&mut self) {
        self.graph.track_gradients.set(self.previous);
    }
}
