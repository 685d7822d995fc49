//! Backward pass implementation for automatic differentiation.
//!
//! This module implements the backpropagation algorithm to compute
//! gradients through the computation graph.

use crate::graph::{Graph, NodeId};
use crate::tensor::Tensor;
use std::collections::HashMap;

/// Type alias for gradient storage.
pub type GradientMap = HashMap<NodeId, Tensor>;

/// Performs backward pass (backpropagation) through the graph.
///
/// # Arguments
/// * `graph` - The computation graph
/// * `output_node` - The node to compute gradients from
/// * `grad_output` - The initial gradient (ones of the output shape if `None`)
///
/// # Returns
/// A map from node IDs to their gradients. Only nodes that require
/// gradients appear in it, plus the output node itself.
pub fn backward(graph: &Graph, output_node: NodeId, grad_output: Option<Tensor>) -> GradientMap {
    let mut gradients = GradientMap::new();
    let nodes = graph.nodes();
    let Some(output) = nodes.get(output_node.index()) else {
        return gradients;
    };

    let initial_grad =
        grad_output.unwrap_or_else(|| Tensor::from_element(&output.value.shape(), 1.0));
    gradients.insert(output_node, initial_grad);

    // Ids are issued in creation order, so walking them backwards visits
    // every consumer before its inputs.
    for node in nodes[..=output_node.index()].iter().rev() {
        if node.is_leaf() || !node.requires_grad {
            continue;
        }
        let Some(op) = node.op.as_ref() else {
            continue;
        };
        let Some(node_grad) = gradients.get(&node.id) else {
            continue;
        };

        let input_values: Vec<&Tensor> = node
            .inputs
            .iter()
            .map(|id| &nodes[id.index()].value)
            .collect();
        let input_grads = op.backward(node_grad, &input_values, &node.value);

        for (&input_id, grad) in node.inputs.iter().zip(input_grads) {
            if !nodes[input_id.index()].requires_grad {
                continue;
            }
            gradients
                .entry(input_id)
                .and_modify(|g| *g = &*g + &grad)
                .or_insert(grad);
        }
    }

    gradients
}

/// Computes the gradient of a scalar output with respect to specified inputs.
///
/// # Arguments
/// * `graph` - The computation graph
/// * `output_node` - The scalar output node
/// * `input_nodes` - The input nodes to compute gradients for
///
/// # Returns
/// A map containing gradients for the requested input nodes
pub fn grad(graph: &Graph, output_node: NodeId, input_nodes: &[NodeId]) -> GradientMap {
    let mut all_grads = backward(graph, output_node, None);
    input_nodes
        .iter()
        .filter_map(|id| all_grads.remove_entry(id))
        .collect()
}

/// Checks gradients using finite differences.
///
/// This is useful for verifying the correctness of backward implementations.
/// The output must be a scalar node.
///
/// # Arguments
/// * `graph` - The computation graph
/// * `output_node` - The output node
/// * `input_node` - The input node to check gradient for
/// * `epsilon` - Small value for finite differences
///
/// # Returns
/// The maximum relative error between analytical and numerical gradients,
/// or `None` if the input received no gradient.
pub fn check_gradients(
    graph: &Graph,
    output_node: NodeId,
    input_node: NodeId,
    epsilon: f64,
) -> Option<f64> {
    let analytical = grad(graph, output_node, &[input_node]).remove(&input_node)?;
    let original = graph.get_value(input_node)?;

    let mut max_error: f64 = 0.0;
    for k in 0..original.batch_len() {
        for i in 0..original.nrows() {
            for j in 0..original.ncols() {
                let evaluate = |delta: f64| {
                    let mut perturbed = original.clone();
                    perturbed.matrices_mut()[k][(i, j)] += delta;
                    graph.set_value(input_node, perturbed);
                    graph.forward(output_node).map(|t| t.to_scalar())
                };
                let f_plus = evaluate(epsilon)?;
                let f_minus = evaluate(-epsilon)?;

                let numerical = (f_plus - f_minus) / (2.0 * epsilon);
                let exact = analytical.matrices()[k][(i, j)];
                let denom = numerical.abs().max(exact.abs()).max(1.0);
                max_error = max_error.max((numerical - exact).abs() / denom);
            }
        }
    }

    graph.set_value(input_node, original);
    graph.forward(output_node);
    Some(max_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Add, MatMul, Multiply, ReLU, Sum};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backward_single_node() {
        let graph = Graph::new();
        let x = graph.variable(Tensor::from_element(&[2, 2], 3.0));

        let grads = backward(&graph, x, None);

        assert_eq!(grads.len(), 1);
        assert_eq!(grads[&x], Tensor::from_element(&[2, 2], 1.0));
    }

    #[test]
    fn test_backward_chain() {
        let graph = Graph::new();

        // (x + y) * 2
        let x = graph.variable(Tensor::scalar(3.0));
        let y = graph.variable(Tensor::scalar(4.0));
        let two = graph.constant(Tensor::scalar(2.0));

        let sum = graph.apply_op(Box::new(Add), &[x, y]);
        let prod = graph.apply_op(Box::new(Multiply), &[sum, two]);
        assert_eq!(graph.get_value(prod).unwrap().to_scalar(), 14.0);

        let grads = backward(&graph, prod, None);
        assert_eq!(grads[&x].to_scalar(), 2.0);
        assert_eq!(grads[&y].to_scalar(), 2.0);
        assert!(!grads.contains_key(&two));
    }

    #[test]
    fn test_backward_relu() {
        let graph = Graph::new();
        let x = graph.variable(Tensor::from_row_slice(2, 2, &[-1.0, 2.0, -3.0, 4.0]));
        let relu_node = graph.apply_op(Box::new(ReLU), &[x]);

        let grads = backward(&graph, relu_node, Some(Tensor::from_element(&[2, 2], 1.0)));

        let expected = Tensor::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(grads[&x], expected);
    }

    #[test]
    fn test_grad_function() {
        let graph = Graph::new();
        let x = graph.variable(Tensor::scalar(2.0));
        let y = graph.variable(Tensor::scalar(3.0));
        let z = graph.apply_op(Box::new(Add), &[x, y]);

        let grads = grad(&graph, z, &[x]);

        assert_eq!(grads.len(), 1);
        assert!(grads.contains_key(&x));
        assert!(!grads.contains_key(&y));
    }

    #[test]
    fn test_gradient_accumulation() {
        let graph = Graph::new();
        let x = graph.variable(Tensor::scalar(5.0));
        let z = graph.apply_op(Box::new(Add), &[x, x]);

        let grads = backward(&graph, z, None);
        assert_eq!(grads[&x].to_scalar(), 2.0);
    }

    #[test]
    fn test_no_grad_graph_records_nothing() {
        let graph = Graph::no_grad();
        let x = graph.variable(Tensor::scalar(5.0));
        let z = graph.apply_op(Box::new(Add), &[x, x]);

        let grads = backward(&graph, z, None);
        assert!(!grads.contains_key(&x));
    }

    #[test]
    fn test_check_gradients_matmul() {
        let graph = Graph::new();
        let a = graph.variable(Tensor::from_row_slice(2, 3, &[1.0, -2.0, 0.5, 0.3, 0.7, -1.1]));
        let b = graph.variable(Tensor::from_row_slice(3, 2, &[0.2, 1.0, -0.4, 0.6, 2.0, 0.1]));
        let ab = graph.apply_op(Box::new(MatMul), &[a, b]);
        let sq = graph.apply_op(Box::new(Multiply), &[ab, ab]);
        let loss = graph.apply_op(Box::new(Sum), &[sq]);

        let error_a = check_gradients(&graph, loss, a, 1e-6).unwrap();
        let error_b = check_gradients(&graph, loss, b, 1e-6).unwrap();
        assert!(error_a < 1e-6, "error for a: {error_a}");
        assert!(error_b < 1e-6, "error for b: {error_b}");
    }
}
