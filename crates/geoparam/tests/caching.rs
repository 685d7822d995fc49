//! Cache scope behaviour seen through a host module.

use geoparam::prelude::*;
use pretty_assertions::assert_eq;
use std::panic::{catch_unwind, AssertUnwindSafe};

fn layer() -> Linear {
    let mut layer = Linear::new(4, 4, true);
    attach::orthogonal(&mut layer, "weight", OrthogonalConfig::default()).unwrap();
    layer
}

fn is_filled(layer: &Linear) -> bool {
    layer
        .module()
        .parametrization("weight")
        .unwrap()
        .cache()
        .is_filled()
}

#[test]
fn test_reads_outside_a_scope_recompute() {
    let layer = layer();
    let graph = Graph::new();
    let a = layer.module().get(&graph, "weight").unwrap();
    let b = layer.module().get(&graph, "weight").unwrap();
    assert_ne!(a, b);
    assert_eq!(graph.get_value(a), graph.get_value(b));
    assert!(!is_filled(&layer));
}

#[test]
fn test_scope_returns_same_node() {
    let layer = layer();
    let graph = Graph::new();
    let scope = cached(&layer);
    assert_eq!(scope.len(), 1);

    let a = layer.module().get(&graph, "weight").unwrap();
    let b = layer.module().get(&graph, "weight").unwrap();
    assert_eq!(a, b);
    assert!(is_filled(&layer));

    // another graph does not see the first graph's node
    let other = Graph::new();
    let c = layer.module().get(&other, "weight").unwrap();
    assert_eq!(graph.get_value(a), other.get_value(c));

    drop(scope);
    assert!(!is_filled(&layer));
}

#[test]
fn test_gradient_accumulates_through_cached_node() {
    let mut layer = layer();
    let graph = Graph::new();
    let x = graph.constant(Tensor::from_element(&[1, 4], 1.0));
    let loss = with_cache(&mut layer, |layer| {
        let y1 = layer.forward(&graph, x).unwrap();
        let y2 = layer.forward(&graph, y1).unwrap();
        graph.sum(y2)
    });
    let grads = backward(&graph, loss, None);
    assert!(!grads.is_empty());
}

#[test]
fn test_values_change_across_scopes_after_a_step() {
    let mut layer = layer();
    let first = {
        let graph = Graph::new();
        let _scope = cached(&layer);
        let q = layer.module().get(&graph, "weight").unwrap();
        let loss = graph.sum(q);
        let grads = backward(&graph, loss, None);
        let value = graph.get_value(q).unwrap();
        Sgd::new(0.1).step(&graph, &grads, layer.module_mut().parameters_mut());
        value
    };
    let second = {
        let graph = Graph::new();
        let _scope = cached(&layer);
        let q = layer.module().get(&graph, "weight").unwrap();
        graph.get_value(q).unwrap()
    };
    assert!((&first - &second).max_abs() > 1e-6);
}

#[test]
fn test_nested_scopes_keep_the_outer_entry() {
    let layer = layer();
    let graph = Graph::new();
    let outer = cached(&layer);
    let a = layer.module().get(&graph, "weight").unwrap();
    {
        let _inner = cached(&layer);
        assert_eq!(layer.module().get(&graph, "weight").unwrap(), a);
    }
    assert!(is_filled(&layer));
    assert_eq!(layer.module().get(&graph, "weight").unwrap(), a);
    drop(outer);
    assert!(!is_filled(&layer));
}

#[test]
fn test_unwinding_clears_the_cache() {
    let layer = layer();
    let graph = Graph::new();
    let result = catch_unwind(AssertUnwindSafe(|| {
        let _scope = cached(&layer);
        layer.module().get(&graph, "weight").unwrap();
        assert!(is_filled(&layer));
        panic!("forward pass failed");
    }));
    assert!(result.is_err());
    let p = layer.module().parametrization("weight").unwrap();
    assert!(!p.cache().is_active());
    assert!(!p.cache().is_filled());
}

#[test]
fn test_early_return_clears_the_cache() {
    fn forward(layer: &Linear, graph: &Graph) -> geoparam::Result<NodeId> {
        let _scope = cached(layer);
        layer.module().get(graph, "weight")?;
        layer.module().get(graph, "missing")
    }
    let layer = layer();
    let graph = Graph::new();
    assert!(forward(&layer, &graph).is_err());
    assert!(!is_filled(&layer));
}

#[test]
fn test_init_clears_the_entry() {
    let mut layer = layer();
    let graph = Graph::new();
    let _scope = cached(&layer);
    let a = layer.module().get(&graph, "weight").unwrap();
    layer
        .module_mut()
        .parametrization_mut("weight")
        .unwrap()
        .init_(Init::default())
        .unwrap();
    let b = layer.module().get(&graph, "weight").unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_scope_covers_children() {
    let mut root = Module::new();
    root.add_child("first", Module::new()).unwrap();
    let mut child = Module::new();
    child.register_parameter("w", Tensor::zeros(&[3, 3])).unwrap();
    attach::skew(&mut child, "w", true).unwrap();
    root.add_child("second", child).unwrap();
    assert_eq!(cached(&root).len(), 1);
}
