//! Integration tests for geoparam-manifolds
//!
//! These tests check the properties every manifold map must have: samples
//! and arbitrary ambient inputs land on the manifold, gradient steps on the
//! ambient tensors never leave it, invalid sizes are rejected up front and
//! initialization to a point on the manifold reproduces that point.

use geoparam_autodiff::{backward, Graph, Parameter, Sgd, Tensor};
use geoparam_core::numerical::sorted_svd;
use geoparam_core::{
    BaseMode, BoundedMap, Coordinates, ManifoldMap, OrthogonalConfig, PositiveMap, SampleInit,
    SphereConfig, Trivialization,
};
use geoparam_manifolds::utils::{gaussian, sample_batch};
use geoparam_manifolds::{
    AlmostOrthogonal, FixedRank, Grassmannian, LowRank, PositiveSemidefinite, Product, Skew,
    Sphere, SphereEmbedded, Stiefel, Symmetric,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

fn gaussian_init() -> SampleInit {
    SampleInit::custom(|shape, rng| {
        let n = shape.len();
        let (rows, cols) = (shape[n - 2], shape[n - 1]);
        sample_batch(shape, rng, |rng| gaussian(rows, cols, rng))
    })
}

/// One instance of every manifold at `dims` (square where required).
fn all_maps(rows: usize, cols: usize) -> Vec<Arc<dyn ManifoldMap>> {
    let n = rows.min(cols);
    let config = OrthogonalConfig::default();
    let cayley = config.with_triv(Trivialization::Cayley);
    let rank = n.div_ceil(2);
    vec![
        Arc::new(Skew::new(&[n, n], true).unwrap()),
        Arc::new(Symmetric::new(&[n, n], false).unwrap()),
        Arc::new(Stiefel::new(&[rows, cols], config).unwrap()),
        Arc::new(Stiefel::new(&[rows, cols], cayley).unwrap()),
        Arc::new(Grassmannian::new(&[rows, cols], config).unwrap()),
        Arc::new(Sphere::new(&[rows, cols], SphereConfig::default().with_radius(1.5)).unwrap()),
        Arc::new(SphereEmbedded::new(&[rows, cols], 1.0).unwrap()),
        Arc::new(LowRank::new(&[rows, cols], rank, config).unwrap()),
        Arc::new(FixedRank::new(&[rows, cols], rank, PositiveMap::default(), config).unwrap()),
        Arc::new(
            AlmostOrthogonal::new(&[rows, cols], 0.25, BoundedMap::Tanh, cayley).unwrap(),
        ),
        Arc::new(
            PositiveSemidefinite::new(&[n, n], Some(rank), PositiveMap::default(), config).unwrap(),
        ),
    ]
}

#[test]
fn test_uniform_samples_are_on_manifold() {
    let mut rng = StdRng::seed_from_u64(0);
    for (rows, cols) in [(1, 1), (3, 3), (5, 2), (2, 5)] {
        for map in all_maps(rows, cols) {
            let coords = map.sample(&SampleInit::Uniform, &mut rng).unwrap();
            coords.check_shapes(map.as_ref()).unwrap();
            let point = map.evaluate(&coords).unwrap();
            assert!(
                map.in_manifold(&point, 1e-6),
                "{} at {rows}x{cols}",
                map.name()
            );
        }
    }
}

#[test]
fn test_batched_sizes() {
    let mut rng = StdRng::seed_from_u64(1);
    let maps: Vec<Arc<dyn ManifoldMap>> = vec![
        Arc::new(Stiefel::new(&[2, 3, 4, 2], OrthogonalConfig::default()).unwrap()),
        Arc::new(FixedRank::new(&[3, 4, 3], 2, PositiveMap::default(), OrthogonalConfig::default()).unwrap()),
        Arc::new(Sphere::new(&[4, 1, 3], SphereConfig::default()).unwrap()),
    ];
    for map in maps {
        let point = map.evaluate(&map.sample(&gaussian_init(), &mut rng).unwrap()).unwrap();
        assert_eq!(point.shape(), map.size().dims());
        assert!(map.in_manifold(&point, 1e-6), "{}", map.name());
    }
}

#[test]
fn test_invalid_sizes_are_configuration_errors() {
    let config = OrthogonalConfig::default();
    let errors = [
        Skew::new(&[3, 4], true).unwrap_err(),
        Symmetric::new(&[4], true).unwrap_err(),
        Stiefel::new(&[3], config).unwrap_err(),
        Stiefel::new(&[3, 0], config).unwrap_err(),
        LowRank::new(&[3, 4], 4, config).unwrap_err(),
        FixedRank::new(&[6, 4], 5, PositiveMap::default(), config).unwrap_err(),
        FixedRank::new(&[6, 4], 0, PositiveMap::default(), config).unwrap_err(),
        FixedRank::new(&[6, 4], 2, PositiveMap::Squared { epsilon: 0.0 }, config).unwrap_err(),
        FixedRank::new(&[6, 4], 2, PositiveMap::Softplus { epsilon: -1.0 }, config).unwrap_err(),
        AlmostOrthogonal::new(&[3, 3], 2.0, BoundedMap::Sin, config).unwrap_err(),
        PositiveSemidefinite::new(&[3, 4], None, PositiveMap::default(), config).unwrap_err(),
        Sphere::new(&[2, 3], SphereConfig::default().with_radius(0.0)).unwrap_err(),
        Product::new(Vec::new()).unwrap_err(),
    ];
    for err in errors {
        assert!(err.is_configuration(), "{err}");
    }
}

#[test]
fn test_sgd_steps_stay_on_manifold() {
    let mut rng = StdRng::seed_from_u64(2);
    for map in all_maps(4, 3) {
        let coords = map.sample(&SampleInit::Uniform, &mut rng).unwrap();
        let mut params: Vec<Parameter> = coords.ambient.into_iter().map(Parameter::new).collect();
        let bases = coords.bases;
        let mut sgd = Sgd::new(0.05);
        let weights = Tensor::from_fn(map.size().dims(), |_| {
            nalgebra::DMatrix::from_fn(map.size().rows(), map.size().cols(), |i, j| {
                1.0 + (i as f64) - 0.5 * (j as f64)
            })
        });

        for _ in 0..5 {
            let graph = Graph::new();
            let ambient: Vec<_> = params.iter().map(|p| graph.parameter(p)).collect();
            let base_nodes: Vec<_> = bases.iter().map(|b| graph.constant(b.clone())).collect();
            let point = map.forward(&graph, &ambient, &base_nodes);
            let w = graph.constant(weights.clone());
            let loss = graph.sum(graph.mul(graph.square(point), w));
            let grads = backward(&graph, loss, None);
            sgd.step(&graph, &grads, params.iter_mut());
        }

        let coords = Coordinates::new(
            params.iter().map(|p| p.value().clone()).collect(),
            bases.clone(),
        );
        let point = map.evaluate(&coords).unwrap();
        assert!(map.in_manifold(&point, 1e-6), "{} left its manifold", map.name());
    }
}

#[test]
fn test_orthogonal_scenario() {
    let mut rng = StdRng::seed_from_u64(3);
    let map = Stiefel::new(&[4, 4], OrthogonalConfig::default()).unwrap();
    let coords = map.sample(&gaussian_init(), &mut rng).unwrap();
    let mut x = Parameter::new(coords.ambient[0].clone());
    let base = coords.bases[0].clone();

    let orthogonality = |q: &Tensor| {
        let q = q.matrix();
        (q.transpose() * q - nalgebra::DMatrix::<f64>::identity(4, 4)).amax()
    };

    let graph = Graph::new();
    let xn = graph.parameter(&x);
    let bn = graph.constant(base.clone());
    let q = map.forward(&graph, &[xn], &[bn]);
    assert!(orthogonality(&graph.get_value(q).unwrap()) < 1e-5);
    let loss = graph.sum(q);
    let grads = backward(&graph, loss, None);
    assert_eq!(Sgd::new(0.1).step(&graph, &grads, [&mut x]), 1);

    let q = map
        .evaluate(&Coordinates::new(vec![x.value().clone()], vec![base]))
        .unwrap();
    assert!(orthogonality(&q) < 1e-5);
}

#[test]
fn test_fixed_rank_scenario() {
    let map = FixedRank::new(&[6, 4], 2, PositiveMap::default(), OrthogonalConfig::default())
        .unwrap();
    let mut rng = StdRng::seed_from_u64(4);
    for _ in 0..10 {
        let coords = map.sample(&gaussian_init(), &mut rng).unwrap();
        let point = map.evaluate(&coords).unwrap();
        let svd = sorted_svd(point.matrix()).unwrap();
        assert!(svd.singular_values[2] < 1e-10);
        assert!(svd.singular_values[3] < 1e-10);
        assert!(svd.singular_values[1] > 0.0);
    }
}

#[test]
fn test_fixed_rank_survives_collapsing_singular_parameters() {
    let mut rng = StdRng::seed_from_u64(14);
    for name in ["softplus", "squared"] {
        let f: PositiveMap = name.parse().unwrap();
        let map = FixedRank::new(&[6, 4], 2, f, OrthogonalConfig::default()).unwrap();
        for value in [0.0, -1e3] {
            let mut coords = map.sample(&gaussian_init(), &mut rng).unwrap();
            coords.ambient[1] = Tensor::from_element(&[2, 1], value);
            let point = map.evaluate(&coords).unwrap();
            assert!(map.in_manifold(&point, 1e-6), "{name} at s = {value}");
            let svd = sorted_svd(point.matrix()).unwrap();
            assert!(svd.singular_values[1] > 0.0, "{name} at s = {value}");
            assert!(svd.singular_values[2] < 1e-10);
        }
    }
}

#[test]
fn test_right_inverse_round_trips() {
    let mut rng = StdRng::seed_from_u64(5);
    for (rows, cols) in [(3, 3), (4, 2), (2, 4)] {
        for map in all_maps(rows, cols) {
            let target = map
                .evaluate(&map.sample(&gaussian_init(), &mut rng).unwrap())
                .unwrap();
            let coords = map.right_inverse(&target, 1e-6).unwrap();
            let again = map.evaluate(&coords).unwrap();
            let error = (&again - &target).max_abs();
            assert!(error < 1e-8, "{} at {rows}x{cols}: {error:e}", map.name());
        }
    }
}

#[test]
fn test_dynamic_base_keeps_point_and_resets_ambient() {
    let config = OrthogonalConfig::default().with_base_mode(BaseMode::Dynamic);
    let maps: Vec<Arc<dyn ManifoldMap>> = vec![
        Arc::new(Stiefel::new(&[5, 3], config).unwrap()),
        Arc::new(Grassmannian::new(&[5, 3], config).unwrap()),
        Arc::new(LowRank::new(&[5, 3], 2, config).unwrap()),
        Arc::new(
            Sphere::new(&[2, 3], SphereConfig::default().with_base_mode(BaseMode::Dynamic)).unwrap(),
        ),
        Arc::new(
            Product::new(vec![
                Arc::new(Stiefel::new(&[3, 3], config).unwrap()) as Arc<dyn ManifoldMap>,
                Arc::new(Skew::new(&[2, 2], true).unwrap()),
            ])
            .unwrap(),
        ),
    ];
    let mut rng = StdRng::seed_from_u64(6);
    for map in maps {
        assert_eq!(map.base_mode(), BaseMode::Dynamic);
        let mut coords = map.sample(&gaussian_init(), &mut rng).unwrap();
        let before = map.evaluate(&coords).unwrap();
        map.update_base(&mut coords).unwrap();
        let after = map.evaluate(&coords).unwrap();
        assert!((&after - &before).max_abs() < 1e-10, "{}", map.name());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_ambient_is_on_manifold(seed in any::<u64>(), rows in 1usize..5, cols in 1usize..5) {
        let mut rng = StdRng::seed_from_u64(seed);
        for map in all_maps(rows, cols) {
            let coords = map.sample(&gaussian_init(), &mut rng).unwrap();
            let point = map.evaluate(&coords).unwrap();
            prop_assert!(map.in_manifold(&point, 1e-6), "{} at {}x{}", map.name(), rows, cols);
        }
    }

    #[test]
    fn prop_low_rank_never_exceeds_rank(seed in any::<u64>(), rank in 1usize..4) {
        let mut rng = StdRng::seed_from_u64(seed);
        let map = LowRank::new(&[5, 4], rank, OrthogonalConfig::default()).unwrap();
        let point = map.evaluate(&map.sample(&gaussian_init(), &mut rng).unwrap()).unwrap();
        let svd = sorted_svd(point.matrix()).unwrap();
        prop_assert!(svd.singular_values.iter().skip(rank).all(|&s| s < 1e-9));
    }
}
