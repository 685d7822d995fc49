//! Bindings between a named tensor and a pipeline of manifold maps.
//!
//! A [`Parametrization`] owns the ambient parameters of its first map and
//! the base points of every stage. Reading it records
//!
//! ```text
//!     point = fₖ(… f₂(f₁(ambient; bases₁); bases₂) …; basesₖ)
//! ```
//!
//! on the caller's graph. Stages after the first take the previous stage's
//! output as their single ambient input.

use crate::cache::ScopedCache;
use crate::error::{ParametrizeError, Result};
use geoparam_autodiff::{Graph, NodeId, Parameter, Tensor};
use geoparam_core::{constants, Coordinates, ManifoldError, ManifoldMap, SampleInit};
use rand::RngCore;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// What to initialize a parametrization to.
#[derive(Debug, Clone)]
pub enum Init {
    /// The given point, which must lie on the manifold.
    Target(Tensor),
    /// A random point.
    Sample(SampleInit),
}

impl Default for Init {
    fn default() -> Self {
        Self::Sample(SampleInit::Uniform)
    }
}

#[derive(Debug)]
struct Stage {
    map: Arc<dyn ManifoldMap>,
    bases: Vec<Tensor>,
}

/// A manifold constraint bound to one attribute of a module.
#[derive(Debug)]
pub struct Parametrization {
    name: String,
    stages: Vec<Stage>,
    ambient: Vec<Parameter>,
    cache: Rc<ScopedCache>,
}

impl Parametrization {
    /// Binds `map` to the attribute `name` currently holding `value`.
    ///
    /// `value` is kept when the map can reproduce it; otherwise the map is
    /// sampled uniformly.
    pub(crate) fn new(
        name: &str,
        map: Arc<dyn ManifoldMap>,
        value: &Tensor,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        if value.shape() != map.size().dims() {
            return Err(ParametrizeError::shape_mismatch(
                name,
                map.size().dims(),
                &value.shape(),
            ));
        }
        let coords = match map.right_inverse(value, constants::DEFAULT_TOLERANCE) {
            Ok(coords) => coords,
            Err(err) => {
                debug!(attribute = name, manifold = map.name(), %err, "initial value not kept, sampling");
                map.sample(&SampleInit::Uniform, rng)?
            }
        };
        coords.check_shapes(map.as_ref())?;
        let ambient = coords
            .ambient
            .into_iter()
            .enumerate()
            .map(|(i, tensor)| Parameter::new(tensor).with_name(format!("{name}.ambient.{i}")))
            .collect();
        debug!(attribute = name, manifold = map.name(), size = %map.size(), "registered parametrization");
        Ok(Self {
            name: name.to_string(),
            stages: vec![Stage {
                map,
                bases: coords.bases,
            }],
            ambient,
            cache: ScopedCache::new(),
        })
    }

    /// Name of the attribute.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The maps of the pipeline, in application order.
    pub fn maps(&self) -> impl Iterator<Item = &Arc<dyn ManifoldMap>> {
        self.stages.iter().map(|stage| &stage.map)
    }

    /// The last map of the pipeline.
    pub fn manifold(&self) -> &Arc<dyn ManifoldMap> {
        &self.last().map
    }

    /// Shape of the produced point.
    pub fn shape(&self) -> &[usize] {
        self.last().map.size().dims()
    }

    /// Trainable tensors of the first map.
    pub fn ambient(&self) -> &[Parameter] {
        &self.ambient
    }

    /// Mutable access for optimizers.
    pub fn ambient_mut(&mut self) -> &mut [Parameter] {
        &mut self.ambient
    }

    /// Base points of stage `index`.
    pub fn bases(&self, index: usize) -> Option<&[Tensor]> {
        self.stages.get(index).map(|stage| stage.bases.as_slice())
    }

    /// Cache state of this binding.
    pub fn cache(&self) -> &ScopedCache {
        &self.cache
    }

    pub(crate) fn shared_cache(&self) -> Rc<ScopedCache> {
        Rc::clone(&self.cache)
    }

    fn last(&self) -> &Stage {
        // a parametrization always has at least its first stage
        &self.stages[self.stages.len() - 1]
    }

    /// Whether `map` is one of the pipeline's maps.
    pub(crate) fn contains(&self, map: &Arc<dyn ManifoldMap>) -> bool {
        self.stages.iter().any(|stage| Arc::ptr_eq(&stage.map, map))
    }

    /// Appends `map`, whose single ambient input must have the shape of the
    /// current output.
    pub(crate) fn push(&mut self, map: Arc<dyn ManifoldMap>) -> Result<()> {
        let expected = vec![self.shape().to_vec()];
        let shapes = map.ambient_shapes();
        if shapes != expected {
            let actual = shapes.into_iter().flatten().collect::<Vec<_>>();
            return Err(ParametrizeError::shape_mismatch(
                &self.name,
                &expected[0],
                &actual,
            ));
        }
        debug!(attribute = %self.name, manifold = map.name(), "chained parametrization");
        let bases = map.initial_bases();
        self.stages.push(Stage { map, bases });
        self.cache.clear();
        Ok(())
    }

    /// Records the pipeline on `graph` and returns the produced point.
    ///
    /// Inside a cache scope the node is computed once per graph.
    pub fn forward(&self, graph: &Graph) -> NodeId {
        if let Some(node) = self.cache.lookup(graph) {
            trace!(attribute = %self.name, "cache hit");
            return node;
        }
        let node = self.record(graph);
        self.cache.store(graph, node);
        node
    }

    fn record(&self, graph: &Graph) -> NodeId {
        let mut inputs: Vec<NodeId> = self.ambient.iter().map(|p| graph.parameter(p)).collect();
        for stage in &self.stages {
            let bases: Vec<NodeId> = stage
                .bases
                .iter()
                .map(|b| graph.constant(b.clone()))
                .collect();
            inputs = vec![stage.map.forward(graph, &inputs, &bases)];
        }
        inputs[0]
    }

    /// Current point, evaluated without gradient tracking and without
    /// touching the cache.
    pub fn value(&self) -> Result<Tensor> {
        let graph = Graph::no_grad();
        let node = self.record(&graph);
        graph
            .get_value(node)
            .ok_or_else(|| ManifoldError::numerical_error("pipeline produced no value").into())
    }

    /// Initializes with the thread-local generator.
    pub fn init_(&mut self, init: Init) -> Result<()> {
        self.init_with_rng(init, &mut rand::thread_rng())
    }

    /// Initializes to a target point or to a fresh sample.
    ///
    /// A sample is drawn from the last map and pulled back through the
    /// earlier ones. Nothing changes when any stage fails.
    pub fn init_with_rng(&mut self, init: Init, rng: &mut dyn RngCore) -> Result<()> {
        let last = self.last();
        let mut coords = match init {
            Init::Target(target) => {
                if target.shape() != self.shape() {
                    return Err(ParametrizeError::shape_mismatch(
                        &self.name,
                        self.shape(),
                        &target.shape(),
                    ));
                }
                last.map.right_inverse(&target, constants::DEFAULT_TOLERANCE)?
            }
            Init::Sample(init) => last.map.sample(&init, rng)?,
        };

        let mut per_stage = Vec::with_capacity(self.stages.len());
        for stage in self.stages[..self.stages.len() - 1].iter().rev() {
            let input = coords.ambient[0].clone();
            let previous = stage.map.right_inverse(&input, constants::DEFAULT_TOLERANCE)?;
            per_stage.push(coords.bases);
            coords = previous;
        }
        per_stage.push(coords.bases);
        per_stage.reverse();

        for (stage, bases) in self.stages.iter_mut().zip(per_stage) {
            stage.bases = bases;
        }
        for (param, tensor) in self.ambient.iter_mut().zip(coords.ambient) {
            param.set_value(tensor);
        }
        self.cache.clear();
        debug!(attribute = %self.name, "initialized parametrization");
        Ok(())
    }

    /// Initializes to block-diagonal rotations with uniform angles.
    pub fn torus_init_(&mut self) -> Result<()> {
        self.init_(Init::Sample(SampleInit::Torus))
    }

    /// Moves the base of the first map to the current point and zeroes the
    /// ambient tensors. The produced point does not change.
    ///
    /// Later stages read their input from the previous stage, so only the
    /// first stage is recentred.
    pub fn update_base(&mut self) -> Result<()> {
        let stage = &mut self.stages[0];
        let mut coords = Coordinates::new(
            self.ambient.iter().map(|p| p.value().clone()).collect(),
            std::mem::take(&mut stage.bases),
        );
        let result = stage.map.update_base(&mut coords);
        stage.bases = coords.bases;
        result?;
        for (param, tensor) in self.ambient.iter_mut().zip(coords.ambient) {
            param.set_value(tensor);
        }
        self.cache.clear();
        Ok(())
    }
}
