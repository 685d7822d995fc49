//! Host modules: named tensor attributes and child modules.
//!
//! A [`Module`] is the table a parametrization attaches to. Each attribute
//! is either a plain trainable tensor or a [`Parametrization`]; reading an
//! attribute through [`Module::get`] records it on a graph, so callers never
//! see the difference.

use crate::cache::ScopedCache;
use crate::error::{ParametrizeError, Result};
use crate::parametrize::Parametrization;
use geoparam_autodiff::{Graph, NodeId, Parameter, Tensor};
use geoparam_core::ManifoldMap;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u64);

/// One attribute of a module.
#[derive(Debug)]
pub enum Attribute {
    /// A trainable tensor read as is.
    Plain(Parameter),
    /// A tensor constrained to a manifold.
    Parametrized(Parametrization),
}

/// Anything that owns a [`Module`].
pub trait Host {
    /// The owned module.
    fn module(&self) -> &Module;

    /// The owned module, mutably.
    fn module_mut(&mut self) -> &mut Module;
}

/// Attribute table plus child modules.
#[derive(Debug)]
pub struct Module {
    id: ModuleId,
    attributes: BTreeMap<String, Attribute>,
    children: BTreeMap<String, Module>,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for Module {
    fn module(&self) -> &Module {
        self
    }

    fn module_mut(&mut self) -> &mut Module {
        self
    }
}

impl Module {
    /// An empty module.
    pub fn new() -> Self {
        Self {
            id: ModuleId(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed)),
            attributes: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// A module holding `parameters` as plain attributes.
    pub fn from_parameters(parameters: BTreeMap<String, Tensor>) -> Self {
        let mut module = Self::new();
        module.attributes = parameters
            .into_iter()
            .map(|(name, value)| {
                let param = Parameter::new(value).with_name(&name);
                (name, Attribute::Plain(param))
            })
            .collect();
        module
    }

    /// Identifier of this module.
    pub fn id(&self) -> ModuleId {
        self.id
    }

    fn check_free(&self, name: &str) -> Result<()> {
        if self.attributes.contains_key(name) || self.children.contains_key(name) {
            Err(ParametrizeError::DuplicateAttribute {
                name: name.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Adds a plain trainable tensor.
    pub fn register_parameter(&mut self, name: &str, value: Tensor) -> Result<()> {
        self.check_free(name)?;
        let param = Parameter::new(value).with_name(name);
        self.attributes
            .insert(name.to_string(), Attribute::Plain(param));
        Ok(())
    }

    /// Adds a child module.
    pub fn add_child(&mut self, name: &str, child: Module) -> Result<()> {
        self.check_free(name)?;
        self.children.insert(name.to_string(), child);
        Ok(())
    }

    /// Child module `name`.
    pub fn child(&self, name: &str) -> Option<&Module> {
        self.children.get(name)
    }

    /// Child module `name`, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.children.get_mut(name)
    }

    /// Attribute names, in order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Attribute `name`.
    pub fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.attributes
            .get(name)
            .ok_or_else(|| ParametrizeError::unknown(name))
    }

    fn attribute_mut(&mut self, name: &str) -> Result<&mut Attribute> {
        self.attributes
            .get_mut(name)
            .ok_or_else(|| ParametrizeError::unknown(name))
    }

    /// Shape of the tensor attribute `name` currently reads as.
    pub fn shape_of(&self, name: &str) -> Result<Vec<usize>> {
        Ok(match self.attribute(name)? {
            Attribute::Plain(param) => param.shape(),
            Attribute::Parametrized(p) => p.shape().to_vec(),
        })
    }

    /// Whether `name` is bound to a parametrization.
    pub fn is_parametrized(&self, name: &str) -> bool {
        matches!(self.attributes.get(name), Some(Attribute::Parametrized(_)))
    }

    /// The parametrization bound to `name`.
    pub fn parametrization(&self, name: &str) -> Result<&Parametrization> {
        match self.attribute(name)? {
            Attribute::Parametrized(p) => Ok(p),
            Attribute::Plain(_) => Err(ParametrizeError::not_parametrized(name)),
        }
    }

    /// The parametrization bound to `name`, mutably.
    pub fn parametrization_mut(&mut self, name: &str) -> Result<&mut Parametrization> {
        match self.attribute_mut(name)? {
            Attribute::Parametrized(p) => Ok(p),
            Attribute::Plain(_) => Err(ParametrizeError::not_parametrized(name)),
        }
    }

    /// Records attribute `name` on `graph`.
    ///
    /// Plain tensors become parameter leaves; parametrized tensors run their
    /// pipeline (or hit the cache inside a [`cached`](crate::cached) scope).
    pub fn get(&self, graph: &Graph, name: &str) -> Result<NodeId> {
        Ok(match self.attribute(name)? {
            Attribute::Plain(param) => graph.parameter(param),
            Attribute::Parametrized(p) => p.forward(graph),
        })
    }

    /// Current value of attribute `name`, without gradient tracking.
    pub fn value(&self, name: &str) -> Result<Tensor> {
        match self.attribute(name)? {
            Attribute::Plain(param) => Ok(param.value().clone()),
            Attribute::Parametrized(p) => p.value(),
        }
    }

    /// Constrains attribute `name` to `map`.
    ///
    /// The attribute must be a plain tensor of shape `map.size()`. Its value
    /// is kept when it lies on the manifold, otherwise a uniform sample
    /// replaces it. Registering the same map twice is a no-op.
    pub fn register_parametrization(
        &mut self,
        name: &str,
        map: Arc<dyn ManifoldMap>,
    ) -> Result<()> {
        let attribute = self.attribute_mut(name)?;
        let value = match &*attribute {
            Attribute::Parametrized(p) if p.contains(&map) => {
                debug!(attribute = name, "parametrization already registered");
                return Ok(());
            }
            Attribute::Parametrized(p) => {
                return Err(ParametrizeError::AlreadyParametrized {
                    name: name.to_string(),
                    manifold: p.manifold().name().to_string(),
                })
            }
            Attribute::Plain(param) => param.value(),
        };
        let parametrization = Parametrization::new(name, map, value, &mut rand::thread_rng())?;
        *attribute = Attribute::Parametrized(parametrization);
        Ok(())
    }

    /// Appends `map` to the pipeline bound to `name`; its single ambient
    /// input is the current output.
    pub fn chain_parametrization(&mut self, name: &str, map: Arc<dyn ManifoldMap>) -> Result<()> {
        self.parametrization_mut(name)?.push(map)
    }

    /// Replaces the parametrization bound to `name` by a plain tensor
    /// holding its current point.
    pub fn remove_parametrization(&mut self, name: &str) -> Result<()> {
        let attribute = self.attribute_mut(name)?;
        let value = match &*attribute {
            Attribute::Parametrized(p) => p.value()?,
            Attribute::Plain(_) => return Err(ParametrizeError::not_parametrized(name)),
        };
        *attribute = Attribute::Plain(Parameter::new(value).with_name(name));
        debug!(attribute = name, "removed parametrization");
        Ok(())
    }

    /// Every trainable tensor of this module and its children: plain
    /// attributes and ambient tensors of parametrizations.
    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = Vec::new();
        self.collect_parameters(&mut params);
        params
    }

    fn collect_parameters<'a>(&'a mut self, out: &mut Vec<&'a mut Parameter>) {
        for attribute in self.attributes.values_mut() {
            match attribute {
                Attribute::Plain(param) => out.push(param),
                Attribute::Parametrized(p) => out.extend(p.ambient_mut().iter_mut()),
            }
        }
        for child in self.children.values_mut() {
            child.collect_parameters(out);
        }
    }

    /// Every parametrization of this module and its children, mutably.
    pub fn parametrizations_mut(&mut self) -> Vec<&mut Parametrization> {
        let mut out = Vec::new();
        self.collect_parametrizations(&mut out);
        out
    }

    fn collect_parametrizations<'a>(&'a mut self, out: &mut Vec<&'a mut Parametrization>) {
        for attribute in self.attributes.values_mut() {
            if let Attribute::Parametrized(p) = attribute {
                out.push(p);
            }
        }
        for child in self.children.values_mut() {
            child.collect_parametrizations(out);
        }
    }

    /// Recentres every dynamic base under this module.
    pub fn update_bases(&mut self) -> Result<()> {
        self.parametrizations_mut()
            .into_iter()
            .try_for_each(Parametrization::update_base)
    }

    pub(crate) fn caches(&self) -> Vec<Rc<ScopedCache>> {
        let own = self.attributes.values().filter_map(|attribute| match attribute {
            Attribute::Parametrized(p) => Some(p.shared_cache()),
            Attribute::Plain(_) => None,
        });
        own.chain(self.children.values().flat_map(Module::caches))
            .collect()
    }
}
