//! Registry of shape inference implementations keyed by layer type.
//!
//! Layer types are matched ignoring case. Implementations arrive either one at
//! a time through [`ShapeInferRegistry::register`] or as a whole
//! [`ShapeInferExtension`] through [`ShapeInferRegistry::add_extension`]. An
//! extension is accepted in full or not at all.

use super::built_in::BuiltInShapeInferHolder;
use super::error::{InferResult, ReshapeError, Result};
use crate::caseless::{self, CaselessKey};
use crate::network::{Blobs, LayerParams, Shape};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Computes the output shapes of one layer type.
///
/// Implementations are pure: they receive the input shapes, the layer
/// parameters and its constant data, and return one shape per output port.
pub trait ShapeInferImpl: Send + Sync {
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, blobs: &Blobs) -> InferResult<Vec<Shape>>;
}

impl<F> ShapeInferImpl for F
where
    F: Fn(&[Shape], &LayerParams, &Blobs) -> InferResult<Vec<Shape>> + Send + Sync,
{
    fn infer_shapes(&self, in_shapes: &[Shape], params: &LayerParams, blobs: &Blobs) -> InferResult<Vec<Shape>> {
        self(in_shapes, params, blobs)
    }
}

/// A set of shape inference implementations supplied from outside the engine.
pub trait ShapeInferExtension {
    /// Every layer type this extension can infer.
    fn shape_infer_types(&self) -> Vec<String>;

    /// Implementation for `layer_type`, matched ignoring case.
    fn shape_infer_impl(&self, layer_type: &str) -> Option<Arc<dyn ShapeInferImpl>>;
}

/// Map-backed extension for implementations defined in code.
///
/// ```
/// use rustyreshape::network::{Blobs, LayerParams, Shape};
/// use rustyreshape::shape_infer::{ExtensionSet, InferResult, ShapeInferExtension};
///
/// fn squeeze(shapes: &[Shape], _: &LayerParams, _: &Blobs) -> InferResult<Vec<Shape>> {
///     Ok(vec![shapes[0].iter().copied().filter(|&d| d != 1).collect()])
/// }
///
/// let extension = ExtensionSet::new().with("Squeeze", squeeze);
/// assert_eq!(extension.shape_infer_types(), vec!["Squeeze".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct ExtensionSet {
    impls: Vec<(String, Arc<dyn ShapeInferImpl>)>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, layer_type: &str, implementation: impl ShapeInferImpl + 'static) -> Self {
        self.insert(layer_type, Arc::new(implementation));
        self
    }

    /// Adds or replaces the implementation for `layer_type`.
    pub fn insert(&mut self, layer_type: &str, implementation: Arc<dyn ShapeInferImpl>) {
        match self.impls.iter_mut().find(|(name, _)| caseless::eq(name, layer_type)) {
            Some(entry) => entry.1 = implementation,
            None => self.impls.push((layer_type.to_string(), implementation)),
        }
    }
}

impl ShapeInferExtension for ExtensionSet {
    fn shape_infer_types(&self) -> Vec<String> {
        self.impls.iter().map(|(name, _)| name.clone()).collect()
    }

    fn shape_infer_impl(&self, layer_type: &str) -> Option<Arc<dyn ShapeInferImpl>> {
        self.impls
            .iter()
            .find(|(name, _)| caseless::eq(name, layer_type))
            .map(|(_, implementation)| implementation.clone())
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSet").field("types", &self.shape_infer_types()).finish()
    }
}

#[derive(Clone, Default)]
pub struct ShapeInferRegistry {
    impls: HashMap<CaselessKey, Arc<dyn ShapeInferImpl>>,
}

impl ShapeInferRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in implementations.
    pub fn with_built_ins() -> Self {
        let mut registry = Self::new();
        // Built-in names are unique, so no collision check is needed here.
        for layer_type in BuiltInShapeInferHolder::TYPES {
            if let Some(implementation) = BuiltInShapeInferHolder.shape_infer_impl(layer_type) {
                registry.impls.insert(CaselessKey::new(*layer_type), implementation);
            }
        }
        registry
    }

    /// Registers a single implementation.
    ///
    /// Fails with [`ReshapeError::DuplicateType`] if the type is already
    /// registered under any spelling.
    pub fn register(&mut self, layer_type: &str, implementation: Arc<dyn ShapeInferImpl>) -> Result<()> {
        let key = CaselessKey::new(layer_type);
        if let Some((existing, _)) = self.impls.get_key_value(&key) {
            return Err(ReshapeError::DuplicateType(vec![existing.to_string()]));
        }
        self.impls.insert(key, implementation);
        Ok(())
    }

    /// Registers every type of `extension` at once and returns the added type names.
    ///
    /// If any type is already registered the whole extension is refused and the
    /// error lists every conflicting name. An extension that lists a type
    /// without being able to produce its implementation is refused as well.
    pub fn add_extension(&mut self, extension: &dyn ShapeInferExtension) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let new_types: Vec<String> = extension
            .shape_infer_types()
            .into_iter()
            .filter(|name| seen.insert(CaselessKey::new(name.as_str())))
            .collect();

        let conflicts: Vec<String> = new_types
            .iter()
            .filter(|name| self.contains(name))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(ReshapeError::DuplicateType(conflicts));
        }

        let mut resolved = Vec::with_capacity(new_types.len());
        for name in &new_types {
            let implementation = extension
                .shape_infer_impl(name)
                .ok_or_else(|| ReshapeError::ImplementationNotFound(name.clone()))?;
            resolved.push((CaselessKey::new(name.as_str()), implementation));
        }
        self.impls.extend(resolved);

        log::info!("registered shape infer extension with types: {}", new_types.join(", "));
        Ok(new_types)
    }

    /// Returns the implementation for `layer_type` or [`ReshapeError::NotFound`].
    pub fn lookup(&self, layer_type: &str) -> Result<Arc<dyn ShapeInferImpl>> {
        self.get(layer_type)
            .ok_or_else(|| ReshapeError::NotFound(layer_type.to_string()))
    }

    pub fn get(&self, layer_type: &str) -> Option<Arc<dyn ShapeInferImpl>> {
        self.impls.get(&CaselessKey::new(layer_type)).cloned()
    }

    pub fn contains(&self, layer_type: &str) -> bool {
        self.impls.contains_key(&CaselessKey::new(layer_type))
    }

    /// Registered type names, sorted, in the spelling they were registered with.
    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.impls.keys().map(|key| key.to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.impls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.impls.is_empty()
    }
}

impl fmt::Debug for ShapeInferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeInferRegistry").field("types", &self.types()).finish()
    }
}
