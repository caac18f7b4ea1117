//! Model registry: the set of hooked model handles.
//!
//! Registration happens at setup time; lookups happen on every request. The
//! registry therefore keeps a pre-built snapshot that `list()` hands out
//! without copying, and rebuilds it only on writes.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::RoutingError;
use crate::providers::{BackendKind, ModelBackend, ProviderError};
use crate::types::{BackendOutput, InvokeParams, ModelId, ModelTier};

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPricing {
    pub const FREE: Self = Self {
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
    };

    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    /// Single number used to order handles by cost.
    pub fn cost_rank(&self) -> f64 {
        self.input_per_mtok + self.output_per_mtok
    }
}

struct KnownModel {
    name: &'static str,
    quality: u8,
    pricing: ModelPricing,
}

/// Defaults for well-known cloud models so configured handles get sensible
/// ranks and spend accounting without per-model setup.
static KNOWN_CLOUD_MODELS: Lazy<Vec<KnownModel>> = Lazy::new(|| {
    vec![
        KnownModel {
            name: "gpt-4o",
            quality: 8,
            pricing: ModelPricing::new(2.5, 10.0),
        },
        KnownModel {
            name: "gpt-4o-mini",
            quality: 5,
            pricing: ModelPricing::new(0.15, 0.6),
        },
        KnownModel {
            name: "gpt-4.1",
            quality: 8,
            pricing: ModelPricing::new(2.0, 8.0),
        },
        KnownModel {
            name: "gpt-4.1-mini",
            quality: 6,
            pricing: ModelPricing::new(0.4, 1.6),
        },
        KnownModel {
            name: "gpt-4.1-nano",
            quality: 4,
            pricing: ModelPricing::new(0.1, 0.4),
        },
        KnownModel {
            name: "gpt-5",
            quality: 9,
            pricing: ModelPricing::new(1.25, 10.0),
        },
        KnownModel {
            name: "gpt-5-mini",
            quality: 7,
            pricing: ModelPricing::new(0.25, 2.0),
        },
    ]
});

/// Quality and pricing defaults for a known cloud model name.
pub fn known_cloud_model(name: &str) -> Option<(u8, ModelPricing)> {
    KNOWN_CLOUD_MODELS
        .iter()
        .find(|m| m.name == name)
        .map(|m| (m.quality, m.pricing))
}

// ---------------------------------------------------------------------------
// ModelHandle
// ---------------------------------------------------------------------------

/// A registered, callable model. Immutable once constructed.
#[derive(Clone)]
pub struct ModelHandle {
    id: ModelId,
    quality: u8,
    pricing: ModelPricing,
    backend: Arc<dyn ModelBackend>,
}

impl ModelHandle {
    /// A handle with neutral quality (1) and no per-token price.
    pub fn new(id: ModelId, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            id,
            quality: 1,
            pricing: ModelPricing::FREE,
            backend,
        }
    }

    /// Declared capability rank; higher is more capable.
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn tier(&self) -> ModelTier {
        self.id.tier
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn pricing(&self) -> ModelPricing {
        self.pricing
    }

    /// Invoke the underlying backend for this handle's model.
    pub async fn invoke(
        &self,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, ProviderError> {
        self.backend.invoke(&self.id.name, prompt, params).await
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("kind", &self.backend.kind())
            .field("quality", &self.quality)
            .field("pricing", &self.pricing)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Registration-ordered view of the registry at one point in time.
///
/// Cheap to clone and iterable any number of times; later registry writes
/// do not affect an existing snapshot.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    handles: Arc<[Arc<ModelHandle>]>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<ModelHandle>> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, id: &ModelId) -> Option<&Arc<ModelHandle>> {
        self.handles.iter().find(|h| h.id() == id)
    }

    pub fn by_tier(&self, tier: ModelTier) -> impl Iterator<Item = &Arc<ModelHandle>> {
        self.handles.iter().filter(move |h| h.tier() == tier)
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a Arc<ModelHandle>;
    type IntoIter = std::slice::Iter<'a, Arc<ModelHandle>>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter()
    }
}

// ---------------------------------------------------------------------------
// ModelRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegistryInner {
    index: HashMap<ModelId, Arc<ModelHandle>>,
    order: Vec<ModelId>,
    snapshot: RegistrySnapshot,
}

impl RegistryInner {
    fn rebuild_snapshot(&mut self) {
        let handles: Vec<Arc<ModelHandle>> = self
            .order
            .iter()
            .filter_map(|id| self.index.get(id).cloned())
            .collect();
        self.snapshot = RegistrySnapshot {
            handles: handles.into(),
        };
    }
}

/// Shared, read-mostly set of model handles keyed by [`ModelId`].
#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<RegistryInner>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle. Fails if a handle with the same id already exists.
    pub fn register(&self, handle: ModelHandle) -> Result<(), RoutingError> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(handle.id()) {
            return Err(RoutingError::DuplicateModel(handle.id().clone()));
        }
        let id = handle.id().clone();
        info!(model = %id, kind = %handle.kind(), quality = handle.quality(), "Model registered");
        inner.order.push(id.clone());
        inner.index.insert(id, Arc::new(handle));
        inner.rebuild_snapshot();
        Ok(())
    }

    /// Remove a handle, returning it.
    pub fn unregister(&self, id: &ModelId) -> Result<Arc<ModelHandle>, RoutingError> {
        let mut inner = self.inner.write();
        let handle = inner
            .index
            .remove(id)
            .ok_or_else(|| RoutingError::unknown_model(id))?;
        inner.order.retain(|existing| existing != id);
        inner.rebuild_snapshot();
        debug!(model = %id, "Model unregistered");
        Ok(handle)
    }

    pub fn get(&self, id: &ModelId) -> Option<Arc<ModelHandle>> {
        self.inner.read().index.get(id).cloned()
    }

    /// Registration-ordered snapshot of every handle.
    pub fn list(&self) -> RegistrySnapshot {
        self.inner.read().snapshot.clone()
    }

    /// Resolve a caller-supplied model reference: either the full `tier:name`
    /// form, or a bare name that matches exactly one registered handle.
    pub fn resolve(&self, reference: &str) -> Result<Arc<ModelHandle>, RoutingError> {
        if let Ok(id) = reference.parse::<ModelId>()
            && let Some(handle) = self.get(&id)
        {
            return Ok(handle);
        }

        let inner = self.inner.read();
        let mut matches = inner.snapshot.iter().filter(|h| h.name() == reference);
        match (matches.next(), matches.next()) {
            (Some(handle), None) => Ok(Arc::clone(handle)),
            _ => Err(RoutingError::unknown_model(reference)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    /// Drop every handle (shutdown).
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let count = inner.order.len();
        inner.index.clear();
        inner.order.clear();
        inner.rebuild_snapshot();
        info!(count, "Model registry cleared");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
