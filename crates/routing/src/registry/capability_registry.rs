//! Capability registry for data backends.
//!
//! The registry holds one descriptor and one adapter factory per backend id,
//! and answers:
//! - Discovery queries by category, feature, or a full requirement set
//! - Ranking of backends for a request
//! - Lazy instantiation of live adapters

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};

use super::scoring::{self, RankCriteria};
use super::validator::validate_descriptor;
use crate::backend::{BackendFactory, DataBackend};
use crate::errors::{panic_message, RoutingError};
use crate::models::{BackendDescriptor, BackendId, DataCategory, DataRequest, FeatureTag};

/// A registered backend: its metadata, how to build it, and the memoized instance.
struct Entry {
    descriptor: Arc<BackendDescriptor>,
    factory: BackendFactory,
    instance: Option<Arc<dyn DataBackend>>,
}

/// Registry of backend descriptors and adapter factories.
///
/// Thread-safe; shared between the router and whatever composes it behind an
/// `Arc`. Every id maps to exactly one descriptor and one factory.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("Capability registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("Capability registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a backend, replacing any existing entry with the same id.
    ///
    /// Replacement is total: the new descriptor and factory take over and any
    /// instance built by the previous factory is dropped.
    pub fn register(
        &self,
        descriptor: BackendDescriptor,
        factory: BackendFactory,
    ) -> Result<(), RoutingError> {
        validate_descriptor(&descriptor)?;

        let id = descriptor.id.to_string();
        let mut entries = self.write_entries();
        let replaced = entries
            .insert(
                id.clone(),
                Entry {
                    descriptor: Arc::new(descriptor),
                    factory,
                    instance: None,
                },
            )
            .is_some();

        if replaced {
            info!("Registry: replaced backend '{}'", id);
        } else {
            info!("Registry: registered backend '{}'", id);
        }
        Ok(())
    }

    /// Remove a backend. Returns its descriptor if it was registered.
    pub fn unregister(&self, id: &str) -> Option<Arc<BackendDescriptor>> {
        let removed = self.write_entries().remove(id).map(|e| e.descriptor);
        if removed.is_some() {
            info!("Registry: unregistered backend '{}'", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<BackendDescriptor>> {
        self.read_entries().get(id).map(|e| Arc::clone(&e.descriptor))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// All descriptors, sorted by id.
    pub fn descriptors(&self) -> Vec<Arc<BackendDescriptor>> {
        self.filter(|_| true)
    }

    /// Backends that serve `category`, sorted by id.
    pub fn find_by_category(&self, category: DataCategory) -> Vec<Arc<BackendDescriptor>> {
        self.filter(|d| d.supports_category(category))
    }

    /// Backends that advertise `feature`, sorted by id.
    pub fn find_by_feature(&self, feature: FeatureTag) -> Vec<Arc<BackendDescriptor>> {
        self.filter(|d| d.has_feature(feature))
    }

    /// Backends that serve every category and advertise every required feature.
    ///
    /// Optional features don't filter; the result is ordered by how many of
    /// them each backend has (most first), then by id.
    pub fn find_matching(
        &self,
        categories: &[DataCategory],
        required_features: &[FeatureTag],
        optional_features: &[FeatureTag],
    ) -> Vec<Arc<BackendDescriptor>> {
        let criteria = RankCriteria::new(categories.iter().copied())
            .with_required_features(required_features.iter().copied());

        let mut matching = self.filter(|d| scoring::meets_requirements(d, &criteria));
        matching.sort_by(|a, b| {
            let overlap_a = scoring::optional_overlap(a, optional_features);
            let overlap_b = scoring::optional_overlap(b, optional_features);
            overlap_b.total_cmp(&overlap_a).then_with(|| a.id.cmp(&b.id))
        });
        matching
    }

    /// Rank backends for a request, best first.
    ///
    /// Backends that miss any hard requirement are excluded, not merely
    /// penalized. Ties break on id.
    pub fn rank(&self, request: &DataRequest) -> Vec<(BackendId, f64)> {
        self.rank_criteria(&RankCriteria::from(request))
    }

    /// Rank backends against explicit criteria, best first.
    pub fn rank_criteria(&self, criteria: &RankCriteria) -> Vec<(BackendId, f64)> {
        let entries = self.read_entries();

        let mut ranked: Vec<(BackendId, f64)> = entries
            .values()
            .filter(|e| scoring::meets_requirements(&e.descriptor, criteria))
            .map(|e| {
                (
                    e.descriptor.id.clone(),
                    scoring::score(&e.descriptor, criteria),
                )
            })
            .collect();
        drop(entries);

        ranked.sort_by(|(id_a, score_a), (id_b, score_b)| {
            score_b.total_cmp(score_a).then_with(|| id_a.cmp(id_b))
        });

        debug!(
            "Registry: ranked {} backend(s) for {:?}: {:?}",
            ranked.len(),
            criteria.categories,
            ranked
        );
        ranked
    }

    /// Get a live adapter for `id`, building it through its factory on first use.
    ///
    /// Returns `Ok(None)` for unknown ids. Factory failures, panics included,
    /// surface as [`RoutingError::AdapterInit`] and are not memoized, so the
    /// next call retries the factory.
    pub fn instantiate(&self, id: &str) -> Result<Option<Arc<dyn DataBackend>>, RoutingError> {
        let (descriptor, factory) = {
            let entries = self.read_entries();
            let Some(entry) = entries.get(id) else {
                return Ok(None);
            };
            if let Some(instance) = &entry.instance {
                return Ok(Some(Arc::clone(instance)));
            }
            (Arc::clone(&entry.descriptor), Arc::clone(&entry.factory))
        };

        // The factory runs without the lock held; it may be slow.
        let built = panic::catch_unwind(AssertUnwindSafe(|| factory())).unwrap_or_else(|panic| {
            warn!("Registry: factory for '{}' panicked", id);
            Err(RoutingError::AdapterInit {
                backend: id.to_string(),
                message: format!("factory panicked: {}", panic_message(panic.as_ref())),
            })
        });
        let instance = built.map_err(|e| match e {
            RoutingError::AdapterInit { .. } => e,
            other => RoutingError::AdapterInit {
                backend: id.to_string(),
                message: other.to_string(),
            },
        })?;

        let mut entries = self.write_entries();
        match entries.get_mut(id) {
            // Only memoize if the entry wasn't replaced while the factory ran
            Some(entry) if Arc::ptr_eq(&entry.descriptor, &descriptor) => {
                if let Some(existing) = &entry.instance {
                    return Ok(Some(Arc::clone(existing)));
                }
                debug!("Registry: instantiated backend '{}'", id);
                entry.instance = Some(Arc::clone(&instance));
                Ok(Some(instance))
            }
            _ => Ok(Some(instance)),
        }
    }

    fn filter(&self, predicate: impl Fn(&BackendDescriptor) -> bool) -> Vec<Arc<BackendDescriptor>> {
        let mut found: Vec<_> = self
            .read_entries()
            .values()
            .filter(|e| predicate(&e.descriptor))
            .map(|e| Arc::clone(&e.descriptor))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}
