//! Playback coordinator: at most one audio resource plays at a time.
//!
//! Three layers keep the invariant:
//! - direct stops from `set_active` / `stop_all`,
//! - a stop-siblings listener attached to every registered resource,
//! - the periodic `enforce_single_active` sweep, which also covers
//!   resources reported by [`Discovery`] sources the coordinator never made.
//!
//! Locks are never held while a resource transitions, because resources
//! fire listeners synchronously and those listeners call back in here.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::effects::simulated::SimulatedResource;
use crate::log_err;
use crate::models::Track;
use crate::resource::{
    AudioResource, Discovery, Listener, ListenerId, ResourceError, ResourceEvent, ResourceFactory,
    ResourceId,
};

type SharedResource = Arc<dyn AudioResource>;

/// Cloneable handle; clones share one registry.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Managed {
    resource: SharedResource,
    listener: ListenerId,
}

struct Inner {
    factory: Arc<dyn ResourceFactory>,
    managed: Mutex<HashMap<ResourceId, Managed>>,
    active: Mutex<Option<SharedResource>>,
    /// Created speculatively for a restore that has not run yet.
    preloaded: Mutex<Option<SharedResource>>,
    discovery: Mutex<Vec<Arc<dyn Discovery>>>,
}

impl Coordinator {
    pub fn new(factory: Arc<dyn ResourceFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                managed: Mutex::new(HashMap::new()),
                active: Mutex::new(None),
                preloaded: Mutex::new(None),
                discovery: Mutex::new(Vec::new()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Add `resource` to the managed set. Returns false if it already was.
    pub fn register_resource(&self, resource: &SharedResource) -> bool {
        let id = resource.id();
        {
            let mut managed = self.inner.managed.lock();
            if managed.contains_key(&id) {
                return false;
            }
            // Subscribing does not fire listeners, so holding the lock is fine.
            let listener = resource.subscribe(sibling_listener(Arc::downgrade(&self.inner)));
            managed.insert(
                id,
                Managed {
                    resource: Arc::clone(resource),
                    listener,
                },
            );
        }
        log::debug!("cadence: registered resource {} ({})", id, resource.source());
        self.enforce_single_active();
        true
    }

    /// Pause and rewind every known resource, then clear the managed set.
    ///
    /// The active and preloaded resources stay in their slots; every other
    /// managed resource is released.
    pub fn stop_all(&self) {
        self.inner.stop_all(None);
    }

    /// Stop all but one playing resource. Returns how many were stopped.
    pub fn enforce_single_active(&self) -> usize {
        self.inner.enforce_single_active()
    }

    /// Make `resource` the only active resource.
    pub fn set_active(&self, resource: &SharedResource) {
        let id = resource.id();
        self.inner.stop_all(Some(id));
        {
            let mut preloaded = self.inner.preloaded.lock();
            if preloaded.as_ref().map(|p| p.id()) == Some(id) {
                *preloaded = None;
            }
        }
        let previous = self.inner.active.lock().replace(Arc::clone(resource));
        if let Some(previous) = previous.filter(|p| p.id() != id) {
            self.inner.release(&previous);
        }
        self.register_resource(resource);
        log::debug!("cadence: active resource is now {}", id);
    }

    pub fn active(&self) -> Option<SharedResource> {
        self.inner.active.lock().clone()
    }

    pub fn is_active(&self, id: ResourceId) -> bool {
        self.inner.active.lock().as_ref().map(|r| r.id()) == Some(id)
    }

    pub fn is_managed(&self, id: ResourceId) -> bool {
        self.inner.managed.lock().contains_key(&id)
    }

    pub fn managed_count(&self) -> usize {
        self.inner.managed.lock().len()
    }

    /// Install a fallback source of resources created elsewhere.
    pub fn add_discovery(&self, discovery: Arc<dyn Discovery>) {
        self.inner.discovery.lock().push(discovery);
    }

    // -----------------------------------------------------------------------
    // Factory
    // -----------------------------------------------------------------------

    /// Create and register a resource for `source`.
    pub fn create_resource(&self, source: &str) -> Result<SharedResource, ResourceError> {
        let resource = self.inner.factory.create(source)?;
        self.register_resource(&resource);
        Ok(resource)
    }

    /// Create a resource for `track`, falling back to a simulated clock.
    ///
    /// The error, if any, is the reason the fallback was taken.
    pub fn create_for_track(&self, track: &Track) -> (SharedResource, Option<ResourceError>) {
        let failure = if track.has_source() {
            match self.create_resource(&track.audio) {
                Ok(resource) => return (resource, None),
                Err(e) => e,
            }
        } else {
            ResourceError::Unavailable {
                source_uri: track.audio.clone(),
                reason: "no audio source".into(),
            }
        };
        log::warn!("cadence: {} for track {}, using simulated clock", failure, track.id);
        (self.simulated_for(track), Some(failure))
    }

    /// Register a simulated clock standing in for `track`.
    pub fn simulated_for(&self, track: &Track) -> SharedResource {
        let resource: SharedResource =
            Arc::new(SimulatedResource::new(track.audio.clone()).with_duration(track.duration as f64));
        self.register_resource(&resource);
        resource
    }

    // -----------------------------------------------------------------------
    // Preloaded slot
    // -----------------------------------------------------------------------

    /// Park a speculatively created resource. Replaces (and releases) any
    /// resource already parked.
    pub fn set_preloaded(&self, resource: SharedResource) {
        let previous = self.inner.preloaded.lock().replace(resource);
        if let Some(previous) = previous {
            self.inner.release(&previous);
        }
    }

    /// The parked resource, if it was created for `source`.
    pub fn preloaded_for(&self, source: &str) -> Option<SharedResource> {
        self.inner
            .preloaded
            .lock()
            .as_ref()
            .filter(|r| r.source() == source)
            .cloned()
    }

    pub fn preloaded(&self) -> Option<SharedResource> {
        self.inner.preloaded.lock().clone()
    }

    /// Stop and release the parked resource, if any.
    pub fn discard_preloaded(&self) {
        let previous = self.inner.preloaded.lock().take();
        if let Some(previous) = previous {
            log::debug!("cadence: discarding preloaded resource {}", previous.id());
            self.inner.release(&previous);
        }
    }

    /// Stop and release everything. Used at engine shutdown.
    pub fn release_all(&self) {
        self.inner.stop_all(None);
        let active = self.inner.active.lock().take();
        let preloaded = self.inner.preloaded.lock().take();
        for resource in active.into_iter().chain(preloaded) {
            resource.release();
        }
    }
}

/// Non-owning handle, for listeners that must not keep the registry alive.
#[derive(Clone)]
pub(crate) struct WeakCoordinator(Weak<Inner>);

impl WeakCoordinator {
    pub(crate) fn upgrade(&self) -> Option<Coordinator> {
        self.0.upgrade().map(|inner| Coordinator { inner })
    }
}

impl Coordinator {
    pub(crate) fn downgrade(&self) -> WeakCoordinator {
        WeakCoordinator(Arc::downgrade(&self.inner))
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("managed", &self.managed_count())
            .field("active", &self.active().map(|r| r.id()))
            .finish()
    }
}

/// Listener stopping every other resource when the subscribed one starts.
fn sibling_listener(inner: Weak<Inner>) -> Listener {
    Arc::new(move |id, event| {
        if *event != ResourceEvent::Playing {
            return;
        }
        if let Some(inner) = inner.upgrade() {
            inner.stop_siblings(id);
        }
    })
}

fn stop_quietly(resource: &dyn AudioResource) -> bool {
    log_err(resource.stop(), &format!("stop resource {}", resource.id()))
}

impl Inner {
    /// Every resource the coordinator can see, deduplicated.
    fn known(&self) -> Vec<SharedResource> {
        let managed: Vec<SharedResource> = self
            .managed
            .lock()
            .values()
            .map(|m| Arc::clone(&m.resource))
            .collect();
        let active = self.active.lock().clone();
        let preloaded = self.preloaded.lock().clone();
        let discovered = self.discovered();

        let mut seen = HashSet::new();
        managed
            .into_iter()
            .chain(active)
            .chain(preloaded)
            .chain(discovered)
            .filter(|r| seen.insert(r.id()))
            .collect()
    }

    fn discovered(&self) -> Vec<SharedResource> {
        let sources = self.discovery.lock().clone();
        sources.iter().flat_map(|d| d.discover()).collect()
    }

    fn stop_siblings(&self, playing: ResourceId) {
        for resource in self.known() {
            if resource.id() != playing && resource.is_playing() {
                log::debug!("cadence: {} started, stopping {}", playing, resource.id());
                stop_quietly(&*resource);
            }
        }
    }

    fn stop_all(&self, keep: Option<ResourceId>) {
        let drained: Vec<Managed> = self.managed.lock().drain().map(|(_, m)| m).collect();
        let mut seen = HashSet::new();
        let targets: Vec<SharedResource> = drained
            .iter()
            .map(|m| Arc::clone(&m.resource))
            .chain(self.known())
            .filter(|r| seen.insert(r.id()))
            .collect();
        for resource in targets {
            if Some(resource.id()) != keep {
                stop_quietly(&*resource);
            }
        }

        let active = self.active.lock().as_ref().map(|r| r.id());
        let preloaded = self.preloaded.lock().as_ref().map(|r| r.id());
        for managed in drained {
            let id = managed.resource.id();
            managed.resource.unsubscribe(managed.listener);
            if Some(id) != keep && Some(id) != active && Some(id) != preloaded {
                managed.resource.release();
            }
        }
    }

    fn enforce_single_active(&self) -> usize {
        let playing: Vec<SharedResource> = self.known().into_iter().filter(|r| r.is_playing()).collect();
        if playing.len() <= 1 {
            return 0;
        }

        let active = self.active.lock().as_ref().map(|r| r.id());
        let survivor = playing
            .iter()
            .map(|r| r.id())
            .find(|id| Some(*id) == active)
            .unwrap_or_else(|| playing[0].id());

        let stopped = playing
            .iter()
            .filter(|r| r.id() != survivor)
            .filter(|r| stop_quietly(&***r))
            .count();
        log::info!(
            "cadence: enforcement stopped {} resource(s), {} survives",
            stopped,
            survivor
        );
        stopped
    }

    /// Stop, detach and release a resource leaving the registry for good.
    fn release(&self, resource: &SharedResource) {
        stop_quietly(&**resource);
        if let Some(managed) = self.managed.lock().remove(&resource.id()) {
            managed.resource.unsubscribe(managed.listener);
        }
        resource.release();
    }
}
