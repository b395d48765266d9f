//! Tile registry: the per-layer map from tile name to tile handle
//!
//! The registry deduplicates requests by name and lets a targeted refresh find
//! a live tile. Removing a tile from tracking does not necessarily destroy its
//! render target: under [`EvictionPolicy::None`] the target is kept resident
//! until the layer is torn down.

use super::types::{RenderTarget, TileHandle, TileHandleId, TileState};
use crate::core::config::EvictionPolicy;
use crate::core::geo::TileName;
use crate::prelude::{Arc, HashMap, HashSet};

pub struct TileRegistry {
    handles: HashMap<TileName, TileHandle>,
    /// Render targets whose handles left tracking but stay on screen.
    resident: Vec<Box<dyn RenderTarget>>,
    eviction_policy: EvictionPolicy,
}

impl TileRegistry {
    pub fn new(eviction_policy: EvictionPolicy) -> Self {
        Self {
            handles: HashMap::default(),
            resident: Vec::new(),
            eviction_policy,
        }
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    /// Returns the live handle for `name`, creating a `Queued` one with
    /// `make()` when none exists. The flag is `true` for a new handle.
    pub fn get_or_create<F>(&mut self, name: &TileName, make: F) -> (TileHandleId, bool)
    where
        F: FnOnce() -> (String, Box<dyn RenderTarget>),
    {
        if let Some(handle) = self.handles.get(name) {
            return (handle.id, false);
        }
        let (url, element) = make();
        let handle = TileHandle::new(name.clone(), url, element);
        let id = handle.id;
        self.handles.insert(name.clone(), handle);
        (id, true)
    }

    pub fn lookup(&self, name: &TileName) -> Option<&TileHandle> {
        self.handles.get(name)
    }

    pub fn lookup_mut(&mut self, name: &TileName) -> Option<&mut TileHandle> {
        self.handles.get_mut(name)
    }

    /// The live handle for `name`, only if it is still the handle `id`.
    fn live_mut(&mut self, id: TileHandleId, name: &TileName) -> Option<&mut TileHandle> {
        self.handles.get_mut(name).filter(|handle| handle.id == id)
    }

    pub fn mark_loading(&mut self, id: TileHandleId, name: &TileName) -> Option<String> {
        let handle = self.live_mut(id, name)?;
        handle.state = TileState::Loading;
        Some(handle.url.clone())
    }

    /// Settle a fetch successfully. Returns `false` when the handle is no
    /// longer tracked; the caller still frees its concurrency slot.
    pub fn mark_loaded(&mut self, id: TileHandleId, name: &TileName, data: Arc<Vec<u8>>) -> bool {
        match self.live_mut(id, name) {
            Some(handle) => {
                handle.state = TileState::Loaded;
                handle.load_count += 1;
                handle.last_error = None;
                handle.element.on_load(data);
                true
            }
            None => false,
        }
    }

    pub fn mark_errored(&mut self, id: TileHandleId, name: &TileName, reason: &str) -> bool {
        match self.live_mut(id, name) {
            Some(handle) => {
                handle.state = TileState::Errored;
                handle.last_error = Some(reason.to_string());
                handle.element.on_error(reason);
                true
            }
            None => false,
        }
    }

    /// Move a settled tile back to `Queued`. Pending tiles are left alone and
    /// `None` is returned, so a refresh never doubles a request.
    pub fn requeue(&mut self, name: &TileName) -> Option<TileHandleId> {
        let handle = self.handles.get_mut(name)?;
        if handle.state.is_pending() {
            return None;
        }
        handle.state = TileState::Queued;
        Some(handle.id)
    }

    /// Stop tracking `name`. The render target stays resident unless the
    /// policy is viewport-based.
    pub fn remove(&mut self, name: &TileName) -> Option<TileHandleId> {
        let handle = self.handles.remove(name)?;
        let id = handle.id;
        self.release_element(handle);
        Some(id)
    }

    fn release_element(&mut self, handle: TileHandle) {
        let mut element = handle.element;
        match self.eviction_policy {
            EvictionPolicy::None => self.resident.push(element),
            EvictionPolicy::ViewportBased => element.detach(),
        }
    }

    /// Apply the eviction policy for a viewport showing `visible`. Returns the
    /// ids of handles that left tracking.
    pub fn prune_outside(&mut self, visible: &HashSet<TileName>) -> Vec<TileHandleId> {
        if self.eviction_policy == EvictionPolicy::None {
            log::debug!(
                "Skipping viewport pruning of {} tiles, eviction disabled",
                self.handles.len()
            );
            return Vec::new();
        }

        let outside: Vec<TileName> = self
            .handles
            .keys()
            .filter(|name| !visible.contains(*name))
            .cloned()
            .collect();

        outside.iter().filter_map(|name| self.remove(name)).collect()
    }

    /// Clear all bookkeeping and hand every render target back to the owner.
    pub fn teardown(&mut self) -> Vec<Box<dyn RenderTarget>> {
        let mut elements: Vec<Box<dyn RenderTarget>> = self.resident.drain(..).collect();
        elements.extend(self.handles.drain().map(|(_, handle)| handle.element));
        elements
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileHandle> {
        self.handles.values()
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for TileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileRegistry")
            .field("tracked", &self.handles.len())
            .field("resident", &self.resident.len())
            .field("eviction_policy", &self.eviction_policy)
            .finish()
    }
}
