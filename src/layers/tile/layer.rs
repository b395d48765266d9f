//! Core TileLayer implementation
//!
//! All registry and queue mutations happen on the caller's thread through
//! `&mut self`. The only concurrency is the set of outstanding fetches, whose
//! completions come back as [`FetchEvent`]s and are applied by [`TileLayer::poll`].

use super::loader::{FetchEvent, FetchOutcome, LoadScheduler, TileFetcher, TileLoader};
use super::mapper::{compute_tile_name, UrlResolver};
use super::registry::TileRegistry;
use super::source::TileSource;
use super::types::{RenderTarget, RenderTargetFactory, TileHandle, TileHandleId, TileState};
use crate::core::config::LayerConfig;
use crate::core::geo::{TileCoord, TileName};
use crate::prelude::{Arc, Duration, HashSet, Instant};
use crate::{Error, Result};

pub struct TileLayer {
    id: String,
    config: LayerConfig,
    urls: UrlResolver,
    registry: TileRegistry,
    scheduler: LoadScheduler,
    loader: TileLoader,
    factory: Arc<dyn RenderTargetFactory>,
}

impl TileLayer {
    pub fn new(
        id: impl Into<String>,
        config: LayerConfig,
        source: Arc<dyn TileSource>,
        fetcher: Arc<dyn TileFetcher>,
        factory: Arc<dyn RenderTargetFactory>,
    ) -> Self {
        let scheduler_config = config.scheduler_config();
        Self {
            id: id.into(),
            urls: UrlResolver::new(source),
            registry: TileRegistry::new(config.eviction_policy),
            scheduler: LoadScheduler::new(scheduler_config.max_concurrent_loads),
            loader: TileLoader::new(fetcher, scheduler_config),
            factory,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn tile_name(&self, coord: &TileCoord) -> TileName {
        compute_tile_name(coord, &self.config)
    }

    /// Memoized fetch URL for the tile at `coord`.
    pub fn tile_url(&mut self, coord: &TileCoord) -> String {
        let name = self.tile_name(coord);
        self.urls.resolve(&name)
    }

    /// Request the tile at `coord`. Requests for a name that is already
    /// tracked return the existing handle without another fetch.
    pub fn create_tile(&mut self, coord: TileCoord) -> TileHandleId {
        let name = self.tile_name(&coord);
        let urls = &mut self.urls;
        let factory = &self.factory;
        let (id, created) = self
            .registry
            .get_or_create(&name, || (urls.resolve(&name), factory.create(&name)));

        if created {
            if let Some(handle) = self.registry.lookup_mut(&name) {
                handle.coord = Some(coord);
            }
            self.scheduler.submit(id, name);
            self.tick();
        }
        id
    }

    /// Re-resolve `name`'s URL with `token` and fetch it again unless a
    /// request is already queued or running. Returns whether a fetch was queued.
    pub fn update_named_tile(&mut self, name: &TileName, token: Option<&str>) -> bool {
        if self.registry.lookup(name).is_none() {
            return false;
        }

        let url = match token {
            Some(_) => self.urls.refresh(name, token),
            None => self.urls.resolve(name),
        };
        if let Some(handle) = self.registry.lookup_mut(name) {
            handle.url = url;
        }

        match self.registry.requeue(name) {
            Some(id) => {
                self.scheduler.submit(id, name.clone());
                self.tick();
                true
            }
            None => {
                log::debug!("Tile {} already pending, refresh not queued", name);
                false
            }
        }
    }

    /// Start as many queued fetches as the concurrency limit allows.
    fn tick(&mut self) {
        for admission in self.scheduler.advance() {
            match self.registry.mark_loading(admission.id, &admission.name) {
                Some(url) => self.loader.start(admission.id, admission.name, url),
                None => {
                    self.scheduler.settle(admission.id);
                }
            }
        }
    }

    /// Apply one completion: free the slot, settle the tile, refill slots.
    pub fn handle_event(&mut self, event: FetchEvent) {
        self.scheduler.settle(event.id);

        let tracked = match &event.outcome {
            FetchOutcome::Loaded(data) => {
                log::debug!(
                    "Tile {} loaded ({} bytes in {:?})",
                    event.name,
                    data.len(),
                    event.elapsed
                );
                self.registry.mark_loaded(event.id, &event.name, data.clone())
            }
            FetchOutcome::Failed(reason) => {
                log::warn!("Tile {} failed from {}: {}", event.name, event.url, reason);
                self.registry.mark_errored(event.id, &event.name, reason)
            }
        };
        if !tracked {
            log::debug!("Dropping result for untracked tile {} {}", event.name, event.id);
        }

        self.tick();
    }

    /// Apply every completion that has arrived so far. Returns how many.
    pub fn poll(&mut self) -> usize {
        let events = self.loader.try_recv_events();
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    /// Block until nothing is queued or in flight, or `timeout` elapses.
    pub fn run_until_idle(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.scheduler.is_idle() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }
            if let Some(event) = self.loader.recv_event_timeout(remaining) {
                self.handle_event(event);
            }
        }
    }

    /// Stop tracking one tile. Its render target follows the eviction policy.
    pub fn remove_tile(&mut self, name: &TileName) -> bool {
        match self.registry.remove(name) {
            Some(id) => {
                self.scheduler.forget(id);
                true
            }
            None => false,
        }
    }

    /// Viewport changed to show `visible`. Returns how many tiles were
    /// dropped, always zero when eviction is disabled.
    pub fn prune(&mut self, visible: &[TileCoord]) -> usize {
        let names: HashSet<TileName> = visible.iter().map(|c| self.tile_name(c)).collect();
        let removed = self.registry.prune_outside(&names);
        for id in &removed {
            self.scheduler.forget(*id);
        }
        removed.len()
    }

    /// Layer removed from the map: clear all bookkeeping and return the
    /// render targets to the caller. Running fetches hold their slots until
    /// their completions arrive, which are then dropped.
    pub fn teardown(&mut self) -> Vec<Box<dyn RenderTarget>> {
        log::debug!(
            "Tearing down layer {} ({} tracked, {} in flight)",
            self.id,
            self.registry.len(),
            self.scheduler.in_flight_len()
        );
        self.scheduler.clear_queue();
        self.urls.invalidate_all();
        self.registry.teardown()
    }

    pub fn state_of(&self, name: &TileName) -> Option<TileState> {
        self.registry.lookup(name).map(|handle| handle.state)
    }

    pub fn handle(&self, name: &TileName) -> Option<&TileHandle> {
        self.registry.lookup(name)
    }

    pub fn registry(&self) -> &TileRegistry {
        &self.registry
    }

    pub fn in_flight_count(&self) -> usize {
        self.scheduler.in_flight_len()
    }

    pub fn queued_count(&self) -> usize {
        self.scheduler.queued_len()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn tile_loader(&self) -> &TileLoader {
        &self.loader
    }
}

impl std::fmt::Debug for TileLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLayer")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
