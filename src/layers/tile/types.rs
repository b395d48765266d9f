//! Core data types for tile layer functionality

use crate::core::geo::{TileCoord, TileName};
use crate::prelude::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a tile handle: `Queued -> Loading -> {Loaded, Errored}`.
///
/// Only an explicit refresh moves a settled tile back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    Queued,
    Loading,
    Loaded,
    Errored,
}

impl TileState {
    /// Queued or loading: a network request for this tile is pending.
    pub fn is_pending(self) -> bool {
        matches!(self, TileState::Queued | TileState::Loading)
    }

    pub fn is_settled(self) -> bool {
        !self.is_pending()
    }
}

/// Identity of one handle. A name that is removed and requested again gets a
/// fresh id, so late completions for the old handle are recognisable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileHandleId(u64);

impl TileHandleId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TileHandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// On-screen drawable produced by the presentation layer for one tile.
pub trait RenderTarget: Send {
    /// The tile image arrived.
    fn on_load(&mut self, data: Arc<Vec<u8>>);

    /// The fetch failed; show a placeholder or nothing.
    fn on_error(&mut self, reason: &str);

    /// The tile is being dropped from the map.
    fn detach(&mut self) {}
}

/// Creates a render target per tile name.
pub trait RenderTargetFactory: Send + Sync {
    fn create(&self, name: &TileName) -> Box<dyn RenderTarget>;
}

impl<F> RenderTargetFactory for F
where
    F: Fn(&TileName) -> Box<dyn RenderTarget> + Send + Sync,
{
    fn create(&self, name: &TileName) -> Box<dyn RenderTarget> {
        self(name)
    }
}

/// Render target that simply keeps the last received image in memory.
#[derive(Debug, Default, Clone)]
pub struct ImageBuffer {
    pub data: Option<Arc<Vec<u8>>>,
    pub error: Option<String>,
}

impl RenderTarget for ImageBuffer {
    fn on_load(&mut self, data: Arc<Vec<u8>>) {
        self.data = Some(data);
        self.error = None;
    }

    fn on_error(&mut self, reason: &str) {
        self.error = Some(reason.to_string());
    }
}

/// Factory for [`ImageBuffer`] targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageBufferFactory;

impl RenderTargetFactory for ImageBufferFactory {
    fn create(&self, _name: &TileName) -> Box<dyn RenderTarget> {
        Box::new(ImageBuffer::default())
    }
}

/// A tracked tile: its name, where to fetch it, where it is in its lifecycle
/// and the render target it draws into.
pub struct TileHandle {
    pub id: TileHandleId,
    pub name: TileName,
    pub coord: Option<TileCoord>,
    pub url: String,
    pub state: TileState,
    pub element: Box<dyn RenderTarget>,
    pub load_count: u32,
    pub last_error: Option<String>,
}

impl TileHandle {
    pub fn new(name: TileName, url: String, element: Box<dyn RenderTarget>) -> Self {
        Self {
            id: TileHandleId::next(),
            name,
            coord: None,
            url,
            state: TileState::Queued,
            element,
            load_count: 0,
            last_error: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state == TileState::Loaded
    }
}

impl std::fmt::Debug for TileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("load_count", &self.load_count)
            .finish()
    }
}
