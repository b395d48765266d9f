use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::types::TileHandleId;
use crate::core::config::SchedulerConfig;
use crate::core::geo::TileName;
use crate::prelude::{Arc, Duration, HashSet, Instant, VecDeque};
use crate::runtime::async_utils::with_timeout;
use crate::{Error, Result};

/// Anything that can turn a tile URL into image bytes.
///
/// Implemented by the plain HTTP client and by the revalidating cache, so a
/// layer can be pointed at either.
#[async_trait::async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Arc<Vec<u8>>>;
}

/// How a fetch settled
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Loaded(Arc<Vec<u8>>),
    Failed(String),
}

impl FetchOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, FetchOutcome::Loaded(_))
    }
}

/// Completion message for one fetch, consumed by the layer to drive the
/// tile state machine.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub id: TileHandleId,
    pub name: TileName,
    pub url: String,
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
}

/// A tile waiting for, or holding, a concurrency slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub id: TileHandleId,
    pub name: TileName,
}

/// Bounded-concurrency FIFO load queue.
///
/// Pure bookkeeping: it decides which tiles may start, the caller starts
/// them. A handle is at most once in the queue or the in-flight set.
#[derive(Debug)]
pub struct LoadScheduler {
    queue: VecDeque<Admission>,
    queued: HashSet<TileHandleId>,
    in_flight: HashSet<TileHandleId>,
    max_concurrent: usize,
}

impl LoadScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::default(),
            in_flight: HashSet::default(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Append to the queue unless already queued or in flight.
    pub fn submit(&mut self, id: TileHandleId, name: TileName) -> bool {
        if self.queued.contains(&id) || self.in_flight.contains(&id) {
            return false;
        }
        self.queued.insert(id);
        self.queue.push_back(Admission { id, name });
        true
    }

    /// Admit queued tiles in FIFO order while slots are free.
    pub fn advance(&mut self) -> Vec<Admission> {
        let mut admitted = Vec::new();
        while self.in_flight.len() < self.max_concurrent {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&next.id);
            self.in_flight.insert(next.id);
            admitted.push(next);
        }
        admitted
    }

    /// Free the slot held by `id`. Returns `false` if it held none.
    pub fn settle(&mut self, id: TileHandleId) -> bool {
        self.in_flight.remove(&id)
    }

    /// Drop a queued handle. An in-flight fetch keeps its slot until it
    /// settles, there is no cancellation.
    pub fn forget(&mut self, id: TileHandleId) -> bool {
        if !self.queued.remove(&id) {
            return false;
        }
        self.queue.retain(|entry| entry.id != id);
        true
    }

    pub fn is_queued(&self, id: TileHandleId) -> bool {
        self.queued.contains(&id)
    }

    pub fn is_in_flight(&self, id: TileHandleId) -> bool {
        self.in_flight.contains(&id)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Drop everything still waiting for a slot. Running fetches keep their
    /// slots until [`LoadScheduler::settle`], since they cannot be stopped.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.queued.clear();
    }
}

/// Issues tile fetches on the runtime and reports completions over a channel.
pub struct TileLoader {
    fetcher: Arc<dyn TileFetcher>,
    event_tx: Sender<FetchEvent>,
    event_rx: Receiver<FetchEvent>,
    config: SchedulerConfig,
}

impl TileLoader {
    pub fn new(fetcher: Arc<dyn TileFetcher>, config: SchedulerConfig) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            fetcher,
            event_tx,
            event_rx,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start fetching `url` for the handle. Completion arrives as a
    /// [`FetchEvent`]; a failure never stops other fetches.
    pub fn start(&self, id: TileHandleId, name: TileName, url: String) {
        let fetcher = self.fetcher.clone();
        let event_tx = self.event_tx.clone();
        let timeout = self.config.fetch_timeout;

        log::debug!("Starting fetch for tile {} {}", name, id);

        crate::runtime::spawn(async move {
            let started = Instant::now();
            let outcome = match with_timeout(timeout, fetcher.fetch(&url)).await {
                Some(Ok(data)) => FetchOutcome::Loaded(data),
                Some(Err(e)) => FetchOutcome::Failed(e.to_string()),
                None => FetchOutcome::Failed(Error::Timeout(timeout.unwrap_or_default()).to_string()),
            };

            let event = FetchEvent {
                id,
                name,
                url,
                outcome,
                elapsed: started.elapsed(),
            };
            // The layer may already be gone; nothing to report to then.
            let _ = event_tx.send(event);
        });
    }

    /// Drain completed fetches without blocking
    pub fn try_recv_events(&self) -> Vec<FetchEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Block up to `timeout` for the next completion
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<FetchEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl std::fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLoader")
            .field("config", &self.config)
            .field("pending_events", &self.event_rx.len())
            .finish()
    }
}
