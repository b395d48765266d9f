use dyntile::layers::tile::types::ImageBufferFactory;
use dyntile::{LayerConfig, PrefixTileSource, TileCoord, TileFetcher, TileLayer, TileState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Load scheduler behaviour observed through a layer and a fake network
#[cfg(test)]
mod scheduler_tests {
    use super::*;

    /// Records how many fetches run at once. URLs containing `fail_on` error out.
    #[derive(Default)]
    struct CountingFetcher {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl TileFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> dyntile::Result<Arc<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            match self.fail_on {
                Some(pattern) if url.contains(pattern) => Err(dyntile::Error::TileFetch {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                }),
                _ => Ok(Arc::new(url.as_bytes().to_vec())),
            }
        }
    }

    fn layer(max_concurrent: usize, fetcher: Arc<CountingFetcher>) -> TileLayer {
        let config = LayerConfig::builder()
            .prefix("world/flat")
            .image_format("png")
            .max_zoom(5)
            .max_concurrent_loads(max_concurrent)
            .build()
            .unwrap();
        TileLayer::new(
            "flat",
            config,
            Arc::new(PrefixTileSource::default()),
            fetcher,
            Arc::new(ImageBufferFactory),
        )
    }

    /// One tile per 32-block cell at full zoom
    fn cell(i: i64) -> TileCoord {
        TileCoord::new(i * 32, 0, 5)
    }

    /// In-flight fetches never exceed the configured limit
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut layer = layer(3, fetcher.clone());

        for i in 0..10 {
            layer.create_tile(cell(i));
            assert!(layer.in_flight_count() <= 3);
        }
        assert_eq!(layer.in_flight_count(), 3);
        assert_eq!(layer.queued_count(), 7);

        layer.run_until_idle(Duration::from_secs(10)).unwrap();

        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 10);
        for i in 0..10 {
            let name = layer.tile_name(&cell(i));
            assert_eq!(layer.state_of(&name), Some(TileState::Loaded));
        }
    }

    /// Requesting the same name while it is pending issues one fetch
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_requests_share_one_fetch() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut layer = layer(2, fetcher.clone());

        let first = layer.create_tile(TileCoord::new(3, 4, 5));
        let second = layer.create_tile(TileCoord::new(5, 6, 5));
        assert_eq!(first, second);

        layer.run_until_idle(Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Loaded tiles are not fetched again by a repeat request either.
        layer.create_tile(TileCoord::new(3, 4, 5));
        layer.run_until_idle(Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    /// A failing tile settles as errored and does not hold up the rest
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_is_isolated() {
        let fetcher = Arc::new(CountingFetcher {
            fail_on: Some("/1_0.png"),
            ..Default::default()
        });
        let mut layer = layer(1, fetcher.clone());

        for i in 0..4 {
            layer.create_tile(cell(i));
        }
        layer.run_until_idle(Duration::from_secs(5)).unwrap();

        let failed = layer.tile_name(&cell(1));
        assert_eq!(layer.state_of(&failed), Some(TileState::Errored));
        assert!(layer.handle(&failed).unwrap().last_error.as_deref().unwrap().contains("404"));

        for i in [0, 2, 3] {
            let name = layer.tile_name(&cell(i));
            assert_eq!(layer.state_of(&name), Some(TileState::Loaded));
        }
        assert!(layer.is_idle());
    }

    /// After teardown a running fetch still counts against the limit
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_limit_holds_across_teardown() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut layer = layer(1, fetcher.clone());

        layer.create_tile(cell(0));
        layer.create_tile(cell(1));
        assert_eq!(layer.teardown().len(), 2);

        layer.create_tile(cell(0));
        assert_eq!(layer.in_flight_count(), 1);
        assert_eq!(layer.queued_count(), 1);

        layer.run_until_idle(Duration::from_secs(5)).unwrap();

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        let name = layer.tile_name(&cell(0));
        assert_eq!(layer.state_of(&name), Some(TileState::Loaded));
        assert_eq!(layer.handle(&name).unwrap().load_count, 1);
    }

    /// A refresh re-fetches with the token in the URL; a failed tile can be refreshed too
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_targeted_refresh() {
        let fetcher = Arc::new(CountingFetcher::default());
        let mut layer = layer(2, fetcher.clone());
        let name = layer.tile_name(&cell(0));

        layer.create_tile(cell(0));
        layer.run_until_idle(Duration::from_secs(5)).unwrap();

        assert!(layer.update_named_tile(&name, Some("1700000000")));
        assert!(!layer.update_named_tile(&name, Some("1700000001")));
        layer.run_until_idle(Duration::from_secs(5)).unwrap();

        let handle = layer.handle(&name).unwrap();
        assert_eq!(handle.load_count, 2);
        assert!(handle.url.ends_with("?timestamp=1700000001"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    /// With a fetch timeout configured, a hung fetch errors out and frees its slot
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetch_timeout_frees_slot() {
        struct Hang;

        #[async_trait::async_trait]
        impl TileFetcher for Hang {
            async fn fetch(&self, _url: &str) -> dyntile::Result<Arc<Vec<u8>>> {
                futures::future::pending().await
            }
        }

        let config = LayerConfig::builder()
            .prefix("world/flat")
            .image_format("png")
            .max_zoom(5)
            .max_concurrent_loads(1)
            .fetch_timeout(Duration::from_millis(30))
            .build()
            .unwrap();
        let mut layer = TileLayer::new(
            "flat",
            config,
            Arc::new(PrefixTileSource::default()),
            Arc::new(Hang),
            Arc::new(ImageBufferFactory),
        );

        layer.create_tile(cell(0));
        layer.create_tile(cell(1));
        layer.run_until_idle(Duration::from_secs(5)).unwrap();

        for i in 0..2 {
            let name = layer.tile_name(&cell(i));
            assert_eq!(layer.state_of(&name), Some(TileState::Errored));
        }
    }
}
