//! dyntile-app - tile cache warmer and maintenance tool
//!
//! Drives a tile layer through the revalidating disk cache to pre-fill it,
//! purges stale cache generations, and prints tile names for coordinates.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dyntile::layers::tile::{compute_tile_name, compute_tile_url};
use dyntile::layers::tile::types::ImageBufferFactory;
use dyntile::{
    ActivationPolicy, CacheConfig, CacheStorage, DiskStorage, HttpNetwork, LayerConfig, PrefixTileSource,
    RevalidatingCache, TileCoord, TileLayer, TileState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dyntile-app")]
#[command(about = "Warm and maintain a Dynmap tile cache", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a rectangle of tiles through the disk cache
    Warm {
        /// JSON layer options (prefix, image-format, mapzoomin, mapzoomout, ...)
        #[arg(long)]
        config: PathBuf,

        /// Server origin that `/tiles/...` paths are resolved against
        #[arg(long)]
        base_url: String,

        /// Cache directory
        #[arg(long)]
        storage: PathBuf,

        /// Cache generation to fill
        #[arg(long, default_value = "1")]
        generation: u32,

        /// Viewer zoom level
        #[arg(long)]
        zoom: i32,

        #[arg(long, allow_hyphen_values = true)]
        x0: i64,

        #[arg(long, allow_hyphen_values = true)]
        y0: i64,

        #[arg(long, allow_hyphen_values = true)]
        x1: i64,

        #[arg(long, allow_hyphen_values = true)]
        y1: i64,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Activate a generation and delete every other one
    Purge {
        #[arg(long)]
        storage: PathBuf,

        #[arg(long)]
        generation: u32,
    },

    /// Print the tile name and URL for a coordinate
    Name {
        #[arg(long)]
        config: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        x: i64,

        #[arg(long, allow_hyphen_values = true)]
        y: i64,

        #[arg(long)]
        z: i32,

        /// URL prefix tiles are served under
        #[arg(long, default_value = dyntile::constants::DEFAULT_TILE_PATH_PREFIX)]
        tile_base: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Args::parse().command {
        Command::Warm {
            config,
            base_url,
            storage,
            generation,
            zoom,
            x0,
            y0,
            x1,
            y1,
            timeout_secs,
        } => {
            let config = load_layer_config(&config)?;
            warm(
                config,
                base_url,
                storage,
                generation,
                zoom,
                (x0, y0, x1, y1),
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Command::Purge {
            storage,
            generation,
        } => purge(storage, generation).await,
        Command::Name {
            config,
            x,
            y,
            z,
            tile_base,
        } => {
            let config = load_layer_config(&config)?;
            let source = PrefixTileSource::new(tile_base);
            let name = compute_tile_name(&TileCoord::new(x, y, z), &config);
            println!("{}", name);
            println!("{}", compute_tile_url(&name, &source));
            Ok(())
        }
    }
}

fn load_layer_config(path: &Path) -> anyhow::Result<LayerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading layer config {}", path.display()))?;
    let options: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing layer config {}", path.display()))?;
    Ok(LayerConfig::from_options(&options)?)
}

async fn warm(
    config: LayerConfig,
    base_url: String,
    storage: PathBuf,
    generation: u32,
    zoom: i32,
    (x0, y0, x1, y1): (i64, i64, i64, i64),
    timeout: Duration,
) -> anyhow::Result<()> {
    if x0 > x1 || y0 > y1 {
        bail!("empty range: x {}..={}, y {}..={}", x0, x1, y0, y1);
    }

    let cache = Arc::new(RevalidatingCache::new(
        Arc::new(DiskStorage::new(storage)),
        Arc::new(HttpNetwork::with_origin(base_url)),
        CacheConfig::default().with_generation(generation),
    ));
    cache.install().await?;

    let mut layer = TileLayer::new(
        config.prefix.clone(),
        config,
        Arc::new(PrefixTileSource::default()),
        cache.clone(),
        Arc::new(ImageBufferFactory),
    );

    for x in x0..=x1 {
        for y in y0..=y1 {
            layer.create_tile(TileCoord::new(x, y, zoom));
        }
    }
    log::info!(
        "Warming {} tiles ({} in flight)",
        layer.registry().len(),
        layer.in_flight_count()
    );

    tokio::task::block_in_place(|| layer.run_until_idle(timeout))?;
    cache.settle().await;

    let mut loaded = 0;
    let mut errored = 0;
    for handle in layer.registry().iter() {
        match handle.state {
            TileState::Loaded => loaded += 1,
            TileState::Errored => {
                errored += 1;
                log::warn!(
                    "{}: {}",
                    handle.name,
                    handle.last_error.as_deref().unwrap_or("unknown error")
                );
            }
            TileState::Queued | TileState::Loading => {}
        }
    }

    let stored = cache
        .storage()
        .entry_count(&cache.generation().name())
        .await?;
    println!("loaded: {loaded}, errored: {errored}, cached entries: {stored}");
    Ok(())
}

async fn purge(storage: PathBuf, generation: u32) -> anyhow::Result<()> {
    let config = CacheConfig {
        activation: ActivationPolicy::WaitForRelease,
        ..CacheConfig::default().with_generation(generation)
    };
    let cache = RevalidatingCache::new(
        Arc::new(DiskStorage::new(storage)),
        Arc::new(HttpNetwork::new()),
        config,
    );
    cache.install().await?;
    let deleted = cache.activate().await?;
    log::debug!("{:?}", cache);

    if deleted.is_empty() {
        println!("nothing to purge");
    }
    for name in deleted {
        println!("deleted {name}");
    }
    Ok(())
}
