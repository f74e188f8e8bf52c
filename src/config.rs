//! Configuration management for the viewcore session driver.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `VIEWCORE_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use viewcore::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Command::Pan(args) => println!("{} workers", args.core.workers),
//!     Command::Playback(args) => println!("ring of {}", args.core.ring_capacity),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `VIEWCORE_WORKERS` - Render worker pool size (default: 4)
//! - `VIEWCORE_CACHE_BUDGET_MB` - Projection cache budget in MiB (default: 1024)
//! - `VIEWCORE_PYRAMID_SHARE` - Fraction of the budget for pyramid levels (default: 0.25)
//! - `VIEWCORE_RING_CAPACITY` - Playback ring capacity in frames (default: 64)
//! - `VIEWCORE_PREFETCH_BLOCK_SIZE` - Frames per prefetch read (default: 8)
//! - `VIEWCORE_PREFETCH_MAX_INFLIGHT` - Blocks kept ahead of playback (default: 4)
//! - `VIEWCORE_RENDER_TIMEOUT_MS` - Cancel renders running longer than this (default: off)

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::cache::{DEFAULT_CACHE_BUDGET, DEFAULT_PYRAMID_SHARE};
use crate::playback::{
    PrefetchConfig, DEFAULT_PREFETCH_BLOCK_SIZE, DEFAULT_PREFETCH_MAX_INFLIGHT,
    DEFAULT_RING_CAPACITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default render worker count.
pub const DEFAULT_WORKERS: usize = 4;

/// Default cache budget in MiB.
pub const DEFAULT_CACHE_BUDGET_MB: usize = DEFAULT_CACHE_BUDGET / (1024 * 1024);

/// Default simulated image edge in pixels.
pub const DEFAULT_IMAGE_SIZE: u32 = 512;

/// Default number of simulated timeline frames.
pub const DEFAULT_FRAMES: u64 = 32;

// =============================================================================
// CLI Arguments
// =============================================================================

/// viewcore - rendering concurrency and cache core for image viewers.
///
/// Drives simulated sessions against the job pool, projection cache and
/// playback prefetcher.
#[derive(Parser, Debug, Clone)]
#[command(name = "viewcore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Simulate a pan/zoom session against the view pipeline
    Pan(PanArgs),

    /// Simulate playback through the block prefetcher
    Playback(PlaybackArgs),
}

impl Command {
    /// Shared settings of whichever subcommand was chosen.
    pub fn core(&self) -> &CoreConfig {
        match self {
            Command::Pan(args) => &args.core,
            Command::Playback(args) => &args.core,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PanArgs {
    #[command(flatten)]
    pub core: CoreConfig,

    /// Edge length of the simulated square image.
    #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE)]
    pub image_size: u32,

    /// Number of simulated timeline frames.
    #[arg(long, default_value_t = DEFAULT_FRAMES)]
    pub frames: u64,

    /// Number of pan steps to simulate.
    #[arg(long, default_value_t = 16)]
    pub steps: u32,
}

#[derive(Args, Debug, Clone)]
pub struct PlaybackArgs {
    #[command(flatten)]
    pub core: CoreConfig,

    /// Edge length of the simulated square image.
    #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE)]
    pub image_size: u32,

    /// Number of simulated timeline frames.
    #[arg(long, default_value_t = DEFAULT_FRAMES)]
    pub frames: u64,

    /// Number of frames to play.
    #[arg(long, default_value_t = 100)]
    pub play: u64,

    /// Wrap to the first frame at the end of the timeline.
    #[arg(long, default_value_t = false)]
    pub looping: bool,
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CoreConfig {
    // =========================================================================
    // Job Pool
    // =========================================================================
    /// Number of render workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "VIEWCORE_WORKERS")]
    pub workers: usize,

    /// Cancel renders still running after this many milliseconds.
    #[arg(long, env = "VIEWCORE_RENDER_TIMEOUT_MS")]
    pub render_timeout_ms: Option<u64>,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Projection cache budget in MiB.
    #[arg(long, default_value_t = DEFAULT_CACHE_BUDGET_MB, env = "VIEWCORE_CACHE_BUDGET_MB")]
    pub cache_budget_mb: usize,

    /// Fraction of the cache budget reserved for pyramid levels.
    #[arg(long, default_value_t = DEFAULT_PYRAMID_SHARE, env = "VIEWCORE_PYRAMID_SHARE")]
    pub pyramid_share: f64,

    // =========================================================================
    // Playback Configuration
    // =========================================================================
    /// Playback ring buffer capacity in frames.
    #[arg(long, default_value_t = DEFAULT_RING_CAPACITY, env = "VIEWCORE_RING_CAPACITY")]
    pub ring_capacity: usize,

    /// Frames read per prefetch block.
    #[arg(long, default_value_t = DEFAULT_PREFETCH_BLOCK_SIZE, env = "VIEWCORE_PREFETCH_BLOCK_SIZE")]
    pub prefetch_block_size: usize,

    /// Blocks kept buffered ahead of playback.
    #[arg(long, default_value_t = DEFAULT_PREFETCH_MAX_INFLIGHT, env = "VIEWCORE_PREFETCH_MAX_INFLIGHT")]
    pub prefetch_max_inflight: usize,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CoreConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        if self.cache_budget_mb == 0 {
            return Err("cache_budget_mb must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.pyramid_share) {
            return Err(format!(
                "pyramid_share must be in [0, 1), got {}",
                self.pyramid_share
            ));
        }

        if self.ring_capacity == 0 {
            return Err("ring_capacity must be greater than 0".to_string());
        }
        if self.prefetch_block_size == 0 {
            return Err("prefetch_block_size must be greater than 0".to_string());
        }
        if self.prefetch_max_inflight == 0 {
            return Err("prefetch_max_inflight must be greater than 0".to_string());
        }
        if self.prefetch_block_size > self.ring_capacity {
            return Err(format!(
                "prefetch_block_size ({}) cannot exceed ring_capacity ({})",
                self.prefetch_block_size, self.ring_capacity
            ));
        }

        if self.render_timeout_ms == Some(0) {
            return Err("render_timeout_ms must be greater than 0 when set".to_string());
        }

        Ok(())
    }

    /// Cache budget in bytes.
    pub fn cache_budget_bytes(&self) -> usize {
        self.cache_budget_mb.saturating_mul(1024 * 1024)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_ms.map(Duration::from_millis)
    }

    pub fn prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig::new(self.prefetch_block_size, self.prefetch_max_inflight)
    }
}

// =============================================================================
// Tests
// =============================================================================
