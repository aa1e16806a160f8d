//! Access scheduling and proxy rotation
//!
//! Each tracked link gets a fixed number of visits per cycle. The visits are
//! spread over the cycle window along a decay curve, dense at the start and
//! sparse at the end, and every visit goes out through a proxy that has not
//! served the same link within the cooldown window.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            │               Scheduler                  │
//!  tick ───▶ │  clock ──▶ distribution ──▶ rotation     │
//!            │ (rollover)   (due time)     (proxy)      │
//!            └───────┬──────────────┬──────────┬────────┘
//!                    │              │          │
//!                    ▼              ▼          ▼
//!               LinkStore        Fetcher   MetadataExtractor
//! ```
//!
//! # Modules
//!
//! - [`clock`] - Cycle windows, quota checks and lazy rollover
//! - [`distribution`] - Decay curve and access-time computation
//! - [`rotation`] - Proxy pool and cooldown-aware selection
//! - [`engine`] - The tick loop and the visit itself
//!
//! # Quick Start
//!
//! ```ignore
//! use revisit::scheduler::{EngineSettings, Scheduler};
//!
//! let settings = EngineSettings::from_config(&config)?;
//! let mut scheduler = Scheduler::builder(settings, store, fetcher, extractor)
//!     .proxy_pool(ProxyPool::from_config(&config.proxies))
//!     .build()?;
//!
//! let (tx, rx) = tokio::sync::watch::channel(false);
//! scheduler.run(rx).await?;
//! ```
//!
//! # Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `tick_interval_secs` | 60 | Seconds between ticks |
//! | `quota` | 100 | Visits per cycle |
//! | `initial_cycle_days` | 45 | First cycle of a new link |
//! | `rollover_cycle_days` | 45 | Every later cycle |
//! | `proxy_cooldown_hours` | 24 | Proxy reuse window per link |
//! | `skew` | 3.0 | Decay curve constant |

pub mod clock;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod rotation;

// Re-export main types
pub use clock::CyclePolicy;
pub use distribution::{compute_access_times, next_due_time, DecayCurve, DEFAULT_SKEW};
pub use engine::{EngineSettings, Scheduler, SchedulerBuilder, TickReport, VisitOutcome};
pub use error::{SchedulerError, SchedulerResult};
pub use rotation::{ProxyPool, ProxySelection, ProxySelector};
