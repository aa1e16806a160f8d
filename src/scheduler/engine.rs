//! Scheduling loop
//!
//! Every tick reads the active links from the store, rolls expired cycles
//! over, and dispatches at most one visit per link whose next slot has come
//! due. Visits run as tokio tasks bounded by a semaphore; a link that still
//! has a visit in flight is skipped until that visit finishes.
//!
//! A visit is: pick a proxy, pause, load the link page, read its metadata,
//! find the download button, pause again, follow the button with the page as
//! Referer. Whatever happens, the attempt is written to the access log and
//! consumes its slot; the log row, the counter increment and the proxy usage
//! stamp are committed together. A visit that loses the counter race is not
//! logged, but its proxy is still stamped.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

use super::clock::{self, CyclePolicy};
use super::distribution::{next_due_time, DecayCurve};
use super::error::{SchedulerError, SchedulerResult};
use super::rotation::{ProxyPool, ProxySelection, ProxySelector};
use crate::config::Config;
use crate::crawler::headers::{build_browser_headers, build_download_headers};
use crate::crawler::{FetchRequest, FetchResponse, Fetcher};
use crate::error::{Error, RevisitErrorTrait};
use crate::metrics::{self, VisitResult};
use crate::models::{Link, LinkId, NewAccessLog, PageMetadata, VisitRecord};
use crate::parser::MetadataExtractor;
use crate::storage::SharedLinkStore;
use crate::utils::error::FetchError;
use crate::utils::{jitter, redact_proxy};

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the scheduling loop
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub policy: CyclePolicy,
    pub skew: f64,
    pub tick_interval: Duration,
    pub proxy_cooldown: chrono::Duration,
    pub request_timeout: Duration,
    pub pre_visit_delay_ms: RangeInclusive<u64>,
    pub pre_download_delay_ms: RangeInclusive<u64>,
    pub max_concurrent_visits: usize,
    pub shutdown_grace: Duration,
    pub user_agent: String,
}

impl EngineSettings {
    /// Derive settings from the application config
    pub fn from_config(config: &Config) -> SchedulerResult<Self> {
        let settings = Self {
            policy: CyclePolicy::from_config(config)?,
            skew: config.engine.skew,
            tick_interval: config.tick_interval(),
            proxy_cooldown: config.proxy_cooldown(),
            request_timeout: config.request_timeout(),
            pre_visit_delay_ms: config.pre_visit_delay(),
            pre_download_delay_ms: config.pre_download_delay(),
            max_concurrent_visits: config.engine.max_concurrent_visits,
            shutdown_grace: config.shutdown_grace(),
            user_agent: config.http.user_agent.clone(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> SchedulerResult<()> {
        if DecayCurve::new(self.skew).is_none() {
            return Err(SchedulerError::invalid_config("skew", "must be a positive number"));
        }
        if self.tick_interval.is_zero() {
            return Err(SchedulerError::invalid_config("tick_interval", "must be positive"));
        }
        if self.max_concurrent_visits == 0 {
            return Err(SchedulerError::invalid_config(
                "max_concurrent_visits",
                "must be at least 1",
            ));
        }
        if self.proxy_cooldown < chrono::Duration::zero() {
            return Err(SchedulerError::invalid_config("proxy_cooldown", "must not be negative"));
        }
        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        // Config::default() always satisfies the policy checks.
        let config = Config::default();
        Self {
            policy: CyclePolicy::default(),
            skew: config.engine.skew,
            tick_interval: config.tick_interval(),
            proxy_cooldown: config.proxy_cooldown(),
            request_timeout: config.request_timeout(),
            pre_visit_delay_ms: config.pre_visit_delay(),
            pre_download_delay_ms: config.pre_download_delay(),
            max_concurrent_visits: config.engine.max_concurrent_visits,
            shutdown_grace: config.shutdown_grace(),
            user_agent: config.http.user_agent,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What one tick did with the active links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub rolled_over: usize,
    pub skipped_quota: usize,
    pub not_due: usize,
    pub dispatched: usize,
    pub busy: usize,
    pub errors: usize,
}

/// Result of one visit that made it into the access log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitOutcome {
    pub link_id: LinkId,
    pub selection: ProxySelection,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub record: VisitRecord,
}

impl VisitOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What happened on the wire during a visit
struct Attempt {
    status: Option<u16>,
    metadata: Option<PageMetadata>,
    error: Option<Error>,
}

impl Attempt {
    fn failed(status: Option<u16>, metadata: Option<PageMetadata>, error: impl Into<Error>) -> Self {
        let error = error.into();
        Self {
            status: status.or_else(|| error.status()),
            metadata,
            error: Some(error),
        }
    }

    /// Text stored in the access log, without the unified error prefix
    fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|err| match err {
            Error::Fetch(e) => e.to_string(),
            Error::Extract(e) => e.to_string(),
            other => other.to_string(),
        })
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    store: SharedLinkStore,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn MetadataExtractor>,
    selector: ProxySelector,
    pool: ProxyPool,
    settings: EngineSettings,
    in_flight: Mutex<HashSet<LinkId>>,
    permits: Arc<Semaphore>,
    jitter_rng: Mutex<ChaCha8Rng>,
}

impl Shared {
    fn claim(self: &Arc<Self>, id: LinkId) -> Option<InFlightClaim> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(id).then(|| InFlightClaim {
            shared: Arc::clone(self),
            id,
        })
    }

    /// Load a page directly with browser headers, failing on non-2xx
    async fn load_page(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let request = FetchRequest::get(url, self.settings.request_timeout)
            .with_headers(build_browser_headers(&self.settings.user_agent));
        self.fetcher.fetch(request).await?.error_for_status()
    }

    fn pause(&self, range_ms: &RangeInclusive<u64>) -> Duration {
        let mut rng = self.jitter_rng.lock().unwrap_or_else(PoisonError::into_inner);
        jitter(&mut *rng, range_ms)
    }
}

/// Marks a link as having a visit in flight until dropped
struct InFlightClaim {
    shared: Arc<Shared>,
    id: LinkId,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    settings: EngineSettings,
    store: SharedLinkStore,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn MetadataExtractor>,
    pool: ProxyPool,
    seed: Option<u64>,
}

impl SchedulerBuilder {
    /// Proxies to rotate through (empty means direct connections)
    pub fn proxy_pool(mut self, pool: ProxyPool) -> Self {
        self.pool = pool;
        self
    }

    /// Seed proxy choice and jitter for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> SchedulerResult<Scheduler> {
        self.settings.validate()?;

        let (selector, jitter_rng) = match self.seed {
            Some(seed) => (
                ProxySelector::seeded(seed),
                ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (ProxySelector::from_entropy(), ChaCha8Rng::from_entropy()),
        };

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_visits));

        Ok(Scheduler {
            shared: Arc::new(Shared {
                store: self.store,
                fetcher: self.fetcher,
                extractor: self.extractor,
                selector,
                pool: self.pool,
                settings: self.settings,
                in_flight: Mutex::new(HashSet::new()),
                permits,
                jitter_rng: Mutex::new(jitter_rng),
            }),
            tasks: JoinSet::new(),
        })
    }
}

/// Periodic driver of link visits
pub struct Scheduler {
    shared: Arc<Shared>,
    tasks: JoinSet<SchedulerResult<VisitOutcome>>,
}

impl Scheduler {
    pub fn builder(
        settings: EngineSettings,
        store: SharedLinkStore,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            settings,
            store,
            fetcher,
            extractor,
            pool: ProxyPool::default(),
            seed: None,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Visits spawned and not yet collected
    pub fn pending_visits(&self) -> usize {
        self.tasks.len()
    }

    /// Evaluate every active link once and dispatch the visits that are due
    ///
    /// Returns as soon as the visits are spawned; they finish in the
    /// background. Per-link failures are counted in the report, only a failure
    /// to list the links fails the whole tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> SchedulerResult<TickReport> {
        let _timer = metrics::start_tick_timer();
        self.collect_finished();

        let settings = &self.shared.settings;
        let quota = settings.policy.quota;
        let mut report = TickReport::default();

        for link in self.shared.store.list_active_links()? {
            report.examined += 1;

            let link = if clock::is_cycle_expired(&link, now) {
                match self.roll_over(&link, now) {
                    Ok(Some((link, rolled))) => {
                        if rolled {
                            report.rolled_over += 1;
                        }
                        link
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(link_id = link.id, error = %e, "Rollover failed");
                        report.errors += 1;
                        continue;
                    }
                }
            } else {
                link
            };

            let Some(due) = next_due_time(&link, quota, settings.skew) else {
                report.skipped_quota += 1;
                continue;
            };
            if due > now {
                report.not_due += 1;
                continue;
            }

            let Some(claim) = self.shared.claim(link.id) else {
                tracing::debug!(link_id = link.id, "Visit still in flight, skipping");
                report.busy += 1;
                continue;
            };

            tracing::info!(
                link_id = link.id,
                url = %link.url,
                cycle = link.cycle_number,
                period_views = link.period_views,
                due = %due,
                "Dispatching visit"
            );

            let shared = Arc::clone(&self.shared);
            self.tasks.spawn(async move {
                let _permit = Arc::clone(&shared.permits)
                    .acquire_owned()
                    .await
                    .map_err(|e| SchedulerError::TaskFailed {
                        reason: e.to_string(),
                    })?;
                let _gauge = metrics::track_in_flight();
                let outcome = perform_visit(&shared, &link).await;
                drop(claim);
                outcome
            });
            report.dispatched += 1;
        }

        tracing::debug!(?report, "Tick evaluated");
        Ok(report)
    }

    /// Visit a link right away, ignoring its schedule
    ///
    /// The quota still applies, and a link with a visit in flight is refused.
    pub async fn visit_now(&self, id: LinkId) -> SchedulerResult<VisitOutcome> {
        let now = Utc::now();
        let link = self
            .shared
            .store
            .get_link(id)?
            .ok_or(SchedulerError::LinkNotFound { id })?;

        if !link.active {
            return Err(SchedulerError::LinkInactive { id });
        }

        let link = if clock::is_cycle_expired(&link, now) {
            match self.roll_over(&link, now)? {
                Some((link, _)) => link,
                None => return Err(SchedulerError::LinkNotFound { id }),
            }
        } else {
            link
        };

        let quota = self.shared.settings.policy.quota;
        if clock::is_quota_exhausted(&link, quota) {
            return Err(SchedulerError::QuotaExhausted { id, quota });
        }

        let _claim = self
            .shared
            .claim(id)
            .ok_or(SchedulerError::LinkBusy { id })?;

        tracing::info!(link_id = id, url = %link.url, "Forced visit");
        perform_visit(&self.shared, &link).await
    }

    /// Every tracked link, with expired cycles of active links rolled over first
    pub fn list_links(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Link>> {
        for link in self.shared.store.list_active_links()? {
            if clock::is_cycle_expired(&link, now) {
                self.roll_over(&link, now)?;
            }
        }
        Ok(self.shared.store.list_links()?)
    }

    /// Read a link's file name and details and store them
    ///
    /// Loads the page directly, without a proxy. This is not a visit: nothing
    /// is logged and no counter moves.
    pub async fn refresh_metadata(&self, id: LinkId) -> crate::error::Result<PageMetadata> {
        let link = self
            .shared
            .store
            .get_link(id)?
            .ok_or(SchedulerError::LinkNotFound { id })?;

        let page = self.shared.load_page(&link.url).await?;
        let meta = self.shared.extractor.extract(&page.body)?;
        self.shared
            .store
            .update_link_info(id, &meta.filename, &meta.details)?;

        tracing::info!(link_id = id, filename = %meta.filename, "Link info stored");
        Ok(meta)
    }

    /// File links listed on a folder page, empty if it is not a listing
    pub async fn expand_listing(&self, url: &str) -> crate::error::Result<Vec<String>> {
        let page = self.shared.load_page(url).await?;
        Ok(self
            .shared
            .extractor
            .listing_links(&page.body, &page.final_url))
    }

    /// Tick on the configured interval until `shutdown` flips to true
    ///
    /// On shutdown, in-flight visits get the grace period to finish and are
    /// aborted after that.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        let mut interval = tokio::time::interval(self.shared.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_secs = self.shared.settings.tick_interval.as_secs(),
            quota = self.shared.settings.policy.quota,
            proxies = self.shared.pool.len(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()) {
                        Ok(report) if report.dispatched > 0 || report.rolled_over > 0 => {
                            tracing::info!(
                                examined = report.examined,
                                dispatched = report.dispatched,
                                rolled_over = report.rolled_over,
                                busy = report.busy,
                                errors = report.errors,
                                "Tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    log_finished(result);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Wait for every spawned visit to finish and return their results
    pub async fn wait_idle(&mut self) -> Vec<SchedulerResult<VisitOutcome>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            results.push(flatten(result));
        }
        results
    }

    /// Drain in-flight visits within the grace period, then abort the rest
    pub async fn shutdown(&mut self) {
        let grace = self.shared.settings.shutdown_grace;
        let pending = self.tasks.len();
        if pending == 0 {
            tracing::info!("Scheduler stopped");
            return;
        }

        tracing::info!(pending, grace_secs = grace.as_secs(), "Waiting for in-flight visits");

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                log_finished(result);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "Grace period over, aborting visits");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        tracing::info!("Scheduler stopped");
    }

    /// Roll a link over, returning the current row and whether we did it
    fn roll_over(&self, link: &Link, now: DateTime<Utc>) -> SchedulerResult<Option<(Link, bool)>> {
        let store = &self.shared.store;
        let length = self.shared.settings.policy.rollover_length;

        match store.apply_rollover(link.id, link.cycle_number, now, length)? {
            Some(next) => {
                metrics::record_rollover();
                tracing::info!(
                    link_id = link.id,
                    cycle = next.cycle_number,
                    cycle_end = %next.cycle_end,
                    "Cycle rolled over"
                );
                Ok(Some((next, true)))
            }
            // Someone else advanced the cycle; work from the fresh row.
            None => Ok(store.get_link(link.id)?.map(|l| (l, false))),
        }
    }

    fn collect_finished(&mut self) {
        while let Some(Some(result)) = self.tasks.join_next().now_or_never() {
            log_finished(result);
        }
    }
}

fn flatten(
    result: Result<SchedulerResult<VisitOutcome>, JoinError>,
) -> SchedulerResult<VisitOutcome> {
    result.unwrap_or_else(|e| {
        Err(SchedulerError::TaskFailed {
            reason: e.to_string(),
        })
    })
}

fn log_finished(result: Result<SchedulerResult<VisitOutcome>, JoinError>) {
    match flatten(result) {
        Ok(outcome) => tracing::debug!(
            link_id = outcome.link_id,
            success = outcome.is_success(),
            period_views = outcome.record.period_views,
            "Visit finished"
        ),
        Err(e) if e.is_recoverable() => tracing::warn!(error = %e, "Visit dropped"),
        Err(e) => tracing::error!(error = %e, "Visit failed"),
    }
}

// ============================================================================
// Visit
// ============================================================================

async fn perform_visit(shared: &Shared, link: &Link) -> SchedulerResult<VisitOutcome> {
    let settings = &shared.settings;
    let since = Utc::now() - settings.proxy_cooldown;

    let recently_used = shared.store.recent_proxy_usage(link.id, since)?;
    let selection = shared.selector.select(link.id, &shared.pool, &recently_used);
    let proxy = selection.proxy().map(str::to_string);

    let attempt = attempt_visit(shared, link, proxy.clone()).await;
    let access_time = Utc::now();

    let entry = match attempt.error_message() {
        Some(message) => NewAccessLog::failed(access_time, proxy, attempt.status, message),
        None => NewAccessLog::answered(access_time, proxy, attempt.status.unwrap_or_default()),
    };

    let record = match shared.store.record_visit(
        link.id,
        link.period_views,
        settings.policy.quota,
        &entry,
    ) {
        Ok(record) => record,
        Err(e) => {
            if e.is_inconsistency() {
                metrics::record_store_conflict();
                metrics::record_visit(VisitResult::Conflict);
            }
            tracing::warn!(link_id = link.id, error = %e, "Visit not recorded");

            // The requests already went out through this proxy.
            if let Some(proxy) = &entry.proxy_used {
                if let Err(stamp) = shared.store.upsert_proxy_usage(link.id, proxy, access_time) {
                    tracing::warn!(link_id = link.id, error = %stamp, "Failed to stamp proxy usage");
                }
            }
            return Err(e.into());
        }
    };

    if let Some(meta) = &attempt.metadata {
        if let Err(e) = shared
            .store
            .update_link_info(link.id, &meta.filename, &meta.details)
        {
            tracing::warn!(link_id = link.id, error = %e, "Failed to store link info");
        }
    }

    match &attempt.error {
        None => {
            metrics::record_visit(VisitResult::Success);
            tracing::info!(
                link_id = link.id,
                proxy = %selection,
                status = ?attempt.status,
                period_views = record.period_views,
                "Visit recorded"
            );
        }
        Some(err) => {
            metrics::record_visit(VisitResult::Failed);
            tracing::warn!(
                link_id = link.id,
                proxy = %selection,
                status = ?attempt.status,
                category = %err.category(),
                error = %err,
                period_views = record.period_views,
                "Visit failed"
            );
        }
    }

    Ok(VisitOutcome {
        link_id: link.id,
        error: entry.error_message,
        status: entry.status_code,
        selection,
        record,
    })
}

async fn attempt_visit(shared: &Shared, link: &Link, proxy: Option<String>) -> Attempt {
    let settings = &shared.settings;

    tokio::time::sleep(shared.pause(&settings.pre_visit_delay_ms)).await;

    tracing::debug!(
        link_id = link.id,
        url = %link.url,
        proxy = ?proxy.as_deref().map(redact_proxy),
        "Loading link page"
    );

    let request = FetchRequest::get(&link.url, settings.request_timeout)
        .with_proxy(proxy.clone())
        .with_headers(build_browser_headers(&settings.user_agent));

    let page = match shared.fetcher.fetch(request).await {
        Ok(page) => page,
        Err(e) => return Attempt::failed(None, None, e),
    };
    let page_status = page.status;
    let page = match page.error_for_status() {
        Ok(page) => page,
        Err(e) => return Attempt::failed(Some(page_status), None, e),
    };

    let metadata = match shared.extractor.extract(&page.body) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(link_id = link.id, error = %e, "Could not read page metadata");
            None
        }
    };

    let target = match shared.extractor.download_target(&page.body, &page.final_url) {
        Ok(target) => target,
        Err(e) => return Attempt::failed(Some(page_status), metadata, e),
    };

    tokio::time::sleep(shared.pause(&settings.pre_download_delay_ms)).await;

    tracing::debug!(link_id = link.id, target = %target, "Following download button");

    let request = FetchRequest::get(target, settings.request_timeout)
        .with_proxy(proxy)
        .with_headers(build_download_headers(&settings.user_agent, &link.url))
        .without_body();

    match shared.fetcher.fetch(request).await {
        Ok(download) => {
            let status = download.status;
            match download.error_for_status() {
                Ok(_) => Attempt {
                    status: Some(status),
                    metadata,
                    error: None,
                },
                Err(e) => Attempt::failed(Some(status), metadata, e),
            }
        }
        Err(e) => Attempt::failed(None, metadata, e),
    }
}
