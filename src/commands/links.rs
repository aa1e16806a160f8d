use anyhow::{Context, Result};
use chrono::Utc;

use revisit::config::Config;
use revisit::metrics;
use revisit::models::LinkId;
use revisit::parser::UNKNOWN_FILENAME;
use revisit::scheduler::clock::remaining_visits;
use revisit::scheduler::compute_access_times;
use revisit::storage::{open_store, SharedLinkStore};
use revisit::utils::truncate_text;

use super::build_scheduler;

/// Track a URL, or every file of a folder page with `--expand`
///
/// File name and details are read right away; a page that cannot be read
/// leaves them for the first visit.
pub async fn add(config: Config, url: String, expand: bool) -> Result<()> {
    let store = open_store(&config.database)?;
    let scheduler = build_scheduler(&config, store.clone())?;

    let urls = if expand {
        let files = scheduler
            .expand_listing(&url)
            .await
            .with_context(|| format!("Failed to load folder page {url}"))?;
        if files.is_empty() {
            println!("No file links found on {url}, adding it as a single link");
            vec![url]
        } else {
            println!("Found {} file links on folder page", files.len());
            files
        }
    } else {
        vec![url]
    };

    let now = Utc::now();
    for url in &urls {
        let id = store
            .add_link(url, now, config.initial_cycle_length())
            .with_context(|| format!("Failed to add {url}"))?;
        tracing::info!(link_id = id, url = %url, "Link tracked");

        match scheduler.refresh_metadata(id).await {
            Ok(meta) => println!("  [{id}] {url}  {}", meta.filename),
            Err(e) => {
                tracing::warn!(link_id = id, error = %e, "Could not read link info");
                println!("  [{id}] {url}");
            }
        }
    }

    Ok(())
}

/// Stop tracking a link and drop its history
pub fn remove(config: Config, id: LinkId) -> Result<()> {
    let store = open_store(&config.database)?;
    if store.delete_link(id)? {
        println!("Removed link {id}");
    } else {
        println!("Link {id} not found");
    }
    Ok(())
}

/// Pause or resume a link
pub fn set_active(config: Config, id: LinkId, active: bool) -> Result<()> {
    let store = open_store(&config.database)?;
    store
        .set_active(id, active)
        .with_context(|| format!("Failed to update link {id}"))?;
    println!("Link {id} {}", if active { "resumed" } else { "paused" });
    Ok(())
}

/// Print every tracked link with its cycle progress
pub fn list(config: Config, json: bool) -> Result<()> {
    let store = open_store(&config.database)?;
    let scheduler = build_scheduler(&config, store)?;
    let now = Utc::now();
    let links = scheduler.list_links(now).context("Failed to read links")?;
    let quota = config.engine.quota;

    if json {
        println!("{}", serde_json::to_string_pretty(&links)?);
        return Ok(());
    }

    if links.is_empty() {
        println!("No links tracked");
        return Ok(());
    }

    println!(
        "{:>5}  {:<7} {:>5} {:>9} {:>7} {:>7}  {:<32} URL",
        "ID", "STATE", "CYCLE", "VIEWS", "DAYS", "TOTAL", "FILE"
    );
    for link in &links {
        println!(
            "{:>5}  {:<7} {:>5} {:>9} {:>7.1} {:>7}  {:<32} {}",
            link.id,
            if link.active { "active" } else { "paused" },
            link.cycle_number,
            format!("{}/{}", link.period_views, quota),
            link.days_remaining(now),
            link.total_views,
            truncate_text(link.filename.as_deref().unwrap_or(UNKNOWN_FILENAME), 32),
            link.url
        );
    }
    println!("\n{} links", links.len());
    Ok(())
}

/// Print the access times of a link's current cycle
pub fn schedule(config: Config, id: LinkId, limit: usize) -> Result<()> {
    let store = open_store(&config.database)?;
    let link = find_link(&store, id)?;
    let quota = config.engine.quota;

    let times = compute_access_times(link.cycle_start, link.cycle_end, quota, config.engine.skew);

    println!("Schedule for link {id}");
    println!("=====================");
    println!("  URL: {}", link.url);
    println!(
        "  Cycle {}: {} -> {}",
        link.cycle_number, link.cycle_start, link.cycle_end
    );
    println!(
        "  Views: {}/{} ({} remaining)",
        link.period_views,
        quota,
        remaining_visits(&link, quota)
    );
    println!();

    let next = link.period_views as usize;
    let start = next.saturating_sub(1);
    for (slot, at) in times.iter().enumerate().skip(start).take(limit) {
        let marker = match slot.cmp(&next) {
            std::cmp::Ordering::Less => "done",
            std::cmp::Ordering::Equal => "next",
            std::cmp::Ordering::Greater => "",
        };
        println!("  #{:<4} {}  {}", slot + 1, at.format("%Y-%m-%d %H:%M:%S UTC"), marker);
    }

    if next >= times.len() {
        println!("  Quota reached, next cycle starts after {}", link.cycle_end);
    }
    Ok(())
}

/// Visit a link right away
pub async fn visit(config: Config, id: LinkId) -> Result<()> {
    let store = open_store(&config.database)?;
    let scheduler = build_scheduler(&config, store)?;

    let outcome = scheduler
        .visit_now(id)
        .await
        .with_context(|| format!("Visit of link {id} failed"))?;

    println!("Visited link {id}");
    println!("  Proxy: {}", outcome.selection);
    println!(
        "  Status: {}",
        outcome
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(error) = &outcome.error {
        println!("  Error: {error}");
    }
    println!(
        "  Views: {} this cycle, {} total",
        outcome.record.period_views, outcome.record.total_views
    );
    Ok(())
}

/// Print the most recent access log entries of a link
pub fn logs(config: Config, id: LinkId, limit: usize, json: bool) -> Result<()> {
    let store = open_store(&config.database)?;
    let link = find_link(&store, id)?;
    let entries = store.access_logs(id, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Access log for link {id} ({})", link.url);
    if entries.is_empty() {
        println!("  No visits yet");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "  {}  cycle {:<3} {:<4} {:<28} {}",
            entry.access_time.format("%Y-%m-%d %H:%M:%S"),
            entry.cycle,
            entry
                .status_code
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            truncate_text(entry.proxy_used.as_deref().unwrap_or("direct"), 28),
            entry.error_message.as_deref().unwrap_or("ok")
        );
    }
    Ok(())
}

/// Print the latest metrics snapshot of a running scheduler
pub fn print_metrics(config: Config) -> Result<()> {
    let path = &config.metrics.snapshot_path;
    let snapshot = metrics::read_snapshot(path)
        .with_context(|| format!("Failed to read metrics snapshot {}", path.display()))?;

    match snapshot {
        Some(text) => print!("{text}"),
        None => println!(
            "No metrics snapshot at {}, start `revisit run` to produce one",
            path.display()
        ),
    }
    Ok(())
}

fn find_link(store: &SharedLinkStore, id: LinkId) -> Result<revisit::Link> {
    store
        .get_link(id)?
        .with_context(|| format!("Link {id} not found"))
}
