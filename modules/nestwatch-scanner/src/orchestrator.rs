//! The scheduling loop: every interval, snapshot active profiles, fan
//! scans out with bounded concurrency, and pipe results through
//! dedup → match → dispatch, recording run-level telemetry.
//!
//! Cycles never overlap — a tick that fires while the previous cycle is
//! still running is skipped. Within a cycle, profiles run through a
//! bounded worker pool and a profile's sources scan concurrently (they
//! hit different hosts). No lock is held across any adapter, store, or
//! delivery await.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nestwatch_common::{Config, ScanError, ScannedListing, SearchProfile, SentNotification, Source};
use nestwatch_store::{DedupIndex, NotificationLog, ProfileSource, ScanStateStore};

use crate::dispatch::Dispatcher;
use crate::matcher::MatchEngine;
use crate::run_log::{EventKind, RunLog};
use crate::sources::SourceAdapter;
use crate::stats::CycleStats;

/// Scalar knobs for the pipeline, split from [`Config`] so tests can
/// build them directly.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scan_interval: Duration,
    pub cycle_timeout: Duration,
    pub max_concurrent_profiles: usize,
    pub dedup_retention_days: i64,
    pub operator_recipient: Option<String>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            cycle_timeout: Duration::from_secs(config.cycle_timeout_secs),
            max_concurrent_profiles: config.max_concurrent_profiles,
            dedup_retention_days: config.dedup_retention_days,
            operator_recipient: config.operator_chat_id.clone(),
        }
    }
}

/// What one (profile, source) scan produced: stat deltas plus run-log
/// events, merged by the caller. Pair scans run concurrently, so they
/// never touch shared mutable state directly.
struct PairOutcome {
    stats: CycleStats,
    events: Vec<EventKind>,
}

impl PairOutcome {
    fn new() -> Self {
        Self {
            stats: CycleStats::default(),
            events: Vec::new(),
        }
    }
}

pub struct Orchestrator {
    profiles: Arc<dyn ProfileSource>,
    cursors: Arc<dyn ScanStateStore>,
    dedup: Arc<dyn DedupIndex>,
    log: Arc<dyn NotificationLog>,
    adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
    dispatcher: Arc<Dispatcher>,
    engine: MatchEngine,
    settings: PipelineSettings,
    /// Pairs parked after an auth expiry, until the process restarts with
    /// refreshed credentials.
    suspended: Mutex<HashSet<(Uuid, Source)>>,
    run_pool: Option<PgPool>,
}

impl Orchestrator {
    pub fn new(
        profiles: Arc<dyn ProfileSource>,
        cursors: Arc<dyn ScanStateStore>,
        dedup: Arc<dyn DedupIndex>,
        log: Arc<dyn NotificationLog>,
        adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
        dispatcher: Arc<Dispatcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            profiles,
            cursors,
            dedup,
            log,
            adapters,
            dispatcher,
            engine: MatchEngine::new(),
            settings,
            suspended: Mutex::new(HashSet::new()),
            run_pool: None,
        }
    }

    /// Persist per-cycle run logs to this pool's `scan_runs` table.
    pub fn with_run_pool(mut self, pool: PgPool) -> Self {
        self.run_pool = Some(pool);
        self
    }

    /// Outer loop. Survives any single cycle failing; only returns on
    /// shutdown signal handling at the binary level.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.settings.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let started = std::time::Instant::now();
            match self.run_cycle().await {
                Ok(stats) => info!("{stats}"),
                Err(e) => error!(error = %e, "Cycle failed, continuing to next tick"),
            }
            if started.elapsed() > self.settings.scan_interval {
                info!(
                    elapsed_secs = started.elapsed().as_secs(),
                    "Cycle overran the interval; intervening ticks skipped"
                );
            }
        }
    }

    /// One full scan cycle. Public so tests (and one-shot invocations)
    /// can drive the pipeline without the timer.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let run_id = Uuid::new_v4().to_string();
        let mut run_log = RunLog::new(run_id.clone());
        let mut stats = CycleStats::default();
        info!(run_id = run_id.as_str(), "Scan cycle starting");

        // Dedup window hygiene before scanning.
        let cutoff = Utc::now() - chrono::Duration::days(self.settings.dedup_retention_days);
        match self.dedup.purge_older_than(cutoff).await {
            Ok(evicted) => {
                if evicted > 0 {
                    info!(evicted, "Dedup window purged");
                }
                run_log.log(EventKind::DedupPurge { evicted });
            }
            Err(e) => warn!(error = %e, "Dedup purge failed, continuing"),
        }

        // Read-consistent snapshot; edits land next cycle.
        let profiles = self
            .profiles
            .list_active_profiles()
            .await
            .context("Failed to load active profiles")?;
        stats.profiles = profiles.len() as u32;

        let started = std::time::Instant::now();
        let scan = tokio::time::timeout(
            self.settings.cycle_timeout,
            self.scan_profiles(&profiles),
        )
        .await;

        match scan {
            Ok(outcomes) => {
                for outcome in outcomes {
                    stats.absorb(outcome.stats);
                    run_log.extend(outcome.events);
                }
            }
            Err(_) => {
                // Unfinished pair scans were cancelled mid-flight: their
                // cursors were never advanced, so the next cycle replays
                // them and dedup absorbs the overlap.
                stats.timed_out = true;
                let elapsed_secs = started.elapsed().as_secs();
                warn!(elapsed_secs, "Cycle timed out, cancelling unfinished scans");
                run_log.log(EventKind::CycleTimeout { elapsed_secs });
            }
        }

        if let Some(pool) = &self.run_pool {
            if let Err(e) = run_log.save_to_db(pool, &stats).await {
                warn!(error = %e, "Failed to persist run log");
            }
        }

        Ok(stats)
    }

    async fn scan_profiles(&self, profiles: &[SearchProfile]) -> Vec<PairOutcome> {
        stream::iter(profiles.iter().map(|profile| self.scan_profile(profile)))
            .buffer_unordered(self.settings.max_concurrent_profiles.max(1))
            .collect::<Vec<Vec<PairOutcome>>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn scan_profile(&self, profile: &SearchProfile) -> Vec<PairOutcome> {
        let pairs: Vec<Source> = profile
            .sources()
            .into_iter()
            .filter(|source| self.adapters.contains_key(source))
            .collect();

        // A profile's sources are independent hosts; scan them together.
        futures::future::join_all(
            pairs
                .into_iter()
                .map(|source| self.scan_pair(profile, source)),
        )
        .await
    }

    async fn scan_pair(&self, profile: &SearchProfile, source: Source) -> PairOutcome {
        let mut outcome = PairOutcome::new();

        if self.is_suspended(profile.id, source) {
            debug!(profile = %profile.id, %source, "Pair suspended, skipping");
            outcome.stats.pairs_suspended += 1;
            return outcome;
        }

        let adapter = match self.adapters.get(&source) {
            Some(adapter) => adapter.clone(),
            None => return outcome,
        };

        let cursor = match self.cursors.get_cursor(profile.id, source).await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(profile = %profile.id, %source, error = %e, "Cursor read failed");
                outcome.stats.pairs_failed += 1;
                outcome.events.push(EventKind::ScanFailed {
                    profile_id: profile.id,
                    source: source.to_string(),
                    error: e.to_string(),
                });
                return outcome;
            }
        };

        let batch = match adapter.scan(profile, cursor.as_ref()).await {
            Ok(batch) => batch,
            Err(e) => {
                self.handle_scan_error(profile, source, &e, &mut outcome).await;
                return outcome;
            }
        };

        outcome.stats.pairs_scanned += 1;
        outcome.stats.listings_fetched += batch.listings.len() as u32;
        outcome.stats.parse_skips += batch.parse_skips;

        let mut new_count = 0u32;
        let mut duplicates = 0u32;
        let mut pair_failed = false;

        for raw in &batch.listings {
            let listing = match adapter.map_listing(raw) {
                Ok(listing) => listing,
                Err(e) => {
                    debug!(listing = raw.native_id.as_str(), error = %e, "Unmappable listing skipped");
                    outcome.stats.parse_skips += 1;
                    continue;
                }
            };

            let scanned = ScannedListing::from_listing(&listing, Utc::now());
            let is_new = match self.dedup.check_and_insert(&scanned).await {
                Ok(is_new) => is_new,
                Err(e) => {
                    // A dedup write failure mid-batch means we can no
                    // longer tell new from seen; abort the pair without
                    // advancing the cursor so nothing is skipped.
                    warn!(profile = %profile.id, %source, error = %e, "Dedup store failed, aborting pair");
                    pair_failed = true;
                    break;
                }
            };
            if !is_new {
                duplicates += 1;
                continue;
            }
            new_count += 1;

            match self.engine.evaluate(&listing, profile) {
                Ok(result) => {
                    outcome.stats.matches += 1;
                    outcome.events.push(EventKind::MatchFound {
                        profile_id: profile.id,
                        listing_id: listing.native_id.clone(),
                        confidence: result.confidence.to_string(),
                        score: result.score as f64,
                    });

                    let reports = self.dispatcher.dispatch(profile, &listing, &result).await;
                    for report in reports {
                        let delivered = report.status.is_delivered();
                        if delivered {
                            outcome.stats.notifications_sent += 1;
                        } else {
                            outcome.stats.notifications_failed += 1;
                        }
                        outcome.events.push(EventKind::NotificationSent {
                            profile_id: profile.id,
                            listing_id: listing.native_id.clone(),
                            channel: report.channel.to_string(),
                            delivered,
                            attempts: report.attempts,
                        });

                        let notification = SentNotification {
                            id: Uuid::new_v4(),
                            profile_id: profile.id,
                            listing_id: listing.native_id.clone(),
                            content_hash: scanned.content_hash.clone(),
                            channel: report.channel,
                            recipient: report.recipient,
                            message: report.message,
                            sent_at: Utc::now(),
                            status: report.status,
                            attempts: report.attempts,
                        };
                        if let Err(e) = self.log.record(&notification).await {
                            warn!(error = %e, "Failed to record notification");
                        }
                    }
                }
                Err(rejection) => {
                    outcome.stats.rejections += 1;
                    debug!(
                        profile = %profile.id,
                        listing = listing.native_id.as_str(),
                        reason = %rejection,
                        "Listing rejected"
                    );
                }
            }
        }

        outcome.stats.duplicates += duplicates;
        outcome.events.push(EventKind::SourceScan {
            profile_id: profile.id,
            source: source.to_string(),
            fetched: batch.listings.len() as u32,
            new: new_count,
            duplicates,
            parse_skips: batch.parse_skips,
        });

        // Cursor advancement is the last step: only after every listing
        // from this scan was deduped and handled. A crash before this
        // point replays the scan; dedup makes the replay a no-op.
        if pair_failed {
            outcome.stats.pairs_failed += 1;
        } else if let Some(next) = batch.next_cursor {
            match self.cursors.advance_cursor(profile.id, source, next).await {
                Ok(()) => outcome.events.push(EventKind::CursorAdvanced {
                    profile_id: profile.id,
                    source: source.to_string(),
                }),
                Err(e) => {
                    warn!(profile = %profile.id, %source, error = %e, "Cursor advance failed");
                }
            }
        }

        outcome
    }

    async fn handle_scan_error(
        &self,
        profile: &SearchProfile,
        source: Source,
        error: &ScanError,
        outcome: &mut PairOutcome,
    ) {
        outcome.stats.pairs_failed += 1;
        outcome.events.push(EventKind::ScanFailed {
            profile_id: profile.id,
            source: source.to_string(),
            error: error.to_string(),
        });

        match error {
            ScanError::AuthExpired { .. } => {
                // First expiry for this pair raises an operator alert;
                // repeats stay silent until the suspension is cleared.
                if self.suspend(profile.id, source) {
                    warn!(profile = %profile.id, %source, "Authentication expired, suspending pair");
                    outcome.events.push(EventKind::SourceSuspended {
                        profile_id: profile.id,
                        source: source.to_string(),
                    });
                    if let Some(recipient) = &self.settings.operator_recipient {
                        let text = format!(
                            "⚠️ Session for {source} expired while scanning profile \"{}\". \
                             Scans of this pair are suspended until credentials are refreshed \
                             and the scanner restarts.",
                            profile.name
                        );
                        let report = self.dispatcher.send_operator_alert(recipient, text).await;
                        outcome.events.push(EventKind::OperatorAlert {
                            profile_id: profile.id,
                            source: source.to_string(),
                            delivered: report.status.is_delivered(),
                        });
                    }
                }
            }
            ScanError::ProtectionChallenge { url } => {
                warn!(profile = %profile.id, %source, url = url.as_str(), "Bot challenge served instead of data");
            }
            ScanError::Network { message, .. } => {
                warn!(profile = %profile.id, %source, message = message.as_str(), "Transient scan failure, retrying next cycle");
            }
            ScanError::Parse { message, .. } => {
                warn!(profile = %profile.id, %source, message = message.as_str(), "Page structure changed, scan aborted");
            }
        }
    }

    fn is_suspended(&self, profile_id: Uuid, source: Source) -> bool {
        self.suspended
            .lock()
            .unwrap()
            .contains(&(profile_id, source))
    }

    /// Returns true when the pair was newly suspended.
    fn suspend(&self, profile_id: Uuid, source: Source) -> bool {
        self.suspended.lock().unwrap().insert((profile_id, source))
    }
}
