mod attendance;
mod availability;
mod conflict;
mod error;
mod ledger;
mod lifecycle;
mod queries;
mod reconcile;
mod state;
#[cfg(test)]
mod tests;

pub use availability::{Availability, free_windows, merge_overlapping, subtract_intervals};
pub use error::{ConflictReason, EngineError, PromoError};
pub use ledger::{OccupancySnapshot, RecordMatch, TruncateOutcome};
pub use lifecycle::{NewBooking, NewPromoBooking};
pub use queries::{BookingView, Countdown};
pub use reconcile::{ReconcileReport, Repair};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::billing::Tariff;
use crate::model::*;
use crate::notify::{Change, NotifyHub};
use crate::wal::Wal;

use state::{Snapshot, apply_to_attendance, apply_to_booking, apply_to_code, apply_to_resource};

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedBooking = Arc<RwLock<Booking>>;

/// Venue-level knobs the engine needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub catalog: Catalog,
    pub tariff: Tariff,
    /// The one timezone every local-day computation uses.
    pub timezone: Tz,
    /// Promo bookings at least this long get a check-in code.
    pub promo_code_min_ms: Ms,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            catalog: Catalog::with_seats(24),
            tariff: Tariff::default(),
            timezone: chrono_tz::Asia::Manila,
            promo_code_min_ms: 7 * DAY_MS,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Fold the log into its minimal form and swap it in. Replies with the new event count.
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Whatever appends are queued when the first one arrives share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so the partial bytes don't ride along with the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let _ = response.send(compact_in_place(wal));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// Runs on the writer task, so no append can land between the read and the swap.
fn compact_in_place(wal: &mut Wal) -> io::Result<usize> {
    wal.flush_sync()?;
    let replay = Wal::replay(wal.path())?;
    let events = Snapshot::from_events(&replay.events).into_events();
    Wal::write_compact_file(wal.path(), &events)?;
    wal.swap_compact_file()?;
    Ok(events.len())
}

pub struct Engine {
    resources: DashMap<ResourceKey, SharedResourceState>,
    bookings: DashMap<Ulid, SharedBooking>,
    /// Every code ever issued, superseded ones included, keyed by code text.
    codes: DashMap<String, PromoCode>,
    attendance: DashMap<Ulid, Vec<AttendanceEntry>>,
    /// Bookings whose ledger records need repair, keyed by booking id.
    pending: DashMap<Ulid, Repair>,
    revision: AtomicU64,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub settings: EngineSettings,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let revision = events.len() as u64;
        let snapshot = Snapshot::from_events(&events);
        drop(events);

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let resources = DashMap::new();
        for key in settings.catalog.keys() {
            resources.insert(
                key.to_string(),
                Arc::new(RwLock::new(ResourceState::new(key.to_string()))),
            );
        }
        for (key, rs) in snapshot.resources {
            if settings.catalog.contains(&key) {
                resources.insert(key, Arc::new(RwLock::new(rs)));
            } else if !rs.records.is_empty() {
                tracing::warn!(
                    "resource {key} is not in the catalog; ignoring {} ledger records",
                    rs.records.len()
                );
            }
        }

        let engine = Self {
            resources,
            bookings: snapshot
                .bookings
                .into_iter()
                .map(|(id, b)| (id, Arc::new(RwLock::new(b))))
                .collect(),
            codes: snapshot.codes.into_iter().collect(),
            attendance: snapshot.attendance.into_iter().collect(),
            pending: DashMap::new(),
            revision: AtomicU64::new(revision),
            wal_tx,
            notify,
            settings,
        };
        tracing::info!(
            "replayed {revision} events: {} bookings, {} promo codes",
            engine.bookings.len(),
            engine.codes.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Stamp a committed event with the next revision and fan it out.
    fn announce(&self, event: Event) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify.publish(&Change { revision, event });
    }

    /// Count of committed events since startup replay began.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// WAL-append, apply to a locked resource, notify.
    async fn commit_ledger(&self, rs: &mut ResourceState, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        apply_to_resource(rs, &event);
        self.announce(event);
        Ok(())
    }

    /// WAL-append, apply to a locked booking and the code/attendance indexes, notify.
    async fn commit_booking(&self, b: &mut Booking, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        apply_to_booking(b, &event);
        self.apply_to_indexes(&event);
        self.announce(event);
        Ok(())
    }

    fn apply_to_indexes(&self, event: &Event) {
        match event {
            Event::CodeIssued { code } => {
                self.codes.insert(code.code.clone(), code.clone());
            }
            Event::CodeSuperseded { code } => {
                if let Some(mut c) = self.codes.get_mut(code) {
                    apply_to_code(&mut c, event);
                }
            }
            Event::CheckedIn { entry, .. } => {
                if let Some(mut c) = self.codes.get_mut(&entry.code) {
                    apply_to_code(&mut c, event);
                }
                apply_to_attendance(&mut self.attendance.entry(entry.booking_id).or_default(), event);
            }
            Event::CheckedOut { booking_id, .. } => {
                if let Some(mut entries) = self.attendance.get_mut(booking_id) {
                    apply_to_attendance(&mut entries, event);
                }
            }
            Event::BookingPurged { id } => {
                self.codes.retain(|_, c| c.booking_id != *id);
                self.attendance.remove(id);
            }
            _ => {}
        }
    }

    pub fn resource(&self, key: &str) -> Result<SharedResourceState, EngineError> {
        self.resources
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("resource {key}")))
    }

    fn booking_handle(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Rewrite the WAL as the minimal event list for the current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
