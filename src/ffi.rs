//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The mobile app owns exactly one ride at a time, so the bindings drive a
//! single global [`Tracker`]: a persisted ride engine plus an optional
//! location adapter whose platform side is a [`LocationWatchCallback`]
//! implemented in Kotlin/Swift. Structured values cross the boundary as JSON
//! strings.
//!
//! Platform position results must be delivered asynchronously (never from
//! inside a `LocationWatchCallback` method), since the tracker lock is held
//! while the callback runs.

use std::sync::Mutex;

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::clock::SystemClock;
use crate::config::TrackerConfig;
use crate::engine::{EngineStats, PassengerUpdate, RideEngine};
use crate::init_logging;
use crate::intent::{dispatch, DispatchOutcome, DriverIntent};
use crate::location::{
    FixOutcome, LocationAdapter, LocationError, LocationSource, PositionFix, PositionOptions,
    WatchId,
};
use crate::persistence::{MemorySnapshotStore, PersistentRideEngine, SnapshotStore};
use crate::session::{PaymentMethod, PaymentStatus};

// ============================================================================
// Location Callback Interface
// ============================================================================

/// Platform position service. Implement this in Kotlin/Swift.
///
/// Each request carries the id that results must be reported under via
/// `tracker_on_location` / `tracker_on_location_error`.
#[uniffi::export(callback_interface)]
pub trait LocationWatchCallback: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Request one fix.
    fn request_current_position(
        &self,
        watch_id: u64,
        high_accuracy: bool,
        maximum_age_ms: u32,
        timeout_ms: u32,
    );

    /// Start a continuous watch.
    fn watch_position(&self, watch_id: u64, high_accuracy: bool, maximum_age_ms: u32, timeout_ms: u32);

    fn clear_watch(&self, watch_id: u64);
}

/// [`LocationSource`] backed by the platform callback. Ids are allocated on
/// the Rust side and never reused.
pub struct CallbackLocationSource {
    callback: Box<dyn LocationWatchCallback>,
    next_id: WatchId,
}

impl CallbackLocationSource {
    pub fn new(callback: Box<dyn LocationWatchCallback>) -> Self {
        Self {
            callback,
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> WatchId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl LocationSource for CallbackLocationSource {
    fn is_supported(&self) -> bool {
        self.callback.is_supported()
    }

    fn request_current_position(&mut self, options: &PositionOptions) -> WatchId {
        let id = self.allocate_id();
        self.callback.request_current_position(
            id,
            options.high_accuracy,
            options.maximum_age_ms,
            options.timeout_ms,
        );
        id
    }

    fn watch_position(&mut self, options: &PositionOptions) -> WatchId {
        let id = self.allocate_id();
        self.callback.watch_position(
            id,
            options.high_accuracy,
            options.maximum_age_ms,
            options.timeout_ms,
        );
        id
    }

    fn clear_watch(&mut self, id: WatchId) {
        self.callback.clear_watch(id);
    }
}

// ============================================================================
// Global Tracker
// ============================================================================

type TrackerStore = Box<dyn SnapshotStore + Send>;

/// Engine, storage and location tracking for the current ride.
pub struct Tracker {
    engine: PersistentRideEngine<TrackerStore, SystemClock>,
    location: Option<LocationAdapter<CallbackLocationSource>>,
}

impl Tracker {
    fn open(store: TrackerStore) -> crate::Result<Self> {
        Ok(Self {
            engine: PersistentRideEngine::open(store, SystemClock)?,
            location: None,
        })
    }

    pub fn engine(&self) -> &RideEngine<SystemClock> {
        self.engine.engine()
    }

    /// Apply a mutation, persist it and resync location tracking.
    fn mutate<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut RideEngine<SystemClock>) -> R,
    {
        let location = &mut self.location;
        self.engine.apply_or_warn(|engine| {
            let result = f(engine);
            if let Some(adapter) = location.as_mut() {
                adapter.sync(engine);
            }
            result
        })
    }
}

/// Global tracker singleton.
pub static TRACKER: Lazy<Mutex<Option<Tracker>>> = Lazy::new(|| Mutex::new(None));

/// Get a lock on the global tracker.
pub fn with_tracker<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut Tracker) -> R,
{
    let mut guard = TRACKER.lock().ok()?;
    guard.as_mut().map(f)
}

fn mutate_tracker<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut RideEngine<SystemClock>) -> R,
{
    with_tracker(|tracker| tracker.mutate(f))
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Initialize the tracker, restoring the last session.
///
/// With the `persistence` feature and a `db_path`, the session lives in
/// SQLite; otherwise it is kept in memory only.
#[uniffi::export]
pub fn tracker_init(db_path: Option<String>) -> bool {
    init_logging();

    let store: TrackerStore = match db_path {
        #[cfg(feature = "persistence")]
        Some(path) => {
            info!("[RideEngine] Initializing with db: {}", path);
            match crate::persistence::SqliteSnapshotStore::new(&path) {
                Ok(store) => Box::new(store),
                Err(e) => {
                    warn!("[RideEngine] Failed to open snapshot db: {}", e);
                    return false;
                }
            }
        }
        #[cfg(not(feature = "persistence"))]
        Some(path) => {
            warn!(
                "[RideEngine] Built without persistence, ignoring db path {}",
                path
            );
            Box::new(MemorySnapshotStore::new())
        }
        None => Box::new(MemorySnapshotStore::new()),
    };

    match Tracker::open(store) {
        Ok(tracker) => {
            let phase = tracker.engine().phase();
            match TRACKER.lock() {
                Ok(mut guard) => {
                    *guard = Some(tracker);
                    info!("[RideEngine] Initialized in phase {}", phase);
                    true
                }
                Err(_) => false,
            }
        }
        Err(e) => {
            warn!("[RideEngine] Failed to initialize: {}", e);
            false
        }
    }
}

#[uniffi::export]
pub fn tracker_is_initialized() -> bool {
    TRACKER.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

/// Attach the platform position service. `config_json` is an optional
/// `TrackerConfig`; defaults are used when absent or invalid.
#[uniffi::export]
pub fn tracker_set_location_source(
    callback: Box<dyn LocationWatchCallback>,
    config_json: Option<String>,
) -> bool {
    init_logging();
    let config = match config_json.as_deref().map(TrackerConfig::from_json) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            warn!("[LocationAdapter] Invalid config, using defaults: {}", e);
            TrackerConfig::default()
        }
        None => TrackerConfig::default(),
    };

    with_tracker(|tracker| {
        // Dropping a previous adapter releases its watch.
        tracker.location = Some(LocationAdapter::with_config(
            CallbackLocationSource::new(callback),
            config,
        ));
        tracker.mutate(|_| ());
    })
    .is_some()
}

/// Detach the position service, releasing any active watch.
#[uniffi::export]
pub fn tracker_clear_location_source() {
    with_tracker(|tracker| tracker.location = None);
}

// ============================================================================
// Transitions
// ============================================================================

#[uniffi::export]
pub fn tracker_start_displacement() -> bool {
    mutate_tracker(|e| e.start_displacement()).unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_arrive_at_pickup() -> bool {
    mutate_tracker(|e| e.arrive_at_pickup()).unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_start_ride() -> bool {
    mutate_tracker(|e| e.start_ride()).unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_go_to_finalize() -> bool {
    mutate_tracker(|e| e.go_to_finalize()).unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_cancel() -> bool {
    mutate_tracker(|e| e.cancel()).unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_back_to_displacement() -> bool {
    mutate_tracker(|e| e.back_to_displacement()).unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_go_to_set_value() -> bool {
    mutate_tracker(|e| e.go_to_set_value()).unwrap_or(false)
}

/// Reset after the host recorded the ride itself. Prefer `tracker_checkout`.
#[uniffi::export]
pub fn tracker_confirm_checkout() -> bool {
    mutate_tracker(|e| e.confirm_checkout()).unwrap_or(false)
}

/// Toggle pause. Returns the new paused state.
#[uniffi::export]
pub fn tracker_pause_race() -> bool {
    mutate_tracker(|e| e.pause_race()).unwrap_or(false)
}

/// Timer tick. Returns elapsed seconds of the active block.
#[uniffi::export]
pub fn tracker_update_timer() -> u64 {
    with_tracker(|tracker| tracker.engine.tick()).unwrap_or(0)
}

// ============================================================================
// Mutators
// ============================================================================

#[uniffi::export]
pub fn tracker_set_race_value(value: f64) -> bool {
    match mutate_tracker(|e| e.set_race_value(value)) {
        Some(Ok(())) => true,
        Some(Err(e)) => {
            warn!("[RideEngine] {}", e);
            false
        }
        None => false,
    }
}

/// Set or clear (`None`) the payment method. Unknown names are rejected.
#[uniffi::export]
pub fn tracker_set_payment_method(method: Option<String>) -> bool {
    let parsed = match method.as_deref().map(str::parse::<PaymentMethod>) {
        Some(Ok(m)) => Some(m),
        Some(Err(e)) => {
            warn!("[RideEngine] {}", e);
            return false;
        }
        None => None,
    };
    mutate_tracker(|e| e.set_payment_method(parsed)).is_some()
}

#[uniffi::export]
pub fn tracker_set_payment_status(status: String) -> bool {
    match status.parse::<PaymentStatus>() {
        Ok(status) => mutate_tracker(|e| e.set_payment_status(status)).is_some(),
        Err(e) => {
            warn!("[RideEngine] {}", e);
            false
        }
    }
}

/// Merge passenger fields. `None` leaves a field unchanged.
#[uniffi::export]
pub fn tracker_update_passenger(
    name: Option<String>,
    cpf: Option<String>,
    phone: Option<String>,
) -> bool {
    let update = PassengerUpdate { name, cpf, phone };
    mutate_tracker(|e| e.update_passenger(update)).is_some()
}

// ============================================================================
// Location Delivery
// ============================================================================

/// Deliver a fix for `watch_id`. Returns true if a trail point was appended.
#[uniffi::export]
pub fn tracker_on_location(
    watch_id: u64,
    lat: f64,
    lng: f64,
    timestamp_ms: i64,
    accuracy_m: Option<f64>,
) -> bool {
    let fix = PositionFix {
        lat,
        lng,
        timestamp_ms,
        accuracy_m,
    };
    with_tracker(|tracker| {
        let Tracker { engine, location } = tracker;
        let Some(adapter) = location.as_mut() else {
            return false;
        };
        engine.apply_or_warn(|e| adapter.on_position(watch_id, fix, e)) == FixOutcome::PointAppended
    })
    .unwrap_or(false)
}

/// Deliver a W3C-style error code (1 denied, 2 unavailable, 3 timeout).
#[uniffi::export]
pub fn tracker_on_location_error(watch_id: u64, code: u16, message: String) -> bool {
    let error = LocationError::from_platform(code, &message);
    with_tracker(|tracker| {
        let Tracker { engine, location } = tracker;
        let Some(adapter) = location.as_mut() else {
            return false;
        };
        engine.apply_or_warn(|e| adapter.on_error(watch_id, error, e))
    })
    .unwrap_or(false)
}

// ============================================================================
// Intents
// ============================================================================

/// Result of dispatching a driver intent.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispatchResult {
    /// "APPLIED", "SKIPPED" or "NOT_UNDERSTOOD"
    pub outcome: String,
    pub message: Option<String>,
}

impl From<DispatchOutcome> for FfiDispatchResult {
    fn from(outcome: DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::Applied { message } => Self {
                outcome: "APPLIED".to_string(),
                message: Some(message),
            },
            DispatchOutcome::Skipped => Self {
                outcome: "SKIPPED".to_string(),
                message: None,
            },
            DispatchOutcome::NotUnderstood { message } => Self {
                outcome: "NOT_UNDERSTOOD".to_string(),
                message: Some(message),
            },
        }
    }
}

/// Dispatch an interpreted voice command (JSON).
#[uniffi::export]
pub fn tracker_dispatch_intent(json: String) -> FfiDispatchResult {
    init_logging();
    let intent = DriverIntent::from_json(&json);
    mutate_tracker(|e| dispatch(&intent, e))
        .unwrap_or(DispatchOutcome::Skipped)
        .into()
}

// ============================================================================
// Getters
// ============================================================================

/// Full session as JSON. Empty string if not initialized.
#[uniffi::export]
pub fn tracker_get_session_json() -> String {
    with_tracker(|tracker| serde_json::to_string(tracker.engine().session()).unwrap_or_default())
        .unwrap_or_default()
}

#[uniffi::export]
pub fn tracker_get_receipt_json() -> String {
    with_tracker(|tracker| serde_json::to_string(&tracker.engine().receipt()).unwrap_or_default())
        .unwrap_or_default()
}

#[uniffi::export]
pub fn tracker_get_phase() -> String {
    with_tracker(|tracker| tracker.engine().phase().as_str().to_string()).unwrap_or_default()
}

#[uniffi::export]
pub fn tracker_get_stats() -> Option<EngineStats> {
    with_tracker(|tracker| tracker.engine().stats())
}

// ============================================================================
// Checkout
// ============================================================================

#[cfg(feature = "http")]
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCheckoutResult {
    pub success: bool,
    pub error: Option<String>,
}

#[cfg(feature = "http")]
impl FfiCheckoutResult {
    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Submit the finalized ride and reset on success. Blocks until the
/// endpoint answers. The tracker lock is not held during the request.
#[cfg(feature = "http")]
#[uniffi::export]
pub fn tracker_checkout(recorder_config_json: String) -> FfiCheckoutResult {
    use crate::config::RecorderConfig;

    init_logging();
    let config = match RecorderConfig::from_json(&recorder_config_json) {
        Ok(config) => config,
        Err(e) => return FfiCheckoutResult::failed(e),
    };

    let payload = match with_tracker(|tracker| tracker.engine().build_submission()) {
        Some(Ok(payload)) => payload,
        Some(Err(e)) => return FfiCheckoutResult::failed(e),
        None => return FfiCheckoutResult::failed("tracker not initialized"),
    };

    if let Err(e) = crate::http::record_ride_sync(config, &payload) {
        warn!("[RideRecorder] Submission failed, keeping session: {}", e);
        return FfiCheckoutResult::failed(e);
    }

    mutate_tracker(|e| e.confirm_recorded(&payload));
    FfiCheckoutResult {
        success: true,
        error: None,
    }
}
