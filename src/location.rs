//! # Location Adapter
//!
//! Bridges a platform position watch into the ride engine.
//!
//! The platform side implements [`LocationSource`]; it starts and stops
//! watches and later delivers results by calling
//! [`LocationAdapter::on_position`] / [`LocationAdapter::on_error`] with the
//! id the request was issued under. The adapter:
//!
//! - runs only while the ride is operational (not IDLE) and not paused,
//! - requests one fresh high-accuracy fix on activation in addition to the
//!   continuous watch,
//! - drops fixes that did not move past the configured lat/lng delta,
//! - releases the watch on every deactivation path, including drop,
//! - ignores callbacks carrying a watch id it no longer owns.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::engine::RideEngine;
use crate::geo_utils::has_moved_significantly;
use crate::session::{LatLng, RidePhase, RoutePoint};

/// Handle for a one-shot request or a continuous watch.
pub type WatchId = u64;

/// Options passed to the platform when requesting positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    /// Oldest cached position the platform may return. 0 forces a fresh fix.
    pub maximum_age_ms: u32,
    pub timeout_ms: u32,
}

/// A successful platform fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lng: f64,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    /// Horizontal accuracy in meters, if reported
    pub accuracy_m: Option<f64>,
}

impl PositionFix {
    pub fn new(lat: f64, lng: f64, timestamp_ms: i64) -> Self {
        Self {
            lat,
            lng,
            timestamp_ms,
            accuracy_m: None,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Classified platform error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unknown,
}

impl LocationErrorKind {
    /// Map a W3C geolocation error code (1, 2, 3) to a kind.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => LocationErrorKind::PermissionDenied,
            2 => LocationErrorKind::PositionUnavailable,
            3 => LocationErrorKind::Timeout,
            _ => LocationErrorKind::Unknown,
        }
    }
}

/// A platform error with its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationError {
    pub kind: LocationErrorKind,
    pub message: String,
}

impl LocationError {
    /// Classify a raw platform error.
    pub fn from_platform(code: u16, detail: &str) -> Self {
        let kind = LocationErrorKind::from_code(code);
        let message = match kind {
            LocationErrorKind::PermissionDenied => {
                "Location permission was denied by the user or the system.".to_string()
            }
            LocationErrorKind::PositionUnavailable => {
                "GPS signal is unavailable at this location.".to_string()
            }
            LocationErrorKind::Timeout => "Timed out while acquiring a GPS fix.".to_string(),
            LocationErrorKind::Unknown => format!("Unknown location error: {}", detail),
        };
        Self { kind, message }
    }

    pub fn unsupported() -> Self {
        Self {
            kind: LocationErrorKind::Unknown,
            message: "Geolocation is not supported on this device.".to_string(),
        }
    }
}

/// The platform's position service.
pub trait LocationSource {
    /// Whether the device can deliver positions at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Ask for a single fix; the result arrives later under the returned id.
    fn request_current_position(&mut self, options: &PositionOptions) -> WatchId;

    /// Start a continuous watch; results arrive later under the returned id.
    fn watch_position(&mut self, options: &PositionOptions) -> WatchId;

    /// Stop a watch. Must be safe to call with an id that already ended.
    fn clear_watch(&mut self, id: WatchId);
}

impl<S: LocationSource + ?Sized> LocationSource for Box<S> {
    fn is_supported(&self) -> bool {
        (**self).is_supported()
    }

    fn request_current_position(&mut self, options: &PositionOptions) -> WatchId {
        (**self).request_current_position(options)
    }

    fn watch_position(&mut self, options: &PositionOptions) -> WatchId {
        (**self).watch_position(options)
    }

    fn clear_watch(&mut self, id: WatchId) {
        (**self).clear_watch(id)
    }
}

/// What happened to a delivered fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// Id not owned by the adapter (late callback after teardown)
    Stale,
    /// Coordinates out of range
    Rejected,
    /// Current location updated, no trail point
    LocationOnly,
    /// Current location updated, point appended to the active trail
    PointAppended,
    /// Current location updated, point too close to the last one
    Filtered,
}

/// Adapter between a [`LocationSource`] and a [`RideEngine`].
pub struct LocationAdapter<S: LocationSource> {
    source: S,
    config: TrackerConfig,
    watch_id: Option<WatchId>,
    pending_fix: Option<WatchId>,
    last_accepted: Option<LatLng>,
    tracked_phase: RidePhase,
}

impl<S: LocationSource> LocationAdapter<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, TrackerConfig::default())
    }

    pub fn with_config(source: S, config: TrackerConfig) -> Self {
        Self {
            source,
            config,
            watch_id: None,
            pending_fix: None,
            last_accepted: None,
            tracked_phase: RidePhase::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        self.watch_id.is_some()
    }

    pub fn watch_id(&self) -> Option<WatchId> {
        self.watch_id
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start or stop the watch to match the engine's phase and pause state.
    ///
    /// Call after every engine mutation that may change either. Returns
    /// whether the adapter is active afterwards.
    pub fn sync<C: Clock>(&mut self, engine: &mut RideEngine<C>) -> bool {
        self.track_phase(engine.phase());

        let should_run = engine.phase().is_operational() && !engine.is_paused();
        match (should_run, self.watch_id.is_some()) {
            (true, false) => self.activate(engine),
            (false, true) => self.deactivate(),
            _ => {}
        }
        self.is_active()
    }

    /// Stop the watch and invalidate all outstanding ids.
    pub fn deactivate(&mut self) {
        if let Some(id) = self.watch_id.take() {
            self.source.clear_watch(id);
            info!("[LocationAdapter] Watch {} released", id);
        }
        self.pending_fix = None;
    }

    /// Deliver a fix from the platform.
    pub fn on_position<C: Clock>(
        &mut self,
        id: WatchId,
        fix: PositionFix,
        engine: &mut RideEngine<C>,
    ) -> FixOutcome {
        let from_watch = self.watch_id == Some(id);
        let from_initial = self.pending_fix == Some(id);
        if !from_watch && !from_initial {
            debug!("[LocationAdapter] Ignoring late fix for id {}", id);
            return FixOutcome::Stale;
        }

        let position = fix.position();
        if !position.is_valid() {
            warn!(
                "[LocationAdapter] Rejecting out-of-range fix ({}, {})",
                fix.lat, fix.lng
            );
            return FixOutcome::Rejected;
        }

        engine.set_current_location(position);
        if from_initial {
            self.pending_fix = None;
            return FixOutcome::LocationOnly;
        }

        self.track_phase(engine.phase());
        if !engine.phase().is_timed() {
            return FixOutcome::LocationOnly;
        }

        if let Some(last) = &self.last_accepted {
            if !has_moved_significantly(last, &position, self.config.min_movement_degrees) {
                return FixOutcome::Filtered;
            }
        }

        if engine.add_route_point(RoutePoint::new(fix.lat, fix.lng, fix.timestamp_ms)) {
            self.last_accepted = Some(position);
            FixOutcome::PointAppended
        } else {
            FixOutcome::LocationOnly
        }
    }

    /// Deliver an error from the platform. Returns false for stale ids.
    pub fn on_error<C: Clock>(
        &mut self,
        id: WatchId,
        error: LocationError,
        engine: &mut RideEngine<C>,
    ) -> bool {
        if self.pending_fix == Some(id) {
            self.pending_fix = None;
            warn!("[LocationAdapter] Initial fix failed: {}", error.message);
            engine.set_location_error(Some(format!("Initial fix failed: {}", error.message)));
            return true;
        }
        if self.watch_id != Some(id) {
            debug!("[LocationAdapter] Ignoring late error for id {}", id);
            return false;
        }
        warn!(
            "[LocationAdapter] GPS error ({:?}): {}",
            error.kind, error.message
        );
        engine.set_location_error(Some(error.message));
        true
    }

    fn activate<C: Clock>(&mut self, engine: &mut RideEngine<C>) {
        if !self.source.is_supported() {
            warn!("[LocationAdapter] Geolocation unsupported");
            engine.set_location_error(Some(LocationError::unsupported().message));
            return;
        }
        self.pending_fix = Some(self.source.request_current_position(&self.config.initial_fix));
        let id = self.source.watch_position(&self.config.watch);
        self.watch_id = Some(id);
        info!(
            "[LocationAdapter] Watch {} started in phase {}",
            id,
            engine.phase()
        );
    }

    /// A new phase starts a new trail, so the movement filter starts over.
    fn track_phase(&mut self, phase: RidePhase) {
        if phase != self.tracked_phase {
            self.tracked_phase = phase;
            self.last_accepted = None;
        }
    }
}

impl<S: LocationSource> Drop for LocationAdapter<S> {
    fn drop(&mut self) {
        self.deactivate();
    }
}
