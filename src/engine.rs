//! # Ride Engine
//!
//! The ride lifecycle state machine. Owns one [`RaceSession`] and an injected
//! [`Clock`], and is the only code allowed to mutate the session.
//!
//! ## Lifecycle
//!
//! ```text
//! IDLE --start_displacement--> EN_ROUTE --arrive_at_pickup--> WAITING_PICKUP
//!   ^                             ^                               |
//!   |                   back_to_displacement                  start_ride
//!   |                             |                               v
//!   +----confirm_checkout---- FINALIZING <----go_to_finalize---- IN_RIDE
//!
//! any --go_to_set_value--> SETTING_PRICE --go_to_finalize--> FINALIZING
//! EN_ROUTE | WAITING_PICKUP | IN_RIDE --cancel--> IDLE
//! ```
//!
//! Every event is total: an event that is not valid for the current phase is
//! ignored and leaves the session untouched. Double taps and UI races are
//! therefore harmless.
//!
//! ## Timing
//!
//! Elapsed time is recomputed from timestamps (`clock_accrued_ms` plus the
//! span since `clock_running_since`), never accumulated by ticks. The block
//! clock runs only in EN_ROUTE / IN_RIDE while not paused.

use log::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{RideError, Result};
use crate::geo_utils::trail_distance_meters;
use crate::session::{
    LatLng, Passenger, PaymentMethod, PaymentStatus, PhaseBlock, RaceSession, RidePhase,
    RoutePoint,
};

// ============================================================================
// Events
// ============================================================================

/// Phase-changing events accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RideEvent {
    StartDisplacement,
    ArriveAtPickup,
    StartRide,
    GoToFinalize,
    Cancel,
    BackToDisplacement,
    GoToSetValue,
    ConfirmCheckout,
}

impl RideEvent {
    pub const ALL: [RideEvent; 8] = [
        RideEvent::StartDisplacement,
        RideEvent::ArriveAtPickup,
        RideEvent::StartRide,
        RideEvent::GoToFinalize,
        RideEvent::Cancel,
        RideEvent::BackToDisplacement,
        RideEvent::GoToSetValue,
        RideEvent::ConfirmCheckout,
    ];
}

/// The transition table. `None` means the event is ignored in `from`.
pub fn next_phase(from: RidePhase, event: RideEvent) -> Option<RidePhase> {
    use RideEvent::*;
    use RidePhase::*;

    match (from, event) {
        (Idle, StartDisplacement) => Some(EnRoute),
        (EnRoute, ArriveAtPickup) => Some(WaitingPickup),
        (WaitingPickup, StartRide) => Some(InRide),
        (InRide | SettingPrice, GoToFinalize) => Some(Finalizing),
        (EnRoute | WaitingPickup | InRide, Cancel) => Some(Idle),
        (Finalizing, BackToDisplacement) => Some(EnRoute),
        (SettingPrice, GoToSetValue) => None,
        (_, GoToSetValue) => Some(SettingPrice),
        (Finalizing, ConfirmCheckout) => Some(Idle),
        _ => None,
    }
}

/// Partial passenger update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassengerUpdate {
    pub name: Option<String>,
    pub cpf: Option<String>,
    pub phone: Option<String>,
}

impl PassengerUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.cpf.is_none() && self.phone.is_none()
    }
}

/// Point-in-time counters, mostly for logging and FFI diagnostics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct EngineStats {
    pub phase: String,
    pub is_paused: bool,
    pub elapsed_seconds: u64,
    pub active_trail_points: u32,
    pub displacement_points: u32,
    pub ride_points: u32,
}

// ============================================================================
// Ride Engine
// ============================================================================

/// The ride lifecycle state machine.
pub struct RideEngine<C: Clock = SystemClock> {
    session: RaceSession,
    clock: C,
}

impl RideEngine<SystemClock> {
    /// Create an idle engine on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for RideEngine<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RideEngine<C> {
    /// Create an idle engine on a custom clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            session: RaceSession::default(),
            clock,
        }
    }

    /// Resume a previously persisted session.
    ///
    /// The block clock is stored as absolute timestamps, so a restored
    /// session keeps counting the time the process was not running.
    pub fn from_session(session: RaceSession, clock: C) -> Self {
        info!(
            "[RideEngine] Restored session in phase {} ({} active points)",
            session.phase,
            session.active_trail.len()
        );
        let mut engine = Self { session, clock };
        engine.update_timer();
        engine
    }

    pub fn session(&self) -> &RaceSession {
        &self.session
    }

    pub fn phase(&self) -> RidePhase {
        self.session.phase
    }

    pub fn is_paused(&self) -> bool {
        self.session.is_paused
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Whether `event` would change the phase right now.
    pub fn accepts(&self, event: RideEvent) -> bool {
        next_phase(self.session.phase, event).is_some()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            phase: self.session.phase.as_str().to_string(),
            is_paused: self.session.is_paused,
            elapsed_seconds: self.session.elapsed_seconds,
            active_trail_points: self.session.active_trail.len() as u32,
            displacement_points: self.session.displacement.frozen_trail.len() as u32,
            ride_points: self.session.ride.frozen_trail.len() as u32,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Apply an event. Returns true if the phase changed.
    pub fn handle(&mut self, event: RideEvent) -> bool {
        match event {
            RideEvent::StartDisplacement => self.start_displacement(),
            RideEvent::ArriveAtPickup => self.arrive_at_pickup(),
            RideEvent::StartRide => self.start_ride(),
            RideEvent::GoToFinalize => self.go_to_finalize(),
            RideEvent::Cancel => self.cancel(),
            RideEvent::BackToDisplacement => self.back_to_displacement(),
            RideEvent::GoToSetValue => self.go_to_set_value(),
            RideEvent::ConfirmCheckout => self.confirm_checkout(),
        }
    }

    /// IDLE -> EN_ROUTE. Opens a fresh session and the displacement block.
    pub fn start_displacement(&mut self) -> bool {
        let Some(next) = self.guard(RideEvent::StartDisplacement) else {
            return false;
        };
        let now = self.clock.now_ms();

        self.session.displacement = PhaseBlock::opened_at(now);
        self.session.ride = PhaseBlock::default();
        self.session.passenger = Passenger::default();
        self.begin_timed_block();
        self.enter(next, now);
        true
    }

    /// EN_ROUTE -> WAITING_PICKUP. Freezes the displacement block.
    pub fn arrive_at_pickup(&mut self) -> bool {
        let Some(next) = self.guard(RideEvent::ArriveAtPickup) else {
            return false;
        };
        let now = self.clock.now_ms();

        if self.session.displacement.is_live() {
            self.session.displacement = self.freeze_block(&self.session.displacement, now);
            info!(
                "[RideEngine] Displacement frozen: {}s, {}m, {} points",
                self.session.displacement.frozen_duration_seconds,
                self.session.displacement.frozen_distance_meters,
                self.session.displacement.frozen_trail.len()
            );
        } else {
            debug!("[RideEngine] Displacement already frozen, keeping original block");
        }

        self.begin_timed_block();
        self.enter(next, now);
        true
    }

    /// WAITING_PICKUP -> IN_RIDE. Opens the ride block.
    pub fn start_ride(&mut self) -> bool {
        let Some(next) = self.guard(RideEvent::StartRide) else {
            return false;
        };
        let now = self.clock.now_ms();

        if self.session.ride.is_frozen() {
            debug!("[RideEngine] Ride already frozen, keeping original block");
        } else {
            self.session.ride = PhaseBlock::opened_at(now);
        }
        self.begin_timed_block();
        self.enter(next, now);
        true
    }

    /// IN_RIDE | SETTING_PRICE -> FINALIZING. Freezes whichever block is
    /// still live; price entry may have been opened from EN_ROUTE.
    pub fn go_to_finalize(&mut self) -> bool {
        let Some(next) = self.guard(RideEvent::GoToFinalize) else {
            return false;
        };
        let now = self.clock.now_ms();

        if self.session.ride.is_live() {
            self.session.ride = self.freeze_block(&self.session.ride, now);
            self.session.elapsed_seconds = self.session.ride.frozen_duration_seconds;
            self.session.active_trail.clear();
            info!(
                "[RideEngine] Ride frozen: {}s, {}m, {} points",
                self.session.ride.frozen_duration_seconds,
                self.session.ride.frozen_distance_meters,
                self.session.ride.frozen_trail.len()
            );
        } else if self.session.displacement.is_live() {
            self.session.displacement = self.freeze_block(&self.session.displacement, now);
            self.session.elapsed_seconds = self.session.displacement.frozen_duration_seconds;
            self.session.active_trail.clear();
            info!(
                "[RideEngine] Displacement frozen at finalize: {}s, {}m, {} points",
                self.session.displacement.frozen_duration_seconds,
                self.session.displacement.frozen_distance_meters,
                self.session.displacement.frozen_trail.len()
            );
        }

        self.enter(next, now);
        true
    }

    /// EN_ROUTE | WAITING_PICKUP | IN_RIDE -> IDLE. Discards the session.
    pub fn cancel(&mut self) -> bool {
        if self.guard(RideEvent::Cancel).is_none() {
            return false;
        }
        info!("[RideEngine] {} -> IDLE (cancelled)", self.session.phase);
        self.session = self.session.reset_keeping_location();
        true
    }

    /// FINALIZING -> EN_ROUTE for corrections. Frozen blocks are untouched;
    /// a displacement block that was never opened is opened now.
    pub fn back_to_displacement(&mut self) -> bool {
        let Some(next) = self.guard(RideEvent::BackToDisplacement) else {
            return false;
        };
        let now = self.clock.now_ms();
        if self.session.displacement.start_time.is_none() {
            debug!("[RideEngine] Opening displacement block skipped by price entry");
            self.session.displacement = PhaseBlock::opened_at(now);
        }
        self.begin_timed_block();
        self.enter(next, now);
        true
    }

    /// any -> SETTING_PRICE. The block clock stops but keeps its value.
    pub fn go_to_set_value(&mut self) -> bool {
        let Some(next) = self.guard(RideEvent::GoToSetValue) else {
            return false;
        };
        let now = self.clock.now_ms();
        self.refresh_elapsed(now);
        self.enter(next, now);
        true
    }

    /// FINALIZING -> IDLE. Call only after the ride was recorded.
    pub fn confirm_checkout(&mut self) -> bool {
        if self.guard(RideEvent::ConfirmCheckout).is_none() {
            return false;
        }
        info!("[RideEngine] FINALIZING -> IDLE (checkout confirmed)");
        self.session = self.session.reset_keeping_location();
        true
    }

    /// Toggle pause. Only the block clock is affected; route points are
    /// still accepted while paused. Ignored while idle.
    ///
    /// Returns the new paused state.
    pub fn pause_race(&mut self) -> bool {
        if !self.session.phase.is_operational() {
            debug!("[RideEngine] Ignoring pause while idle");
            return self.session.is_paused;
        }
        let now = self.clock.now_ms();
        self.refresh_elapsed(now);
        self.session.is_paused = !self.session.is_paused;
        self.sync_block_clock(now);
        info!(
            "[RideEngine] {} at {}s",
            if self.session.is_paused { "Paused" } else { "Resumed" },
            self.session.elapsed_seconds
        );
        self.session.is_paused
    }

    // ========================================================================
    // Timer
    // ========================================================================

    /// Recompute `elapsed_seconds` from the clock and return it.
    ///
    /// Does nothing while paused or outside a timed phase, so repeated calls
    /// return the same value regardless of the current time.
    pub fn update_timer(&mut self) -> u64 {
        if !self.session.is_paused && self.session.phase.is_timed() {
            let now = self.clock.now_ms();
            self.refresh_elapsed(now);
        }
        self.session.elapsed_seconds
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.session.elapsed_seconds
    }

    /// Elapsed seconds of the active block as of `now_ms`, without mutating.
    pub fn elapsed_seconds_at(&self, now_ms: i64) -> u64 {
        (self.elapsed_ms_at(now_ms) / 1_000) as u64
    }

    fn elapsed_ms_at(&self, now_ms: i64) -> i64 {
        let running = self
            .session
            .clock_running_since
            .map(|since| (now_ms - since).max(0))
            .unwrap_or(0);
        (self.session.clock_accrued_ms + running).max(0)
    }

    fn refresh_elapsed(&mut self, now_ms: i64) {
        if self.session.clock_running_since.is_some() {
            self.session.elapsed_seconds = self.elapsed_seconds_at(now_ms);
        }
    }

    /// Start or stop the block clock to match phase and pause state.
    fn sync_block_clock(&mut self, now_ms: i64) {
        let should_run = self.session.phase.is_timed() && !self.session.is_paused;
        match (self.session.clock_running_since, should_run) {
            (Some(since), false) => {
                self.session.clock_accrued_ms += (now_ms - since).max(0);
                self.session.clock_running_since = None;
            }
            (None, true) => self.session.clock_running_since = Some(now_ms),
            _ => {}
        }
    }

    // ========================================================================
    // Route Points
    // ========================================================================

    /// Append a point to the active trail. Accepted only in EN_ROUTE and
    /// IN_RIDE. Returns true if the point was appended.
    pub fn add_route_point(&mut self, point: RoutePoint) -> bool {
        if !self.session.phase.is_timed() {
            debug!(
                "[RideEngine] Dropping route point in phase {}",
                self.session.phase
            );
            return false;
        }
        self.session.active_trail.push(point);
        true
    }

    /// Live distance of the active trail in meters.
    pub fn active_distance_meters(&self) -> u64 {
        trail_distance_meters(&self.session.active_trail)
    }

    // ========================================================================
    // Orthogonal Mutators
    // ========================================================================

    pub fn set_race_value(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(RideError::InvalidValue { value });
        }
        self.session.current_value = Some(value);
        Ok(())
    }

    pub fn clear_race_value(&mut self) {
        self.session.current_value = None;
    }

    pub fn set_payment_method(&mut self, method: Option<PaymentMethod>) {
        self.session.payment_method = method;
    }

    pub fn set_payment_status(&mut self, status: PaymentStatus) {
        self.session.payment_status = status;
    }

    pub fn set_passenger_name(&mut self, name: &str) {
        self.session.passenger.name = name.to_string();
    }

    pub fn set_passenger_cpf(&mut self, cpf: &str) {
        self.session.passenger.cpf = cpf.to_string();
    }

    pub fn set_passenger_phone(&mut self, phone: &str) {
        self.session.passenger.phone = phone.to_string();
    }

    /// Merge the provided passenger fields.
    pub fn update_passenger(&mut self, update: PassengerUpdate) {
        if let Some(name) = update.name {
            self.session.passenger.name = name;
        }
        if let Some(cpf) = update.cpf {
            self.session.passenger.cpf = cpf;
        }
        if let Some(phone) = update.phone {
            self.session.passenger.phone = phone;
        }
    }

    /// Record a successful fix. Clears any location error.
    pub fn set_current_location(&mut self, location: LatLng) {
        self.session.current_location = Some(location);
        self.session.location_error = None;
    }

    /// Record a location error. The last known location is retained.
    pub fn set_location_error(&mut self, error: Option<String>) {
        self.session.location_error = error;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn guard(&self, event: RideEvent) -> Option<RidePhase> {
        let next = next_phase(self.session.phase, event);
        if next.is_none() {
            debug!(
                "[RideEngine] Ignoring {:?} in phase {}",
                event, self.session.phase
            );
        }
        next
    }

    fn enter(&mut self, next: RidePhase, now_ms: i64) {
        info!("[RideEngine] {} -> {}", self.session.phase, next);
        self.session.phase = next;
        self.sync_block_clock(now_ms);
    }

    /// Reset the working trail and block clock for a new timed block.
    fn begin_timed_block(&mut self) {
        self.session.active_trail.clear();
        self.session.elapsed_seconds = 0;
        self.session.clock_accrued_ms = 0;
        self.session.clock_running_since = None;
    }

    /// Freeze `block` from the working trail, keeping its start time.
    fn freeze_block(&self, block: &PhaseBlock, now_ms: i64) -> PhaseBlock {
        PhaseBlock {
            start_time: block.start_time,
            ..self.freeze_active_block(now_ms)
        }
    }

    /// Snapshot the live block. The trail is cloned so the frozen copy is
    /// independent of any later change to the working trail.
    fn freeze_active_block(&self, now_ms: i64) -> PhaseBlock {
        PhaseBlock {
            start_time: None,
            end_time: Some(now_ms),
            frozen_duration_seconds: self.elapsed_seconds_at(now_ms),
            frozen_distance_meters: trail_distance_meters(&self.session.active_trail),
            frozen_trail: self.session.active_trail.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
