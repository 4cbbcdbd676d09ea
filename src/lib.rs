//! # Ride Tracker
//!
//! Ride lifecycle state machine and GPS route tracking for driver apps.
//!
//! This library provides:
//! - A total, phase-guarded ride lifecycle (displacement, pickup, ride,
//!   finalization, price entry)
//! - Per-phase route trails frozen at phase end, with haversine distances
//! - A timestamp-based block clock that excludes paused intervals
//! - A location adapter with movement filtering and watch lifecycle handling
//! - One dispatch path for manual actions and interpreted voice commands
//! - Durable session snapshots and final ride submission
//!
//! ## Features
//!
//! - **`persistence`** - SQLite snapshot store
//! - **`http`** - HTTP ride recorder with retry on 429
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use ride_tracker::{ManualClock, RideEngine, RidePhase, RoutePoint};
//!
//! let clock = ManualClock::new(0);
//! let mut engine = RideEngine::with_clock(clock.clone());
//!
//! engine.start_displacement();
//! engine.add_route_point(RoutePoint::new(-23.5505, -46.6333, 0));
//! engine.add_route_point(RoutePoint::new(-23.5515, -46.6333, 30_000));
//! clock.advance_secs(60);
//! engine.arrive_at_pickup();
//!
//! let displacement = &engine.session().displacement;
//! assert_eq!(engine.phase(), RidePhase::WaitingPickup);
//! assert_eq!(displacement.frozen_duration_seconds, 60);
//! assert!(displacement.frozen_distance_meters > 100);
//! ```

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, RideError};

// Time source for the block clock
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Session data model
pub mod session;
pub use session::{
    LatLng, Passenger, PaymentMethod, PaymentStatus, PhaseBlock, RaceSession, RidePhase,
    RoutePoint,
};

// Haversine distance and movement filtering
pub mod geo_utils;
pub use geo_utils::{haversine_distance, trail_distance_meters};

// Lifecycle state machine
pub mod engine;
pub use engine::{next_phase, EngineStats, PassengerUpdate, RideEngine, RideEvent};

// Tracker and recorder configuration
pub mod config;
pub use config::{RecorderConfig, TrackerConfig};

// Platform position watch adapter
pub mod location;
pub use location::{
    FixOutcome, LocationAdapter, LocationError, LocationErrorKind, LocationSource, PositionFix,
    PositionOptions, WatchId,
};

// Manual and voice command dispatch
pub mod intent;
pub use intent::{dispatch, DispatchOutcome, DriverIntent};

// Flat key-value session snapshots
pub mod snapshot;
pub use snapshot::Snapshot;

// Snapshot stores and the persisted engine wrapper
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteSnapshotStore;
pub use persistence::{MemorySnapshotStore, PersistentRideEngine, SnapshotStore};

// Final ride payload and checkout
pub mod submission;
pub use submission::{checkout, RideRecorder, RideSubmission};

// Receipt summary
pub mod receipt;
pub use receipt::{format_distance, format_duration, RideReceipt};

// HTTP ride recorder
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpRideRecorder;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RideTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}
