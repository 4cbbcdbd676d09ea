//! Session data model: phases, route points, phase blocks and the
//! [`RaceSession`] aggregate owned by the ride engine.
//!
//! These are plain data types. All mutation goes through
//! [`RideEngine`](crate::RideEngine), which only ever hands out `&RaceSession`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a ride. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RidePhase {
    /// Driver available, no session open
    #[default]
    Idle,
    /// Driving to the pickup point (displacement block is live)
    EnRoute,
    /// Parked at pickup, waiting for the passenger
    WaitingPickup,
    /// Passenger on board (ride block is live)
    InRide,
    /// Ride over, collecting payment details
    Finalizing,
    /// Price entry sub-flow
    SettingPrice,
}

impl RidePhase {
    pub const ALL: [RidePhase; 6] = [
        RidePhase::Idle,
        RidePhase::EnRoute,
        RidePhase::WaitingPickup,
        RidePhase::InRide,
        RidePhase::Finalizing,
        RidePhase::SettingPrice,
    ];

    /// String tag used in snapshots and over FFI.
    pub fn as_str(&self) -> &'static str {
        match self {
            RidePhase::Idle => "IDLE",
            RidePhase::EnRoute => "EN_ROUTE",
            RidePhase::WaitingPickup => "WAITING_PICKUP",
            RidePhase::InRide => "IN_RIDE",
            RidePhase::Finalizing => "FINALIZING",
            RidePhase::SettingPrice => "SETTING_PRICE",
        }
    }

    /// Phases whose block has a running clock and collects a trail.
    pub fn is_timed(&self) -> bool {
        matches!(self, RidePhase::EnRoute | RidePhase::InRide)
    }

    /// Any phase other than idle.
    pub fn is_operational(&self) -> bool {
        !matches!(self, RidePhase::Idle)
    }
}

impl fmt::Display for RidePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RidePhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RidePhase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{}'", s))
    }
}

/// A bare coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A timestamped GPS sample on a trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl RoutePoint {
    pub fn new(lat: f64, lng: f64, timestamp: i64) -> Self {
        Self { lat, lng, timestamp }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Metrics for one timed phase (displacement or ride).
///
/// Live while `start_time` is set and `end_time` is not; frozen once
/// `end_time` is set. The frozen fields are written exactly once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseBlock {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub frozen_duration_seconds: u64,
    pub frozen_distance_meters: u64,
    pub frozen_trail: Vec<RoutePoint>,
}

impl PhaseBlock {
    pub(crate) fn opened_at(now_ms: i64) -> Self {
        Self {
            start_time: Some(now_ms),
            ..Self::default()
        }
    }

    pub fn is_live(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Passenger details captured during the ride. All optional, may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Passenger {
    pub name: String,
    pub cpf: String,
    pub phone: String,
}

/// How the passenger paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Pix,
    Dinheiro,
    Cartao,
    Outro,
    Credito,
    Debito,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "PIX",
            PaymentMethod::Dinheiro => "DINHEIRO",
            PaymentMethod::Cartao => "CARTAO",
            PaymentMethod::Outro => "OUTRO",
            PaymentMethod::Credito => "CREDITO",
            PaymentMethod::Debito => "DEBITO",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PIX" => Ok(PaymentMethod::Pix),
            "DINHEIRO" => Ok(PaymentMethod::Dinheiro),
            "CARTAO" => Ok(PaymentMethod::Cartao),
            "OUTRO" => Ok(PaymentMethod::Outro),
            "CREDITO" => Ok(PaymentMethod::Credito),
            "DEBITO" => Ok(PaymentMethod::Debito),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

/// Whether the ride has been paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pago,
    Pendente,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pago => "PAGO",
            PaymentStatus::Pendente => "PENDENTE",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PAGO" => Ok(PaymentStatus::Pago),
            "PENDENTE" => Ok(PaymentStatus::Pendente),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Root aggregate for one ride lifecycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RaceSession {
    pub phase: RidePhase,
    /// Working trail for whichever timed block is live
    pub active_trail: Vec<RoutePoint>,
    /// Last recomputed elapsed time of the live block
    pub elapsed_seconds: u64,
    pub is_paused: bool,

    pub displacement: PhaseBlock,
    pub ride: PhaseBlock,

    pub passenger: Passenger,
    pub current_value: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_status: PaymentStatus,

    pub current_location: Option<LatLng>,
    pub location_error: Option<String>,

    /// Milliseconds the active block clock ran before `clock_running_since`
    pub clock_accrued_ms: i64,
    /// When the active block clock last started running, if it is running
    pub clock_running_since: Option<i64>,
}

impl RaceSession {
    /// Session state after checkout or cancel. Device location survives.
    pub(crate) fn reset_keeping_location(&self) -> Self {
        Self {
            current_location: self.current_location,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tags_roundtrip() {
        for phase in RidePhase::ALL {
            assert_eq!(phase.as_str().parse::<RidePhase>(), Ok(phase));
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
        }
        assert!("LIVRE".parse::<RidePhase>().is_err());
    }

    #[test]
    fn test_timed_phases() {
        let timed: Vec<RidePhase> = RidePhase::ALL.into_iter().filter(|p| p.is_timed()).collect();
        assert_eq!(timed, vec![RidePhase::EnRoute, RidePhase::InRide]);
        assert!(!RidePhase::Idle.is_operational());
        assert!(RidePhase::SettingPrice.is_operational());
    }

    #[test]
    fn test_payment_parsing() {
        assert_eq!("pix".parse::<PaymentMethod>(), Ok(PaymentMethod::Pix));
        assert_eq!(" Cartao ".parse::<PaymentMethod>(), Ok(PaymentMethod::Cartao));
        assert!("BITCOIN".parse::<PaymentMethod>().is_err());
        assert_eq!("PENDENTE".parse::<PaymentStatus>(), Ok(PaymentStatus::Pendente));
        assert_eq!(PaymentStatus::default(), PaymentStatus::Pago);
    }

    #[test]
    fn test_block_states() {
        let empty = PhaseBlock::default();
        assert!(!empty.is_live());
        assert!(!empty.is_frozen());

        let mut block = PhaseBlock::opened_at(1_000);
        assert!(block.is_live());
        block.end_time = Some(2_000);
        assert!(!block.is_live());
        assert!(block.is_frozen());
    }

    #[test]
    fn test_reset_keeps_location() {
        let session = RaceSession {
            phase: RidePhase::Finalizing,
            current_value: Some(25.0),
            current_location: Some(LatLng::new(-23.5, -46.6)),
            ..RaceSession::default()
        };
        let reset = session.reset_keeping_location();
        assert_eq!(reset.phase, RidePhase::Idle);
        assert_eq!(reset.current_value, None);
        assert_eq!(reset.current_location, session.current_location);
    }
}
