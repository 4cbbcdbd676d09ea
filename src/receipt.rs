//! Read-only ride summary for receipts, PDFs and share messages.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::engine::RideEngine;
use crate::session::Passenger;

/// Totals of a finished (or finishing) ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideReceipt {
    pub passenger: Passenger,
    pub value: f64,
    pub payment_method: Option<String>,
    pub payment_status: String,
    pub displacement_seconds: u64,
    pub displacement_meters: u64,
    pub ride_seconds: u64,
    pub ride_meters: u64,
    /// Displacement plus ride
    pub total_seconds: u64,
    pub total_meters: u64,
    /// Epoch ms when the ride block was frozen
    pub ended_at: Option<i64>,
}

impl RideReceipt {
    /// Plain-text summary suitable for a messaging share sheet.
    /// Empty passenger fields are left out.
    pub fn share_text(&self) -> String {
        let mut lines = vec!["RIDE RECEIPT".to_string(), String::new()];
        for (label, value) in [
            ("Passenger", &self.passenger.name),
            ("CPF", &self.passenger.cpf),
            ("Phone", &self.passenger.phone),
        ] {
            if !value.trim().is_empty() {
                lines.push(format!("{}: {}", label, value));
            }
        }
        lines.push(format!("Distance: {}", format_distance(self.ride_meters)));
        lines.push(format!("Duration: {}", format_duration(self.ride_seconds)));
        lines.push(format!(
            "Payment: {}",
            self.payment_method.as_deref().unwrap_or("OUTRO")
        ));
        lines.push(format!("Status: {}", self.payment_status));
        lines.push(String::new());
        lines.push(format!("TOTAL: R$ {:.2}", self.value));
        lines.join("\n")
    }
}

impl<C: Clock> RideEngine<C> {
    /// Summary of the frozen blocks and payment details.
    pub fn receipt(&self) -> RideReceipt {
        let session = self.session();
        let displacement = &session.displacement;
        let ride = &session.ride;
        RideReceipt {
            passenger: session.passenger.clone(),
            value: session.current_value.unwrap_or(0.0),
            payment_method: session.payment_method.map(|m| m.as_str().to_string()),
            payment_status: session.payment_status.as_str().to_string(),
            displacement_seconds: displacement.frozen_duration_seconds,
            displacement_meters: displacement.frozen_distance_meters,
            ride_seconds: ride.frozen_duration_seconds,
            ride_meters: ride.frozen_distance_meters,
            total_seconds: displacement.frozen_duration_seconds + ride.frozen_duration_seconds,
            total_meters: displacement.frozen_distance_meters + ride.frozen_distance_meters,
            ended_at: ride.end_time,
        }
    }
}

/// "MM:SS" below an hour, "H:MM:SS" from there on.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// "850 m" below a kilometer, "1.2 km" from there on.
pub fn format_distance(meters: u64) -> String {
    if meters < 1000 {
        format!("{} m", meters)
    } else {
        format!("{:.1} km", meters as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{PaymentMethod, RoutePoint};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(65), "01:05");
        assert_eq!(format_duration(3599), "59:59");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(7384), "2:03:04");
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0), "0 m");
        assert_eq!(format_distance(850), "850 m");
        assert_eq!(format_distance(1000), "1.0 km");
        assert_eq!(format_distance(1240), "1.2 km");
    }

    #[test]
    fn test_receipt_totals() {
        let clock = ManualClock::new(0);
        let mut engine = RideEngine::with_clock(clock.clone());
        engine.start_displacement();
        engine.add_route_point(RoutePoint::new(0.0, 0.0, 0));
        engine.add_route_point(RoutePoint::new(0.0, 0.001, 1));
        clock.advance_secs(60);
        engine.arrive_at_pickup();
        clock.advance_secs(120);
        engine.start_ride();
        engine.add_route_point(RoutePoint::new(0.0, 0.001, 2));
        engine.add_route_point(RoutePoint::new(0.0, 0.011, 3));
        clock.advance_secs(300);
        engine.go_to_finalize();
        engine.set_race_value(22.0).unwrap();
        engine.set_payment_method(Some(PaymentMethod::Pix));

        let receipt = engine.receipt();
        assert_eq!(receipt.displacement_seconds, 60);
        assert_eq!(receipt.ride_seconds, 300);
        assert_eq!(receipt.total_seconds, 360);
        assert_eq!(
            receipt.total_meters,
            receipt.displacement_meters + receipt.ride_meters
        );
        assert_eq!(receipt.ended_at, Some(480_000));
        assert_eq!(receipt.payment_method.as_deref(), Some("PIX"));

        let text = receipt.share_text();
        assert!(text.contains("TOTAL: R$ 22.00"));
        assert!(text.contains("Duration: 05:00"));
        assert!(!text.contains("Passenger:"));
    }
}
