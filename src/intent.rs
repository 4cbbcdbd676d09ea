//! Driver intents and their dispatch onto the ride engine.
//!
//! A [`DriverIntent`] is what the driver wants to happen, whether it came
//! from a button or from the voice interpretation service. [`dispatch`] is
//! the single entry point for both, so there is no behaviour that only the
//! voice path has.
//!
//! The interpretation service answers with a loosely typed JSON object
//! (`{"action": "FINALIZE", "value": 25, "method": "PIX", ...}`).
//! [`DriverIntent::from_json`] never fails: anything it cannot make sense of
//! becomes [`DriverIntent::None`] with a generic message.

use log::{debug, info, warn};
use serde::Deserialize;

use crate::clock::Clock;
use crate::engine::{PassengerUpdate, RideEngine};
use crate::session::PaymentMethod;

/// Message shown when an intent payload could not be understood.
pub const NOT_UNDERSTOOD_MESSAGE: &str = "Sorry, I did not understand the command.";

/// A structured driver command.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverIntent {
    /// Finish the ride, optionally recording value and payment method first
    Finalize {
        value: Option<f64>,
        method: Option<PaymentMethod>,
        message: Option<String>,
    },
    /// Set the agreed price
    SetValue { value: f64 },
    Pause,
    Resume,
    /// Merge passenger fields (and optionally the value)
    UpdatePassenger {
        passenger: PassengerUpdate,
        value: Option<f64>,
        message: Option<String>,
    },
    /// Arrived at the pickup point
    Arrive,
    /// Passenger on board
    StartRide,
    /// Could not interpret; surface `message`, change nothing
    None { message: String },
}

/// Wire shape of an interpreted command.
#[derive(Debug, Default, Deserialize)]
struct RawIntent {
    action: Option<String>,
    value: Option<f64>,
    method: Option<String>,
    #[serde(rename = "passengerName")]
    passenger_name: Option<String>,
    #[serde(rename = "passengerCPF")]
    passenger_cpf: Option<String>,
    #[serde(rename = "passengerPhone")]
    passenger_phone: Option<String>,
    message: Option<String>,
}

impl DriverIntent {
    /// Decode an interpretation-service response.
    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str::<RawIntent>(json) {
            Ok(raw) => Self::from_raw(raw),
            Err(e) => {
                warn!("[IntentDispatcher] Malformed intent payload: {}", e);
                Self::not_understood(None)
            }
        }
    }

    fn from_raw(raw: RawIntent) -> Self {
        let message = raw.message.filter(|m| !m.trim().is_empty());
        let value = raw.value.filter(|v| v.is_finite() && *v > 0.0);

        match raw.action.as_deref().map(str::trim) {
            Some("FINALIZE") => DriverIntent::Finalize {
                value,
                method: raw.method.as_deref().and_then(parse_method),
                message,
            },
            Some("SET_VALUE") => match value {
                Some(value) => DriverIntent::SetValue { value },
                None => Self::not_understood(message),
            },
            Some("PAUSE") => DriverIntent::Pause,
            Some("RESUME") => DriverIntent::Resume,
            Some("UPDATE_PASSENGER") => DriverIntent::UpdatePassenger {
                passenger: PassengerUpdate {
                    name: non_empty(raw.passenger_name),
                    cpf: non_empty(raw.passenger_cpf),
                    phone: non_empty(raw.passenger_phone),
                },
                value,
                message,
            },
            Some("ARRIVE") => DriverIntent::Arrive,
            Some("START_RIDE") => DriverIntent::StartRide,
            Some("NONE") => Self::not_understood(message),
            other => {
                warn!("[IntentDispatcher] Unknown action {:?}", other);
                Self::not_understood(None)
            }
        }
    }

    fn not_understood(message: Option<String>) -> Self {
        DriverIntent::None {
            message: message.unwrap_or_else(|| NOT_UNDERSTOOD_MESSAGE.to_string()),
        }
    }

    /// Action tag, as used on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            DriverIntent::Finalize { .. } => "FINALIZE",
            DriverIntent::SetValue { .. } => "SET_VALUE",
            DriverIntent::Pause => "PAUSE",
            DriverIntent::Resume => "RESUME",
            DriverIntent::UpdatePassenger { .. } => "UPDATE_PASSENGER",
            DriverIntent::Arrive => "ARRIVE",
            DriverIntent::StartRide => "START_RIDE",
            DriverIntent::None { .. } => "NONE",
        }
    }
}

fn parse_method(method: &str) -> Option<PaymentMethod> {
    match method.parse() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("[IntentDispatcher] Ignoring payment method: {}", e);
            None
        }
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

/// Result of dispatching an intent.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The engine changed; `message` is feedback for the driver
    Applied { message: String },
    /// Valid intent with nothing to do (e.g. RESUME while not paused)
    Skipped,
    /// Intent not understood; show `message`
    NotUnderstood { message: String },
}

/// Apply an intent to the engine exactly as the equivalent manual actions.
pub fn dispatch<C: Clock>(intent: &DriverIntent, engine: &mut RideEngine<C>) -> DispatchOutcome {
    debug!(
        "[IntentDispatcher] {} in phase {}",
        intent.action(),
        engine.phase()
    );

    let outcome = match intent {
        DriverIntent::None { message } => {
            return DispatchOutcome::NotUnderstood {
                message: message.clone(),
            }
        }
        DriverIntent::Finalize {
            value,
            method,
            message,
        } => {
            if let Some(value) = value {
                apply_value(engine, *value);
            }
            if method.is_some() {
                engine.set_payment_method(*method);
            }
            if engine.go_to_finalize() {
                DispatchOutcome::Applied {
                    message: message
                        .clone()
                        .unwrap_or_else(|| "Ride finalized.".to_string()),
                }
            } else if value.is_some() || method.is_some() {
                DispatchOutcome::Applied {
                    message: "Payment details saved.".to_string(),
                }
            } else {
                DispatchOutcome::Skipped
            }
        }
        DriverIntent::SetValue { value } => {
            if apply_value(engine, *value) {
                DispatchOutcome::Applied {
                    message: format!("Value set: R$ {:.2}", value),
                }
            } else {
                DispatchOutcome::Skipped
            }
        }
        DriverIntent::Pause => {
            if engine.is_paused() || !engine.phase().is_operational() {
                DispatchOutcome::Skipped
            } else {
                engine.pause_race();
                DispatchOutcome::Applied {
                    message: "Ride paused.".to_string(),
                }
            }
        }
        DriverIntent::Resume => {
            if engine.is_paused() {
                engine.pause_race();
                DispatchOutcome::Applied {
                    message: "Ride resumed.".to_string(),
                }
            } else {
                DispatchOutcome::Skipped
            }
        }
        DriverIntent::UpdatePassenger {
            passenger,
            value,
            message,
        } => {
            let touched = !passenger.is_empty() || value.is_some();
            engine.update_passenger(passenger.clone());
            if let Some(value) = value {
                apply_value(engine, *value);
            }
            if touched {
                DispatchOutcome::Applied {
                    message: message
                        .clone()
                        .unwrap_or_else(|| "Passenger details updated.".to_string()),
                }
            } else {
                DispatchOutcome::Skipped
            }
        }
        DriverIntent::Arrive => applied_if(
            engine.arrive_at_pickup(),
            "Arrival at pickup recorded.",
        ),
        DriverIntent::StartRide => applied_if(engine.start_ride(), "Ride started."),
    };

    if let DispatchOutcome::Applied { message } = &outcome {
        info!("[IntentDispatcher] {}: {}", intent.action(), message);
    }
    outcome
}

fn apply_value<C: Clock>(engine: &mut RideEngine<C>, value: f64) -> bool {
    match engine.set_race_value(value) {
        Ok(()) => true,
        Err(e) => {
            warn!("[IntentDispatcher] {}", e);
            false
        }
    }
}

fn applied_if(changed: bool, message: &str) -> DispatchOutcome {
    if changed {
        DispatchOutcome::Applied {
            message: message.to_string(),
        }
    } else {
        DispatchOutcome::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::RidePhase;

    fn engine_in_ride() -> RideEngine<ManualClock> {
        let mut engine = RideEngine::with_clock(ManualClock::new(0));
        engine.start_displacement();
        engine.arrive_at_pickup();
        engine.start_ride();
        engine
    }

    #[test]
    fn test_parse_finalize() {
        let intent = DriverIntent::from_json(
            r#"{"action":"FINALIZE","value":25,"method":"PIX","message":"Done"}"#,
        );
        assert_eq!(
            intent,
            DriverIntent::Finalize {
                value: Some(25.0),
                method: Some(PaymentMethod::Pix),
                message: Some("Done".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_nulls_from_strict_schema() {
        let intent = DriverIntent::from_json(
            r#"{"action":"PAUSE","value":null,"method":null,"message":"ok"}"#,
        );
        assert_eq!(intent, DriverIntent::Pause);
    }

    #[test]
    fn test_parse_update_passenger() {
        let intent = DriverIntent::from_json(
            r#"{"action":"UPDATE_PASSENGER","passengerName":"João","passengerPhone":""}"#,
        );
        match intent {
            DriverIntent::UpdatePassenger { passenger, value, .. } => {
                assert_eq!(passenger.name.as_deref(), Some("João"));
                assert_eq!(passenger.phone, None);
                assert_eq!(passenger.cpf, None);
                assert_eq!(value, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payloads_become_none() {
        for payload in ["", "[]", "{\"action\": 7}", "{\"action\":\"DANCE\"}", "{}"] {
            assert_eq!(
                DriverIntent::from_json(payload),
                DriverIntent::None {
                    message: NOT_UNDERSTOOD_MESSAGE.to_string()
                },
                "payload {:?}",
                payload
            );
        }
    }

    #[test]
    fn test_none_keeps_service_message() {
        let intent = DriverIntent::from_json(r#"{"action":"NONE","message":"Say again?"}"#);
        assert_eq!(
            intent,
            DriverIntent::None {
                message: "Say again?".to_string()
            }
        );
    }

    #[test]
    fn test_set_value_without_value_is_not_understood() {
        let intent = DriverIntent::from_json(r#"{"action":"SET_VALUE","value":null}"#);
        assert!(matches!(intent, DriverIntent::None { .. }));
    }

    #[test]
    fn test_none_does_not_touch_engine() {
        let mut engine = engine_in_ride();
        let before = engine.session().clone();
        let outcome = dispatch(
            &DriverIntent::None {
                message: "?".to_string(),
            },
            &mut engine,
        );
        assert_eq!(
            outcome,
            DispatchOutcome::NotUnderstood {
                message: "?".to_string()
            }
        );
        assert_eq!(engine.session(), &before);
    }

    #[test]
    fn test_finalize_sets_value_then_transitions() {
        let mut engine = engine_in_ride();
        let intent = DriverIntent::Finalize {
            value: Some(32.5),
            method: Some(PaymentMethod::Dinheiro),
            message: None,
        };
        assert!(matches!(
            dispatch(&intent, &mut engine),
            DispatchOutcome::Applied { .. }
        ));
        let session = engine.session();
        assert_eq!(session.phase, RidePhase::Finalizing);
        assert_eq!(session.current_value, Some(32.5));
        assert_eq!(session.payment_method, Some(PaymentMethod::Dinheiro));
    }

    #[test]
    fn test_finalize_refused_only_saves_payment_details() {
        let mut engine = RideEngine::with_clock(ManualClock::new(0));
        engine.start_displacement();
        let intent = DriverIntent::Finalize {
            value: Some(25.0),
            method: Some(PaymentMethod::Pix),
            message: Some("Ride finalized, R$ 25 by PIX.".to_string()),
        };
        assert_eq!(
            dispatch(&intent, &mut engine),
            DispatchOutcome::Applied {
                message: "Payment details saved.".to_string()
            }
        );
        let session = engine.session();
        assert_eq!(session.phase, RidePhase::EnRoute);
        assert_eq!(session.current_value, Some(25.0));
        assert_eq!(session.payment_method, Some(PaymentMethod::Pix));

        let bare = DriverIntent::Finalize {
            value: None,
            method: None,
            message: None,
        };
        assert_eq!(dispatch(&bare, &mut engine), DispatchOutcome::Skipped);
        assert_eq!(engine.phase(), RidePhase::EnRoute);
    }

    #[test]
    fn test_pause_and_resume_are_idempotent() {
        let mut engine = engine_in_ride();
        assert_eq!(dispatch(&DriverIntent::Resume, &mut engine), DispatchOutcome::Skipped);
        assert!(!engine.is_paused());

        assert!(matches!(
            dispatch(&DriverIntent::Pause, &mut engine),
            DispatchOutcome::Applied { .. }
        ));
        assert_eq!(dispatch(&DriverIntent::Pause, &mut engine), DispatchOutcome::Skipped);
        assert!(engine.is_paused());

        assert!(matches!(
            dispatch(&DriverIntent::Resume, &mut engine),
            DispatchOutcome::Applied { .. }
        ));
        assert!(!engine.is_paused());
    }

    #[test]
    fn test_arrive_and_start_follow_phase_rules() {
        let mut engine = RideEngine::with_clock(ManualClock::new(0));
        assert_eq!(dispatch(&DriverIntent::Arrive, &mut engine), DispatchOutcome::Skipped);

        engine.start_displacement();
        assert_eq!(dispatch(&DriverIntent::StartRide, &mut engine), DispatchOutcome::Skipped);
        assert!(matches!(
            dispatch(&DriverIntent::Arrive, &mut engine),
            DispatchOutcome::Applied { .. }
        ));
        assert!(matches!(
            dispatch(&DriverIntent::StartRide, &mut engine),
            DispatchOutcome::Applied { .. }
        ));
        assert_eq!(engine.phase(), RidePhase::InRide);
    }

    #[test]
    fn test_update_passenger_merges_fields() {
        let mut engine = engine_in_ride();
        engine.set_passenger_name("Carla");
        let intent = DriverIntent::UpdatePassenger {
            passenger: PassengerUpdate {
                phone: Some("21988887777".to_string()),
                ..PassengerUpdate::default()
            },
            value: Some(18.0),
            message: None,
        };
        dispatch(&intent, &mut engine);

        let session = engine.session();
        assert_eq!(session.passenger.name, "Carla");
        assert_eq!(session.passenger.phone, "21988887777");
        assert_eq!(session.current_value, Some(18.0));
        assert_eq!(session.phase, RidePhase::InRide);
    }
}
