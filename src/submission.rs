//! Final ride submission.
//!
//! [`RideSubmission`] is the payload handed to the persistence collaborator
//! once a ride is finalized. Field names are the ones the ride records table
//! expects. [`checkout`] runs the whole flow: build the payload under the
//! engine lock, submit it without holding the lock, and reset the session
//! only after the recorder reports success.

use std::future::Future;
use std::sync::Mutex;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::engine::RideEngine;
use crate::error::{RideError, Result};
use crate::session::{PhaseBlock, RidePhase, RoutePoint};

/// Metrics of one frozen block as stored in the ride record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Seconds
    pub duration: u64,
    /// Meters
    pub distance: u64,
    pub points: Vec<RoutePoint>,
}

impl From<&PhaseBlock> for BlockSummary {
    fn from(block: &PhaseBlock) -> Self {
        Self {
            duration: block.frozen_duration_seconds,
            distance: block.frozen_distance_meters,
            points: block.frozen_trail.clone(),
        }
    }
}

/// Both blocks of the ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub displacement: BlockSummary,
    pub race: BlockSummary,
}

/// Payload sent to the ride records service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSubmission {
    pub valor: f64,
    pub metodo_pagamento: String,
    pub duracao_segundos: u64,
    pub distancia_metros: u64,
    pub status_pagamento: String,
    pub nome_passageiro: String,
    pub cpf_passageiro: String,
    pub telefone_passageiro: String,
    pub rota: RouteRecord,
}

impl<C: Clock> RideEngine<C> {
    /// Build the submission payload. Requires FINALIZING and a chosen
    /// payment method; an unset value is submitted as 0.
    pub fn build_submission(&self) -> Result<RideSubmission> {
        let session = self.session();
        if session.phase != RidePhase::Finalizing {
            return Err(RideError::InvalidPhase {
                operation: "submit the ride".to_string(),
                phase: session.phase,
            });
        }
        let method = session
            .payment_method
            .ok_or(RideError::MissingPaymentMethod)?;

        Ok(RideSubmission {
            valor: session.current_value.unwrap_or(0.0),
            metodo_pagamento: method.as_str().to_string(),
            duracao_segundos: session.ride.frozen_duration_seconds,
            distancia_metros: session.ride.frozen_distance_meters,
            status_pagamento: session.payment_status.as_str().to_string(),
            nome_passageiro: session.passenger.name.clone(),
            cpf_passageiro: session.passenger.cpf.clone(),
            telefone_passageiro: session.passenger.phone.clone(),
            rota: RouteRecord {
                displacement: BlockSummary::from(&session.displacement),
                race: BlockSummary::from(&session.ride),
            },
        })
    }

    /// Reset the session after `recorded` was stored, but only if the
    /// session still builds that exact payload. Returns true if it reset.
    pub fn confirm_recorded(&mut self, recorded: &RideSubmission) -> bool {
        match self.build_submission() {
            Ok(current) if current == *recorded => self.confirm_checkout(),
            _ => {
                warn!(
                    "[RideRecorder] Ride recorded but session changed since (phase {}), not resetting",
                    self.phase()
                );
                false
            }
        }
    }
}

/// The persistence collaborator for finished rides.
pub trait RideRecorder {
    /// Store one ride. Any error leaves the session in FINALIZING.
    fn record_ride(&self, ride: &RideSubmission) -> impl Future<Output = Result<()>> + Send;
}

/// Submit the finalized ride and reset the session on success.
///
/// The engine lock is only held while building the payload and while
/// confirming, so timer ticks and location updates keep flowing during the
/// network call. If the session changed in the meantime (for example the
/// driver went back to correct something), it is not reset.
pub async fn checkout<C, R>(engine: &Mutex<RideEngine<C>>, recorder: &R) -> Result<RideSubmission>
where
    C: Clock,
    R: RideRecorder,
{
    let payload = {
        let guard = engine.lock().map_err(|_| RideError::Internal {
            message: "ride engine lock poisoned".to_string(),
        })?;
        guard.build_submission()?
    };

    info!(
        "[RideRecorder] Submitting ride: R$ {:.2}, {}s, {}m",
        payload.valor, payload.duracao_segundos, payload.distancia_metros
    );

    if let Err(e) = recorder.record_ride(&payload).await {
        warn!("[RideRecorder] Submission failed, keeping session: {}", e);
        return Err(e);
    }

    let mut guard = engine.lock().map_err(|_| RideError::Internal {
        message: "ride engine lock poisoned".to_string(),
    })?;
    guard.confirm_recorded(&payload);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{PaymentMethod, PaymentStatus, RaceSession};

    struct FakeRecorder {
        fail: bool,
        calls: AtomicU32,
        last: Mutex<Option<RideSubmission>>,
    }

    impl FakeRecorder {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicU32::new(0),
                last: Mutex::new(None),
            }
        }
    }

    impl RideRecorder for FakeRecorder {
        async fn record_ride(&self, ride: &RideSubmission) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(ride.clone());
            if self.fail {
                Err(RideError::Http {
                    message: "Internal Server Error".to_string(),
                    status_code: Some(500),
                })
            } else {
                Ok(())
            }
        }
    }

    fn finalized_engine() -> RideEngine<ManualClock> {
        let clock = ManualClock::new(1_000_000);
        let mut engine = RideEngine::with_clock(clock.clone());
        engine.start_displacement();
        engine.add_route_point(RoutePoint::new(-23.550, -46.63, 1));
        engine.add_route_point(RoutePoint::new(-23.551, -46.63, 2));
        clock.advance_secs(90);
        engine.arrive_at_pickup();
        engine.start_ride();
        engine.add_route_point(RoutePoint::new(-23.551, -46.63, 3));
        engine.add_route_point(RoutePoint::new(-23.560, -46.63, 4));
        clock.advance_secs(600);
        engine.go_to_finalize();
        engine.set_race_value(27.5).unwrap();
        engine.set_passenger_name("Lúcia");
        engine
    }

    /// Stands in for a driver correcting the value while the request is in
    /// flight.
    struct CorrectingRecorder<'a> {
        engine: &'a Mutex<RideEngine<ManualClock>>,
    }

    impl RideRecorder for CorrectingRecorder<'_> {
        async fn record_ride(&self, _ride: &RideSubmission) -> Result<()> {
            let mut engine = self.engine.lock().unwrap();
            engine.back_to_displacement();
            engine.set_race_value(31.0).unwrap();
            engine.arrive_at_pickup();
            engine.start_ride();
            engine.go_to_finalize();
            Ok(())
        }
    }

    #[test]
    fn test_payload_requires_finalizing() {
        let engine = RideEngine::with_clock(ManualClock::new(0));
        assert!(matches!(
            engine.build_submission(),
            Err(RideError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn test_payload_requires_payment_method() {
        let engine = finalized_engine();
        assert_eq!(engine.build_submission(), Err(RideError::MissingPaymentMethod));
    }

    #[test]
    fn test_payload_fields() {
        let mut engine = finalized_engine();
        engine.set_payment_method(Some(PaymentMethod::Pix));
        engine.set_payment_status(PaymentStatus::Pendente);
        let payload = engine.build_submission().unwrap();

        assert_eq!(payload.valor, 27.5);
        assert_eq!(payload.metodo_pagamento, "PIX");
        assert_eq!(payload.status_pagamento, "PENDENTE");
        assert_eq!(payload.duracao_segundos, 600);
        assert_eq!(payload.nome_passageiro, "Lúcia");
        assert_eq!(payload.rota.displacement.duration, 90);
        assert_eq!(payload.rota.displacement.points.len(), 2);
        assert_eq!(payload.rota.race.points.len(), 2);
        assert_eq!(payload.distancia_metros, payload.rota.race.distance);
        assert!(payload.distancia_metros > 900);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["rota"]["race"]["points"][0]["timestamp"], 3);
        assert!(json.get("telefone_passageiro").is_some());
    }

    #[tokio::test]
    async fn test_checkout_success_resets_session() {
        let mut engine = finalized_engine();
        engine.set_payment_method(Some(PaymentMethod::Cartao));
        let engine = Mutex::new(engine);
        let recorder = FakeRecorder::new(false);

        let payload = checkout(&engine, &recorder).await.unwrap();
        assert_eq!(payload.metodo_pagamento, "CARTAO");
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.lock().unwrap().session(), &RaceSession::default());
    }

    #[tokio::test]
    async fn test_checkout_failure_keeps_frozen_data() {
        let mut engine = finalized_engine();
        engine.set_payment_method(Some(PaymentMethod::Pix));
        let before = engine.session().clone();
        let engine = Mutex::new(engine);
        let recorder = FakeRecorder::new(true);

        let result = checkout(&engine, &recorder).await;
        assert!(matches!(result, Err(RideError::Http { .. })));
        assert_eq!(engine.lock().unwrap().session(), &before);

        // Retrying sends the identical payload.
        let _ = checkout(&engine, &recorder).await;
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
        let last = recorder.last.lock().unwrap().clone().unwrap();
        assert_eq!(last.rota.race.points, before.ride.frozen_trail);
    }

    #[test]
    fn test_payload_includes_displacement_frozen_at_price_entry() {
        let clock = ManualClock::new(0);
        let mut engine = RideEngine::with_clock(clock.clone());
        engine.start_displacement();
        engine.add_route_point(RoutePoint::new(-23.550, -46.63, 1));
        engine.add_route_point(RoutePoint::new(-23.551, -46.63, 2));
        clock.advance_secs(60);
        engine.go_to_set_value();
        engine.go_to_finalize();
        engine.set_payment_method(Some(PaymentMethod::Dinheiro));

        let payload = engine.build_submission().unwrap();
        assert_eq!(payload.rota.displacement.duration, 60);
        assert_eq!(payload.rota.displacement.points.len(), 2);
        assert!(payload.rota.displacement.distance > 100);
        assert_eq!(payload.duracao_segundos, 0);
    }

    #[tokio::test]
    async fn test_checkout_keeps_session_changed_during_submission() {
        let mut engine = finalized_engine();
        engine.set_payment_method(Some(PaymentMethod::Pix));
        let engine = Mutex::new(engine);
        let recorder = CorrectingRecorder { engine: &engine };

        let payload = checkout(&engine, &recorder).await.unwrap();
        assert_eq!(payload.valor, 27.5);

        let engine = engine.lock().unwrap();
        assert_eq!(engine.phase(), RidePhase::Finalizing);
        assert_eq!(engine.session().current_value, Some(31.0));
    }

    #[test]
    fn test_confirm_recorded_resets_matching_session() {
        let mut engine = finalized_engine();
        engine.set_payment_method(Some(PaymentMethod::Cartao));
        let payload = engine.build_submission().unwrap();
        assert!(engine.confirm_recorded(&payload));
        assert_eq!(engine.phase(), RidePhase::Idle);
    }

    #[tokio::test]
    async fn test_checkout_without_method_never_calls_recorder() {
        let engine = Mutex::new(finalized_engine());
        let recorder = FakeRecorder::new(false);
        assert_eq!(
            checkout(&engine, &recorder).await,
            Err(RideError::MissingPaymentMethod)
        );
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }
}
