//! Flat key-value encoding of a [`RaceSession`].
//!
//! The persisted store wrapper only deals in `String -> String` maps, so the
//! session is flattened here: timestamps as epoch milliseconds, the phase as
//! its tag, trails and locations as JSON. Optional fields are omitted when
//! unset. An empty map decodes to a fresh session.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::Clock;
use crate::engine::RideEngine;
use crate::error::{OptionExt, RideError, Result};
use crate::session::{PhaseBlock, RaceSession};

/// A flattened session, ordered by key.
pub type Snapshot = BTreeMap<String, String>;

pub(crate) mod keys {
    pub const PHASE: &str = "phase";
    pub const IS_PAUSED: &str = "is_paused";
    pub const ELAPSED_SECONDS: &str = "elapsed_seconds";
    pub const ACTIVE_TRAIL: &str = "active_trail";
    pub const CLOCK_ACCRUED_MS: &str = "clock_accrued_ms";
    pub const CLOCK_RUNNING_SINCE: &str = "clock_running_since";
    pub const PASSENGER_NAME: &str = "passenger.name";
    pub const PASSENGER_CPF: &str = "passenger.cpf";
    pub const PASSENGER_PHONE: &str = "passenger.phone";
    pub const CURRENT_VALUE: &str = "current_value";
    pub const PAYMENT_METHOD: &str = "payment_method";
    pub const PAYMENT_STATUS: &str = "payment_status";
    pub const CURRENT_LOCATION: &str = "current_location";
    pub const LOCATION_ERROR: &str = "location_error";
    pub const DISPLACEMENT: &str = "displacement";
    pub const RIDE: &str = "ride";
}

impl RaceSession {
    pub fn to_snapshot(&self) -> Snapshot {
        let mut map = Snapshot::new();
        map.insert(keys::PHASE.into(), self.phase.as_str().into());
        map.insert(keys::IS_PAUSED.into(), self.is_paused.to_string());
        map.insert(keys::ELAPSED_SECONDS.into(), self.elapsed_seconds.to_string());
        map.insert(keys::ACTIVE_TRAIL.into(), to_json(&self.active_trail));
        map.insert(keys::CLOCK_ACCRUED_MS.into(), self.clock_accrued_ms.to_string());
        if let Some(since) = self.clock_running_since {
            map.insert(keys::CLOCK_RUNNING_SINCE.into(), since.to_string());
        }

        write_block(&mut map, keys::DISPLACEMENT, &self.displacement);
        write_block(&mut map, keys::RIDE, &self.ride);

        map.insert(keys::PASSENGER_NAME.into(), self.passenger.name.clone());
        map.insert(keys::PASSENGER_CPF.into(), self.passenger.cpf.clone());
        map.insert(keys::PASSENGER_PHONE.into(), self.passenger.phone.clone());
        if let Some(value) = self.current_value {
            map.insert(keys::CURRENT_VALUE.into(), value.to_string());
        }
        if let Some(method) = self.payment_method {
            map.insert(keys::PAYMENT_METHOD.into(), method.as_str().into());
        }
        map.insert(keys::PAYMENT_STATUS.into(), self.payment_status.as_str().into());
        if let Some(location) = &self.current_location {
            map.insert(keys::CURRENT_LOCATION.into(), to_json(location));
        }
        if let Some(error) = &self.location_error {
            map.insert(keys::LOCATION_ERROR.into(), error.clone());
        }
        map
    }

    /// Decode a snapshot written by [`RaceSession::to_snapshot`].
    pub fn from_snapshot(map: &Snapshot) -> Result<Self> {
        if map.is_empty() {
            return Ok(Self::default());
        }

        let mut session = Self {
            phase: parse(map, keys::PHASE)?,
            is_paused: parse(map, keys::IS_PAUSED)?,
            elapsed_seconds: parse_or_default(map, keys::ELAPSED_SECONDS)?,
            active_trail: json_or_default(map, keys::ACTIVE_TRAIL)?,
            clock_accrued_ms: parse_or_default(map, keys::CLOCK_ACCRUED_MS)?,
            clock_running_since: parse_optional(map, keys::CLOCK_RUNNING_SINCE)?,
            displacement: read_block(map, keys::DISPLACEMENT)?,
            ride: read_block(map, keys::RIDE)?,
            current_value: parse_optional(map, keys::CURRENT_VALUE)?,
            payment_method: parse_optional(map, keys::PAYMENT_METHOD)?,
            payment_status: parse_or_default(map, keys::PAYMENT_STATUS)?,
            current_location: map
                .get(keys::CURRENT_LOCATION)
                .map(|raw| from_json(keys::CURRENT_LOCATION, raw))
                .transpose()?,
            location_error: map.get(keys::LOCATION_ERROR).cloned(),
            ..Self::default()
        };
        session.passenger.name = text(map, keys::PASSENGER_NAME);
        session.passenger.cpf = text(map, keys::PASSENGER_CPF);
        session.passenger.phone = text(map, keys::PASSENGER_PHONE);
        Ok(session)
    }
}

impl<C: Clock> RideEngine<C> {
    /// Flatten the current session. The elapsed field reflects the last tick.
    pub fn snapshot(&self) -> Snapshot {
        self.session().to_snapshot()
    }

    /// Rebuild an engine from a snapshot. Elapsed time is recomputed against
    /// `clock`, so time that passed while the process was gone is counted.
    pub fn restore(map: &Snapshot, clock: C) -> Result<Self> {
        let session = RaceSession::from_snapshot(map)?;
        Ok(Self::from_session(session, clock))
    }
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn block_key(prefix: &str, field: &str) -> String {
    format!("{}.{}", prefix, field)
}

fn write_block(map: &mut Snapshot, prefix: &str, block: &PhaseBlock) {
    if let Some(start) = block.start_time {
        map.insert(block_key(prefix, "start_time"), start.to_string());
    }
    if let Some(end) = block.end_time {
        map.insert(block_key(prefix, "end_time"), end.to_string());
    }
    map.insert(
        block_key(prefix, "duration_seconds"),
        block.frozen_duration_seconds.to_string(),
    );
    map.insert(
        block_key(prefix, "distance_meters"),
        block.frozen_distance_meters.to_string(),
    );
    map.insert(block_key(prefix, "trail"), to_json(&block.frozen_trail));
}

fn read_block(map: &Snapshot, prefix: &str) -> Result<PhaseBlock> {
    Ok(PhaseBlock {
        start_time: parse_optional(map, &block_key(prefix, "start_time"))?,
        end_time: parse_optional(map, &block_key(prefix, "end_time"))?,
        frozen_duration_seconds: parse_or_default(map, &block_key(prefix, "duration_seconds"))?,
        frozen_distance_meters: parse_or_default(map, &block_key(prefix, "distance_meters"))?,
        frozen_trail: json_or_default(map, &block_key(prefix, "trail"))?,
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn from_json<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| RideError::Snapshot {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| RideError::Snapshot {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse<T>(map: &Snapshot, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = map.get(key).ok_or_missing_key(key)?;
    parse_value(key, raw)
}

fn parse_optional<T>(map: &Snapshot, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    map.get(key).map(|raw| parse_value(key, raw)).transpose()
}

fn parse_or_default<T>(map: &Snapshot, key: &str) -> Result<T>
where
    T: FromStr + Default,
    T::Err: Display,
{
    Ok(parse_optional(map, key)?.unwrap_or_default())
}

fn json_or_default<T: DeserializeOwned + Default>(map: &Snapshot, key: &str) -> Result<T> {
    match map.get(key) {
        Some(raw) => from_json(key, raw),
        None => Ok(T::default()),
    }
}

fn text(map: &Snapshot, key: &str) -> String {
    map.get(key).cloned().unwrap_or_default()
}
