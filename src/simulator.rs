//! ==============================================================================
//! simulator.rs - plausible demo readings for an empty store
//! ==============================================================================
//!
//! generates a day of readings that follow a daily cycle:
//!
//! ```text
//!     temperature  29 ± 2 °C     (1 dp, jitter ± 0.5)
//!     ph           7.0 ± 0.15    (2 dp, jitter ± 0.1)
//!     tds          500 ± 30 ppm  (whole ppm, jitter ± 20)
//! ```
//!
//! only used when storage.seed_demo_data is set, so the api has something to
//! serve before the node has reported anything.
//!
//! ==============================================================================

use std::f64::consts::TAU;

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::Rng;
use tracing::info;

use crate::domain::{ConnectionStatus, NewSensorReading};
use crate::store::{Store, StoreResult};

/// 24 hours at 10 minute steps, both ends included
pub const SEED_COUNT: usize = 145;
pub const SEED_STEP_MINUTES: i64 = 10;

/// `count` readings ending at `now`, one every `step`, oldest first
pub fn daily_pattern(now: DateTime<Utc>, count: usize, step: Duration) -> Vec<NewSensorReading> {
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|i| {
            let steps_back = (count - 1 - i) as i32;
            let timestamp = now - step * steps_back;
            let phase = day_fraction(timestamp) * TAU;

            let temperature = 29.0 + 2.0 * phase.sin() + rng.gen_range(-0.5..=0.5);
            let ph = 7.0 + 0.15 * phase.sin() + rng.gen_range(-0.1..=0.1);
            let tds = 500.0 + 30.0 * phase.sin() + rng.gen_range(-20.0..=20.0);

            NewSensorReading {
                timestamp,
                temperature: (temperature * 10.0).round() / 10.0,
                ph: (ph * 100.0).round() / 100.0,
                tds_level: tds.round(),
            }
        })
        .collect()
}

fn day_fraction(time: DateTime<Utc>) -> f64 {
    f64::from(time.num_seconds_from_midnight()) / 86_400.0
}

/// fill an empty store with a day of demo data and a healthy status row.
/// returns how many readings were inserted.
pub async fn seed_if_empty(store: &dyn Store) -> StoreResult<usize> {
    if store.count_readings().await? > 0 {
        return Ok(0);
    }

    let now = Utc::now();
    let readings = daily_pattern(now, SEED_COUNT, Duration::minutes(SEED_STEP_MINUTES));
    let inserted = store.insert_readings(readings).await?;

    let mut status = store.system_status().await?;
    status.connection_status = ConnectionStatus::Connected;
    status.last_update = now;
    status.data_points = store.count_readings().await?;
    status.cpu_usage = 23;
    status.memory_usage = 30;
    status.storage_usage = 26;
    store.save_system_status(status).await?;

    info!(inserted, "seeded store with demo readings");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn pattern_stays_within_bounds() {
        let now = Utc::now();
        let readings = daily_pattern(now, SEED_COUNT, Duration::minutes(10));

        assert_eq!(readings.len(), SEED_COUNT);
        for r in &readings {
            assert!((26.5..=31.5).contains(&r.temperature), "temperature {}", r.temperature);
            assert!((6.75..=7.25).contains(&r.ph), "ph {}", r.ph);
            assert!((450.0..=550.0).contains(&r.tds_level), "tds {}", r.tds_level);
            assert_eq!(r.tds_level.fract(), 0.0);
        }
    }

    #[test]
    fn pattern_ends_at_now_and_is_evenly_spaced() {
        let now = Utc::now();
        let readings = daily_pattern(now, 4, Duration::minutes(10));

        assert_eq!(readings[3].timestamp, now);
        assert_eq!(readings[0].timestamp, now - Duration::minutes(30));
        assert!(readings.windows(2).all(|w| w[1].timestamp - w[0].timestamp == Duration::minutes(10)));
    }

    #[test]
    fn empty_pattern() {
        assert!(daily_pattern(Utc::now(), 0, Duration::minutes(10)).is_empty());
    }

    #[tokio::test]
    async fn seeds_only_an_empty_store() {
        let store = MemoryStore::new();

        assert_eq!(seed_if_empty(&store).await.unwrap(), SEED_COUNT);
        assert_eq!(seed_if_empty(&store).await.unwrap(), 0);
        assert_eq!(store.count_readings().await.unwrap(), SEED_COUNT as u64);

        let status = store.system_status().await.unwrap();
        assert_eq!(status.connection_status, ConnectionStatus::Connected);
        assert_eq!(status.data_points, SEED_COUNT as u64);
        assert_eq!(status.cpu_usage, 23);
    }
}
