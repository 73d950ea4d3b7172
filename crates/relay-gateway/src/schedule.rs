//! Background jobs: credential rotation and the daily purge.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, TimeZone};
use tokio::task::JoinHandle;

use crate::gateway::RelayGateway;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Rotate every credential older than `interval`.
///
/// Checks four times per interval so a credential never outlives it by more
/// than a quarter.
pub fn spawn_rotation(gateway: Arc<RelayGateway>, interval: Duration) -> JoinHandle<()> {
    let check = (interval / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let rotated = gateway.credentials().rotate_expired(interval);
            if !rotated.is_empty() {
                tracing::debug!(?rotated, "credentials rotated on timer");
            }
        }
    })
}

/// Clear history at every local midnight.
pub fn spawn_daily_purge(gateway: Arc<RelayGateway>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_midnight(&Local::now());
            tracing::debug!(secs = wait.as_secs(), "next scheduled purge");
            tokio::time::sleep(wait).await;
            gateway.purge_internal("schedule").await;
        }
    })
}

/// Time from `now` until the following midnight in the same zone.
///
/// Falls back to a full day if midnight does not exist there (DST gaps).
#[must_use]
pub fn until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let tz = now.timezone();
    now.date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .and_then(|midnight| midnight.signed_duration_since(now).to_std().ok())
        .unwrap_or(DAY)
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;

    #[test]
    fn test_until_next_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 0).unwrap();
        assert_eq!(until_next_midnight(&now), Duration::from_secs(30 * 60));

        let now = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        assert_eq!(until_next_midnight(&now), DAY);
    }

    #[test]
    fn test_until_next_midnight_uses_local_date() {
        // 22:00 UTC is already 01:00 the next day at +03:00
        let zone = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = zone.with_ymd_and_hms(2024, 12, 31, 1, 0, 0).unwrap();
        assert_eq!(until_next_midnight(&now), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn test_until_next_midnight_month_end() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        assert_eq!(until_next_midnight(&now), Duration::from_secs(12 * 3600));
    }
}
