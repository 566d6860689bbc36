use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Wraps a parsed 5-field cron expression (minute hour day month weekday,
/// evaluated in UTC) for a `Job`. Parsing happens once at load time; a bad
/// expression is a `ConfigError` surfaced at startup (spec §7).
pub struct CronDescriptor {
    schedule: Schedule,
}

impl CronDescriptor {
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        // The `cron` crate expects a leading seconds field; Job schedules in
        // this system are conventional 5-field cron, so pin seconds to 0.
        let with_seconds = format!("0 {expr}");
        let schedule = Schedule::from_str(&with_seconds)
            .map_err(|e| anyhow::anyhow!("bad cron expression '{expr}': {e}"))?;
        Ok(Self { schedule })
    }

    /// The next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether the schedule fires at least once in `(after, before]`.
    pub fn fires_in(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> bool {
        self.schedule
            .after(&after)
            .next()
            .is_some_and(|t| t <= before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daily_expression() {
        let d = CronDescriptor::parse("0 2 * * *").unwrap();
        let now = Utc::now();
        let next = d.next_after(now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(CronDescriptor::parse("not a cron").is_err());
    }
}
