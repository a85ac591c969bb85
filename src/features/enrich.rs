use chrono::{DateTime, Datelike, Timelike};
use tracing::warn;

use crate::features::holidays::HolidayCalendar;
use crate::features::velocity::velocity_kmh;
use crate::ping::{EnrichedPing, Ping};

/// Adds derived features to a time-ordered line sequence in one pass.
///
/// Only the previous ping is kept. When the line changes the state resets,
/// so the first ping of every line gets `real_velocity_kmh = None`.
pub struct Enricher<'a> {
    calendar: &'a HolidayCalendar,
    previous: Option<Ping>,
}

impl<'a> Enricher<'a> {
    pub fn new(calendar: &'a HolidayCalendar) -> Self {
        Enricher {
            calendar,
            previous: None,
        }
    }

    pub fn enrich(&mut self, ping: Ping) -> EnrichedPing {
        let real_velocity_kmh = match &self.previous {
            Some(prev) if prev.line_id == ping.line_id => Some(velocity_kmh(prev, &ping)),
            _ => None,
        };

        let mut enriched = EnrichedPing::bare(ping.clone());
        enriched.real_velocity_kmh = real_velocity_kmh;

        match DateTime::from_timestamp_millis(ping.timestamp_ms) {
            Some(at) => {
                enriched.day_of_week = Some(at.weekday().num_days_from_monday() as u8);
                enriched.hour_of_day = Some(at.hour() as u8);
                enriched.is_holiday = Some(self.calendar.is_holiday(at.date_naive()));
            }
            None => warn!(
                line_id = %ping.line_id,
                timestamp_ms = ping.timestamp_ms,
                "Timestamp out of range, calendar features left unset"
            ),
        }

        self.previous = Some(ping);
        enriched
    }
}

/// Enriches a whole sequence lazily.
pub fn enrich_sequence<'a, I>(
    pings: I,
    calendar: &'a HolidayCalendar,
) -> impl Iterator<Item = EnrichedPing> + 'a
where
    I: Iterator<Item = Ping> + 'a,
{
    let mut enricher = Enricher::new(calendar);
    pings.map(move |ping| enricher.enrich(ping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HolidayRegion;
    use crate::ping::Coordinate;

    // 2024-09-07 00:00:00 UTC, Independence Day, a Saturday
    const INDEPENDENCE_DAY_MS: i64 = 1_725_667_200_000;
    const DAY_MS: i64 = 86_400_000;

    fn at(line: &str, ts: i64, lat: &str) -> Ping {
        Ping {
            line_id: line.into(),
            vehicle_id: Some("B1".into()),
            timestamp_ms: ts,
            latitude: Some(Coordinate::new(lat)),
            longitude: Some(Coordinate::new("-43,0")),
            speed: Some(20.0),
        }
    }

    #[test]
    fn test_first_ping_has_unknown_velocity() {
        let calendar = HolidayCalendar::new(HolidayRegion::Brazil);
        let out: Vec<_> = enrich_sequence(
            vec![at("1", 0, "-22,0"), at("1", 60_000, "-22,0")].into_iter(),
            &calendar,
        )
        .collect();

        assert_eq!(out[0].real_velocity_kmh, None);
        assert_eq!(out[1].real_velocity_kmh, Some(0.0));
    }

    #[test]
    fn test_line_change_resets_predecessor() {
        let calendar = HolidayCalendar::new(HolidayRegion::Brazil);
        let out: Vec<_> = enrich_sequence(
            vec![at("1", 0, "-22,0"), at("2", 60_000, "-22,1")].into_iter(),
            &calendar,
        )
        .collect();

        assert_eq!(out[1].real_velocity_kmh, None);
    }

    #[test]
    fn test_calendar_features() {
        let calendar = HolidayCalendar::new(HolidayRegion::Brazil);
        let mut enricher = Enricher::new(&calendar);

        let eve = enricher.enrich(at("1", INDEPENDENCE_DAY_MS - DAY_MS + 13 * 3_600_000, "-22"));
        assert_eq!(eve.is_holiday, Some(false));
        assert_eq!(eve.day_of_week, Some(4));
        assert_eq!(eve.hour_of_day, Some(13));

        let holiday = enricher.enrich(at("1", INDEPENDENCE_DAY_MS, "-22"));
        assert_eq!(holiday.is_holiday, Some(true));
        assert_eq!(holiday.day_of_week, Some(5));
        assert_eq!(holiday.hour_of_day, Some(0));
    }

    #[test]
    fn test_out_of_range_timestamp_keeps_ping() {
        let calendar = HolidayCalendar::new(HolidayRegion::Brazil);
        let mut enricher = Enricher::new(&calendar);

        let out = enricher.enrich(at("1", i64::MAX, "-22"));
        assert_eq!(out.ping.timestamp_ms, i64::MAX);
        assert_eq!(out.hour_of_day, None);
        assert_eq!(out.day_of_week, None);
        assert_eq!(out.is_holiday, None);
    }
}
