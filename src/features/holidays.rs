//! Public holiday calendar used for the `is_holiday` feature.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::{HolidayConfig, HolidayRegion};

/// Fixed-date national holidays in Brazil as `(month, day, first year)`.
const BRAZIL_FIXED: &[(u32, u32, i32)] = &[
    (1, 1, 1890),   // Confraternizacao Universal
    (4, 21, 1890),  // Tiradentes
    (5, 1, 1925),   // Dia do Trabalhador
    (9, 7, 1890),   // Independencia
    (10, 12, 1980), // Nossa Senhora Aparecida
    (11, 2, 1890),  // Finados
    (11, 15, 1890), // Proclamacao da Republica
    (11, 20, 2024), // Consciencia Negra
    (12, 25, 1922), // Natal
];

#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    region: HolidayRegion,
    extra: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(region: HolidayRegion) -> Self {
        HolidayCalendar {
            region,
            extra: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &HolidayConfig) -> Self {
        HolidayCalendar {
            region: config.region,
            extra: config.extra_dates.iter().copied().collect(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        if self.extra.contains(&date) {
            return true;
        }
        match self.region {
            HolidayRegion::Brazil => is_brazil_holiday(date),
            HolidayRegion::None => false,
        }
    }
}

fn is_brazil_holiday(date: NaiveDate) -> bool {
    let (year, month, day) = (date.year(), date.month(), date.day());

    let fixed = BRAZIL_FIXED
        .iter()
        .any(|&(m, d, since)| m == month && d == day && year >= since);
    if fixed {
        return true;
    }

    // Sexta-feira Santa
    easter_sunday(year).is_some_and(|easter| date == easter - Duration::days(2))
}

/// Gregorian Easter Sunday (anonymous Gregorian algorithm).
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_easter_dates() {
        assert_eq!(easter_sunday(2024), Some(date(2024, 3, 31)));
        assert_eq!(easter_sunday(2025), Some(date(2025, 4, 20)));
        assert_eq!(easter_sunday(2019), Some(date(2019, 4, 21)));
    }

    #[test]
    fn test_brazil_fixed_and_movable() {
        let calendar = HolidayCalendar::new(HolidayRegion::Brazil);
        assert!(calendar.is_holiday(date(2024, 9, 7)));
        assert!(!calendar.is_holiday(date(2024, 9, 6)));
        assert!(calendar.is_holiday(date(2024, 3, 29)));
        assert!(!calendar.is_holiday(date(2024, 3, 31)));
        assert!(calendar.is_holiday(date(2024, 11, 20)));
        assert!(!calendar.is_holiday(date(2023, 11, 20)));
    }

    #[test]
    fn test_extra_dates_and_no_region() {
        let config = HolidayConfig {
            region: HolidayRegion::None,
            extra_dates: vec![date(2024, 1, 20)],
        };
        let calendar = HolidayCalendar::from_config(&config);
        assert!(calendar.is_holiday(date(2024, 1, 20)));
        assert!(!calendar.is_holiday(date(2024, 12, 25)));
    }
}
