use chrono::{Datelike, Months, NaiveDate};

/// Shifts `date` by `months`, clamping to the end of shorter months
/// (Jan 31 + 1 month is Feb 28/29).
pub fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

pub fn year_end(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
}

pub fn days_in_year(year: i32) -> u32 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

/// Share of the calendar year covered from `date` (inclusive) to Dec 31.
pub fn remaining_year_fraction(date: NaiveDate) -> f64 {
    let total = days_in_year(date.year());
    let covered = total - date.ordinal0();
    covered as f64 / total as f64
}

/// Elapsed years between two dates using a fixed year length, the way the
/// loan term is derived from explicit start/end dates.
pub fn elapsed_years(start: NaiveDate, end: NaiveDate, days_per_year: f64) -> f64 {
    (end - start).num_days() as f64 / days_per_year
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_months_clamps_to_month_end() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 31).unwrap();
        assert_eq!(add_months(date, 1), NaiveDate::from_ymd_opt(2023, 2, 28));
        assert_eq!(add_months(date, 12), NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(add_months(date, 0), Some(date));
    }

    #[test]
    fn test_remaining_year_fraction() {
        let jan_first = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert!((remaining_year_fraction(jan_first) - 1.0).abs() < 1e-12);

        let jul_first = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap();
        let expected = 184.0 / 365.0;
        assert!((remaining_year_fraction(jul_first) - expected).abs() < 1e-12);

        let dec_last = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert!((remaining_year_fraction(dec_last) - 1.0 / 366.0).abs() < 1e-12);
    }

    #[test]
    fn test_elapsed_years() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        assert!((elapsed_years(start, end, 365.0) - 366.0 / 365.0).abs() < 1e-12);
        assert!((elapsed_years(start, end, 366.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_year_end() {
        assert_eq!(year_end(2023), NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(days_in_year(2024), 366);
        assert_eq!(days_in_year(2100), 365);
    }
}
