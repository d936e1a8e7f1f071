//! Date parsing and record filtering.
//!
//! All calendar comparisons happen in one fixed validation timezone (the
//! portal's business timezone), never UTC and never the host's zone.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;

use crate::{
    error::{AppError, Result},
    models::{
        date::{CalendarDate, DateRange},
        transaction::NormalizedTransaction,
    },
};

/// Parses `MM-DD-YYYY` or `MM/DD/YYYY` (one or two digit month/day) against a given "today".
pub fn parse_date_on(input: &str, allow_future: bool, today: NaiveDate) -> Result<CalendarDate> {
    let date: CalendarDate = input.parse()?;

    if !allow_future && date.naive() > today {
        return Err(AppError::DateFormat(format!(
            "'{}' cannot be in the future",
            input.trim()
        )));
    }

    Ok(date)
}

/// Checks that `start <= end` when both are present.
pub fn validate_range(start: Option<CalendarDate>, end: Option<CalendarDate>) -> Result<DateRange> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(AppError::Range(format!(
                "startDate {} must be before or equal to endDate {}",
                s, e
            )));
        }
    }

    Ok(DateRange { start, end })
}

/// One conjunctive constraint over normalized records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Account(String),
    Mode(String),
    OnOrAfter(CalendarDate),
    OnOrBefore(CalendarDate),
}

impl Predicate {
    pub fn matches(&self, record: &NormalizedTransaction, timezone: Tz) -> bool {
        match self {
            Predicate::Account(id) => record.account_id == *id,
            Predicate::Mode(mode) => record.mode == *mode,
            Predicate::OnOrAfter(start) => local_date(record, timezone) >= start.naive(),
            Predicate::OnOrBefore(end) => local_date(record, timezone) <= end.naive(),
        }
    }
}

fn local_date(record: &NormalizedTransaction, timezone: Tz) -> NaiveDate {
    record.transaction_time.with_timezone(&timezone).date_naive()
}

/// Optional query constraints; every supplied one must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub account_id: Option<String>,
    pub mode: Option<String>,
    pub range: DateRange,
}

impl TransactionFilter {
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        if let Some(ref id) = self.account_id {
            predicates.push(Predicate::Account(id.clone()));
        }
        if let Some(ref mode) = self.mode {
            predicates.push(Predicate::Mode(mode.clone()));
        }
        if let Some(start) = self.range.start {
            predicates.push(Predicate::OnOrAfter(start));
        }
        if let Some(end) = self.range.end {
            predicates.push(Predicate::OnOrBefore(end));
        }

        predicates
    }
}

/// Keeps the records that satisfy every predicate. Order of `predicates` is irrelevant.
pub fn apply(
    records: &[NormalizedTransaction],
    predicates: &[Predicate],
    timezone: Tz,
) -> Vec<NormalizedTransaction> {
    records
        .iter()
        .filter(|record| predicates.iter().all(|p| p.matches(record, timezone)))
        .cloned()
        .collect()
}

/// Date validation and filtering bound to the validation timezone.
#[derive(Debug, Clone, Copy)]
pub struct FilterEngine {
    timezone: Tz,
}

impl FilterEngine {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The current calendar day in the validation timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub fn parse_date(&self, input: &str, allow_future: bool) -> Result<CalendarDate> {
        parse_date_on(input, allow_future, self.today())
    }

    /// Parses optional request bounds; blank strings count as absent.
    pub fn parse_range(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        allow_future: bool,
    ) -> Result<DateRange> {
        let parse = |label: &str, raw: Option<&str>| -> Result<Option<CalendarDate>> {
            match raw.map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(value) => self
                    .parse_date(value, allow_future)
                    .map(Some)
                    .map_err(|e| match e {
                        AppError::DateFormat(msg) => AppError::DateFormat(format!("{}: {}", label, msg)),
                        other => other,
                    }),
            }
        };

        validate_range(parse("startDate", start)?, parse("endDate", end)?)
    }

    pub fn filter(
        &self,
        records: &[NormalizedTransaction],
        filter: &TransactionFilter,
    ) -> Vec<NormalizedTransaction> {
        apply(records, &filter.predicates(), self.timezone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fixture::samples::{SYDNEY, raw};
    use crate::services::normalizer::normalize_all;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn date(s: &str) -> CalendarDate {
        parse_date_on(s, true, today()).unwrap()
    }

    fn records() -> Vec<NormalizedTransaction> {
        normalize_all(&[
            raw("2023-12-31T14:30:00Z", "card-1", "train", "-3.20"),
            raw("2024-01-10T22:15:07Z", "card-1", "bus", "-2.24"),
            raw("2024-01-15T08:00:00Z", "card-2", "ferry", "-6.12"),
            raw("2024-01-31T13:30:00Z", "card-2", "train", "-4.50"),
            raw("2024-02-05T01:00:00Z", "card-1", "top-up", "40.00"),
        ])
    }

    #[test]
    fn rejects_impossible_calendar_dates() {
        let err = parse_date_on("02-30-2024", false, today()).unwrap_err();
        assert!(matches!(err, AppError::DateFormat(_)));
    }

    #[test]
    fn accepts_single_digits_and_slashes() {
        assert_eq!(date("1-5-2024").to_string(), "01-05-2024");
        assert_eq!(date("1/5/2024").to_string(), "01-05-2024");
        assert_eq!(date(" 12/31/2023 ").to_string(), "12-31-2023");
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["2024-01-05", "01-05-24", "0105-2024", "aa-bb-cccc", "", "1-5-2024-1", "+1-5-2024"] {
            assert!(
                matches!(parse_date_on(input, true, today()), Err(AppError::DateFormat(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn future_dates_need_permission() {
        assert!(parse_date_on("06-16-2024", false, today()).is_err());
        assert!(parse_date_on("06-16-2024", true, today()).is_ok());
        assert!(parse_date_on("06-15-2024", false, today()).is_ok());
    }

    #[test]
    fn engine_today_is_in_validation_timezone() {
        let engine = FilterEngine::new(SYDNEY);
        let tomorrow = engine.today().succ_opt().unwrap();
        let input = CalendarDate::from(tomorrow).to_string();
        assert!(engine.parse_date(&input, false).is_err());
        assert!(engine.parse_date(&input, true).is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = validate_range(Some(date("02-01-2024")), Some(date("01-01-2024"))).unwrap_err();
        assert!(matches!(err, AppError::Range(_)));
        assert!(validate_range(Some(date("01-01-2024")), Some(date("01-01-2024"))).is_ok());
        assert!(validate_range(None, Some(date("01-01-2024"))).is_ok());
    }

    #[test]
    fn parse_range_treats_blank_as_absent() {
        let engine = FilterEngine::new(SYDNEY);
        let range = engine.parse_range(Some("  "), None, true).unwrap();
        assert_eq!(range, DateRange::unbounded());

        let err = engine.parse_range(Some("13-01-2024"), None, true).unwrap_err();
        assert!(err.to_string().contains("startDate"));
    }

    #[test]
    fn date_bounds_use_sydney_calendar_days() {
        let engine = FilterEngine::new(SYDNEY);
        let filter = TransactionFilter {
            range: DateRange {
                start: Some(date("01-01-2024")),
                end: Some(date("01-31-2024")),
            },
            ..Default::default()
        };

        let ids: Vec<String> = engine
            .filter(&records(), &filter)
            .into_iter()
            .map(|t| t.transaction_id)
            .collect();

        // 2023-12-31T14:30Z is Jan 1 in Sydney (in); 2024-01-31T13:30Z is Feb 1 (out).
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "1704033000");
        assert!(!ids.contains(&"1706707800".to_string()));
    }

    #[test]
    fn account_and_mode_are_exact_matches() {
        let engine = FilterEngine::new(SYDNEY);
        let filter = TransactionFilter {
            account_id: Some("card-1".into()),
            mode: Some("train".into()),
            ..Default::default()
        };
        assert_eq!(engine.filter(&records(), &filter).len(), 1);

        let filter = TransactionFilter {
            mode: Some("Train".into()),
            ..Default::default()
        };
        assert!(engine.filter(&records(), &filter).is_empty());
    }

    #[test]
    fn predicates_commute() {
        let all = [
            Predicate::Account("card-1".into()),
            Predicate::Mode("train".into()),
            Predicate::OnOrAfter(date("01-01-2024")),
            Predicate::OnOrBefore(date("01-31-2024")),
        ];
        let data = records();

        for a in &all {
            for b in &all {
                let one_way = apply(&apply(&data, std::slice::from_ref(a), SYDNEY), std::slice::from_ref(b), SYDNEY);
                let other_way = apply(&apply(&data, std::slice::from_ref(b), SYDNEY), std::slice::from_ref(a), SYDNEY);
                assert_eq!(one_way, other_way, "{:?} / {:?}", a, b);
            }
        }
    }
}
