//! Query-parameter driven record filtering.
//!
//! Every filter reduces to a [`RecordFilter`]: an optional case-insensitive
//! tag substring plus an inclusive window of local calendar dates. The store
//! uses the window to narrow its read and then confirms each row with
//! [`RecordFilter::matches`].

use crate::models::{DatedRecord, FinanceListParams, TaskListParams};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Inclusive range of local calendar dates. A missing end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self::between(day, day)
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn intersect(self, other: Self) -> Self {
        Self {
            from: match (self.from, other.from) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            to: match (self.to, other.to) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }

    /// Half-open UTC instant bounds `[lower, upper)` covering the window in `tz`.
    pub fn utc_bounds(&self, tz: Tz) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let lower = self.from.map(|day| local_day_start(day, tz));
        let upper = self
            .to
            .and_then(|day| day.succ_opt())
            .map(|day| local_day_start(day, tz));
        (lower, upper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarView {
    Day,
    Week,
    Month,
}

impl CalendarView {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// The window of this view that contains `reference`. Weeks start on Monday.
    pub fn window_around(self, reference: NaiveDate) -> DateWindow {
        match self {
            Self::Day => DateWindow::single_day(reference),
            Self::Week => {
                let back = u64::from(reference.weekday().num_days_from_monday());
                let monday = reference.checked_sub_days(Days::new(back)).unwrap_or(reference);
                let sunday = monday.checked_add_days(Days::new(6)).unwrap_or(monday);
                DateWindow::between(monday, sunday)
            }
            Self::Month => {
                let first = reference.with_day(1).unwrap_or(reference);
                let last = first
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(reference);
                DateWindow::between(first, last)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    tag: Option<String>,
    pub window: DateWindow,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank tags impose no constraint.
    pub fn with_tag(mut self, tag: Option<&str>) -> Self {
        self.tag = tag
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase);
        self
    }

    pub fn within(mut self, window: DateWindow) -> Self {
        self.window = self.window.intersect(window);
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// True when no record can possibly match.
    pub fn is_unsatisfiable(&self) -> bool {
        self.window.is_empty()
    }

    pub fn matches<R: DatedRecord>(&self, record: &R, tz: Tz) -> bool {
        if let Some(tag) = &self.tag {
            if !record.tags().to_lowercase().contains(tag.as_str()) {
                return false;
            }
        }
        self.window.contains(local_date(record.created_at(), tz))
    }

    pub fn apply<R: DatedRecord>(&self, records: impl IntoIterator<Item = R>, tz: Tz) -> Vec<R> {
        records
            .into_iter()
            .filter(|record| self.matches(record, tz))
            .collect()
    }
}

/// Offset/limit applied after filtering and ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub fn from_params(limit: Option<&str>, offset: Option<&str>) -> Self {
        Self {
            limit: limit.and_then(|raw| raw.trim().parse().ok()),
            offset: offset.and_then(|raw| raw.trim().parse().ok()).unwrap_or(0),
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let skipped = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        }
    }
}

pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// First instant of `day` in `tz`. Zones whose DST shift skips midnight start
/// the day at the first local time that exists.
pub fn local_day_start(day: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    let mut candidate = midnight;
    for _ in 0..(24 * 4) {
        if let Some(start) = tz.from_local_datetime(&candidate).earliest() {
            return start.with_timezone(&Utc);
        }
        candidate += TimeDelta::minutes(15);
    }
    Utc.from_utc_datetime(&midnight)
}

/// Parses an ISO-8601 date or datetime into a local calendar date.
/// Offset-carrying datetimes are converted into `tz` first; naive values are
/// taken as already local.
pub fn parse_local_date(raw: &str, tz: Tz) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&tz).date_naive());
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|value| value.date())
}

/// Like [`parse_local_date`] but never fails: unparseable input means today.
pub fn parse_reference_date(raw: &str, tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    parse_local_date(raw, tz).unwrap_or_else(|| local_date(now, tz))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|raw| !raw.is_empty())
}

/// `tag` plus the `view`/`date` calendar window used by the task list.
pub fn task_filter(params: &TaskListParams, tz: Tz, now: DateTime<Utc>) -> RecordFilter {
    let filter = RecordFilter::new().with_tag(params.tag.as_deref());
    let (Some(view), Some(date)) = (non_blank(&params.view), non_blank(&params.date)) else {
        return filter;
    };
    match CalendarView::parse(view) {
        Some(view) => filter.within(view.window_around(parse_reference_date(date, tz, now))),
        None => filter,
    }
}

/// Task list filter narrowed by `start` and `end`. The range only applies
/// when both ends are present; an unparseable end is dropped.
pub fn task_progress_filter(params: &TaskListParams, tz: Tz, now: DateTime<Utc>) -> RecordFilter {
    let filter = task_filter(params, tz, now);
    match (non_blank(&params.start), non_blank(&params.end)) {
        (Some(start), Some(end)) => filter.within(DateWindow {
            from: parse_local_date(start, tz),
            to: parse_local_date(end, tz),
        }),
        _ => filter,
    }
}

pub fn finance_filter(params: &FinanceListParams, tz: Tz, now: DateTime<Utc>) -> RecordFilter {
    let filter = RecordFilter::new().with_tag(params.tag.as_deref());
    match non_blank(&params.date) {
        Some(date) => filter.within(DateWindow::single_day(parse_reference_date(date, tz, now))),
        None => filter,
    }
}

/// Finance filter narrowed by `start` and/or `end`, each applied on its own.
pub fn finance_by_day_filter(params: &FinanceListParams, tz: Tz, now: DateTime<Utc>) -> RecordFilter {
    finance_filter(params, tz, now).within(DateWindow {
        from: non_blank(&params.start).and_then(|raw| parse_local_date(raw, tz)),
        to: non_blank(&params.end).and_then(|raw| parse_local_date(raw, tz)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Finance, Task};
    use chrono_tz::America::Sao_Paulo;
    use rust_decimal::Decimal;

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn instant(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid instant")
            .with_timezone(&Utc)
    }

    fn task(tags: &str, created_at: &str) -> Task {
        Task {
            id: 1,
            title: "t".to_string(),
            description: String::new(),
            created_at: instant(created_at),
            completed_at: None,
            is_completed: false,
            tags: tags.to_string(),
        }
    }

    fn task_params(pairs: &[(&str, &str)]) -> TaskListParams {
        let mut params = TaskListParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "tag" => params.tag = value,
                "view" => params.view = value,
                "date" => params.date = value,
                "start" => params.start = value,
                "end" => params.end = value,
                other => panic!("unexpected param {other}"),
            }
        }
        params
    }

    #[test]
    fn tag_match_is_case_insensitive_substring() {
        let filter = RecordFilter::new().with_tag(Some("HoMe"));
        let tasks = vec![
            task("errand,home", "2024-01-10T12:00:00Z"),
            task("Homework", "2024-01-10T12:00:00Z"),
            task("work", "2024-01-10T12:00:00Z"),
            task("", "2024-01-10T12:00:00Z"),
        ];
        let kept = filter.apply(tasks, Sao_Paulo);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|task| task.tags.to_lowercase().contains("home")));
    }

    #[test]
    fn blank_tag_is_no_filter() {
        let filter = RecordFilter::new().with_tag(Some(""));
        assert!(filter.tag().is_none());
        assert!(filter.matches(&task("", "2024-01-10T12:00:00Z"), Sao_Paulo));
    }

    #[test]
    fn week_window_spans_monday_through_sunday() {
        // 2024-01-10 is a Wednesday.
        let window = CalendarView::Week.window_around(day("2024-01-10"));
        assert_eq!(window, DateWindow::between(day("2024-01-08"), day("2024-01-14")));

        // A Monday reference starts its own week; a Sunday ends it.
        assert_eq!(
            CalendarView::Week.window_around(day("2024-01-08")).from,
            Some(day("2024-01-08"))
        );
        assert_eq!(
            CalendarView::Week.window_around(day("2024-01-14")).from,
            Some(day("2024-01-08"))
        );

        let span = window.to.expect("end") - window.from.expect("start");
        assert_eq!(span.num_days(), 6);
    }

    #[test]
    fn month_window_covers_whole_month() {
        let window = CalendarView::Month.window_around(day("2024-02-17"));
        assert_eq!(window, DateWindow::between(day("2024-02-01"), day("2024-02-29")));
        let december = CalendarView::Month.window_around(day("2023-12-31"));
        assert_eq!(december, DateWindow::between(day("2023-12-01"), day("2023-12-31")));
    }

    #[test]
    fn day_view_uses_local_calendar_day() {
        let filter = task_filter(
            &task_params(&[("view", "day"), ("date", "2024-01-10")]),
            Sao_Paulo,
            Utc::now(),
        );
        // 02:50 UTC on the 11th is still the 10th in Sao Paulo.
        assert!(filter.matches(&task("", "2024-01-11T02:50:00Z"), Sao_Paulo));
        assert!(!filter.matches(&task("", "2024-01-11T03:10:00Z"), Sao_Paulo));
    }

    #[test]
    fn finance_date_keeps_only_that_local_day() {
        let entry = |created_at: &str| Finance {
            id: 1,
            description: "Coffee".to_string(),
            value: Decimal::ZERO,
            tags: String::new(),
            created_at: instant(created_at),
        };
        let params = FinanceListParams {
            date: Some("2024-01-10".to_string()),
            ..FinanceListParams::default()
        };
        let filter = finance_filter(&params, Sao_Paulo, Utc::now());
        assert_eq!(filter.window, DateWindow::single_day(day("2024-01-10")));

        let kept = filter.apply(
            vec![
                entry("2024-01-10T03:00:00Z"),
                entry("2024-01-11T02:50:00Z"),
                entry("2024-01-11T03:10:00Z"),
                entry("2024-01-10T02:59:00Z"),
            ],
            Sao_Paulo,
        );
        let kept: Vec<_> = kept.iter().map(|finance| finance.created_at).collect();
        assert_eq!(
            kept,
            vec![instant("2024-01-10T03:00:00Z"), instant("2024-01-11T02:50:00Z")]
        );
    }

    #[test]
    fn malformed_date_falls_back_to_today() {
        let now = instant("2024-03-05T15:00:00Z");
        let filter = task_filter(
            &task_params(&[("view", "day"), ("date", "not-a-date")]),
            Sao_Paulo,
            now,
        );
        assert_eq!(filter.window, DateWindow::single_day(day("2024-03-05")));
    }

    #[test]
    fn view_without_date_or_unknown_view_does_not_filter() {
        let now = Utc::now();
        assert_eq!(
            task_filter(&task_params(&[("view", "week")]), Sao_Paulo, now).window,
            DateWindow::unbounded()
        );
        assert_eq!(
            task_filter(&task_params(&[("view", "year"), ("date", "2024-01-10")]), Sao_Paulo, now).window,
            DateWindow::unbounded()
        );
    }

    #[test]
    fn progress_range_needs_both_ends() {
        let now = Utc::now();
        let only_start = task_progress_filter(&task_params(&[("start", "2024-01-01")]), Sao_Paulo, now);
        assert_eq!(only_start.window, DateWindow::unbounded());

        let both = task_progress_filter(
            &task_params(&[("start", "2024-01-01"), ("end", "2024-01-07")]),
            Sao_Paulo,
            now,
        );
        assert_eq!(both.window, DateWindow::between(day("2024-01-01"), day("2024-01-07")));
    }

    #[test]
    fn windows_intersect_and_can_become_empty() {
        let now = Utc::now();
        let filter = task_progress_filter(
            &task_params(&[
                ("view", "day"),
                ("date", "2024-01-10"),
                ("start", "2024-02-01"),
                ("end", "2024-02-05"),
            ]),
            Sao_Paulo,
            now,
        );
        assert!(filter.is_unsatisfiable());
    }

    #[test]
    fn finance_by_day_bounds_apply_independently() {
        let params = FinanceListParams {
            start: Some("2024-01-05".to_string()),
            end: Some("garbage".to_string()),
            ..FinanceListParams::default()
        };
        let filter = finance_by_day_filter(&params, Sao_Paulo, Utc::now());
        assert_eq!(filter.window.from, Some(day("2024-01-05")));
        assert_eq!(filter.window.to, None);
    }

    #[test]
    fn parses_iso_datetimes_into_local_dates() {
        assert_eq!(parse_local_date("2024-01-10T23:50:00", Sao_Paulo), Some(day("2024-01-10")));
        assert_eq!(parse_local_date("2024-01-11T01:00:00Z", Sao_Paulo), Some(day("2024-01-10")));
        assert_eq!(parse_local_date("10/01/2024", Sao_Paulo), None);
    }

    #[test]
    fn utc_bounds_follow_local_midnight() {
        let (lower, upper) = DateWindow::single_day(day("2024-01-10")).utc_bounds(Sao_Paulo);
        assert_eq!(lower, Some(instant("2024-01-10T03:00:00Z")));
        assert_eq!(upper, Some(instant("2024-01-11T03:00:00Z")));
    }

    #[test]
    fn day_start_skips_a_dst_gap_at_midnight() {
        // Sao Paulo jumped from 00:00 to 01:00 on 2018-11-04.
        let start = local_day_start(day("2018-11-04"), Sao_Paulo);
        assert_eq!(start, instant("2018-11-04T03:00:00Z"));
    }

    #[test]
    fn page_skips_then_limits() {
        let page = Page::from_params(Some("2"), Some("1"));
        assert_eq!(page.apply(vec![1, 2, 3, 4]), vec![2, 3]);
        assert_eq!(Page::from_params(Some("x"), None).apply(vec![1, 2]), vec![1, 2]);
    }
}
