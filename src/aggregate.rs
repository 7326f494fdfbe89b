//! Day-bucketed aggregation over already-filtered records.

use crate::filters::local_date;
use crate::models::{DatedRecord, DayTotal, Finance, Task, FINANCE_VALUE_DECIMAL_PLACES};
use chrono::NaiveDate;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("sum overflowed for {day}")]
    SumOverflow { day: NaiveDate },
}

/// Groups `records` by the local calendar day of their creation time and
/// folds each record into its day's accumulator in a single pass.
///
/// Only days that received at least one record appear in the result, in
/// ascending order.
pub fn bucket_by_day<'a, R, A, F>(
    records: impl IntoIterator<Item = &'a R>,
    tz: Tz,
    mut fold: F,
) -> Result<BTreeMap<NaiveDate, A>, AggregateError>
where
    R: DatedRecord + 'a,
    A: Default,
    F: FnMut(&mut A, NaiveDate, &R) -> Result<(), AggregateError>,
{
    let mut buckets: BTreeMap<NaiveDate, A> = BTreeMap::new();
    for record in records {
        let day = local_date(record.created_at(), tz);
        fold(buckets.entry(day).or_default(), day, record)?;
    }
    Ok(buckets)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompletionTally {
    pub total: u64,
    pub completed: u64,
}

impl CompletionTally {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Share of completed tasks per local day, keyed `YYYY-MM-DD`.
pub fn completion_ratio_by_day(tasks: &[Task], tz: Tz) -> Result<BTreeMap<String, f64>, AggregateError> {
    let buckets = bucket_by_day(tasks, tz, |tally: &mut CompletionTally, _, task: &Task| {
        tally.total += 1;
        if task.is_completed {
            tally.completed += 1;
        }
        Ok(())
    })?;

    Ok(buckets
        .into_iter()
        .map(|(day, tally)| (day.format("%Y-%m-%d").to_string(), tally.ratio()))
        .collect())
}

/// Exact sum of finance values per local day, ascending by day.
pub fn value_sum_by_day(finances: &[Finance], tz: Tz) -> Result<Vec<DayTotal>, AggregateError> {
    let buckets = bucket_by_day(finances, tz, |sum: &mut Decimal, day, finance: &Finance| {
        *sum = sum
            .checked_add(finance.value)
            .ok_or(AggregateError::SumOverflow { day })?;
        Ok(())
    })?;

    Ok(buckets
        .into_iter()
        .map(|(day, mut total)| {
            total.rescale(FINANCE_VALUE_DECIMAL_PLACES);
            DayTotal { day, total }
        })
        .collect())
}
