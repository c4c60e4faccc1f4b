//! Cron recurrence for `CRON` schedulers
//!
//! Standard 5-field expressions: `minute hour day_of_month month day_of_week`.
//! Occurrences are resolved in the scheduler's own timezone by walking wall
//! clock minutes and mapping each candidate through the tz database, so DST
//! transitions are honored:
//! - local times inside a spring-forward gap do not exist and are skipped
//! - local times repeated by a fall-back transition fire once, except for
//!   `*` or stepped minute/hour fields, which also run through the second pass

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use shared::error::{EngineError, EngineResult};

/// How far ahead `next_after` looks before giving up
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// Upper bound on the length of a repeated local hour, in minutes
const MAX_FOLD_MINUTES: u32 = 180;

/// One cron field as a bit set over its value range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    mask: u64,
    /// False when the field starts with `*`; drives the day-of-month / day-of-week rule
    restricted: bool,
    /// `*` or stepped, so the field fires repeatedly rather than at fixed values
    repeats: bool,
}

impl CronField {
    fn parse(field: &str, min: u32, max: u32, name: &str) -> EngineResult<Self> {
        let invalid = |detail: String| EngineError::CronResolution(format!("{} field '{}': {}", name, field, detail));
        let mut mask = 0u64;

        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step = step
                        .parse::<u32>()
                        .map_err(|_| invalid(format!("invalid step '{}'", step)))?;
                    if step == 0 {
                        return Err(invalid("step must be positive".to_string()));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let parse_value = |raw: &str| {
                raw.parse::<u32>()
                    .map_err(|_| invalid(format!("invalid value '{}'", raw)))
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((start, end)) = range.split_once('-') {
                (parse_value(start)?, parse_value(end)?)
            } else {
                let value = parse_value(range)?;
                // `5/10` means "from 5 to the end, every 10"
                if step.is_some() { (value, max) } else { (value, value) }
            };

            if start < min || end > max || start > end {
                return Err(invalid(format!("{}-{} out of range {}-{}", start, end, min, max)));
            }

            let step = step.unwrap_or(1);
            let mut value = start;
            while value <= end {
                mask |= 1u64 << value;
                value += step;
            }
        }

        Ok(Self {
            mask,
            restricted: !field.starts_with('*'),
            repeats: field.starts_with('*') || field.contains('/'),
        })
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.mask & (1u64 << value) != 0
    }
}

/// Parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: CronField,
    hours: CronField,
    days_of_month: CronField,
    months: CronField,
    days_of_week: CronField,
}

impl CronSchedule {
    /// Parse a 5-field cron expression
    pub fn parse(expression: &str) -> EngineResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(EngineError::CronResolution(format!(
                "expected 5 fields in '{}', got {}",
                expression,
                fields.len()
            )));
        }

        let mut days_of_week = CronField::parse(fields[4], 0, 7, "day_of_week")?;
        // 7 is an alias for Sunday
        if days_of_week.contains(7) {
            days_of_week.mask = (days_of_week.mask & !(1u64 << 7)) | 1;
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: CronField::parse(fields[0], 0, 59, "minute")?,
            hours: CronField::parse(fields[1], 0, 23, "hour")?,
            days_of_month: CronField::parse(fields[2], 1, 31, "day_of_month")?,
            months: CronField::parse(fields[3], 1, 12, "month")?,
            days_of_week,
        })
    }

    /// When both day fields are restricted a day matches if either does
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn matches(&self, t: NaiveDateTime) -> bool {
        self.months.contains(t.month())
            && self.day_matches(t.date())
            && self.hours.contains(t.hour())
            && self.minutes.contains(t.minute())
    }

    /// First occurrence strictly after `after`, evaluated in `tz`
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> EngineResult<DateTime<Utc>> {
        let second_pass = if self.minutes.repeats || self.hours.repeats {
            self.second_pass_after(after, tz)?
        } else {
            None
        };

        match (self.walk_after(after, tz), second_pass) {
            (Ok(next), Some(second)) => Ok(next.min(second)),
            (Ok(next), None) => Ok(next),
            (Err(_), Some(second)) => Ok(second),
            (Err(e), None) => Err(e),
        }
    }

    /// Earliest occurrence in the second pass of the repeated hour `after` falls in.
    /// The wall clock walk never revisits those minutes once it is past them.
    fn second_pass_after(&self, after: DateTime<Utc>, tz: Tz) -> EngineResult<Option<DateTime<Utc>>> {
        let local_after = truncate_to_minute(after.with_timezone(&tz).naive_local())?;
        if !matches!(tz.from_local_datetime(&local_after), LocalResult::Ambiguous(..)) {
            return Ok(None);
        }

        let mut fold_start = local_after;
        for _ in 0..MAX_FOLD_MINUTES {
            let previous = fold_start - Duration::minutes(1);
            if !matches!(tz.from_local_datetime(&previous), LocalResult::Ambiguous(..)) {
                break;
            }
            fold_start = previous;
        }

        let mut candidate = fold_start;
        while let LocalResult::Ambiguous(_, latest) = tz.from_local_datetime(&candidate) {
            let latest = latest.with_timezone(&Utc);
            if latest > after && self.matches(candidate) {
                return Ok(Some(latest));
            }
            candidate += Duration::minutes(1);
        }
        Ok(None)
    }

    fn walk_after(&self, after: DateTime<Utc>, tz: Tz) -> EngineResult<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let mut candidate = truncate_to_minute(local_after)? + Duration::minutes(1);
        let horizon = candidate + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate <= horizon {
            if !self.months.contains(candidate.month()) {
                candidate = midnight(first_of_next_month(candidate.date())?)?;
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = midnight(candidate.date() + Duration::days(1))?;
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = truncate_to_hour(candidate)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }

            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => {
                    let utc = dt.with_timezone(&Utc);
                    if utc > after {
                        return Ok(utc);
                    }
                }
                LocalResult::Ambiguous(earliest, latest) => {
                    let earliest = earliest.with_timezone(&Utc);
                    let latest = latest.with_timezone(&Utc);
                    if earliest > after {
                        return Ok(earliest);
                    }
                    // only reachable when `after` itself lies in the repeated hour
                    if latest > after {
                        return Ok(latest);
                    }
                }
                // skipped by a spring-forward transition
                LocalResult::None => {}
            }
            candidate += Duration::minutes(1);
        }

        Err(EngineError::CronResolution(format!(
            "no occurrence of '{}' within {} days after {}",
            self.expression, SEARCH_HORIZON_DAYS, after
        )))
    }
}

/// Parse an IANA timezone name such as `Europe/Berlin`
pub fn parse_timezone(name: &str) -> EngineResult<Tz> {
    name.parse::<Tz>()
        .map_err(|e| EngineError::InvalidInput(format!("unknown timezone '{}': {}", name, e)))
}

fn truncate_to_minute(t: NaiveDateTime) -> EngineResult<NaiveDateTime> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| EngineError::CronResolution(format!("cannot truncate {}", t)))
}

fn truncate_to_hour(t: NaiveDateTime) -> EngineResult<NaiveDateTime> {
    truncate_to_minute(t)?
        .with_minute(0)
        .ok_or_else(|| EngineError::CronResolution(format!("cannot truncate {}", t)))
}

fn midnight(date: NaiveDate) -> EngineResult<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
        .ok_or_else(|| EngineError::CronResolution(format!("invalid date {}", date)))
}

fn first_of_next_month(date: NaiveDate) -> EngineResult<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| EngineError::CronResolution(format!("invalid month {}-{}", year, month)))
}
