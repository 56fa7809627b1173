use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Parsed 5-field cron expression: `min hour dom month dow`.
///
/// Each field accepts `*`, `*/N`, `A-B`, `A-B/N` and comma lists. Day of week
/// is 0-7 with both 0 and 7 meaning Sunday. The `@hourly`, `@daily`,
/// `@weekly` and `@monthly` shorthands are accepted.
///
/// When both day-of-month and day-of-week are restricted a time matches if
/// either one matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    min: u32,
    allowed: Vec<bool>,
    restricted: bool,
}

impl Field {
    fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            allowed: vec![false; (max - min + 1) as usize],
            restricted: true,
        }
    }

    fn max(&self) -> u32 {
        self.min + self.allowed.len() as u32 - 1
    }

    fn set(&mut self, v: u32) -> Result<()> {
        if v < self.min || v > self.max() {
            return Err(Error::InvalidInput(format!(
                "cron value {v} out of range {}..={}",
                self.min,
                self.max()
            )));
        }
        self.allowed[(v - self.min) as usize] = true;
        Ok(())
    }

    fn matches(&self, v: u32) -> bool {
        v >= self.min && v <= self.max() && self.allowed[(v - self.min) as usize]
    }
}

impl CronExpr {
    #[tracing::instrument(level = "debug")]
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other => other,
        };
        let parts: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts.as_slice() else {
            return Err(Error::InvalidInput(format!(
                "cron expression {trimmed:?} must have 5 fields: min hour dom month dow"
            )));
        };

        let mut day_of_week = parse_field(dow, 0, 7)?;
        // 7 is an alias for Sunday.
        if day_of_week.allowed[7] {
            day_of_week.allowed[0] = true;
        }

        Ok(Self {
            source: trimmed.to_string(),
            minute: parse_field(minute, 0, 59)?,
            hour: parse_field(hour, 0, 23)?,
            day_of_month: parse_field(dom, 1, 31)?,
            month: parse_field(month, 1, 12)?,
            day_of_week,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.day_of_month.matches(t.day());
        let dow = self.day_of_week.matches(t.weekday().num_days_from_sunday());
        let day = match (self.day_of_month.restricted, self.day_of_week.restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        };
        day && self.minute.matches(t.minute())
            && self.hour.matches(t.hour())
            && self.month.matches(t.month())
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut t = after + Duration::minutes(1);
        t = t
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(t);

        // Bounded search; covers leap days and sparse month/day combinations.
        let limit = 4 * 366 * 24 * 60;
        let mut steps = 0;
        while steps < limit {
            if !self.month.matches(t.month()) {
                t = start_of_next_month(t);
                steps += 1;
                continue;
            }
            if self.matches(t) {
                return Ok(t);
            }
            t += Duration::minutes(1);
            steps += 1;
        }
        Err(Error::InvalidInput(format!(
            "cron expression {:?} never fires",
            self.source
        )))
    }
}

fn start_of_next_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    t.with_day(1)
        .and_then(|d| d.with_hour(0))
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_year(year))
        .and_then(|d| d.with_month(month))
        .unwrap_or(t + Duration::days(1))
}

fn parse_field(token: &str, min: u32, max: u32) -> Result<Field> {
    let mut field = Field::new(min, max);
    if token == "*" {
        field.allowed.iter_mut().for_each(|a| *a = true);
        field.restricted = false;
        return Ok(field);
    }

    for part in token.split(',') {
        if part.is_empty() {
            return Err(Error::InvalidInput("empty cron list item".to_string()));
        }
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("invalid cron step {s:?}")))?;
                if step == 0 {
                    return Err(Error::InvalidInput("cron step must be > 0".to_string()));
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a)?, parse_value(b)?)
        } else {
            let v = parse_value(range)?;
            // `5/15` means "from 5 to the end, every 15".
            if step > 1 { (v, max) } else { (v, v) }
        };
        if start > end {
            return Err(Error::InvalidInput(format!("cron range {range:?} is reversed")));
        }

        let mut v = start;
        while v <= end {
            field.set(v)?;
            v += step;
        }
    }
    field.restricted = !token.starts_with('*');
    Ok(field)
}

fn parse_value(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::InvalidInput(format!("invalid cron value {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_fifteen_minutes() {
        let cron = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(
            cron.next_after(at(2024, 5, 1, 10, 7)).unwrap(),
            at(2024, 5, 1, 10, 15)
        );
        assert_eq!(
            cron.next_after(at(2024, 5, 1, 10, 45)).unwrap(),
            at(2024, 5, 1, 11, 0)
        );
    }

    #[test]
    fn weekday_mornings() {
        let cron = CronExpr::parse("30 9 * * 1-5").unwrap();
        // 2024-05-04 is a Saturday.
        assert_eq!(
            cron.next_after(at(2024, 5, 4, 12, 0)).unwrap(),
            at(2024, 5, 6, 9, 30)
        );
    }

    #[test]
    fn sunday_alias_and_shorthands() {
        let seven = CronExpr::parse("0 0 * * 7").unwrap();
        let zero = CronExpr::parse("@weekly").unwrap();
        let t = at(2024, 5, 5, 0, 0);
        assert!(seven.matches(t));
        assert!(zero.matches(t));
        assert_eq!(CronExpr::parse("@daily").unwrap().as_str(), "@daily");
    }

    #[test]
    fn dom_or_dow_when_both_restricted() {
        let cron = CronExpr::parse("0 0 13 * 5").unwrap();
        // Friday the 3rd matches through day-of-week.
        assert!(cron.matches(at(2024, 5, 3, 0, 0)));
        // Monday the 13th matches through day-of-month.
        assert!(cron.matches(at(2024, 5, 13, 0, 0)));
        assert!(!cron.matches(at(2024, 5, 14, 0, 0)));
    }

    #[test]
    fn leap_day_is_found() {
        let cron = CronExpr::parse("0 12 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(at(2025, 3, 1, 0, 0)).unwrap(),
            at(2028, 2, 29, 12, 0)
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-1 * * * *").is_err());
        assert!(CronExpr::parse("0 0 31 2 *").unwrap().next_after(at(2024, 1, 1, 0, 0)).is_err());
    }
}
