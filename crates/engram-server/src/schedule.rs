// schedule.rs
// Schedule expression parsing: 5-6 field cron plus a small natural-language
// grammar ("in 30 minutes", "tomorrow at 9am", "every weekday"). Parse
// failures return a structured error with a hint, never an exception.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// A parse failure the wire can carry directly.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduleError {
    pub error: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSchedule {
    pub next_run: DateTime<Utc>,
    pub recurring: bool,
}

const HINT: &str = "use cron (e.g. '0 9 * * 1-5') or phrases like 'in 30 minutes', \
     'tomorrow at 9am', 'every weekday', 'every 2 hours'";

fn fail(expr: &str) -> ScheduleError {
    ScheduleError {
        error: format!("could not parse schedule '{expr}'"),
        hint: HINT.to_string(),
    }
}

/// Parse a schedule expression relative to `now`.
pub fn parse_schedule(expr: &str, now: DateTime<Utc>) -> Result<ParsedSchedule, ScheduleError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(fail(expr));
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if (fields.len() == 5 || fields.len() == 6) && looks_like_cron(&fields) {
        let cron = CronExpr::parse(&fields).ok_or_else(|| fail(expr))?;
        let next = cron.next_after(now).ok_or_else(|| fail(expr))?;
        return Ok(ParsedSchedule {
            next_run: next,
            recurring: true,
        });
    }

    parse_natural(trimmed, now).ok_or_else(|| fail(expr))
}

fn looks_like_cron(fields: &[&str]) -> bool {
    fields
        .iter()
        .all(|f| f.chars().all(|c| c.is_ascii_digit() || "*/,-".contains(c)))
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

/// One parsed cron expression. Six-field form carries leading seconds, which
/// are accepted and ignored (the engine ticks at minute granularity).
struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>, // 0 = Sunday
}

impl CronExpr {
    fn parse(fields: &[&str]) -> Option<Self> {
        let fields = if fields.len() == 6 { &fields[1..] } else { fields };
        Some(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days_of_month: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            days_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        let dow = t.weekday().num_days_from_sunday();
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days_of_month.contains(&t.day())
            && self.months.contains(&t.month())
            && self.days_of_week.contains(&dow)
    }

    /// Scan minute-by-minute for the next match, bounded at 366 days.
    fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = (now + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        for _ in 0..(366 * 24 * 60) {
            if self.matches(t) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

/// Parse one cron field into the set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        if part == "*" {
            values.extend(min..=max);
        } else if let Some(step) = part.strip_prefix("*/") {
            let step: u32 = step.parse().ok()?;
            if step == 0 {
                return None;
            }
            values.extend((min..=max).filter(|v| (v - min) % step == 0));
        } else if let Some((a, b)) = part.split_once('-') {
            let a: u32 = a.parse().ok()?;
            let b: u32 = b.parse().ok()?;
            if a > b || a < min || b > max {
                return None;
            }
            values.extend(a..=b);
        } else {
            let v: u32 = part.parse().ok()?;
            if v < min || v > max {
                return None;
            }
            values.push(v);
        }
    }
    values.sort_unstable();
    values.dedup();
    (!values.is_empty()).then_some(values)
}

// ---------------------------------------------------------------------------
// Natural language
// ---------------------------------------------------------------------------

fn parse_natural(expr: &str, now: DateTime<Utc>) -> Option<ParsedSchedule> {
    let lower = expr.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    // "in N minutes/hours/days/weeks"
    if words.first() == Some(&"in")
        && words.len() >= 3
        && let Ok(n) = words[1].parse::<i64>()
    {
        let delta = unit_duration(words[2], n)?;
        return Some(ParsedSchedule {
            next_run: now + delta,
            recurring: false,
        });
    }

    // "every N minutes/hours/days" or "every minute/hour/day/weekday/<dayname>"
    if words.first() == Some(&"every") && words.len() >= 2 {
        if let Ok(n) = words[1].parse::<i64>() {
            let delta = unit_duration(words.get(2)?, n)?;
            return Some(ParsedSchedule {
                next_run: now + delta,
                recurring: true,
            });
        }
        let time = parse_time_suffix(&words, now).unwrap_or((9, 0));
        match words[1] {
            "minute" => {
                return Some(ParsedSchedule {
                    next_run: now + Duration::minutes(1),
                    recurring: true,
                });
            }
            "hour" => {
                return Some(ParsedSchedule {
                    next_run: now + Duration::hours(1),
                    recurring: true,
                });
            }
            "day" | "morning" => {
                return Some(ParsedSchedule {
                    next_run: next_time_of_day(now, time.0, time.1, false),
                    recurring: true,
                });
            }
            "weekday" => {
                return Some(ParsedSchedule {
                    next_run: next_weekday(now, time.0, time.1),
                    recurring: true,
                });
            }
            "week" => {
                return Some(ParsedSchedule {
                    next_run: now + Duration::weeks(1),
                    recurring: true,
                });
            }
            day => {
                if let Some(target) = day_of_week(day) {
                    return Some(ParsedSchedule {
                        next_run: next_day_of_week(now, target, time.0, time.1),
                        recurring: true,
                    });
                }
            }
        }
        return None;
    }

    // "tomorrow [at H[:MM][am|pm]]"
    if words.first() == Some(&"tomorrow") {
        let (hour, minute) = parse_time_suffix(&words, now).unwrap_or((9, 0));
        let tomorrow = (now + Duration::days(1)).date_naive();
        let next = Utc
            .with_ymd_and_hms(tomorrow.year(), tomorrow.month(), tomorrow.day(), hour, minute, 0)
            .single()?;
        return Some(ParsedSchedule {
            next_run: next,
            recurring: false,
        });
    }

    // "today at ..." / "at H[:MM][am|pm]"
    if words.first() == Some(&"today") || words.first() == Some(&"at") {
        let (hour, minute) = parse_time_suffix(&words, now)?;
        return Some(ParsedSchedule {
            next_run: next_time_of_day(now, hour, minute, true),
            recurring: false,
        });
    }

    // "next monday/tuesday/... [at ...]" / "next week"
    if words.first() == Some(&"next") && words.len() >= 2 {
        if words[1] == "week" {
            return Some(ParsedSchedule {
                next_run: now + Duration::weeks(1),
                recurring: false,
            });
        }
        if let Some(target) = day_of_week(words[1]) {
            let (hour, minute) = parse_time_suffix(&words, now).unwrap_or((9, 0));
            return Some(ParsedSchedule {
                next_run: next_day_of_week(now, target, hour, minute),
                recurring: false,
            });
        }
    }

    None
}

fn unit_duration(unit: &str, n: i64) -> Option<Duration> {
    match unit.trim_end_matches('s') {
        "second" | "sec" => Some(Duration::seconds(n)),
        "minute" | "min" => Some(Duration::minutes(n)),
        "hour" | "hr" => Some(Duration::hours(n)),
        "day" => Some(Duration::days(n)),
        "week" => Some(Duration::weeks(n)),
        _ => None,
    }
}

fn day_of_week(word: &str) -> Option<u32> {
    match word {
        "sunday" => Some(0),
        "monday" => Some(1),
        "tuesday" => Some(2),
        "wednesday" => Some(3),
        "thursday" => Some(4),
        "friday" => Some(5),
        "saturday" => Some(6),
        _ => None,
    }
}

/// Pull "at H[:MM][am|pm]" out of a phrase.
fn parse_time_suffix(words: &[&str], _now: DateTime<Utc>) -> Option<(u32, u32)> {
    let at_pos = words.iter().position(|w| *w == "at")?;
    let time_word = words.get(at_pos + 1)?;
    parse_clock(time_word)
}

fn parse_clock(word: &str) -> Option<(u32, u32)> {
    let (body, pm) = if let Some(stripped) = word.strip_suffix("pm") {
        (stripped, true)
    } else if let Some(stripped) = word.strip_suffix("am") {
        (stripped, false)
    } else {
        (word, false)
    };
    let explicit_meridiem = word.ends_with("am") || word.ends_with("pm");

    let (hour_str, minute_str) = match body.split_once(':') {
        Some((h, m)) => (h, m),
        None => (body, "0"),
    };
    let mut hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.parse().ok()?;
    if minute > 59 {
        return None;
    }
    if explicit_meridiem {
        if hour == 0 || hour > 12 {
            return None;
        }
        if pm && hour != 12 {
            hour += 12;
        }
        if !pm && hour == 12 {
            hour = 0;
        }
    }
    (hour <= 23).then_some((hour, minute))
}

/// Next occurrence of a wall-clock time; `today_ok` allows later today,
/// otherwise the result always rolls to tomorrow at the earliest.
fn next_time_of_day(now: DateTime<Utc>, hour: u32, minute: u32, today_ok: bool) -> DateTime<Utc> {
    let today = now.date_naive();
    let candidate = Utc
        .with_ymd_and_hms(today.year(), today.month(), today.day(), hour, minute, 0)
        .single()
        .unwrap_or(now);
    if today_ok && candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn next_weekday(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let mut candidate = next_time_of_day(now, hour, minute, true);
    while matches!(candidate.weekday().num_days_from_sunday(), 0 | 6) {
        candidate += Duration::days(1);
    }
    candidate
}

fn next_day_of_week(now: DateTime<Utc>, target: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    let mut candidate = next_time_of_day(now, hour, minute, true);
    while candidate.weekday().num_days_from_sunday() != target {
        candidate += Duration::days(1);
    }
    candidate
}
