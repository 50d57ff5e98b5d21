// src/scheduler/schedule.rs
// Next-run computation for all trigger kinds, in the task's timezone

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use super::types::ScheduleType;

/// Weekday names accepted in weekly schedules (full or 3-letter,
/// case-insensitive), mapped to chrono's Monday-based numbering
fn parse_weekday(name: &str) -> Option<u32> {
    match name.trim().to_lowercase().as_str() {
        "mon" | "monday" => Some(0),
        "tue" | "tuesday" => Some(1),
        "wed" | "wednesday" => Some(2),
        "thu" | "thursday" => Some(3),
        "fri" | "friday" => Some(4),
        "sat" | "saturday" => Some(5),
        "sun" | "sunday" => Some(6),
        _ => None,
    }
}

fn parse_hhmm(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.trim().split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn at_time(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
        .single()
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Compute the next run time for a task, in UTC, starting from `from`.
///
/// All clock arithmetic happens in the task's configured IANA timezone;
/// the result converts to UTC for storage and comparison. Returns None
/// on unparseable schedule values.
pub fn compute_next_run(
    schedule_type: ScheduleType,
    schedule_value: &str,
    timezone: &str,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Unknown timezone {:?}, falling back to UTC", timezone);
            chrono_tz::UTC
        }
    };
    let now = from.with_timezone(&tz);

    let next = match schedule_type {
        ScheduleType::Daily => next_daily(schedule_value, &now, &tz),
        ScheduleType::Weekly => next_weekly(schedule_value, &now, &tz),
        ScheduleType::Monthly => next_monthly(schedule_value, &now, &tz),
        ScheduleType::Interval => next_interval(schedule_value, &now),
        ScheduleType::Cron => next_cron(schedule_value, &now, &tz),
    };

    next.map(|dt| dt.with_timezone(&Utc))
}

/// value = "HH:MM" — next occurrence of that clock time
fn next_daily(value: &str, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
    let (hour, minute) = parse_hhmm(value)?;
    let today = at_time(tz, now.date_naive(), hour, minute)?;
    if today > *now {
        Some(today)
    } else {
        at_time(tz, now.date_naive().succ_opt()?, hour, minute)
    }
}

/// value = "day1,day2 HH:MM" — next matching weekday at the given time
fn next_weekly(value: &str, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
    let trimmed = value.trim();
    let (days_str, time_str) = match trimmed.rsplit_once(' ') {
        Some((days, time)) if time.contains(':') => (days, time),
        _ => (trimmed, "08:00"),
    };
    let (hour, minute) = parse_hhmm(time_str)?;

    let mut target_weekdays: Vec<u32> = days_str.split(',').filter_map(parse_weekday).collect();
    if target_weekdays.is_empty() {
        target_weekdays.push(0); // Monday
    }

    for offset in 0..8 {
        let date = now.date_naive() + Duration::days(offset);
        if target_weekdays.contains(&date.weekday().num_days_from_monday()) {
            if let Some(candidate) = at_time(tz, date, hour, minute) {
                if candidate > *now {
                    return Some(candidate);
                }
            }
        }
    }

    // Fallback: tomorrow at the given time
    at_time(tz, now.date_naive().succ_opt()?, hour, minute)
}

/// value = "DD HH:MM" — this month if future, else next month; a day
/// missing from the month clamps to the month's last day
fn next_monthly(value: &str, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
    let mut parts = value.trim().split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    let (hour, minute) = parse_hhmm(parts.next().unwrap_or("08:00"))?;

    let clamp = |year: i32, month: u32| -> u32 { day.min(last_day_of_month(year, month)) };

    let this_month =
        NaiveDate::from_ymd_opt(now.year(), now.month(), clamp(now.year(), now.month()))
            .and_then(|d| at_time(tz, d, hour, minute));
    if let Some(candidate) = this_month {
        if candidate > *now {
            return Some(candidate);
        }
    }

    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, clamp(next_year, next_month))
        .and_then(|d| at_time(tz, d, hour, minute))
}

/// value = "Nm" / "Nh" / "Nd" — now + N units (fallback 30 minutes)
fn next_interval(value: &str, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let trimmed = value.trim().to_lowercase();
    let (amount_str, unit) = trimmed.split_at(trimmed.len().saturating_sub(1));
    let amount: i64 = match amount_str.parse() {
        Ok(n) => n,
        Err(_) => return Some(*now + Duration::minutes(30)),
    };

    let delta = match unit {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => Duration::minutes(30),
    };
    Some(*now + delta)
}

/// Standard five-field cron: minute hour dom month dow, supporting `*`,
/// `a-b`, `a,b` and `*/n` / `a/n`. dow uses the 0=Sunday convention.
///
/// Brute-forces minute-by-minute over the next 2 days; expressions whose
/// next fire is further out fall back to now + 1h.
fn next_cron(value: &str, now: &DateTime<Tz>, _tz: &Tz) -> Option<DateTime<Tz>> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() != 5 {
        warn!("Invalid cron expression (expected 5 fields): {}", value);
        return Some(*now + Duration::hours(1));
    }
    let (minute_spec, hour_spec, dom_spec, month_spec, dow_spec) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);

    let mut candidate = (*now + Duration::minutes(1))
        .with_second(0)?
        .with_nanosecond(0)?;
    let limit = *now + Duration::days(2);

    while candidate < limit {
        // cron dow: 0=Sunday; chrono: Monday-based
        let cron_dow = (candidate.weekday().num_days_from_monday() + 1) % 7;

        if cron_field_matches(minute_spec, candidate.minute())
            && cron_field_matches(hour_spec, candidate.hour())
            && cron_field_matches(dom_spec, candidate.day())
            && cron_field_matches(month_spec, candidate.month())
            && cron_field_matches(dow_spec, cron_dow)
        {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }

    Some(*now + Duration::hours(1))
}

fn cron_field_matches(spec: &str, val: u32) -> bool {
    if spec == "*" {
        return true;
    }
    for part in spec.split(',') {
        if let Some((lo, hi)) = part.split_once('-') {
            // Range may carry a step: a-b/n is treated as a-b
            let hi = hi.split('/').next().unwrap_or(hi);
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                if lo <= val && val <= hi {
                    return true;
                }
            }
        } else if let Some((base, step)) = part.split_once('/') {
            let base_val = if base == "*" { 0 } else { base.parse().unwrap_or(0) };
            if let Ok(step) = step.parse::<u32>() {
                if step > 0 && val >= base_val && (val - base_val) % step == 0 {
                    return true;
                }
            }
        } else if part.parse::<u32>() == Ok(val) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    const TZ: &str = "Asia/Jerusalem";

    /// Local wall-clock time in the test timezone, as UTC
    fn local(s: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap();
        let tz: Tz = TZ.parse().unwrap();
        tz.from_local_datetime(&naive)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn as_local_string(dt: DateTime<Utc>) -> String {
        let tz: Tz = TZ.parse().unwrap();
        dt.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
    }

    #[test]
    fn daily_future_today() {
        let next = compute_next_run(
            ScheduleType::Daily,
            "18:30",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-02 18:30");
    }

    #[test]
    fn daily_past_rolls_to_tomorrow() {
        let next = compute_next_run(
            ScheduleType::Daily,
            "08:00",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-03 08:00");
    }

    #[test]
    fn weekly_finds_next_named_day() {
        // 2025-06-02 is a Monday
        let next = compute_next_run(
            ScheduleType::Weekly,
            "wed,fri 09:15",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-04 09:15");
    }

    #[test]
    fn weekly_same_day_future_time() {
        let next = compute_next_run(
            ScheduleType::Weekly,
            "Monday 23:00",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-02 23:00");
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        // Day 31 doesn't exist in June
        let next = compute_next_run(
            ScheduleType::Monthly,
            "31 08:00",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-30 08:00");
    }

    #[test]
    fn monthly_rolls_to_next_month() {
        let next = compute_next_run(
            ScheduleType::Monthly,
            "1 08:00",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-07-01 08:00");
    }

    #[test]
    fn interval_minutes() {
        let next = compute_next_run(
            ScheduleType::Interval,
            "15m",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-02 10:15");
    }

    #[test]
    fn interval_days() {
        let next = compute_next_run(
            ScheduleType::Interval,
            "2d",
            TZ,
            local("2025-06-02 10:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-04 10:00");
    }

    #[test]
    fn cron_every_15_minutes() {
        let next = compute_next_run(
            ScheduleType::Cron,
            "*/15 * * * *",
            TZ,
            local("2025-06-02 10:07"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-02 10:15");
    }

    #[test]
    fn cron_weekday_mornings_from_saturday() {
        // 2025-06-07 is a Saturday; 1-5 is Monday-Friday in the
        // 0=Sunday convention
        let next = compute_next_run(
            ScheduleType::Cron,
            "0 9 * * 1-5",
            TZ,
            local("2025-06-07 12:00"),
        )
        .unwrap();
        assert_eq!(as_local_string(next), "2025-06-09 09:00");
    }

    #[test]
    fn cron_invalid_falls_back_an_hour() {
        let from = local("2025-06-02 10:00");
        let next = compute_next_run(ScheduleType::Cron, "not a cron", TZ, from).unwrap();
        assert_eq!(next, from + Duration::hours(1));
    }

    #[test]
    fn next_run_is_strictly_future() {
        let from = local("2025-06-02 08:00");
        for (st, sv) in [
            (ScheduleType::Daily, "08:00"),
            (ScheduleType::Weekly, "mon 08:00"),
            (ScheduleType::Monthly, "2 08:00"),
            (ScheduleType::Interval, "1m"),
            (ScheduleType::Cron, "0 8 * * *"),
        ] {
            let next = compute_next_run(st, sv, TZ, from).unwrap();
            assert!(next > from, "{:?} {:?} gave non-future {:?}", st, sv, next);
        }
    }
}
