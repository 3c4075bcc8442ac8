//! Schedule arithmetic: pure computation of next-run UTC timestamps from the
//! textual schedule grammar `HH:MM <recurrence>`.
//!
//! Recurrences: `once`, `daily`, `weekly(<day>)`, `custom(<d1>,<d2>,…)`,
//! `monthly(<DOM>)`. Day names are accepted in English and Indonesian. All
//! computation happens in local time by shifting `now` by the timezone
//! offset, picking the target local midnight plus time-of-day, and shifting
//! back to UTC. Date ↔ days-since-epoch conversion uses the standard civil
//! calendar algorithms; weekday is Monday=0.

const SECS_PER_DAY: i64 = 86_400;

/// Computes the next firing strictly after `now` (unix seconds, UTC).
/// Returns `None` on any parse failure.
pub fn compute_next_run(schedule: &str, now: i64, tz_offset_hours: i32) -> Option<i64> {
    let (hh, mm, recurrence) = parse_schedule(schedule)?;
    let offset = tz_offset_hours as i64 * 3_600;
    let local = now + offset;
    let local_day = local.div_euclid(SECS_PER_DAY);
    let tod = hh * 3_600 + mm * 60;
    let at = |day: i64| day * SECS_PER_DAY + tod;

    let local_next = match recurrence {
        Recurrence::Daily | Recurrence::Once => {
            let mut day = local_day;
            if at(day) <= local {
                day += 1;
            }
            at(day)
        }
        Recurrence::Weekly(target) => next_weekday(local, local_day, tod, target),
        Recurrence::Custom(days) => days
            .into_iter()
            .map(|d| next_weekday(local, local_day, tod, d))
            .min()?,
        Recurrence::Monthly(dom) => {
            let (mut year, mut month, _) = civil_from_days(local_day);
            // Roll forward to the first month where the day exists and the
            // instant is still ahead of now.
            loop {
                if dom <= days_in_month(year, month) {
                    let day = days_from_civil(year, month, dom);
                    if at(day) > local {
                        break at(day);
                    }
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
        }
    };

    Some(local_next - offset)
}

/// True when the schedule's recurrence is `once` (the action is disabled
/// after it fires).
pub fn is_once(schedule: &str) -> bool {
    matches!(parse_schedule(schedule), Some((_, _, Recurrence::Once)))
}

enum Recurrence {
    Once,
    Daily,
    Weekly(i64),
    Custom(Vec<i64>),
    Monthly(u32),
}

fn parse_schedule(schedule: &str) -> Option<(i64, i64, Recurrence)> {
    let mut parts = schedule.trim().splitn(2, ' ');
    let time = parts.next()?;
    let recurrence = parts.next()?.trim();

    let (hh, mm) = parse_time(time)?;
    let recurrence = if recurrence == "once" {
        Recurrence::Once
    } else if recurrence == "daily" {
        Recurrence::Daily
    } else if let Some(day) = argument(recurrence, "weekly") {
        Recurrence::Weekly(day_index(day)?)
    } else if let Some(days) = argument(recurrence, "custom") {
        let parsed: Option<Vec<i64>> = days.split(',').map(|d| day_index(d.trim())).collect();
        let parsed = parsed?;
        if parsed.is_empty() {
            return None;
        }
        Recurrence::Custom(parsed)
    } else if let Some(dom) = argument(recurrence, "monthly") {
        let dom: u32 = dom.trim().parse().ok()?;
        if !(1..=31).contains(&dom) {
            return None;
        }
        Recurrence::Monthly(dom)
    } else {
        return None;
    };
    Some((hh, mm, recurrence))
}

fn parse_time(s: &str) -> Option<(i64, i64)> {
    let (hh, mm) = s.split_once(':')?;
    let hh: i64 = hh.parse().ok()?;
    let mm: i64 = mm.parse().ok()?;
    if !(0..24).contains(&hh) || !(0..60).contains(&mm) {
        return None;
    }
    Some((hh, mm))
}

/// `weekly(monday)` → `monday`.
fn argument<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

/// Monday=0 … Sunday=6; English and Indonesian names.
fn day_index(name: &str) -> Option<i64> {
    match name.to_ascii_lowercase().as_str() {
        "monday" | "mon" | "senin" => Some(0),
        "tuesday" | "tue" | "selasa" => Some(1),
        "wednesday" | "wed" | "rabu" => Some(2),
        "thursday" | "thu" | "kamis" => Some(3),
        "friday" | "fri" | "jumat" => Some(4),
        "saturday" | "sat" | "sabtu" => Some(5),
        "sunday" | "sun" | "minggu" => Some(6),
        _ => None,
    }
}

fn next_weekday(local: i64, local_day: i64, tod: i64, target: i64) -> i64 {
    let today = weekday(local_day);
    let delta = (target - today).rem_euclid(7);
    let mut day = local_day + delta;
    if day * SECS_PER_DAY + tod <= local {
        day += 7;
    }
    day * SECS_PER_DAY + tod
}

/// Day of week from days-since-epoch; 1970-01-01 was a Thursday.
pub fn weekday(days: i64) -> i64 {
    (days + 3).rem_euclid(7)
}

/// Days since 1970-01-01 from a civil date (Howard Hinnant's algorithm).
pub fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date from days since 1970-01-01 (inverse of [`days_from_civil`]).
pub fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { y + 1 } else { y }, month, day)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(year: i64, month: u32, day: u32, hh: i64, mm: i64) -> i64 {
        days_from_civil(year, month, day) * SECS_PER_DAY + hh * 3_600 + mm * 60
    }

    /// **Scenario**: Date ↔ days round-trips across the supported range.
    #[test]
    fn civil_round_trip() {
        // Dense sweep around epoch and leap boundaries, sparse to year 9999.
        for days in (-400..1_200).chain((0..2_932_000).step_by(997)) {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days, "date {y}-{m}-{d}");
        }
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(days_from_civil(2000, 2, 29), days_from_civil(2000, 2, 28) + 1);
    }

    /// **Scenario**: Monday=0 weekday from the Gregorian date.
    #[test]
    fn weekday_is_monday_zero() {
        // 2024-01-01 was a Monday, 1970-01-01 a Thursday.
        assert_eq!(weekday(days_from_civil(2024, 1, 1)), 0);
        assert_eq!(weekday(0), 3);
        assert_eq!(weekday(days_from_civil(2026, 8, 1)), 5); // Saturday
    }

    /// **Scenario**: Daily picks today's slot when still ahead, else
    /// tomorrow's.
    #[test]
    fn daily_today_or_tomorrow() {
        let now = ts(2026, 3, 10, 7, 0);
        assert_eq!(
            compute_next_run("08:00 daily", now, 0),
            Some(ts(2026, 3, 10, 8, 0))
        );
        let later = ts(2026, 3, 10, 9, 0);
        assert_eq!(
            compute_next_run("08:00 daily", later, 0),
            Some(ts(2026, 3, 11, 8, 0))
        );
        // Exactly at the slot: strictly after now.
        let exact = ts(2026, 3, 10, 8, 0);
        assert_eq!(
            compute_next_run("08:00 daily", exact, 0),
            Some(ts(2026, 3, 11, 8, 0))
        );
    }

    /// **Scenario**: The timezone offset shifts the local slot back to UTC.
    #[test]
    fn timezone_offset_applies() {
        // 08:00 in UTC+7 is 01:00 UTC.
        let now = ts(2026, 3, 10, 0, 0);
        assert_eq!(
            compute_next_run("08:00 daily", now, 7),
            Some(ts(2026, 3, 10, 1, 0))
        );
        // Negative offsets shift the other way.
        assert_eq!(
            compute_next_run("08:00 daily", now, -5),
            Some(ts(2026, 3, 10, 13, 0))
        );
    }

    /// **Scenario**: Weekly lands on the named day, English or Indonesian.
    #[test]
    fn weekly_names_and_rollover() {
        // 2026-03-10 is a Tuesday.
        let now = ts(2026, 3, 10, 12, 0);
        assert_eq!(
            compute_next_run("09:00 weekly(friday)", now, 0),
            Some(ts(2026, 3, 13, 9, 0))
        );
        assert_eq!(
            compute_next_run("09:00 weekly(jumat)", now, 0),
            Some(ts(2026, 3, 13, 9, 0))
        );
        // Same day but the time has passed: next week.
        assert_eq!(
            compute_next_run("09:00 weekly(selasa)", now, 0),
            Some(ts(2026, 3, 17, 9, 0))
        );
    }

    /// **Scenario**: Custom picks the earliest of the listed days.
    #[test]
    fn custom_earliest_day_wins() {
        // Tuesday noon; thursday comes before monday.
        let now = ts(2026, 3, 10, 12, 0);
        assert_eq!(
            compute_next_run("10:00 custom(monday,thursday)", now, 0),
            Some(ts(2026, 3, 12, 10, 0))
        );
    }

    /// **Scenario**: Monthly rolls to the next month (and year) when the
    /// day-of-month has passed, and skips months missing the day.
    #[test]
    fn monthly_rollover() {
        let now = ts(2026, 3, 20, 12, 0);
        assert_eq!(
            compute_next_run("08:00 monthly(15)", now, 0),
            Some(ts(2026, 4, 15, 8, 0))
        );
        // December past the slot rolls into next year.
        let december = ts(2026, 12, 31, 23, 0);
        assert_eq!(
            compute_next_run("08:00 monthly(31)", december, 0),
            Some(ts(2027, 1, 31, 8, 0))
        );
        // The 31st after January rolls over February and April to March/May.
        let feb = ts(2026, 2, 1, 0, 0);
        assert_eq!(
            compute_next_run("08:00 monthly(31)", feb, 0),
            Some(ts(2026, 3, 31, 8, 0))
        );
    }

    /// **Scenario**: Parse failures return None.
    #[test]
    fn parse_failures() {
        let now = ts(2026, 3, 10, 0, 0);
        for bad in [
            "25:00 daily",
            "08:61 daily",
            "08:00 weekly(funday)",
            "08:00 monthly(0)",
            "08:00 monthly(32)",
            "08:00 fortnightly",
            "08:00",
            "daily",
            "08:00 custom()",
        ] {
            assert_eq!(compute_next_run(bad, now, 0), None, "{bad}");
        }
    }

    /// **Scenario**: Every successful computation is strictly after now.
    #[test]
    fn next_run_is_strictly_future() {
        let schedules = [
            "00:00 daily",
            "23:59 once",
            "12:30 weekly(minggu)",
            "06:15 custom(senin,rabu,sabtu)",
            "09:00 monthly(29)",
        ];
        for schedule in schedules {
            for day_offset in 0..40 {
                for tz in [-11, 0, 7, 12] {
                    let now = ts(2026, 1, 1, 13, 7) + day_offset * SECS_PER_DAY;
                    let next = compute_next_run(schedule, now, tz)
                        .unwrap_or_else(|| panic!("parse {schedule}"));
                    assert!(next > now, "{schedule} tz={tz} day={day_offset}");
                }
            }
        }
    }

    /// **Scenario**: once is recognized for post-fire disabling.
    #[test]
    fn once_detection() {
        assert!(is_once("07:45 once"));
        assert!(!is_once("07:45 daily"));
        assert!(!is_once("garbage"));
    }
}
