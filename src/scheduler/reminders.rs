//! Deterministic decisions from the user's reminders.
//!
//! [`ReminderGateway`] proposes the next reminder occurrence that lies at
//! least the temporal floor ahead. Reminders falling within the batch
//! window of that occurrence are folded into the same decision, so one run
//! covers them all. Combine it with a heuristic gateway through
//! [`SoonestDecision`](super::gateway::SoonestDecision), listing the
//! reminder gateway first so it wins ties.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Days, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};

use super::context::SchedulerContext;
use super::gateway::DecisionGateway;
use super::run::RunDecision;
use crate::error::{Result, YumeError};

/// Minimum lead time for a reminder occurrence to be considered.
pub const DEFAULT_REMINDER_FLOOR: Duration = Duration::minutes(15);
/// Occurrences this close to the chosen one are batched into it.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::minutes(15);

/// When a reminder is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderSchedule {
    /// A single instant.
    Once(DateTime<Utc>),
    /// A local time of day, every day or on the listed weekdays only.
    Recurring { time: NaiveTime, days: Vec<Weekday> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub id: String,
    pub content: String,
    pub schedule: ReminderSchedule,
}

impl Reminder {
    pub fn once(id: impl Into<String>, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            schedule: ReminderSchedule::Once(at),
        }
    }

    pub fn daily(id: impl Into<String>, content: impl Into<String>, time: NaiveTime) -> Self {
        Self::weekly(id, content, time, Vec::new())
    }

    /// Recurs at `time` on `days`; an empty list means every day.
    pub fn weekly(
        id: impl Into<String>,
        content: impl Into<String>,
        time: NaiveTime,
        days: Vec<Weekday>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            schedule: ReminderSchedule::Recurring { time, days },
        }
    }
}

/// Parse an `HH:MM` time of day.
///
/// # Errors
///
/// Returns [`YumeError::Decision`] when `raw` is not a valid `HH:MM` time.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| YumeError::Decision(format!("invalid reminder time {raw:?}: {e}")))
}

/// Pick the next reminder occurrence at or after `now + floor`, folding in
/// every other occurrence within `batch_window` of it.
///
/// Recurring reminders are evaluated on the calendar of `now`'s time zone.
/// Returns `None` when no reminder is due after the floor.
pub fn next_reminder_decision<Tz: TimeZone>(
    reminders: &[Reminder],
    now: &DateTime<Tz>,
    floor: Duration,
    batch_window: Duration,
) -> Option<RunDecision> {
    let earliest = now.with_timezone(&Utc).checked_add_signed(floor)?;
    let tz = now.timezone();
    let today = now.date_naive();

    let mut candidates: Vec<(DateTime<Utc>, &Reminder)> = Vec::new();
    for reminder in reminders {
        match &reminder.schedule {
            ReminderSchedule::Once(at) => {
                if *at >= earliest {
                    candidates.push((*at, reminder));
                }
            }
            ReminderSchedule::Recurring { time, days } if days.is_empty() => {
                if let Some(at) = first_occurrence(&tz, today, *time, 1, earliest) {
                    candidates.push((at, reminder));
                }
            }
            ReminderSchedule::Recurring { time, days } => {
                for day in days {
                    let ahead = (7 + day.num_days_from_monday()
                        - today.weekday().num_days_from_monday())
                        % 7;
                    let Some(date) = today.checked_add_days(Days::new(u64::from(ahead))) else {
                        continue;
                    };
                    if let Some(at) = first_occurrence(&tz, date, *time, 7, earliest) {
                        candidates.push((at, reminder));
                    }
                }
            }
        }
    }

    candidates.sort_by_key(|(at, _)| *at);
    let (chosen_at, _) = *candidates.first()?;
    let batch: Vec<(DateTime<Utc>, &Reminder)> = candidates
        .into_iter()
        .filter(|(at, _)| *at - chosen_at <= batch_window)
        .collect();

    let describe = |r: &Reminder| format!("Reminder {}: {}", r.id, r.content);
    let (reason, topic) = match batch.as_slice() {
        [(_, only)] => (
            format!("Deterministic reminder chosen: {}", describe(only)),
            only.content.clone(),
        ),
        _ => {
            let parts: Vec<String> = batch
                .iter()
                .map(|(at, r)| {
                    format!(
                        "{} at {}",
                        describe(r),
                        at.with_timezone(&tz).naive_local().format("%Y-%m-%d %H:%M")
                    )
                })
                .collect();
            let topics: Vec<&str> = batch.iter().map(|(_, r)| r.content.as_str()).collect();
            (
                format!(
                    "Deterministic reminder chosen: {} (includes nearby reminders: {})",
                    parts[0],
                    parts[1..].join(", ")
                ),
                topics.join("; "),
            )
        }
    };
    let ids: Vec<&str> = batch.iter().map(|(_, r)| r.id.as_str()).collect();

    Some(
        RunDecision::new(chosen_at, reason, topic)
            .with_details(serde_json::json!({ "reminder_ids": ids }).to_string()),
    )
}

/// `time` on `date`, or on `date + step_days` when that is before `earliest`.
fn first_occurrence<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    time: NaiveTime,
    step_days: u64,
    earliest: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let at = |date: NaiveDate| {
        tz.from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .filter(|dt| *dt >= earliest)
    };
    at(date).or_else(|| at(date.checked_add_days(Days::new(step_days))?))
}

/// Proposes the next due reminder, on the local calendar.
pub struct ReminderGateway {
    reminders: RwLock<Vec<Reminder>>,
    floor: Duration,
    batch_window: Duration,
}

impl ReminderGateway {
    pub fn new(reminders: Vec<Reminder>) -> Self {
        Self {
            reminders: RwLock::new(reminders),
            floor: DEFAULT_REMINDER_FLOOR,
            batch_window: DEFAULT_BATCH_WINDOW,
        }
    }

    pub fn with_floor(mut self, floor: Duration) -> Self {
        self.floor = floor;
        self
    }

    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    /// Swap in a new reminder list; the next decision cycle sees it.
    pub fn replace(&self, reminders: Vec<Reminder>) {
        match self.reminders.write() {
            Ok(mut guard) => *guard = reminders,
            Err(poisoned) => *poisoned.into_inner() = reminders,
        }
    }

    pub fn len(&self) -> usize {
        match self.reminders.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DecisionGateway for ReminderGateway {
    async fn decide_next_run(&self, context: &SchedulerContext) -> anyhow::Result<RunDecision> {
        let now = context.captured_at.with_timezone(&Local);
        let decision = {
            let reminders = match self.reminders.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            next_reminder_decision(&reminders, &now, self.floor, self.batch_window)
        };
        decision.ok_or_else(|| anyhow::anyhow!("no upcoming reminder"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::Arc;

    use chrono::FixedOffset;

    use super::*;
    use crate::scheduler::gateway::{FixedDelayGateway, SoonestDecision};

    /// Wednesday.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn decide(reminders: &[Reminder]) -> Option<RunDecision> {
        next_reminder_decision(reminders, &now(), DEFAULT_REMINDER_FLOOR, DEFAULT_BATCH_WINDOW)
    }

    #[test]
    fn weekday_later_this_week() {
        let r = Reminder::weekly("r1", "gym", hm(9, 0), vec![Weekday::Fri]);
        assert_eq!(decide(&[r]).unwrap().next_run_at, at(6, 9, 0));
    }

    #[test]
    fn same_weekday_already_passed_rolls_to_next_week() {
        let r = Reminder::weekly("r1", "standup", hm(9, 0), vec![Weekday::Wed]);
        assert_eq!(decide(&[r]).unwrap().next_run_at, at(11, 9, 0));
    }

    #[test]
    fn same_weekday_inside_floor_rolls_to_next_week() {
        let inside = Reminder::weekly("r1", "tea", hm(10, 10), vec![Weekday::Wed]);
        assert_eq!(decide(&[inside]).unwrap().next_run_at, at(11, 10, 10));

        let on_floor = Reminder::weekly("r2", "tea", hm(10, 15), vec![Weekday::Wed]);
        assert_eq!(decide(&[on_floor]).unwrap().next_run_at, at(4, 10, 15));
    }

    #[test]
    fn nearest_listed_weekday_wins() {
        let r = Reminder::weekly("r1", "bins", hm(8, 0), vec![Weekday::Mon, Weekday::Thu]);
        assert_eq!(decide(&[r]).unwrap().next_run_at, at(5, 8, 0));
    }

    #[test]
    fn daily_reminder_uses_today_or_tomorrow() {
        let morning = Reminder::daily("r1", "vitamins", hm(9, 0));
        assert_eq!(decide(&[morning]).unwrap().next_run_at, at(5, 9, 0));

        let evening = Reminder::daily("r2", "journal", hm(18, 0));
        assert_eq!(decide(&[evening]).unwrap().next_run_at, at(4, 18, 0));
    }

    #[test]
    fn one_time_reminders_inside_floor_are_ignored() {
        let decision = decide(&[
            Reminder::once("past", "missed", at(4, 9, 0)),
            Reminder::once("soon", "too close", at(4, 10, 5)),
            Reminder::once("r1", "call mum", at(4, 10, 20)),
        ])
        .unwrap();
        assert_eq!(decision.next_run_at, at(4, 10, 20));
        assert_eq!(decision.reason, "Deterministic reminder chosen: Reminder r1: call mum");
        assert_eq!(decision.topic, "call mum");
        assert_eq!(decision.details.as_deref(), Some(r#"{"reminder_ids":["r1"]}"#));
    }

    #[test]
    fn nearby_reminders_are_batched() {
        let decision = decide(&[
            Reminder::once("c", "water plants", at(4, 12, 16)),
            Reminder::once("a", "lunch", at(4, 12, 0)),
            Reminder::daily("b", "walk", hm(12, 15)),
        ])
        .unwrap();

        assert_eq!(decision.next_run_at, at(4, 12, 0));
        assert_eq!(decision.topic, "lunch; walk");
        assert_eq!(
            decision.reason,
            "Deterministic reminder chosen: Reminder a: lunch at 2026-03-04 12:00 \
             (includes nearby reminders: Reminder b: walk at 2026-03-04 12:15)"
        );
        assert!(!decision.reason.contains("water plants"));
    }

    #[test]
    fn recurring_reminders_follow_the_local_calendar() {
        // Wednesday 23:30 at UTC-5 is already Thursday in UTC.
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let local_now = tz.with_ymd_and_hms(2026, 3, 4, 23, 30, 0).unwrap();
        let reminders = [Reminder::weekly("r1", "review", hm(8, 0), vec![Weekday::Thu])];

        let decision = next_reminder_decision(
            &reminders,
            &local_now,
            DEFAULT_REMINDER_FLOOR,
            DEFAULT_BATCH_WINDOW,
        )
        .unwrap();
        assert_eq!(decision.next_run_at, at(5, 13, 0));
    }

    #[test]
    fn no_reminders_no_decision() {
        assert!(decide(&[]).is_none());
        let later = Reminder::once("r1", "x", at(4, 10, 1));
        assert!(decide(&[later]).is_none());
    }

    #[test]
    fn parse_time_of_day_accepts_hh_mm() {
        assert_eq!(parse_time_of_day("07:45").unwrap(), hm(7, 45));
        assert!(matches!(
            parse_time_of_day("7pm"),
            Err(YumeError::Decision(_))
        ));
    }

    #[tokio::test]
    async fn gateway_errors_without_upcoming_reminder_and_sees_replacements() {
        let gateway = ReminderGateway::new(Vec::new());
        let ctx = SchedulerContext::empty(Utc::now());
        assert!(gateway.decide_next_run(&ctx).await.is_err());

        let due = ctx.captured_at + Duration::minutes(30);
        gateway.replace(vec![Reminder::once("r1", "stretch", due)]);
        assert_eq!(gateway.len(), 1);
        assert_eq!(gateway.decide_next_run(&ctx).await.unwrap().next_run_at, due);
    }

    #[tokio::test]
    async fn reminder_beats_later_heuristic() {
        let ctx = SchedulerContext::empty(Utc::now());
        let due = ctx.captured_at + Duration::minutes(40);
        let gateway = SoonestDecision::new(vec![
            Arc::new(ReminderGateway::new(vec![Reminder::once("r1", "meds", due)])),
            Arc::new(FixedDelayGateway::hourly()),
        ]);

        let decision = gateway.decide_next_run(&ctx).await.unwrap();
        assert_eq!(decision.next_run_at, due);
        assert_eq!(decision.topic, "meds");
    }
}
