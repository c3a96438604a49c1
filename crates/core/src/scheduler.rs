//! Scheduler — time-based and astronomical trigger source.
//!
//! Each enabled rule with a [`ScheduleSpec`] gets its own timer task that
//! sleeps until the next due time and publishes a `TimerFired` event for
//! that rule onto the bus. Due times are always recomputed from the
//! persisted rule definitions, so a process restart rebuilds the timers
//! from scratch; a trigger whose due time passed while the process was
//! down fires exactly once at startup (never once per missed interval).

pub mod sun;

use std::str::FromStr;
use std::time::Duration;

use chrono::Days;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use nido_domain::error::NidoError;
use nido_domain::event::{EventPayload, EventSource};
use nido_domain::id::RuleId;
use nido_domain::rule::{Rule, ScheduleSpec, SunEvent, parse_time_of_day};
use nido_domain::time::{Timestamp, now};

use crate::ports::event_bus::EventPublisher;
use crate::ports::rules::RuleRepository;

pub use sun::{Location, SunTimes, sun_times};

/// How far the sun-schedule search looks for a day where the sun event
/// exists (covers polar night/day stretches).
const SUN_SEARCH_DAYS: u64 = 366;

/// Scheduler for rules carrying a [`ScheduleSpec`].
pub struct Scheduler<R, P> {
    rules: R,
    publisher: P,
    location: Location,
    timers: DashMap<RuleId, JoinHandle<()>>,
}

impl<R, P> Scheduler<R, P>
where
    R: RuleRepository,
    P: EventPublisher + Clone + 'static,
{
    /// Create a scheduler for the configured location.
    pub fn new(rules: R, publisher: P, location: Location) -> Self {
        Self {
            rules,
            publisher,
            location,
            timers: DashMap::new(),
        }
    }

    /// Recompute all timers from persisted definitions and fire triggers
    /// missed during downtime exactly once each.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rule repository fails.
    pub async fn start(&self) -> Result<(), NidoError> {
        for rule in self.rules.list_enabled().await? {
            let Some(spec) = rule.schedule.clone() else {
                continue;
            };
            if let Some(missed) = previous_due(&spec, now(), rule.last_fired, self.location) {
                // Only rules that fired before can have *missed* a firing;
                // a freshly created rule simply waits for its next due time.
                if rule.last_fired.is_some_and(|last| last < missed) {
                    tracing::info!(
                        rule = %rule.id,
                        name = %rule.name,
                        due = %missed,
                        "firing trigger missed during downtime"
                    );
                    self.publisher
                        .publish(
                            EventPayload::TimerFired { rule: rule.id },
                            EventSource::Scheduler,
                        )
                        .await?;
                }
            }
            self.register(&rule);
        }
        Ok(())
    }

    /// Register (or refresh) the timer for one rule.
    ///
    /// Disabled rules and rules without a schedule have their timer
    /// removed instead.
    pub fn register(&self, rule: &Rule) {
        let Some(spec) = rule.schedule.clone() else {
            self.remove(rule.id);
            return;
        };
        if !rule.enabled {
            self.remove(rule.id);
            return;
        }
        self.remove(rule.id);

        let id = rule.id;
        let publisher = self.publisher.clone();
        let location = self.location;
        let handle = tokio::spawn(async move {
            loop {
                let Some(due) = next_due(&spec, now(), location) else {
                    tracing::warn!(rule = %id, "no upcoming due time; retrying in a day");
                    tokio::time::sleep(Duration::from_secs(86_400)).await;
                    continue;
                };
                let wait = (due - now()).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!(rule = %id, due = %due, "next scheduled trigger");
                tokio::time::sleep(wait).await;

                if let Err(err) = publisher
                    .publish(EventPayload::TimerFired { rule: id }, EventSource::Scheduler)
                    .await
                {
                    tracing::warn!(rule = %id, error = %err, "failed to publish timer event");
                }
                // Guard against firing twice within the same due second.
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
        self.timers.insert(id, handle);
        tracing::info!(rule = %rule.id, name = %rule.name, "scheduled");
    }

    /// Remove a rule's timer.
    pub fn remove(&self, rule_id: RuleId) {
        if let Some((_, handle)) = self.timers.remove(&rule_id) {
            handle.abort();
            tracing::debug!(rule = %rule_id, "removed scheduler timer");
        }
    }

    /// Invalidate the cached schedule for a changed rule.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rule repository fails.
    pub async fn on_rule_changed(&self, rule_id: RuleId) -> Result<(), NidoError> {
        match self.rules.get_by_id(rule_id).await? {
            Some(rule) => self.register(&rule),
            None => self.remove(rule_id),
        }
        Ok(())
    }

    /// Number of active timers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Abort all timers; part of graceful shutdown.
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}

impl<R, P> Drop for Scheduler<R, P> {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}

/// Next due time strictly after `after`.
#[must_use]
pub fn next_due(spec: &ScheduleSpec, after: Timestamp, location: Location) -> Option<Timestamp> {
    match spec {
        ScheduleSpec::TimeOfDay { time } => {
            let time = parse_time_of_day(time)?;
            let today = after.date_naive().and_time(time).and_utc();
            if today > after {
                Some(today)
            } else {
                Some(
                    after
                        .date_naive()
                        .checked_add_days(Days::new(1))?
                        .and_time(time)
                        .and_utc(),
                )
            }
        }
        ScheduleSpec::Sun {
            event,
            offset_minutes,
        } => {
            for day in 0..SUN_SEARCH_DAYS {
                let date = after.date_naive().checked_add_days(Days::new(day))?;
                let Some(times) = sun_times(date, location) else {
                    continue;
                };
                let base = match event {
                    SunEvent::Sunrise => times.sunrise,
                    SunEvent::Sunset => times.sunset,
                };
                let target = base + chrono::Duration::minutes(i64::from(*offset_minutes));
                if target > after {
                    return Some(target);
                }
            }
            None
        }
        ScheduleSpec::Interval { seconds } => {
            Some(after + chrono::Duration::seconds(i64::try_from(*seconds).ok()?))
        }
        ScheduleSpec::Cron { expression } => {
            let schedule = cron::Schedule::from_str(expression).ok()?;
            schedule.after(&after).next()
        }
    }
}

/// Most recent due time at or before `before`, for downtime catch-up.
///
/// Interval schedules have no absolute phase, so their previous due time
/// is anchored on `last_fired`.
#[must_use]
pub fn previous_due(
    spec: &ScheduleSpec,
    before: Timestamp,
    last_fired: Option<Timestamp>,
    location: Location,
) -> Option<Timestamp> {
    match spec {
        ScheduleSpec::TimeOfDay { time } => {
            let time = parse_time_of_day(time)?;
            let today = before.date_naive().and_time(time).and_utc();
            if today <= before {
                Some(today)
            } else {
                Some(
                    before
                        .date_naive()
                        .checked_sub_days(Days::new(1))?
                        .and_time(time)
                        .and_utc(),
                )
            }
        }
        ScheduleSpec::Sun {
            event,
            offset_minutes,
        } => {
            for day in 0..SUN_SEARCH_DAYS {
                let date = before.date_naive().checked_sub_days(Days::new(day))?;
                let Some(times) = sun_times(date, location) else {
                    continue;
                };
                let base = match event {
                    SunEvent::Sunrise => times.sunrise,
                    SunEvent::Sunset => times.sunset,
                };
                let target = base + chrono::Duration::minutes(i64::from(*offset_minutes));
                if target <= before {
                    return Some(target);
                }
            }
            None
        }
        ScheduleSpec::Interval { seconds } => {
            let last = last_fired?;
            let due = last + chrono::Duration::seconds(i64::try_from(*seconds).ok()?);
            (due <= before).then_some(due)
        }
        ScheduleSpec::Cron { expression } => {
            let schedule = cron::Schedule::from_str(expression).ok()?;
            let window_start = before - chrono::Duration::days(7);
            schedule
                .after(&window_start)
                .take_while(|due| *due <= before)
                .last()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nido_domain::event::{Event, EventType};
    use nido_domain::rule::TriggerSpec;
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    const MADRID: Location = Location {
        latitude: 40.4168,
        longitude: -3.7038,
    };

    fn at(text: &str) -> Timestamp {
        text.parse().unwrap()
    }

    // ── In-memory rule repo ────────────────────────────────────────

    struct InMemoryRuleRepo {
        store: Mutex<HashMap<RuleId, Rule>>,
    }

    impl InMemoryRuleRepo {
        fn with(rules: Vec<Rule>) -> Self {
            let map: HashMap<_, _> = rules.into_iter().map(|r| (r.id, r)).collect();
            Self {
                store: Mutex::new(map),
            }
        }
    }

    impl RuleRepository for InMemoryRuleRepo {
        fn create(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send {
            self.store.lock().unwrap().insert(rule.id, rule.clone());
            async { Ok(rule) }
        }
        fn get_by_id(
            &self,
            id: RuleId,
        ) -> impl Future<Output = Result<Option<Rule>, NidoError>> + Send {
            let result = self.store.lock().unwrap().get(&id).cloned();
            async { Ok(result) }
        }
        fn get_all(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send {
            let result: Vec<_> = self.store.lock().unwrap().values().cloned().collect();
            async { Ok(result) }
        }
        fn list_enabled(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send {
            let result: Vec<_> = self
                .store
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.enabled)
                .cloned()
                .collect();
            async { Ok(result) }
        }
        fn update(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send {
            self.store.lock().unwrap().insert(rule.id, rule.clone());
            async { Ok(rule) }
        }
        fn delete(&self, id: RuleId) -> impl Future<Output = Result<(), NidoError>> + Send {
            self.store.lock().unwrap().remove(&id);
            async { Ok(()) }
        }
        fn record_fired(
            &self,
            id: RuleId,
            at: Timestamp,
        ) -> impl Future<Output = Result<(), NidoError>> + Send {
            if let Some(rule) = self.store.lock().unwrap().get_mut(&id) {
                rule.last_fired = Some(at);
            }
            async { Ok(()) }
        }
    }

    // ── Spy publisher ──────────────────────────────────────────────

    #[derive(Default)]
    struct SpyPublisher {
        events: Mutex<Vec<Event>>,
    }

    impl EventPublisher for SpyPublisher {
        fn publish(
            &self,
            payload: EventPayload,
            source: EventSource,
        ) -> impl Future<Output = Result<Event, NidoError>> + Send {
            let event = Event::new(payload, source, now());
            self.events.lock().unwrap().push(event.clone());
            async { Ok(event) }
        }
    }

    fn scheduled_rule(spec: ScheduleSpec) -> Rule {
        Rule::builder()
            .name("scheduled")
            .trigger(TriggerSpec::on(vec![EventType::TimerFired]))
            .schedule(spec)
            .build()
            .unwrap()
    }

    // ── Due-time computation ───────────────────────────────────────

    #[test]
    fn should_schedule_time_of_day_later_today() {
        let spec = ScheduleSpec::TimeOfDay {
            time: "18:00".to_string(),
        };
        let due = next_due(&spec, at("2026-03-01T10:00:00Z"), MADRID).unwrap();
        assert_eq!(due, at("2026-03-01T18:00:00Z"));
    }

    #[test]
    fn should_schedule_time_of_day_tomorrow_when_passed() {
        let spec = ScheduleSpec::TimeOfDay {
            time: "18:00".to_string(),
        };
        let due = next_due(&spec, at("2026-03-01T19:00:00Z"), MADRID).unwrap();
        assert_eq!(due, at("2026-03-02T18:00:00Z"));
    }

    #[test]
    fn should_schedule_interval_relative_to_now() {
        let spec = ScheduleSpec::Interval { seconds: 300 };
        let due = next_due(&spec, at("2026-03-01T10:00:00Z"), MADRID).unwrap();
        assert_eq!(due, at("2026-03-01T10:05:00Z"));
    }

    #[test]
    fn should_schedule_cron_next_occurrence() {
        let spec = ScheduleSpec::Cron {
            expression: "0 30 7 * * * *".to_string(),
        };
        let due = next_due(&spec, at("2026-03-01T10:00:00Z"), MADRID).unwrap();
        assert_eq!(due, at("2026-03-02T07:30:00Z"));
    }

    #[test]
    fn should_schedule_sunset_in_the_evening() {
        let spec = ScheduleSpec::Sun {
            event: SunEvent::Sunset,
            offset_minutes: 0,
        };
        let due = next_due(&spec, at("2026-03-01T10:00:00Z"), MADRID).unwrap();
        // Sunset in Madrid in March falls in the evening UTC.
        assert_eq!(due.date_naive(), at("2026-03-01T10:00:00Z").date_naive());
        assert!(due > at("2026-03-01T16:00:00Z"));
        assert!(due < at("2026-03-01T20:00:00Z"));
    }

    #[test]
    fn should_apply_negative_sun_offset() {
        let base = ScheduleSpec::Sun {
            event: SunEvent::Sunset,
            offset_minutes: 0,
        };
        let shifted = ScheduleSpec::Sun {
            event: SunEvent::Sunset,
            offset_minutes: -30,
        };
        let after = at("2026-03-01T10:00:00Z");
        let plain = next_due(&base, after, MADRID).unwrap();
        let early = next_due(&shifted, after, MADRID).unwrap();
        assert_eq!(plain - early, chrono::Duration::minutes(30));
    }

    #[test]
    fn should_find_previous_time_of_day_yesterday() {
        let spec = ScheduleSpec::TimeOfDay {
            time: "18:00".to_string(),
        };
        let prev = previous_due(&spec, at("2026-03-02T10:00:00Z"), None, MADRID).unwrap();
        assert_eq!(prev, at("2026-03-01T18:00:00Z"));
    }

    #[test]
    fn should_anchor_previous_interval_on_last_fired() {
        let spec = ScheduleSpec::Interval { seconds: 600 };
        let last = at("2026-03-01T10:00:00Z");
        let prev = previous_due(&spec, at("2026-03-01T11:00:00Z"), Some(last), MADRID).unwrap();
        assert_eq!(prev, at("2026-03-01T10:10:00Z"));
        assert!(previous_due(&spec, at("2026-03-01T11:00:00Z"), None, MADRID).is_none());
    }

    #[test]
    fn should_find_previous_cron_occurrence() {
        let spec = ScheduleSpec::Cron {
            expression: "0 30 7 * * * *".to_string(),
        };
        let prev = previous_due(&spec, at("2026-03-01T10:00:00Z"), None, MADRID).unwrap();
        assert_eq!(prev, at("2026-03-01T07:30:00Z"));
    }

    // ── Scheduler lifecycle ────────────────────────────────────────

    #[tokio::test]
    async fn should_register_timers_for_enabled_scheduled_rules() {
        let rule = scheduled_rule(ScheduleSpec::Interval { seconds: 3600 });
        let plain = Rule::builder()
            .name("unscheduled")
            .trigger(TriggerSpec::on(vec![EventType::TelemetryChanged]))
            .build()
            .unwrap();
        let scheduler = Scheduler::new(
            InMemoryRuleRepo::with(vec![rule, plain]),
            Arc::new(SpyPublisher::default()),
            MADRID,
        );
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.active_count(), 1);
        scheduler.shutdown();
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn should_not_register_disabled_rules() {
        let mut rule = scheduled_rule(ScheduleSpec::Interval { seconds: 3600 });
        rule.enabled = false;
        let scheduler = Scheduler::new(
            InMemoryRuleRepo::with(vec![rule]),
            Arc::new(SpyPublisher::default()),
            MADRID,
        );
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn should_fire_missed_trigger_exactly_once_at_startup() {
        // Fired yesterday at 18:00, and today's 18:00 passed while the
        // process was down: exactly one catch-up event.
        let mut rule = scheduled_rule(ScheduleSpec::TimeOfDay {
            time: "00:01".to_string(),
        });
        rule.last_fired = Some(now() - chrono::Duration::days(3));
        let rule_id = rule.id;

        let publisher = Arc::new(SpyPublisher::default());
        let scheduler = Scheduler::new(
            InMemoryRuleRepo::with(vec![rule]),
            publisher.clone(),
            MADRID,
        );
        scheduler.start().await.unwrap();
        scheduler.shutdown();

        let events = publisher.events.lock().unwrap();
        let fired: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::TimerFired { rule } if rule == rule_id))
            .collect();
        assert_eq!(fired.len(), 1);
    }

    #[tokio::test]
    async fn should_not_fire_catch_up_for_rules_that_never_fired() {
        let rule = scheduled_rule(ScheduleSpec::TimeOfDay {
            time: "00:01".to_string(),
        });
        let publisher = Arc::new(SpyPublisher::default());
        let scheduler = Scheduler::new(
            InMemoryRuleRepo::with(vec![rule]),
            publisher.clone(),
            MADRID,
        );
        scheduler.start().await.unwrap();
        scheduler.shutdown();
        assert!(publisher.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_deregister_timer_when_rule_disabled() {
        let rule = scheduled_rule(ScheduleSpec::Interval { seconds: 3600 });
        let rule_id = rule.id;
        let repo = Arc::new(InMemoryRuleRepo::with(vec![rule.clone()]));
        let scheduler = Scheduler::new(repo.clone(), Arc::new(SpyPublisher::default()), MADRID);
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.active_count(), 1);

        let mut disabled = rule;
        disabled.enabled = false;
        repo.update(disabled).await.unwrap();
        scheduler.on_rule_changed(rule_id).await.unwrap();
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_fire_interval_trigger_when_due() {
        let rule = scheduled_rule(ScheduleSpec::Interval { seconds: 60 });
        let rule_id = rule.id;
        let publisher = Arc::new(SpyPublisher::default());
        let scheduler = Scheduler::new(
            InMemoryRuleRepo::with(vec![rule]),
            publisher.clone(),
            MADRID,
        );
        scheduler.start().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(62)).await;

        let events = publisher.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::TimerFired { rule } if rule == rule_id)));
        drop(events);
        scheduler.shutdown();
    }
}
