//! Wall-clock and virtual clocks with named, cancellable timers.
//!
//! Both variants share one surface: a source of "current time" plus one-shot
//! time alerts and repeating interval timers. [`LiveClock`] reads real time;
//! [`TestClock`] only moves when [`TestClock::advance_time`] is called,
//! returning every timer firing that fell inside the advanced interval so a
//! driver can replay them deterministically.

use crate::error::{require, EngineError, EngineResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A single registered timer: either a one-shot alert at a fixed instant or
/// a repeating interval starting at `next`. `handler` names the callback the
/// dispatcher invokes when the timer fires.
#[derive(Debug, Clone)]
struct Timer {
    next: DateTime<Utc>,
    interval: Option<chrono::Duration>,
    stop_after: Option<DateTime<Utc>>,
    handler: String,
}

/// One due timer firing, returned by [`TestClock::advance_time`] in
/// non-decreasing `fire_time` order, ties broken by registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub name: String,
    pub fire_time: DateTime<Utc>,
    pub handler: String,
}

/// Source of "current time" plus named timer registration, implemented by a
/// real wall clock for live trading and a virtual clock for backtests.
///
/// Timer names are unique per clock. Each registration may carry its own
/// handler name; if none is given the clock's registered default handler is
/// used, and the absence of both fails with `NoHandler`.
pub trait Clock {
    fn time_now(&self) -> DateTime<Utc>;
    fn register_default_handler(&mut self, handler: &str);
    fn set_time_alert(&mut self, name: &str, at: DateTime<Utc>, handler: Option<&str>) -> EngineResult<()>;
    fn set_timer(
        &mut self,
        name: &str,
        interval: chrono::Duration,
        stop_after: Option<DateTime<Utc>>,
        handler: Option<&str>,
    ) -> EngineResult<()>;
    fn cancel_timer(&mut self, name: &str) -> EngineResult<()>;
    fn cancel_all_timers(&mut self);
}

#[derive(Debug, Default)]
struct TimerRegistry {
    timers: HashMap<String, Timer>,
    order: Vec<String>,
    default_handler: Option<String>,
}

impl TimerRegistry {
    fn register(
        &mut self,
        name: &str,
        next: DateTime<Utc>,
        interval: Option<chrono::Duration>,
        stop_after: Option<DateTime<Utc>>,
        handler: Option<&str>,
    ) -> EngineResult<()> {
        if self.timers.contains_key(name) {
            return Err(EngineError::DuplicateKey(format!("timer {name}")));
        }
        let handler = handler
            .map(str::to_string)
            .or_else(|| self.default_handler.clone())
            .ok_or_else(|| EngineError::NoHandler(name.to_string()))?;
        self.timers.insert(name.to_string(), Timer { next, interval, stop_after, handler });
        self.order.push(name.to_string());
        Ok(())
    }

    fn cancel(&mut self, name: &str) -> EngineResult<()> {
        if self.timers.remove(name).is_none() {
            return Err(EngineError::NotFound(format!("timer {name}")));
        }
        self.order.retain(|n| n != name);
        Ok(())
    }

    fn clear(&mut self) {
        self.timers.clear();
        self.order.clear();
    }

    /// Pop every timer due at or before `now`, in `(fire_time, registration
    /// order)` order, rescheduling repeating timers that have not yet passed
    /// their `stop_after` bound and dropping the rest.
    fn drain_due(&mut self, now: DateTime<Utc>) -> Vec<TimerFired> {
        let mut due: Vec<(usize, String, DateTime<Utc>)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(idx, name)| {
                self.timers
                    .get(name)
                    .filter(|t| t.next <= now)
                    .map(|t| (idx, name.clone(), t.next))
            })
            .collect();
        due.sort_by(|a, b| a.2.cmp(&b.2).then(a.0.cmp(&b.0)));

        let mut fired = Vec::with_capacity(due.len());
        for (_, name, fire_time) in due {
            let Some(timer) = self.timers.get_mut(&name) else {
                continue;
            };
            fired.push(TimerFired { name: name.clone(), fire_time, handler: timer.handler.clone() });

            match (timer.interval, timer.stop_after) {
                (Some(interval), Some(stop)) if timer.next + interval > stop => {
                    self.timers.remove(&name);
                    self.order.retain(|n| n != &name);
                }
                (Some(interval), _) => {
                    timer.next += interval;
                }
                (None, _) => {
                    self.timers.remove(&name);
                    self.order.retain(|n| n != &name);
                }
            }
        }
        fired
    }
}

/// Wall-clock time for live trading. Timers are tracked the same way as
/// [`TestClock`], but nothing advances them automatically; a caller (e.g. a
/// live session loop) polls [`LiveClock::due`] against `Utc::now()`.
#[derive(Debug, Default)]
pub struct LiveClock {
    registry: TimerRegistry,
}

impl LiveClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop all timers due at or before the current wall-clock time.
    pub fn due(&mut self) -> Vec<TimerFired> {
        self.registry.drain_due(Utc::now())
    }
}

impl Clock for LiveClock {
    fn time_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn register_default_handler(&mut self, handler: &str) {
        self.registry.default_handler = Some(handler.to_string());
    }

    fn set_time_alert(&mut self, name: &str, at: DateTime<Utc>, handler: Option<&str>) -> EngineResult<()> {
        self.registry.register(name, at, None, None, handler)
    }

    fn set_timer(
        &mut self,
        name: &str,
        interval: chrono::Duration,
        stop_after: Option<DateTime<Utc>>,
        handler: Option<&str>,
    ) -> EngineResult<()> {
        require(interval.num_milliseconds() > 0, "timer interval must be > 0")?;
        let next = Utc::now() + interval;
        self.registry.register(name, next, Some(interval), stop_after, handler)
    }

    fn cancel_timer(&mut self, name: &str) -> EngineResult<()> {
        self.registry.cancel(name)
    }

    fn cancel_all_timers(&mut self) {
        self.registry.clear();
    }
}

/// Virtual clock for deterministic backtests: time only moves when
/// [`TestClock::advance_time`] is called, which returns every timer that
/// became due in the interval, ordered by fire time then registration order
/// so replay is bit-for-bit reproducible.
#[derive(Debug)]
pub struct TestClock {
    now: DateTime<Utc>,
    registry: TimerRegistry,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: start,
            registry: TimerRegistry::default(),
        }
    }

    /// The earliest `next` among all registered timers, without firing
    /// anything. Lets a caller step the clock to exactly that instant so
    /// `time_now()` reflects each firing's own timestamp while its handler
    /// runs.
    pub fn peek_next_due(&self) -> Option<DateTime<Utc>> {
        self.registry.timers.values().map(|t| t.next).min()
    }

    /// Move the clock forward to `to`, returning every timer due at or
    /// before `to` in fire-time order. `to` earlier than the current time
    /// returns nothing; `to` equal to the current time returns any
    /// exactly-due firings.
    pub fn advance_time(&mut self, to: DateTime<Utc>) -> Vec<TimerFired> {
        if to < self.now {
            return Vec::new();
        }
        self.now = to;
        self.registry.drain_due(to)
    }
}

impl Clock for TestClock {
    fn time_now(&self) -> DateTime<Utc> {
        self.now
    }

    fn register_default_handler(&mut self, handler: &str) {
        self.registry.default_handler = Some(handler.to_string());
    }

    fn set_time_alert(&mut self, name: &str, at: DateTime<Utc>, handler: Option<&str>) -> EngineResult<()> {
        require(at >= self.now, "time alert must be at or after the current time")?;
        self.registry.register(name, at, None, None, handler)
    }

    fn set_timer(
        &mut self,
        name: &str,
        interval: chrono::Duration,
        stop_after: Option<DateTime<Utc>>,
        handler: Option<&str>,
    ) -> EngineResult<()> {
        require(interval.num_milliseconds() > 0, "timer interval must be > 0")?;
        if let Some(stop) = stop_after {
            require(stop >= self.now + interval, "stop_after must be at least one interval past start")?;
        }
        let next = self.now + interval;
        self.registry.register(name, next, Some(interval), stop_after, handler)
    }

    fn cancel_timer(&mut self, name: &str) -> EngineResult<()> {
        self.registry.cancel(name)
    }

    fn cancel_all_timers(&mut self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn clock_at_zero() -> TestClock {
        let mut clock = TestClock::new(t(0));
        clock.register_default_handler("on_timer");
        clock
    }

    #[test]
    fn one_shot_alert_fires_once_on_advance() {
        let mut clock = clock_at_zero();
        clock.set_time_alert("wake", t(10), None).unwrap();

        assert!(clock.advance_time(t(5)).is_empty());
        let fired = clock.advance_time(t(10));
        assert_eq!(
            fired,
            vec![TimerFired { name: "wake".into(), fire_time: t(10), handler: "on_timer".into() }]
        );

        assert!(clock.advance_time(t(20)).is_empty());
    }

    #[test]
    fn advance_to_current_time_returns_exactly_due_events() {
        let mut clock = clock_at_zero();
        clock.set_time_alert("due-now", t(0), None).unwrap();
        let fired = clock.advance_time(t(0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].name, "due-now");
    }

    #[test]
    fn advance_backwards_returns_empty() {
        let mut clock = TestClock::new(t(10));
        clock.register_default_handler("on_timer");
        clock.set_time_alert("wake", t(20), None).unwrap();
        assert!(clock.advance_time(t(5)).is_empty());
        assert_eq!(clock.time_now(), t(10));
    }

    #[test]
    fn repeating_timer_fires_each_interval_until_stop() {
        let mut clock = clock_at_zero();
        clock.set_timer("tick", chrono::Duration::seconds(10), Some(t(25)), None).unwrap();

        let fired = clock.advance_time(t(30));
        let times: Vec<_> = fired.iter().map(|f| f.fire_time).collect();
        assert_eq!(times, vec![t(10), t(20)]);
    }

    #[test]
    fn simultaneous_timers_fire_in_registration_order() {
        let mut clock = clock_at_zero();
        clock.set_time_alert("second", t(10), None).unwrap();
        clock.set_time_alert("first", t(10), None).unwrap();
        // "second" was registered before "first", so it fires first despite
        // the name.
        let fired = clock.advance_time(t(10));
        assert_eq!(fired[0].name, "second");
        assert_eq!(fired[1].name, "first");
    }

    #[test]
    fn duplicate_timer_name_is_rejected() {
        let mut clock = clock_at_zero();
        clock.set_time_alert("wake", t(10), None).unwrap();
        assert!(matches!(
            clock.set_time_alert("wake", t(20), None),
            Err(EngineError::DuplicateKey(_))
        ));
    }

    #[test]
    fn missing_handler_and_default_fails_with_no_handler() {
        let mut clock = TestClock::new(t(0));
        assert!(matches!(
            clock.set_time_alert("wake", t(10), None),
            Err(EngineError::NoHandler(_))
        ));

        // An explicit handler works without a default; the explicit name also
        // wins over a default once one is registered.
        clock.set_time_alert("wake", t(10), Some("on_wake")).unwrap();
        clock.register_default_handler("on_timer");
        clock.set_time_alert("other", t(10), Some("on_other")).unwrap();
        let fired = clock.advance_time(t(10));
        assert_eq!(fired[0].handler, "on_wake");
        assert_eq!(fired[1].handler, "on_other");
    }

    #[test]
    fn cancel_removes_timer_before_it_fires() {
        let mut clock = clock_at_zero();
        clock.set_time_alert("wake", t(10), None).unwrap();
        clock.cancel_timer("wake").unwrap();
        assert!(clock.advance_time(t(10)).is_empty());
    }

    #[test]
    fn peek_next_due_reports_earliest_without_firing() {
        let mut clock = clock_at_zero();
        assert_eq!(clock.peek_next_due(), None);
        clock.set_time_alert("later", t(20), None).unwrap();
        clock.set_time_alert("sooner", t(10), None).unwrap();
        assert_eq!(clock.peek_next_due(), Some(t(10)));
        assert!(clock.advance_time(t(10)).len() == 1);
        assert_eq!(clock.peek_next_due(), Some(t(20)));
    }

    #[test]
    fn cancel_unknown_timer_is_not_found() {
        let mut clock = clock_at_zero();
        assert!(matches!(clock.cancel_timer("ghost"), Err(EngineError::NotFound(_))));
    }
}
