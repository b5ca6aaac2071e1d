//! Deadline-driven task scheduling.
//!
//! Services declare named tasks; work is queued against a task with either a
//! one-shot delay ([`Scheduler::schedule_after`]) or a repeat interval
//! ([`Scheduler::schedule_every`]). A coordinator loop wakes every 100 ms,
//! measures the real elapsed time since its previous wake, and decrements
//! every pending deadline by that delta.
//!
//! Repeating work re-arms by *adding* its interval to the (possibly negative)
//! expired deadline rather than resetting to "now + interval". Long-run
//! periodicity is preserved under tick jitter and slow executors: fires may
//! land late, but ticks are never skipped. A sufficiently slow executor can
//! therefore accumulate a backlog of overdue fires for one key — that is the
//! intended semantics, not a defect to paper over.
//!
//! All scheduler state is guarded by one coarse lock, so services loading or
//! unloading never observe a queue mid-tick.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::Engine;
use crate::error::ScheduleError;
use crate::service::TaskFn;

/// Coordinator wake period.
const TICK: Duration = Duration::from_millis(100);

pub(crate) type TaskKey = (String, String);

/// One pending scheduled invocation.
struct Work {
    /// Milliseconds until due; decremented each tick, may go negative.
    remaining_ms: i64,
    /// Repeat interval in milliseconds, or `None` for one-shot work.
    every_ms: Option<i64>,
    /// Arguments stored for the fire.
    args: Value,
}

/// A fire collected by one tick pass, ready to be spawned.
pub(crate) struct ScheduledFire {
    pub(crate) service: String,
    pub(crate) task: String,
    pub(crate) callback: TaskFn,
    pub(crate) args: Value,
}

#[derive(Default)]
struct State {
    /// Registered (service, task) callbacks.
    tasks: HashMap<TaskKey, TaskFn>,
    /// Pending work per (service, task) key.
    queues: HashMap<TaskKey, Vec<Work>>,
}

/// The deadline-driven scheduler.
///
/// All work is in-memory and lost on process restart; services needing
/// durability persist their own due-times and re-submit them during setup.
#[derive(Default)]
pub struct Scheduler {
    state: Mutex<State>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task callback under `(service, task)`.
    pub(crate) fn register_task(&self, service: &str, task: &str, callback: TaskFn) {
        self.state
            .lock()
            .tasks
            .insert((service.to_string(), task.to_string()), callback);
    }

    /// Queues one-shot work due after `delay`.
    pub fn schedule_after(
        &self,
        service: &str,
        task: &str,
        delay: Duration,
        args: Value,
    ) -> Result<(), ScheduleError> {
        self.push(service, task, delay, None, args)
    }

    /// Queues repeating work firing every `every`, first after `every`.
    pub fn schedule_every(
        &self,
        service: &str,
        task: &str,
        every: Duration,
        args: Value,
    ) -> Result<(), ScheduleError> {
        if every.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        self.push(service, task, every, Some(every), args)
    }

    fn push(
        &self,
        service: &str,
        task: &str,
        delay: Duration,
        every: Option<Duration>,
        args: Value,
    ) -> Result<(), ScheduleError> {
        let key = (service.to_string(), task.to_string());
        let mut state = self.state.lock();
        if !state.tasks.contains_key(&key) {
            return Err(ScheduleError::UnknownTask {
                service: service.to_string(),
                task: task.to_string(),
            });
        }
        trace!(
            service = %service,
            task = %task,
            delay_ms = delay.as_millis() as u64,
            repeating = every.is_some(),
            "Work scheduled"
        );
        state.queues.entry(key).or_default().push(Work {
            remaining_ms: delay.as_millis() as i64,
            every_ms: every.map(|d| d.as_millis() as i64),
            args,
        });
        Ok(())
    }

    /// Drops all pending work and the registration for one task.
    pub fn unschedule_task(&self, service: &str, task: &str) {
        let key = (service.to_string(), task.to_string());
        let mut state = self.state.lock();
        state.tasks.remove(&key);
        state.queues.remove(&key);
    }

    /// Drops all pending work for one task but keeps it registered, so the
    /// service can schedule it again later.
    pub fn cancel_pending(&self, service: &str, task: &str) {
        self.state
            .lock()
            .queues
            .remove(&(service.to_string(), task.to_string()));
    }

    /// Drops all pending work and registrations owned by `service`.
    pub fn unschedule_service(&self, service: &str) {
        let mut state = self.state.lock();
        state.tasks.retain(|(owner, _), _| owner != service);
        state.queues.retain(|(owner, _), _| owner != service);
    }

    /// Number of pending work items for `(service, task)`.
    pub fn pending(&self, service: &str, task: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(&(service.to_string(), task.to_string()))
            .map_or(0, Vec::len)
    }

    /// Advances all deadlines by `elapsed` and collects the due fires.
    ///
    /// Repeating work that is still overdue after re-arming fires once per
    /// owed interval before being retained. Queues whose task is no longer
    /// registered are discarded after the pass.
    pub(crate) fn advance(&self, elapsed: Duration) -> Vec<ScheduledFire> {
        let delta = elapsed.as_millis() as i64;
        let mut fires = Vec::new();

        let mut state = self.state.lock();
        let State { tasks, queues } = &mut *state;

        for (key, queue) in queues.iter_mut() {
            let Some(callback) = tasks.get(key) else {
                continue;
            };
            let mut retained = Vec::with_capacity(queue.len());
            for mut work in queue.drain(..) {
                work.remaining_ms -= delta;
                if work.remaining_ms > 0 {
                    retained.push(work);
                    continue;
                }
                match work.every_ms {
                    None => fires.push(ScheduledFire {
                        service: key.0.clone(),
                        task: key.1.clone(),
                        callback: callback.clone(),
                        args: work.args,
                    }),
                    Some(every) => {
                        while work.remaining_ms <= 0 {
                            fires.push(ScheduledFire {
                                service: key.0.clone(),
                                task: key.1.clone(),
                                callback: callback.clone(),
                                args: work.args.clone(),
                            });
                            work.remaining_ms += every;
                        }
                        retained.push(work);
                    }
                }
            }
            *queue = retained;
        }

        // Stale queues (task unregistered since the last pass) never fire
        // into a torn-down service.
        queues.retain(|key, _| tasks.contains_key(key));

        if !fires.is_empty() {
            debug!(count = fires.len(), "Scheduled work due");
        }
        fires
    }

    /// The coordinator loop. Runs until `token` is cancelled.
    pub(crate) async fn run(&self, engine: Engine, token: CancellationToken) {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            let now = Instant::now();
            let elapsed = now - last;
            last = now;
            for fire in self.advance(elapsed) {
                engine.spawn_scheduled(fire);
            }
        }
        debug!("Scheduler loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn noop_task() -> TaskFn {
        Arc::new(|_ctx, _args| Box::pin(async { Ok(()) }))
    }

    fn scheduler_with(service: &str, task: &str) -> Scheduler {
        let sched = Scheduler::new();
        sched.register_task(service, task, noop_task());
        sched
    }

    #[test]
    fn one_shot_fires_once_when_due() {
        let sched = scheduler_with("svc", "t");
        sched
            .schedule_after("svc", "t", Duration::from_secs(5), json!(null))
            .unwrap();

        assert!(sched.advance(Duration::from_secs(4)).is_empty());
        let fires = sched.advance(Duration::from_secs(4));
        assert_eq!(fires.len(), 1);
        assert_eq!(sched.pending("svc", "t"), 0);
        assert!(sched.advance(Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn repeat_rearms_from_scheduled_due_time_not_fire_time() {
        let sched = scheduler_with("svc", "t");
        sched
            .schedule_every("svc", "t", Duration::from_secs(5), json!(null))
            .unwrap();

        // Ticked in 4 s increments: due at t=5, first fire lands at t=8.
        assert!(sched.advance(Duration::from_secs(4)).is_empty());
        assert_eq!(sched.advance(Duration::from_secs(4)).len(), 1);
        // Next due time is t=10 (5 s after the *scheduled* due time of 5 s),
        // so the t=12 tick fires again...
        assert_eq!(sched.advance(Duration::from_secs(4)).len(), 1);
        // ...and the t=16 tick fires the t=15 occurrence.
        assert_eq!(sched.advance(Duration::from_secs(4)).len(), 1);
    }

    #[test]
    fn overdue_repeat_fires_once_per_owed_interval() {
        let sched = scheduler_with("svc", "t");
        sched
            .schedule_every("svc", "t", Duration::from_secs(5), json!(null))
            .unwrap();

        // 17 s elapsed at once: occurrences at 5, 10, and 15 are all owed.
        assert_eq!(sched.advance(Duration::from_secs(17)).len(), 3);
        // Next occurrence is t=20, due after 3 more seconds.
        assert!(sched.advance(Duration::from_secs(2)).is_empty());
        assert_eq!(sched.advance(Duration::from_secs(1)).len(), 1);
    }

    #[test]
    fn unschedule_task_removes_pending_work_mid_wait() {
        let sched = scheduler_with("svc", "t");
        sched
            .schedule_after("svc", "t", Duration::from_secs(5), json!(null))
            .unwrap();
        sched.advance(Duration::from_secs(4));

        sched.unschedule_task("svc", "t");
        assert_eq!(sched.pending("svc", "t"), 0);
        assert!(sched.advance(Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn unschedule_service_drops_all_of_its_queues() {
        let sched = Scheduler::new();
        sched.register_task("a", "one", noop_task());
        sched.register_task("a", "two", noop_task());
        sched.register_task("b", "one", noop_task());
        sched
            .schedule_after("a", "one", Duration::from_secs(1), json!(null))
            .unwrap();
        sched
            .schedule_after("a", "two", Duration::from_secs(1), json!(null))
            .unwrap();
        sched
            .schedule_after("b", "one", Duration::from_secs(1), json!(null))
            .unwrap();

        sched.unschedule_service("a");
        let fires = sched.advance(Duration::from_secs(2));
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].service, "b");
    }

    #[test]
    fn scheduling_unknown_task_is_an_error() {
        let sched = Scheduler::new();
        let err = sched
            .schedule_after("svc", "nope", Duration::from_secs(1), json!(null))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownTask { .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let sched = scheduler_with("svc", "t");
        let err = sched
            .schedule_every("svc", "t", Duration::ZERO, json!(null))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::ZeroInterval));
    }

    #[test]
    fn stored_args_travel_with_the_fire() {
        let sched = scheduler_with("svc", "t");
        sched
            .schedule_after("svc", "t", Duration::from_secs(1), json!({ "n": 7 }))
            .unwrap();
        let fires = sched.advance(Duration::from_secs(1));
        assert_eq!(fires[0].args, json!({ "n": 7 }));
    }
}
