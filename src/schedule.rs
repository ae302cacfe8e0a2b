//! Scheduled activation: a single-shot timer plus a once-a-second countdown.
//!
//! The plan is recomputed from the configured instant on every wake-up; a
//! running timer is never trusted to still be right.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::AutomationConfig;
use crate::state::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPlan {
    NotConfigured,
    AlreadyActive,
    /// Paused by a halt or a confirmed success; only a human may restart.
    Blocked,
    Elapsed,
    Pending {
        at: DateTime<Local>,
        remaining: Duration,
    },
}

impl ActivationPlan {
    pub fn evaluate(config: &AutomationConfig, now: DateTime<Local>, run: &RunState) -> Self {
        let Some(at) = config.activation_at else {
            return ActivationPlan::NotConfigured;
        };
        if run.active {
            return ActivationPlan::AlreadyActive;
        }
        if !run.can_auto_activate() {
            return ActivationPlan::Blocked;
        }
        match (at - now).to_std() {
            Ok(remaining) if !remaining.is_zero() => ActivationPlan::Pending { at, remaining },
            _ => ActivationPlan::Elapsed,
        }
    }
}

/// Owns the activation timer and the countdown ticker. Both are tokio tasks
/// and are aborted together.
#[derive(Default)]
pub struct Scheduler {
    target: Option<DateTime<Local>>,
    /// An instant the operator called off by stopping; not re-armed until
    /// the configuration is saved again or the run is started.
    dismissed: Option<DateTime<Local>>,
    activation: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Replaces whatever was armed before. `on_tick` gets the time left once
    /// a second and a final zero.
    pub fn arm<F, T>(&mut self, at: DateTime<Local>, remaining: Duration, on_fire: F, on_tick: T)
    where
        F: FnOnce() + Send + 'static,
        T: Fn(Duration) + Send + 'static,
    {
        self.cancel();
        let deadline = Instant::now() + remaining;

        self.activation = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_fire();
        }));

        self.countdown = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let left = deadline.saturating_duration_since(Instant::now());
                on_tick(left);
                if left.is_zero() {
                    break;
                }
            }
        }));
        self.target = Some(at);
    }

    /// Returns whether anything was still pending.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.is_armed();
        for handle in [self.activation.take(), self.countdown.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        self.target = None;
        was_armed
    }

    /// Cancels whatever is armed and keeps `at` from being armed again by
    /// later plan evaluations.
    pub fn dismiss(&mut self, at: Option<DateTime<Local>>) -> bool {
        self.dismissed = at;
        self.cancel()
    }

    /// Forgets a dismissal, so the configured instant may be armed again.
    pub fn restore(&mut self) {
        self.dismissed = None;
    }

    /// Whether a pending plan for `at` still needs a timer.
    pub fn should_arm(&self, at: DateTime<Local>) -> bool {
        self.target() != Some(at) && self.dismissed != Some(at)
    }

    pub fn is_armed(&self) -> bool {
        self.activation
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn target(&self) -> Option<DateTime<Local>> {
        self.target.filter(|_| self.is_armed())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn paused() -> RunState {
        let mut run = RunState::fresh(5);
        run.pause();
        run
    }

    fn config_at(at: DateTime<Local>) -> AutomationConfig {
        AutomationConfig {
            activation_at: Some(at),
            ..Default::default()
        }
    }

    #[test]
    fn plan_is_pending_only_for_a_future_instant() {
        let now = Local::now();
        let soon = config_at(now + chrono::Duration::seconds(90));
        let plan = ActivationPlan::evaluate(&soon, now, &paused());
        assert!(matches!(
            plan,
            ActivationPlan::Pending { remaining, .. } if remaining == Duration::from_secs(90)
        ));

        let past = config_at(now - chrono::Duration::seconds(1));
        assert_eq!(
            ActivationPlan::evaluate(&past, now, &paused()),
            ActivationPlan::Elapsed
        );
    }

    #[test]
    fn plan_respects_run_state() {
        let now = Local::now();
        let later = config_at(now + chrono::Duration::minutes(5));

        assert_eq!(
            ActivationPlan::evaluate(&later, now, &RunState::fresh(5)),
            ActivationPlan::AlreadyActive
        );

        let mut halted = RunState::fresh(5);
        halted.halt();
        assert_eq!(
            ActivationPlan::evaluate(&later, now, &halted),
            ActivationPlan::Blocked
        );

        assert_eq!(
            ActivationPlan::evaluate(&AutomationConfig::default(), now, &paused()),
            ActivationPlan::NotConfigured
        );
    }

    #[tokio::test]
    async fn armed_timer_fires_once() {
        let mut scheduler = Scheduler::default();
        let (tx, rx) = oneshot::channel();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counted = ticks.clone();

        scheduler.arm(
            Local::now(),
            Duration::from_millis(30),
            move || {
                let _ = tx.send(());
            },
            move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(scheduler.is_armed());

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("timer should fire")
            .unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let mut scheduler = Scheduler::default();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        scheduler.arm(
            Local::now(),
            Duration::from_millis(100),
            move || flag.store(true, Ordering::SeqCst),
            |_| {},
        );
        assert!(scheduler.cancel());
        assert!(!scheduler.is_armed());
        assert_eq!(scheduler.target(), None);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dismissed_instant_stays_unarmed_until_restored() {
        let mut scheduler = Scheduler::default();
        let at = Local::now() + chrono::Duration::minutes(5);
        assert!(scheduler.should_arm(at));

        scheduler.arm(at, Duration::from_secs(300), || {}, |_| {});
        assert!(!scheduler.should_arm(at));

        assert!(scheduler.dismiss(Some(at)));
        assert!(!scheduler.is_armed());
        assert!(!scheduler.should_arm(at));
        let other = at + chrono::Duration::minutes(1);
        assert!(scheduler.should_arm(other));

        scheduler.restore();
        assert!(scheduler.should_arm(at));
    }
}
