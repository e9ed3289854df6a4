//! # Periodic Task Set
//!
//! Named background tasks that tick at a fixed interval and are stopped
//! together. Each session owns one [`TaskSet`] holding its reconciliation
//! polls, keepalive, and save timers; closing the session calls
//! [`stop_all`](TaskSet::stop_all) before anything else happens, so no
//! timer ever fires against a closed session.
//!
//! Ticks of one task never overlap: the next tick is scheduled only after
//! the previous one finished, and missed ticks are delayed rather than
//! bunched up.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A set of named periodic tasks.
#[derive(Default)]
pub struct TaskSet {
    tasks: HashMap<&'static str, JoinHandle<()>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `period`, starting one period from now.
    ///
    /// A task already registered under `name` is aborted and replaced.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        tracing::debug!(
            task = name,
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Periodic task started"
        );
        if let Some(previous) = self.tasks.insert(name, handle) {
            previous.abort();
        }
    }

    /// Abort every task. Returns how many were running.
    ///
    /// Takes effect immediately: an aborted task never runs another tick,
    /// though a tick already suspended at an await point is dropped there.
    pub fn stop_all(&mut self) -> usize {
        let count = self.tasks.len();
        for (name, handle) in self.tasks.drain() {
            handle.abort();
            tracing::trace!(task = name, "Periodic task stopped");
        }
        if count > 0 {
            tracing::debug!(count, "Stopped periodic tasks");
        }
        count
    }

    /// Abort a single task.
    pub fn stop(&mut self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `name` is registered and has not finished.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tasks.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("tasks", &self.names())
            .finish()
    }
}
