// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Persistence scheduler
//!
//! Coalesces dirty-state notifications into single durable writes and keeps
//! writes from ever interleaving. A burst of N mutations inside the
//! coalescing window produces exactly one write; a timer firing while a
//! write is in flight queues exactly one replay. While project hydration is
//! in progress, dirty notifications and explicit flushes are dropped
//! entirely — loading must never race with saving.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::Result;

/// What the scheduler writes when it fires. Implementations snapshot the
/// current engine state and upsert it to durable storage.
#[async_trait]
pub trait FlushTarget: Send + Sync {
    async fn flush(&self) -> Result<()>;
}

#[derive(Default)]
struct SchedulerState {
    /// Bumped on every notify/flush/hydration; sleeper tasks carrying a
    /// stale epoch no-op when they wake
    epoch: u64,
    /// A coalesced write is armed
    pending: bool,
    /// A write is executing right now
    writing: bool,
    /// A timer fired mid-write; replay exactly once when it settles
    queued: bool,
}

struct SchedulerInner {
    target: Arc<dyn FlushTarget>,
    window: Duration,
    state: Mutex<SchedulerState>,
    hydrating: AtomicBool,
    write_done: Notify,
}

/// Coalescing, non-interleaving durable write scheduler
#[derive(Clone)]
pub struct PersistenceScheduler {
    inner: Arc<SchedulerInner>,
}

impl PersistenceScheduler {
    pub fn new(target: Arc<dyn FlushTarget>, window: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                target,
                window,
                state: Mutex::new(SchedulerState::default()),
                hydrating: AtomicBool::new(false),
                write_done: Notify::new(),
            }),
        }
    }

    /// (Re)start the coalescing timer. A no-op while hydration is running.
    pub fn notify_dirty(&self) {
        if self.inner.hydrating.load(Ordering::SeqCst) {
            return;
        }

        let epoch = {
            let mut state = self.inner.state.lock().unwrap();
            state.epoch += 1;
            state.pending = true;
            state.epoch
        };

        let scheduler = self.clone();
        let window = self.inner.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            scheduler.fire(epoch).await;
        });
    }

    /// Cancel any pending timer and write synchronously. Awaits an in-flight
    /// write first so writes never interleave. A no-op while hydration is
    /// running: the engine holds the incoming project id by then, and a
    /// write would store the outgoing project's state under it.
    pub async fn flush_now(&self) {
        if self.inner.hydrating.load(Ordering::SeqCst) {
            tracing::debug!("flush requested during hydration; dropped");
            return;
        }

        loop {
            let in_flight = {
                let mut state = self.inner.state.lock().unwrap();
                state.epoch += 1;
                state.pending = false;
                if state.writing {
                    true
                } else {
                    state.writing = true;
                    false
                }
            };

            if in_flight {
                // Bounded wait: the writer may settle between our check and
                // the notified() registration, so re-check on a short tick
                let _ = tokio::time::timeout(
                    Duration::from_millis(50),
                    self.inner.write_done.notified(),
                )
                .await;
                continue;
            }

            self.perform_write().await;
            return;
        }
    }

    /// Enter hydration: drop the pending timer and ignore dirty
    /// notifications until `end_hydration`.
    pub fn begin_hydration(&self) {
        self.inner.hydrating.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock().unwrap();
        state.epoch += 1;
        state.pending = false;
    }

    pub fn end_hydration(&self) {
        self.inner.hydrating.store(false, Ordering::SeqCst);
    }

    pub fn is_hydrating(&self) -> bool {
        self.inner.hydrating.load(Ordering::SeqCst)
    }

    async fn fire(&self, epoch: u64) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.epoch != epoch || !state.pending {
                // Superseded by a later notification or an explicit flush
                return;
            }
            state.pending = false;
            if state.writing {
                state.queued = true;
                return;
            }
            state.writing = true;
        }
        self.perform_write().await;
    }

    /// Run the write, replaying once if a timer fired while it executed.
    /// Failures are logged and swallowed; the next coalesced write retries.
    async fn perform_write(&self) {
        loop {
            if let Err(e) = self.inner.target.flush().await {
                tracing::warn!(error = %e, "durable write failed; retrying on next dirty notification");
            }

            let replay = {
                let mut state = self.inner.state.lock().unwrap();
                if state.queued {
                    state.queued = false;
                    true
                } else {
                    state.writing = false;
                    false
                }
            };

            if !replay {
                self.inner.write_done.notify_waiters();
                return;
            }
        }
    }
}
