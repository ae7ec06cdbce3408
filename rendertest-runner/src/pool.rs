// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fixed-size pool of worker threads.
//!
//! Tasks are closures that may borrow from the caller: the pool only lives for the duration of
//! [`WorkerPool::scope`], and every worker is joined before it returns. Tasks are handed to workers
//! through a bounded queue, so submitting blocks once the queue is full.

use crate::errors::PoolBuildError;
use crossbeam_channel::{Receiver, Sender};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Condvar, Mutex, PoisonError},
};
use tracing::{debug, error};

type Task<'env> = Box<dyn FnOnce() + Send + 'env>;

/// A pool of worker threads.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkerPool {
    threads: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Creates a pool with `threads` workers and a queue holding up to `queue_capacity` tasks.
    ///
    /// A capacity of 0 gives one slot per worker. At least one worker is always started.
    pub fn new(threads: usize, queue_capacity: usize) -> Self {
        let threads = threads.max(1);
        let queue_capacity = if queue_capacity == 0 {
            threads
        } else {
            queue_capacity
        };
        Self {
            threads,
            queue_capacity,
        }
    }

    /// Returns the number of workers.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Returns the capacity of the task queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Starts the workers and calls `f` with a handle to submit tasks.
    ///
    /// Once `f` returns, the pool waits for every submitted task, then stops the workers.
    pub fn scope<'env, F, R>(&self, f: F) -> Result<R, PoolBuildError>
    where
        F: FnOnce(&PoolScope<'env, '_>) -> R,
    {
        let (sender, receiver) = crossbeam_channel::bounded::<Task<'env>>(self.queue_capacity);
        let pending = Pending::default();

        std::thread::scope(|s| {
            for index in 0..self.threads {
                let receiver = receiver.clone();
                let pending = &pending;
                std::thread::Builder::new()
                    .name(format!("rendertest-worker-{index}"))
                    .spawn_scoped(s, move || worker_loop(receiver, pending))
                    .map_err(|error| PoolBuildError::new(index, error))?;
            }
            drop(receiver);
            debug!(
                "started {} workers, queue capacity {}",
                self.threads, self.queue_capacity
            );

            let scope = PoolScope {
                sender,
                pending: &pending,
            };
            let result = f(&scope);
            scope.wait_completion();
            // Dropping the sender disconnects the queue, which stops the workers.
            drop(scope);
            Ok(result)
        })
    }
}

/// A handle to submit tasks to a running [`WorkerPool`].
pub struct PoolScope<'env, 'p> {
    sender: Sender<Task<'env>>,
    pending: &'p Pending,
}

impl<'env> PoolScope<'env, '_> {
    /// Queues a task, blocking while the queue is full.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'env) {
        self.pending.start();
        if self.sender.send(Box::new(task)).is_err() {
            // Only possible once every worker is gone.
            error!("worker pool is shut down, dropping task");
            self.pending.finish();
        }
    }

    /// Blocks until every task submitted so far has finished.
    pub fn wait_completion(&self) {
        self.pending.wait_idle();
    }
}

#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn start(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .idle
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn worker_loop(receiver: Receiver<Task<'_>>, pending: &Pending) {
    while let Ok(task) = receiver.recv() {
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
            error!("task panicked: {}", panic_message(payload.as_ref()));
        }
        pending.finish();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "(non-string payload)"
    }
}
