//! The task-queue primitive the executor's three queues are built from
//! (§9 design note "task-queue abstraction"): submit a task, group-
//! submit with a join signal (to wait out a layer), and a fixed worker
//! pool draining a FIFO queue. Modeled on `util::channels::message_channel`'s
//! `Mutex<VecDeque>` + `Condvar` shape and `util::drop_join_thread`'s
//! RAII worker-thread wrapper.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    cond: Condvar,
    stop: AtomicBool,
    accumulated_time_us: AtomicU64,
}

/// A FIFO task queue backed by a fixed pool of worker threads. With one
/// worker, submission order and start order coincide exactly (the
/// GPU-serial queue's requirement, §4.5 point 4); with more than one,
/// tasks may start and finish out of submission order (the CPU queue's
/// allowance).
pub struct TaskQueue {
    shared: Arc<Shared>,
    workers: Vec<util::drop_join_thread::DropJoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
            accumulated_time_us: AtomicU64::new(0),
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let shared = shared.clone();
                util::drop_join_thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues `task` to run on the next free worker. Never blocks.
    pub fn submit(&self, task: Task) {
        let mut queue = self.shared.queue.lock().expect(crate::THREAD_PANIC_MSG);
        queue.push_back(task);
        self.shared.cond.notify_one();
    }

    /// Submits every task in `tasks` and blocks until all of them have
    /// run (the "submit a layer, wait on the group" pattern, §4.5
    /// point 3). Tasks within the group may still run in any relative
    /// order subject to queue semantics.
    pub fn submit_group(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        let remaining = Arc::new((Mutex::new(tasks.len()), Condvar::new()));
        for task in tasks {
            let remaining = remaining.clone();
            self.submit(Box::new(move || {
                task();
                let (count, cvar) = &*remaining;
                let mut count = count.lock().expect(crate::THREAD_PANIC_MSG);
                *count -= 1;
                if *count == 0 {
                    cvar.notify_all();
                }
            }));
        }
        let (count, cvar) = &*remaining;
        let mut count = count.lock().expect(crate::THREAD_PANIC_MSG);
        while *count > 0 {
            count = cvar.wait(count).expect(crate::THREAD_PANIC_MSG);
        }
    }

    /// Drops every task currently waiting to start, without running
    /// them (`cancelAll`, §4.5 point 7). Tasks already dispatched to a
    /// worker are not affected — they run to their next cooperative
    /// cancellation check.
    pub fn drain_pending(&self) -> usize {
        let mut queue = self.shared.queue.lock().expect(crate::THREAD_PANIC_MSG);
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().expect(crate::THREAD_PANIC_MSG).len()
    }

    pub fn accumulated_time(&self) -> Duration {
        Duration::from_micros(self.shared.accumulated_time_us.load(Ordering::Relaxed))
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut queue = shared.queue.lock().expect(crate::THREAD_PANIC_MSG);
        loop {
            if let Some(task) = queue.pop_front() {
                drop(queue);
                let start = Instant::now();
                task();
                shared
                    .accumulated_time_us
                    .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
                break;
            }
            if shared.stop.load(Ordering::Acquire) {
                return;
            }
            queue = shared.cond.wait(queue).expect(crate::THREAD_PANIC_MSG);
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        self.workers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn single_worker_runs_tasks_in_fifo_order() {
        let queue = TaskQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<Task> = (0..5)
            .map(|i| {
                let order = order.clone();
                Box::new(move || order.lock().unwrap().push(i)) as Task
            })
            .collect();
        queue.submit_group(tasks);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn group_submit_waits_for_every_task() {
        let queue = TaskQueue::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = (0..20)
            .map(|_| {
                let done = done.clone();
                Box::new(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                }) as Task
            })
            .collect();
        queue.submit_group(tasks);
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn drain_pending_drops_unstarted_tasks() {
        let queue = TaskQueue::new(0.max(1));
        queue.submit(Box::new(|| {}));
        queue.submit(Box::new(|| {}));
        // Racy against the worker, but with 0 elapsed time between submit
        // and drain this reliably catches at least the queued tasks in
        // CI-speed environments; the assertion below only checks the
        // queue ends up empty either way.
        queue.drain_pending();
        assert_eq!(queue.pending_count(), 0);
    }
}
