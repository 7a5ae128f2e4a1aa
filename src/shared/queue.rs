// This is free and unencumbered software released into the public domain.

use crate::shared::CameraError;
use std::{
    sync::{
        Condvar, Mutex,
        mpsc::{Receiver, Sender, channel, sync_channel},
    },
    thread::{JoinHandle, ThreadId},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum QueueMsg {
    Job(Job),
    Stop,
}

#[derive(Default)]
struct GateState {
    suspended: usize,
    stopping: bool,
}

#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    resumed: Condvar,
}

impl Gate {
    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn wait_until_runnable(&self) {
        let mut state = self.lock();
        while state.suspended > 0 && !state.stopping {
            state = self.resumed.wait(state).unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// A single worker thread that runs submitted jobs one at a time, in
/// submission order.
///
/// Suspension is counted: every `suspend` needs a matching `resume` before
/// the next job may start. A job that is already running is never
/// interrupted.
pub struct SerialQueue {
    label: String,
    tx: Mutex<Option<Sender<QueueMsg>>>,
    gate: std::sync::Arc<Gate>,
    worker: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> Result<Self, CameraError> {
        let label = label.into();
        let (tx, rx) = channel::<QueueMsg>();
        let gate = std::sync::Arc::new(Gate::default());

        let gate2 = std::sync::Arc::clone(&gate);
        let join = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || run_worker(rx, gate2))
            .map_err(|e| CameraError::driver("spawning serial queue", e))?;

        Ok(Self {
            label,
            tx: Mutex::new(Some(tx)),
            gate,
            worker: join.thread().id(),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the caller is running on this queue's worker.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.worker
    }

    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> Result<(), CameraError> {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        match tx.as_ref() {
            Some(tx) => tx
                .send(QueueMsg::Job(Box::new(job)))
                .map_err(|_| CameraError::Closed),
            None => Err(CameraError::Closed),
        }
    }

    /// Runs `f` on the queue and waits for its result.
    ///
    /// Producers hand frames over with this, so a slow job holds the
    /// producer back instead of piling up behind it. Called from the queue's
    /// own worker, `f` runs inline.
    pub fn sync<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T, CameraError> {
        if self.is_current() {
            return Ok(f());
        }
        let (reply_tx, reply_rx) = sync_channel::<T>(1);
        self.dispatch(move || {
            let _ = reply_tx.send(f());
        })?;
        reply_rx.recv().map_err(|_| CameraError::Closed)
    }

    pub fn suspend(&self) {
        self.gate.lock().suspended += 1;
        trace!(queue = %self.label, "suspended");
    }

    pub fn resume(&self) {
        let mut state = self.gate.lock();
        if state.suspended == 0 {
            warn!(queue = %self.label, "resume without matching suspend");
            return;
        }
        state.suspended -= 1;
        if state.suspended == 0 {
            self.gate.resumed.notify_all();
        }
        trace!(queue = %self.label, "resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.gate.lock().suspended > 0
    }

    /// Runs whatever is already queued, ignoring suspension, then joins the
    /// worker. Later dispatches fail with [`CameraError::Closed`].
    pub fn stop(&self) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(tx) = tx else {
            return;
        };

        {
            let mut state = self.gate.lock();
            state.stopping = true;
            self.gate.resumed.notify_all();
        }
        let _ = tx.send(QueueMsg::Stop);
        drop(tx);

        if self.is_current() {
            return;
        }
        if let Some(join) = self.join.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = join.join();
        }
    }
}

impl core::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .finish()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(rx: Receiver<QueueMsg>, gate: std::sync::Arc<Gate>) {
    for msg in rx {
        match msg {
            QueueMsg::Job(job) => {
                gate.wait_until_runnable();
                job();
            },
            QueueMsg::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[test]
    fn jobs_run_in_order_on_the_worker() {
        let queue = Arc::new(SerialQueue::new("test queue").expect("queue"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let seen = Arc::clone(&seen);
            let q = Arc::clone(&queue);
            queue
                .dispatch(move || {
                    assert!(q.is_current());
                    seen.lock().unwrap().push(i);
                })
                .expect("dispatch");
        }

        queue.sync(|| ()).expect("sync");
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
        assert!(!queue.is_current());
    }

    #[test]
    fn suspended_queue_holds_jobs_until_resumed() {
        let queue = SerialQueue::new("suspended").expect("queue");
        let ran = Arc::new(AtomicUsize::new(0));

        queue.suspend();
        queue.suspend();
        let ran2 = Arc::clone(&ran);
        queue
            .dispatch(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            })
            .expect("dispatch");

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        queue.resume();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(queue.is_suspended());

        queue.resume();
        queue.sync(|| ()).expect("sync");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_drains_and_closes() {
        let queue = SerialQueue::new("stopping").expect("queue");
        let ran = Arc::new(AtomicUsize::new(0));

        queue.suspend();
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            queue
                .dispatch(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .expect("dispatch");
        }
        queue.stop();

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(matches!(queue.dispatch(|| ()), Err(CameraError::Closed)));
        assert!(matches!(queue.sync(|| 1), Err(CameraError::Closed)));
    }

    #[test]
    fn sync_blocks_the_caller_until_the_job_finishes() {
        let queue = Arc::new(SerialQueue::new("blocking").expect("queue"));
        let done = Arc::new(AtomicUsize::new(0));

        let done2 = Arc::clone(&done);
        queue
            .sync(move || {
                std::thread::sleep(Duration::from_millis(30));
                done2.fetch_add(1, Ordering::SeqCst);
            })
            .expect("sync");
        assert_eq!(done.load(Ordering::SeqCst), 1);

        let q = Arc::clone(&queue);
        let nested = queue
            .sync(move || q.sync(|| 5).expect("nested sync"))
            .expect("sync");
        assert_eq!(nested, 5);
    }

    #[test]
    fn unmatched_resume_is_ignored() {
        let queue = SerialQueue::new("unmatched").expect("queue");
        queue.resume();
        assert!(!queue.is_suspended());
        assert_eq!(queue.sync(|| 7).expect("sync"), 7);
    }
}
