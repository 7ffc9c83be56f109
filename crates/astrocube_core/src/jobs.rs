//! Background execution of a cube operation.
//!
//! A [`JobManager`] runs one operation on a worker thread. The worker shares
//! a [`ProgressToken`] with the manager and forwards status changes over a
//! channel; the host calls [`JobManager::poll`] from its event loop.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::error::{CubeError, CubeResult};
use crate::progress::ProgressToken;

/// Interval at which the worker samples the token status.
const STATUS_SAMPLE_INTERVAL: Duration = Duration::from_millis(20);

/// Message from the worker thread.
#[derive(Debug)]
pub enum JobProgress<T> {
    /// Token status changed (1..=99).
    Status(i32),
    Finished(T),
    Canceled,
    Error(String),
}

/// Job state as seen by the host.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Running {
        percent: i32,
    },
    Completed,
    Canceled,
    Error(String),
}

/// Runs operations producing `T` in the background, one at a time.
pub struct JobManager<T: Send + 'static> {
    state: JobState,
    progress_rx: Option<Receiver<JobProgress<T>>>,
    token: ProgressToken,
    worker_handle: Option<JoinHandle<()>>,
    result: Option<T>,
}

impl<T: Send + 'static> Default for JobManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> JobManager<T> {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            progress_rx: None,
            token: ProgressToken::new(),
            worker_handle: None,
            result: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, JobState::Running { .. })
    }

    /// Token of the current job; writing `-1` to it cancels the job.
    pub fn token(&self) -> &ProgressToken {
        &self.token
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }

    /// Start `op`, canceling any job still running.
    ///
    /// `op` receives the job's token and must pass it to the kernel it runs.
    pub fn start<OP>(&mut self, op: OP)
    where
        OP: FnOnce(&ProgressToken) -> CubeResult<T> + Send + 'static,
    {
        self.cancel();

        self.token = ProgressToken::new();
        self.result = None;

        let (tx, rx) = channel();
        self.progress_rx = Some(rx);
        let token = self.token.clone();

        let handle = thread::spawn(move || job_worker(op, token, tx));

        self.worker_handle = Some(handle);
        self.state = JobState::Running { percent: 0 };
    }

    /// Request cancellation and wait for the worker to stop.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.worker_handle.take() {
            self.token.request_cancel();
            let _ = handle.join();
            // Pick up the worker's final message.
            self.drain();
        }
        self.progress_rx = None;
    }

    /// Apply pending worker messages. Call this each frame.
    pub fn poll(&mut self) {
        self.drain();
    }

    fn drain(&mut self) {
        let mut messages = Vec::new();
        if let Some(rx) = &self.progress_rx {
            while let Ok(progress) = rx.try_recv() {
                messages.push(progress);
            }
        }

        let mut should_cleanup = false;
        for progress in messages {
            match progress {
                JobProgress::Status(percent) => {
                    self.state = JobState::Running { percent };
                }
                JobProgress::Finished(result) => {
                    self.result = Some(result);
                    self.state = JobState::Completed;
                    should_cleanup = true;
                }
                JobProgress::Canceled => {
                    self.state = JobState::Canceled;
                    should_cleanup = true;
                }
                JobProgress::Error(msg) => {
                    self.state = JobState::Error(msg);
                    should_cleanup = true;
                }
            }
        }

        if should_cleanup {
            self.progress_rx = None;
            self.worker_handle = None;
        }
    }

    /// Cancel anything running and return to idle.
    pub fn reset(&mut self) {
        self.cancel();
        self.token.reset();
        self.state = JobState::Idle;
        self.result = None;
    }
}

/// Runs `op` on a scoped helper thread while sampling the token status.
fn job_worker<T, OP>(op: OP, token: ProgressToken, tx: Sender<JobProgress<T>>)
where
    T: Send,
    OP: FnOnce(&ProgressToken) -> CubeResult<T> + Send,
{
    let outcome = thread::scope(|scope| {
        let runner = scope.spawn(|| op(&token));
        let mut last = token.status();
        while !runner.is_finished() {
            let status = token.status();
            if status != last && (1..100).contains(&status) {
                if tx.send(JobProgress::Status(status)).is_err() {
                    debug!("job receiver dropped, no more status updates");
                }
                last = status;
            }
            thread::sleep(STATUS_SAMPLE_INTERVAL);
        }
        runner.join()
    });

    let message = match outcome {
        Ok(Ok(result)) => JobProgress::Finished(result),
        Ok(Err(CubeError::Canceled)) => JobProgress::Canceled,
        Ok(Err(e)) => JobProgress::Error(e.to_string()),
        Err(_) => JobProgress::Error("job worker panicked".to_string()),
    };
    let _ = tx.send(message);
}
