//! Periodic maintenance threads
//!
//! A worker runs its task on every tick of a `crossbeam` ticker until the
//! shutdown channel is closed. `stop()` returns only after the thread has
//! exited, so no task runs once it returns.

use crossbeam::channel::{self, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
pub struct Worker {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a named thread running `task` every `interval`
    pub fn spawn<F>(name: &str, interval: Duration, mut task: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => task(),
                }
            })?;

        tracing::info!(worker = %name, interval_ms = interval.as_millis() as u64, "Background worker started");

        Ok(Self {
            name: name.to_string(),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the select
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            // The last owner may be released from inside the task itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!(worker = %self.name, "Background worker panicked");
            } else {
                tracing::info!(worker = %self.name, "Background worker stopped");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_worker_runs_and_stops() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut worker = Worker::spawn("test-worker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        worker.stop();
        assert!(!worker.is_running());

        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }
}
