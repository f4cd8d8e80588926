// SPDX-License-Identifier: GPL-3.0-only

//! Serialized configuration thread
//!
//! Session setup, camera switches and teardown run here one at a time, off
//! the caller's thread.

use std::io;
use std::sync::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread that runs jobs in submission order
pub struct SessionQueue {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionQueue {
    pub fn new(name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(name = %thread_name, "Session queue started");
            for job in receiver {
                job();
            }
            debug!(name = %thread_name, "Session queue finished");
        })?;

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue `job`; returns false once the queue is shut down
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(sender) = self.sender.lock() else {
            return false;
        };
        match sender.as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => {
                warn!(name = %self.name, "Session queue is shut down, job dropped");
                false
            }
        }
    }

    /// Run `job` on the queue and wait for its result
    ///
    /// Must not be called from a job already running on this queue.
    pub fn dispatch_sync<F, R>(&self, job: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let queued = self.dispatch(move || {
            let _ = result_tx.send(job());
        });
        if !queued {
            return None;
        }
        result_rx.recv().ok()
    }

    /// Block until every job queued so far has run
    pub fn wait_idle(&self) {
        let _ = self.dispatch_sync(|| ());
    }

    /// Run the remaining jobs, then stop the thread
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!(name = %self.name, "Session queue thread panicked");
            }
        }
    }
}

impl Drop for SessionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
