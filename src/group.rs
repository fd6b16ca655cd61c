//! A resizable group of named worker tasks with bulk interrupt and join.
//!
//! Interruption is cooperative: each member receives an [`Interrupt`] and is
//! expected to watch it at its suspension points (usually in a
//! `tokio::select!` next to whatever it is waiting on).
//!
//! Membership changes go through one internal lock. A member is taken out of
//! the group before it is joined, so no task is ever joined twice and two
//! removals can never race on the same member.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handed to every member task; resolves once the task is asked to stop.
#[derive(Clone, Debug)]
pub struct Interrupt {
    rx: Option<watch::Receiver<bool>>,
}

impl Interrupt {
    /// Wait until the owning group interrupts this task.
    ///
    /// Also resolves if the group dropped the member without interrupting it.
    pub async fn interrupted(&self) {
        match &self.rx {
            Some(rx) => {
                let mut rx = rx.clone();
                let _ = rx.wait_for(|stop| *stop).await;
            }
            None => std::future::pending().await,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// A token that is never interrupted. For running a process loop outside a group.
    pub fn never() -> Self {
        Self { rx: None }
    }
}

struct Member {
    name: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Member {
    fn interrupt(&self) {
        self.stop.send_replace(true);
    }

    async fn join(self) {
        let name = self.name;
        match self.handle.await {
            Ok(()) => debug!(task = %name, "task joined"),
            Err(e) if e.is_panic() => warn!(task = %name, "task panicked: {e}"),
            Err(e) => warn!(task = %name, "task did not complete: {e}"),
        }
    }
}

/// A group of tasks that can be grown, shrunk, interrupted and joined.
#[derive(Default)]
pub struct TaskGroup {
    members: Mutex<Vec<Member>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a new member. `task` receives the member's interrupt token.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(Interrupt) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (stop, rx) = watch::channel(false);
        let handle = tokio::spawn(task(Interrupt { rx: Some(rx) }));
        debug!(task = %name, "task added");
        self.lock().push(Member { name, stop, handle });
    }

    /// Interrupt and join the most recently added member called `name`.
    ///
    /// Returns false if no such member exists.
    pub async fn remove(&self, name: &str) -> bool {
        let member = {
            let mut members = self.lock();
            match members.iter().rposition(|m| m.name == name) {
                Some(pos) => members.remove(pos),
                None => return false,
            }
        };
        member.interrupt();
        member.join().await;
        true
    }

    /// Interrupt and join the `n` most recently added members, stopping
    /// early if fewer remain. Returns how many were removed.
    pub async fn remove_last(&self, n: usize) -> usize {
        let removed: Vec<Member> = {
            let mut members = self.lock();
            let keep = members.len().saturating_sub(n);
            members.split_off(keep)
        };
        let count = removed.len();
        for member in &removed {
            member.interrupt();
        }
        for member in removed.into_iter().rev() {
            member.join().await;
        }
        count
    }

    /// Ask every current member to stop. Does not wait.
    pub fn interrupt_all(&self) {
        for member in self.lock().iter() {
            member.interrupt();
        }
    }

    /// Wait for every current member to finish and empty the group.
    ///
    /// Members that were not interrupted run until they return on their own.
    pub async fn join_all(&self) {
        let members = std::mem::take(&mut *self.lock());
        for member in members {
            member.join().await;
        }
    }

    /// Drop members whose task already returned. Returns how many were dropped.
    pub fn reap(&self) -> usize {
        let mut members = self.lock();
        let before = members.len();
        members.retain(|m| !m.handle.is_finished());
        before - members.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.name.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Member>> {
        self.members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        // Leftover members get their stop signal; their tasks keep running
        // detached until they notice it.
        for member in self.lock().iter() {
            member.interrupt();
        }
    }
}
