//! Node lifecycle state machine

use latis_proto::{NodeState, NodeStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::RwLock;
use std::time::Instant;

/// Runtime state of a node
///
/// The lifecycle enum and the active-task counter are lock-free
/// atomics; metadata sits behind a reader-writer lock. The state only
/// moves forward through STARTING → READY → DRAINING → STOPPED; BUSY
/// oscillates with READY while tasks come and go.
pub struct State {
    state: AtomicI32,
    active_tasks: AtomicI32,
    start_time: Instant,
    identity: String,
    metadata: RwLock<HashMap<String, String>>,
}

impl State {
    /// Create a new state machine in STARTING
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            state: AtomicI32::new(NodeState::Starting as i32),
            active_tasks: AtomicI32::new(0),
            start_time: Instant::now(),
            identity: identity.into(),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Transition to READY
    pub fn set_ready(&self) {
        self.state.store(NodeState::Ready as i32, Ordering::SeqCst);
    }

    /// Transition to DRAINING
    pub fn set_draining(&self) {
        self.state.store(NodeState::Draining as i32, Ordering::SeqCst);
    }

    /// Transition to STOPPED
    pub fn set_stopped(&self) {
        self.state.store(NodeState::Stopped as i32, Ordering::SeqCst);
    }

    /// Record a new active task; flips READY to BUSY
    pub fn increment_tasks(&self) {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        let _ = self.state.compare_exchange(
            NodeState::Ready as i32,
            NodeState::Busy as i32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Record a finished task; flips BUSY back to READY at zero
    pub fn decrement_tasks(&self) {
        if self.active_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.state.compare_exchange(
                NodeState::Busy as i32,
                NodeState::Ready as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        NodeState::from_i32(self.state.load(Ordering::SeqCst)).unwrap_or(NodeState::Starting)
    }

    /// Current active task count
    pub fn active_tasks(&self) -> i32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Seconds since the node started
    pub fn uptime_seconds(&self) -> i64 {
        self.start_time.elapsed().as_secs() as i64
    }

    /// The node's identity URI
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Set a metadata key/value pair
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut metadata = self.metadata.write();
        metadata.insert(key.into(), value.into());
    }

    /// A copy of the metadata map
    pub fn metadata(&self) -> HashMap<String, String> {
        self.metadata.read().clone()
    }

    /// Pointwise snapshot of the full status
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            identity: self.identity.clone(),
            state: self.state(),
            uptime_seconds: self.uptime_seconds(),
            active_tasks: self.active_tasks(),
            metadata: self.metadata(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_in_starting() {
        let state = State::new("spiffe://latis/node/test");
        assert_eq!(state.state(), NodeState::Starting);
        assert_eq!(state.active_tasks(), 0);
        assert_eq!(state.identity(), "spiffe://latis/node/test");
    }

    #[test]
    fn test_forward_transitions() {
        let state = State::new("id");
        state.set_ready();
        assert_eq!(state.state(), NodeState::Ready);
        state.set_draining();
        assert_eq!(state.state(), NodeState::Draining);
        state.set_stopped();
        assert_eq!(state.state(), NodeState::Stopped);
    }

    #[test]
    fn test_tasks_flip_ready_and_busy() {
        let state = State::new("id");
        state.set_ready();

        state.increment_tasks();
        assert_eq!(state.state(), NodeState::Busy);
        assert_eq!(state.active_tasks(), 1);

        state.increment_tasks();
        assert_eq!(state.active_tasks(), 2);

        state.decrement_tasks();
        assert_eq!(state.state(), NodeState::Busy);

        state.decrement_tasks();
        assert_eq!(state.state(), NodeState::Ready);
        assert_eq!(state.active_tasks(), 0);
    }

    #[test]
    fn test_tasks_do_not_resurrect_draining() {
        let state = State::new("id");
        state.set_ready();
        state.increment_tasks();
        state.set_draining();

        // Finishing the task must not flip the node back to READY.
        state.decrement_tasks();
        assert_eq!(state.state(), NodeState::Draining);
    }

    #[tokio::test]
    async fn test_concurrent_oscillation_settles_ready() {
        let state = Arc::new(State::new("id"));
        state.set_ready();

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let state = Arc::clone(&state);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    state.increment_tasks();
                    tokio::task::yield_now().await;
                    state.decrement_tasks();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(state.state(), NodeState::Ready);
        assert_eq!(state.active_tasks(), 0);
    }

    #[test]
    fn test_metadata_returns_a_copy() {
        let state = State::new("id");
        state.set_metadata("region", "local");

        let mut copy = state.metadata();
        copy.insert("region".into(), "tampered".into());

        assert_eq!(state.metadata()["region"], "local");
    }

    #[test]
    fn test_status_snapshot() {
        let state = State::new("spiffe://latis/node/snap");
        state.set_ready();
        state.set_metadata("version", "0.1.0");

        let status = state.status();
        assert_eq!(status.identity, "spiffe://latis/node/snap");
        assert_eq!(status.state, NodeState::Ready);
        assert_eq!(status.active_tasks, 0);
        assert!(status.uptime_seconds >= 0);
        assert_eq!(status.metadata["version"], "0.1.0");
    }
}
