//! Operational signals the queue reads but does not own.
//!
//! The coordinator consults three pieces of external state: the identity of
//! the node this process runs on (recorded on activity records), the engine
//! lifecycle status (gates all peeking), and whether the server was upgraded
//! since its last start (selects the startup cleaning path).

use std::sync::atomic::{AtomicU8, Ordering};

/// Identity of the compute node this process runs on.
///
/// Single-node deployments typically have no explicit name; the activity
/// record's `node_name` column is then left NULL.
#[derive(Debug, Clone, Default)]
pub struct NodeInformation {
    node_name: Option<String>,
}

impl NodeInformation {
    /// Creates a named node identity.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            node_name: Some(name.into()),
        }
    }

    /// Creates an anonymous node identity.
    pub fn anonymous() -> Self {
        Self { node_name: None }
    }

    /// Returns the node name, if one is configured.
    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }
}

/// Lifecycle state of the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// The engine is booting; no tasks may be handed out yet.
    Starting,
    /// The engine is fully operational.
    Started,
    /// The engine is shutting down; workers must not claim new tasks.
    Stopping,
}

/// Shared, mutable holder for the engine state.
///
/// The platform bootstrap owns the writes; the queue coordinator only reads.
#[derive(Debug)]
pub struct EngineStatusHolder {
    state: AtomicU8,
}

impl EngineStatusHolder {
    /// Creates a holder with the given initial state.
    pub fn new(initial: EngineState) -> Self {
        Self {
            state: AtomicU8::new(Self::encode(initial)),
        }
    }

    /// Replaces the current state.
    pub fn set(&self, state: EngineState) {
        self.state.store(Self::encode(state), Ordering::SeqCst);
    }

    /// Returns the current state.
    pub fn get(&self) -> EngineState {
        match self.state.load(Ordering::SeqCst) {
            0 => EngineState::Starting,
            1 => EngineState::Started,
            _ => EngineState::Stopping,
        }
    }

    fn encode(state: EngineState) -> u8 {
        match state {
            EngineState::Starting => 0,
            EngineState::Started => 1,
            EngineState::Stopping => 2,
        }
    }
}

/// Whether the server detected a version upgrade on this start.
///
/// Pending analysis reports are not forward-compatible across versions, so an
/// upgraded server drops its queue instead of replaying it.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeStatus {
    upgraded: bool,
}

impl UpgradeStatus {
    /// Creates an upgrade status from the detection outcome.
    pub fn new(upgraded: bool) -> Self {
        Self { upgraded }
    }

    /// Returns true if the server was upgraded since its last start.
    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }
}
