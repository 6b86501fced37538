//! `agent-conductor` - a dependency-aware coordination engine for parallel
//! remote agent execution.
//!
//! Given a graph of work nodes and the edges between them, the engine
//! levels the graph into dependency-respecting batches, executes each
//! batch's tasks concurrently against an injected remote execution
//! provider under a bounded-concurrency budget, retries transient
//! failures, tracks live progress and throughput, and replays registered
//! rollback actions when a failed phase is rolled back.
//!
//! The crate deliberately knows nothing about what a node *means* or how
//! the provider runs it; both sides of the engine are seams:
//! [`graph::GraphPayload`] on the way in, and any
//! [`remote::RemoteExecutionClient`] implementation on the way out.
//!
//! # Example
//!
//! ```ignore
//! use agent_conductor::context::ExecutionContext;
//! use agent_conductor::engine::ExecutionEngine;
//! use agent_conductor::remote::ScriptedClient;
//! use std::sync::Arc;
//!
//! let engine = ExecutionEngine::new(Arc::new(ScriptedClient::new()));
//! let report = engine
//!     .execute_parallel_agents(graph, None, ExecutionContext::new("deploy"))
//!     .await;
//! println!("{}", report.message);
//! ```

pub mod context;
pub mod engine;
pub mod graph;
pub mod observability;
pub mod remote;

pub use context::ExecutionContext;
pub use engine::{
    EngineConfig, EngineError, ExecutionEngine, ExecutionProgress, ExecutionReport,
    RecoveryManager, ResourceUsage,
};
pub use graph::{AgentType, GraphNode, GraphPayload, NodeKind};
pub use remote::{RemoteError, RemoteExecutionClient, ScriptedClient, SessionState, SessionStatus};
