//! Core runtime of a Behavioral Programming (BP) execution engine.
//!
//! Many independent b-threads advance in lock-step, each proposing,
//! waiting for, or blocking events at a synchronization point (`bsync`),
//! while a central arbiter (`engine::advance`) selects one event per cycle
//! from the permitted set and resumes exactly the b-threads that match it.
//!
//! Embedding a scripting language, a CLI, example programs, and a
//! disk-backed snapshot store are out of scope; this crate defines the
//! synchronization algorithm, the b-thread continuation abstraction, and
//! the wire *shape* a host can persist a snapshot through.

pub mod bthread;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod eventset;
pub mod listener;
pub mod program;
pub mod resource;
pub mod runner;
pub mod scope;
pub mod selection;
pub mod statement;

pub use bthread::{BThreadBody, BodyRegistry, BpContext, BreakUponContext, HashMapBodyRegistry};
pub use config::EngineConfig;
pub use error::BpError;
pub use event::Event;
pub use eventset::EventSet;
pub use listener::{EngineEvent, Listener, TracingListener};
pub use program::{BThreadId, BThreadSnapshot, Program, ProgramSnapshot};
pub use resource::{InMemoryResourceLoader, NullResourceLoader, ResourceLoader};
pub use runner::{ExitReason, Runner};
pub use scope::GlobalScope;
pub use selection::{EventSource, PriorityStrategy, Selected, SeededRandomStrategy, SelectionStrategy};
pub use statement::{SyncStatement, SyncStatementBuilder};
