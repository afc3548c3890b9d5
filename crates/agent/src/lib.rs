//! Conversation orchestration for srdgen.
//!
//! This crate turns a plain-text requirements document into frontend and
//! backend requirement documents by running a round-robin conversation
//! between role-prompted model calls, and refines either document from human
//! feedback.
//!
//! # Architecture
//!
//! 1. **Turn loop** (`coordinator`) - one model call per turn, retries with
//!    backoff, stops on the termination policy.
//! 2. **Roles** (`prompts`) - built-in analysis catalog and the reduced
//!    feedback roster.
//! 3. **Feedback loop** (`controller`) - per-artifact state machine that
//!    commits a revision or leaves the artifact untouched.
//! 4. **Storage** (`store`) - session persistence behind an async trait.
//!
//! # Key Types
//!
//! - `AgentRuntime` - `analyze` and `regenerate` entry points
//! - `ModelClient` - pluggable completion backend (OpenAI-compatible or scripted)
//! - `SessionStore` - session persistence seam
//!
//! The model never decides when a run ends or which document a reply belongs
//! to. Turn order, termination and partitioning are deterministic.

pub mod controller;
pub mod coordinator;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod store;

pub use controller::{FeedbackRegenerationController, RegenerationReport};
pub use coordinator::{ConversationCoordinator, RetryPolicy, RunOutcome};
pub use llm::{ModelClient, ModelError, OpenAiChatClient, ScriptedModelClient};
pub use runtime::{AgentRuntime, AnalysisReport};
pub use store::{InMemorySessionStore, SessionStore, StoreError};
