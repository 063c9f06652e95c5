//! # lectern-runtime
//!
//! Capability-sandboxed Lua runtime for Lectern content-source scripts.
//!
//! This crate provides:
//! - Capability policies with trust-rating based defaults
//! - A host-access gate that denies outward APIs the policy does not grant
//! - Stack depth, instruction budget, memory and wall-clock limits
//! - Bounded worker pools, one per runtime role
//!
//! ## Execution Model
//!
//! Every execution gets a brand-new interpreter on a pool worker. The caller
//! awaits the result for at most the policy timeout; after that the execution
//! is cancelled and reported as [`ExecutionResult::Timeout`].
//!
//! ```no_run
//! use lectern_runtime::{
//!     CapabilityPolicy, ExecutionContext, PoolConfig, RuntimeConfig, SandboxRuntime,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = SandboxRuntime::new(PoolConfig::named("demo"), RuntimeConfig::default())?;
//! let outcome = runtime
//!     .execute(
//!         "return str.upper(item.name)",
//!         None,
//!         ExecutionContext::new().with_item(serde_json::json!({"name": "dune"})),
//!         CapabilityPolicy::for_source(3),
//!         vec![],
//!     )
//!     .await?;
//! assert!(outcome.result.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Model
//!
//! Process and class-loader access are never granted. File, socket and
//! reflection access follow the [`CapabilityPolicy`]. A denied access is
//! reported as [`ExecutionResult::PolicyViolation`] even when the script
//! catches the raised error.

pub mod context;
pub mod error;
mod gate;
mod interpreter;
mod limits;
pub mod policy;
pub mod pool;
pub mod result;
pub mod runtime;

pub use context::{ExecutionContext, ExecutionRequest};
pub use error::{PolicyError, RuntimeError, RuntimeResult, SubmitError};
pub use limits::INSTRUCTION_STRIDE;
pub use policy::{Capability, CapabilityPolicy, PolicyLevel, TrustThresholds};
pub use pool::{CancelToken, OverflowPolicy, PoolConfig, WorkerPool};
pub use result::{ExecutionOutcome, ExecutionResult};
pub use runtime::{RuntimeConfig, RuntimeSet, RuntimeSetConfig, SandboxRuntime};
