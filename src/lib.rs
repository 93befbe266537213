//! Halldyll Starter - io.net VMaaS orchestration library.
//!
//! A library for managing io.net GPU deployments with:
//! - **Backoff**: Bounded exponential delays for retried calls
//! - **Resilient Requests**: Retry on rate limiting and transport failures
//! - **Client**: Typed io.net VMaaS API access behind a mockable trait
//! - **Metadata**: Per-cluster deployment records with atomic writes
//! - **Orchestration**: Idempotent lifecycle management with drift self-healing
//!
//! ## Quick Start
//!
//! Store your io.net API key in `~/.ionet/api_key`. Optional overrides are
//! read from the environment (or a `.env` file):
//!
//! ```text
//! IONET_API_URL=https://api.intelligence.io.solutions
//! IONET_STATE_DIR=/var/lib/ionet
//! IONET_POLL_INTERVAL_MS=10000
//! ```
//!
//! Then use the orchestrator to get a running deployment:
//!
//! ```ignore
//! use halldyll_starter_ionet::{
//!     DeploymentSpec, IonetClient, IonetClientConfig, IonetOrchestrator,
//!     IonetOrchestratorConfig, JsonFileMetadataStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IonetClient::new(&IonetClientConfig::from_env()?)?;
//!     let cfg = IonetOrchestratorConfig::from_env()?;
//!     let store = JsonFileMetadataStore::new(&cfg.state_dir);
//!     let orchestrator = IonetOrchestrator::new(client, store, cfg);
//!
//!     let spec = DeploymentSpec::new("ionet-h100-1x", "us-east-1", 2);
//!     let handle = orchestrator.ensure_running("train-head", &spec).await?;
//!     println!("Deployment ready: {}", handle.deployment_id);
//!
//!     let view = orchestrator.inspect("train-head").await;
//!     if let Some(head) = view.head() {
//!         println!("SSH: ssh -p {} ubuntu@{:?}", head.ssh_port, head.external_ip);
//!     }
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code warning
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports warning
#![warn(unused_variables)]            // Unused variables warning
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests may unwrap freely.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Modules
// ============================================================================

/// Bounded exponential backoff.
///
/// Use this module to compute delays between retried calls.
pub mod ionet_backoff;

/// Retrying request layer over an HTTP transport.
///
/// Use this module to send requests that survive rate limiting and flaky networks.
pub mod ionet_request;

/// Instance type and region tables.
pub mod ionet_catalog;

/// Typed io.net VMaaS client.
///
/// Use this module for direct API access: deploy, inspect, destroy, pricing.
pub mod ionet_client;

/// Per-cluster deployment metadata.
///
/// Use this module to persist deployment records across process restarts.
pub mod ionet_state;

/// High-level deployment orchestration.
///
/// Use this module for idempotent cluster lifecycle management.
pub mod ionet_orchestrator;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use ionet_backoff::Backoff;
pub use ionet_catalog::{CatalogError, HardwareConfig};
pub use ionet_client::{
    ClientError, DeployRequest, DeploymentApi, DeploymentDetails, IonetClient, IonetClientConfig,
    RemoteStatus, RemoteVm,
};
pub use ionet_orchestrator::{
    ClusterStatus, ClusterView, DeploymentHandle, DeploymentSpec, DeploymentStatus, InstanceInfo,
    IonetOrchestrator, IonetOrchestratorConfig, OrchestratorError, TerminateReport,
};
pub use ionet_request::{ApiRequest, RawResponse, RequestError, RetryingRequester, Transport};
pub use ionet_state::{
    ClusterMetadataIndex, DeploymentRecord, JsonFileMetadataStore, MetadataStore, NodeRole,
    StateStoreError, VmMapping,
};
