//! Instaflow reconciliation core
//!
//! This crate turns one-shot provisioning calls against a remote API into
//! declarative resources with eventual consistency.
//!
//! # Components
//!
//! - **Identifier codec** ([`id`]): composite `scope:child` stable ids
//! - **State-change waiter** ([`waiter`]): polls a resource until it is
//!   ready, failed, timed out or cancelled
//! - **Drift merge** ([`merge`]): folds server snapshots into tracked models
//! - **Reconciler** ([`reconciler`]): Create / Read / Delete / Import per
//!   resource family
//! - **State** ([`state`]): persisted StableIDs and reconciled models
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 instaflow CLI                    │
//! │             (plan / apply / destroy)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               instaflow-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          trait Reconciler { ... }         │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │  Waiter  │  │  Merge   │  │ Id / State   │   │
//! │  └──────────┘  └──────────┘  └──────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │  instaclustr  │
//!           │    gateway    │
//!           └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod gateway;
pub mod id;
pub mod merge;
pub mod reconciler;
pub mod state;
pub mod waiter;

// Re-exports
pub use action::{Action, ActionType, ApplyResult, Plan, PlanSummary};
pub use error::{CloudError, Result};
pub use gateway::{GatewayResponse, Removal, StatusClass};
pub use id::StableId;
pub use merge::{DriftMerge, ForceNew, MergeReport};
pub use reconciler::{ReadOutcome, Reconciler, Tracked};
pub use state::{GlobalState, ResourceState, StateLock, StateManager};
pub use waiter::{LifecycleStatus, StateChangeWaiter, WaitSpec, WaitState};
