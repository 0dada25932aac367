//! Controller module for ray-operator.
//!
//! Contains the reconciliation loop, the pure planning and evaluation logic it
//! drives, the store seam, error handling, status management and validation.

// Shared modules
pub mod context;
pub mod error;
pub mod status;
pub mod store;
pub mod validation;

// Pure logic
pub mod cluster_state;
pub mod desired_state;
pub mod instances;

// RayCluster controller
pub mod cluster_reconciler;
