//! Resource generation module.
//!
//! Contains the label/naming conventions and pod templates for instances
//! owned by a RayCluster.
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Head Pod | The single head instance |
//! | Worker Pods | `replicas × numOfHosts` instances per worker group |

pub mod common;
pub mod pods;

pub use common::{group_labels, owner_reference};
pub use pods::{DefaultTemplates, InstanceTemplates};
