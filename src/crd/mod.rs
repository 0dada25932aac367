//! Custom Resource Definitions (CRDs) for ray-operator.
//!
//! - `RayCluster`: a head group plus scalable worker groups

mod ray_cluster;

pub use ray_cluster::*;
