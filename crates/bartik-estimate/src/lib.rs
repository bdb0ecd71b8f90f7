#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/bartik/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cluster;
pub mod error;
pub mod fixed_effects;
pub mod iv;
pub mod local_projection;
pub mod lstsq;
pub mod result;
pub mod spec;

// Re-export main types
pub use cluster::{ClusterVcov, clustered_vcov};
pub use error::{EstimationError, Result};
pub use fixed_effects::{FeReport, FeSpec, FixedEffectsTransform};
pub use iv::{IvConfig, IVEstimator};
pub use local_projection::{HorizonEntry, ImpulseResponseTable, LocalProjectionRunner};
pub use lstsq::{Lstsq, least_squares};
pub use result::{CoefficientEstimate, Diagnostics, EstimationResult, OveridStatus};
pub use spec::RegressionSpec;
