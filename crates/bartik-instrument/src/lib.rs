#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/bartik/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod error;
pub mod exposure;
pub mod pca;
pub mod shock;

pub use builder::{
    EXPOSURE, INSTRUMENT, INSTRUMENT_CUMULATIVE, InstrumentBuilder, InstrumentPanel, SHOCK,
};
pub use error::{InstrumentError, Result};
pub use exposure::{
    CategoryObservation, DecayConfig, ExposureBuilder, ExposureConfig, ExposureIndex,
};
pub use shock::{MissingResidual, ShockSeries, residualize};
