#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/bartik/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod coverage;
pub mod error;
pub mod month;
pub mod table;

// Re-export main types
pub use coverage::{CoverageNote, CoverageReport};
pub use error::{Result, SchemaError};
pub use month::MonthId;
pub use table::{AggregateHow, CompleteCases, Granularity, PanelTable, ENTITY_ID, TIME_ID};
