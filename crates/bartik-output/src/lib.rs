#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/bartik/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod export;

pub use export::{
    ExportError, ExportFormat, Exporter, InstrumentRow, IrfRow, RowStatus, instrument_rows,
    irf_rows, read_irf, read_irf_str, write_instrument_panel, write_irf,
};
