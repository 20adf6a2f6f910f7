//! Incrementally updatable, per-year columnar archive of Mars Climate Sounder
//! DDR retrievals.
//!
//! Raw `.TAB` products are parsed into a metadata table (one row per profile)
//! and a set of profile variables (105 levels per profile), each stored as a
//! gzip container under `DATA/{year}`. [`import::Importer`] appends new
//! products, re-sorts, and verifies the year with [`check::check_year`].

pub mod calc;
pub mod check;
pub mod config;
pub mod container;
pub mod error;
pub mod import;
pub mod keys;
pub mod marsdate;
pub mod output;
pub mod parse;
pub mod query;
pub mod store;
pub mod table;
pub mod variables;
