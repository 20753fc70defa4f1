//! Analytics aggregation and scoring engine for last-mile delivery KPIs
//!
//! Records flow through [`stats`] → [`scoring`] → [`bottleneck`] →
//! [`drilldown`], and every report in [`service`] is memoized through
//! [`cache`].

pub mod bottleneck;
pub mod cache;
pub mod config;
pub mod db;
pub mod drilldown;
pub mod error;
pub mod kpi;
pub mod models;
pub mod scoring;
pub mod service;
pub mod source;
pub mod stats;
pub mod trends;

pub use error::{AnalyticsError, Result};
