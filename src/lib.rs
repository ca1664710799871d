//! Landslide hazard monitoring service for the central Himalayan front.
//!
//! Two independent batch pipelines share this library:
//!
//! - the rainfall pipeline (`rainfall_monitor`) ingests half-hourly
//!   precipitation grids into rolling 24/48/72-hour sums with exact
//!   eviction, a 16-epoch rolling maximum, and calendar-day buckets, and
//!   raises hysteresis-gated alerts when the 24-hour sum crosses its
//!   calibrated threshold;
//! - the landslide pipeline (`landslide_scan`) reconstructs a cloud-free
//!   composite of the latest overpass from historical scenes and compares
//!   it against the previous composite with co-registered change criteria
//!   and a neighbor-density filter.
//!
//! Both run unattended from cron; `state_check` audits the persisted
//! window state between runs.

pub mod accumulate;
pub mod alert;
pub mod codec;
pub mod composite;
pub mod config;
pub mod detect;
pub mod dev_mode;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod raster;
pub mod regions;
pub mod state;
pub mod verify;
