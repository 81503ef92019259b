//! Scan result aggregation.
//!
//! This module turns raw scan observations into a deduplicated list of
//! nearby peripherals, ranked by preferred name and signal strength.

pub mod aggregator;
pub mod device;
pub mod recognition;
