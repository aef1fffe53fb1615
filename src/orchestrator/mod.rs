//! Fleet-level orchestration.
//!
//! This module owns the shutdown coordinator (setup checks, staggered launch, bounded shutdown)
//! and post-run processing of the fleet report such as exports. The CLI layer calls into this
//! module to keep responsibilities separated.

mod controller;
mod post_process;
mod signal;

pub(crate) use controller::{check_setup, run_fleet};
pub(crate) use post_process::process_fleet_report;
pub(crate) use signal::interrupted;
