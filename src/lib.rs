//! Tourguide - step resolution and readiness engine for on-page guided tours
//!
//! Compiles authored tour steps into page lookups, polls the page until the
//! targets are present (or attempts run out), and publishes the ordered steps
//! for the presentation layer.

pub mod config;
pub mod logging;
pub mod lookup;
pub mod readiness;
pub mod steps;
pub mod tour;

pub use lookup::{DomLookup, ElementHandle, LookupError, PageSnapshot};
pub use readiness::{ReadinessPolicy, ReadinessScheduler, ResolvedStep, Settlement};
pub use steps::{compile, parse_configuration, StepConfigEntry, StepSpec};
pub use tour::{TourState, TourStop, TourWidget};
