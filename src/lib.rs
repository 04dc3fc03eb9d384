//! Library crate for cam-scan-rs exposing reusable modules.
pub mod controller;
pub mod probe;
pub mod ranges;
pub mod registry;
pub mod signals;
pub mod sink;
pub mod types;
