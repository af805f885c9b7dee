//! Step definitions for interface tests.

pub mod consuming;
pub mod routing;
