//! Utility functions shared by applications and tests.

pub mod bootstrap;
