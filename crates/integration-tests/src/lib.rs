//! Scenario tests exercising the full rental saga against the in-memory
//! repositories and a scripted provisioner.

pub mod harness;
