//! # Shadow drive library
//!
//! Predicts the short term future of a live vehicle by running shadow copies of it, detects when
//! the live vehicle diverges from that prediction, and searches for a control correction using
//! diagnostic trials.
//!
//! The [`drive_mgr::DriveMgr`] ties the modules together, the world it drives in is anything that
//! implements [`world::World`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod calib;
pub mod clock;
pub mod control;
pub mod diverge;
pub mod drive_mgr;
pub mod events;
pub mod score;
pub mod search;
pub mod shadow;
pub mod snapshot;
pub mod telemetry;
pub mod triage;
pub mod veh;
pub mod world;
