//! Tick-ordered combat rotation simulator
//!
//! A [`simulation::Simulation`] runs one scripted fight: a per-run scheduler
//! drives buffs, cooldowns and casts while the damage pipeline fills a
//! ledger. Recorded runs can be replayed against perturbed attribute models
//! to estimate how much each stat category is worth.

pub mod actor;
pub mod attribute;
pub mod buff;
pub mod config;
pub mod cooldown;
pub mod damage;
pub mod data;
pub mod error;
pub mod replay;
pub mod report;
pub mod rotation;
pub mod scheduler;
pub mod script;
pub mod sensitivity;
pub mod simulation;
pub mod stats;

pub use error::{Result, SimError};
