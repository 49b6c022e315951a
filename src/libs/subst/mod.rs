//! Replacement models and the substitution pass.

pub mod aa_data;
mod model;
mod simulator;

pub use model::{Alphabet, ModelCode, ReplacementModel};
pub use simulator::{SiteRates, SubstitutionSimulator};
