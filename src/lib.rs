//! simparity runs hardware regression tests through two pipelines, an RTL
//! simulator as ground truth and a performance model as the prediction, and
//! reports how well the model's cycle counts track the simulator's.

pub use crate::diagnostics::{ErrorClass, SimParityError};

pub mod catalog;
pub mod cli;
pub mod compare;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod result;
pub mod store;
pub mod transport;
