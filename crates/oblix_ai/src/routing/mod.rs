//! Oblix Routing System
//!
//! Complexity classification, agent-driven tier selection and execution
//! with a single fallback hop.

mod complexity_classifier;
mod executor;
mod router;

pub use complexity_classifier::*;
pub use executor::*;
pub use router::*;
