//! Data model: variable declarations, the columnar dataset and passive
//! derivation rules.

mod dataset;
pub mod passive;
pub mod schema;

pub use dataset::Dataset;
pub(crate) use dataset::passive_order;
pub use passive::PassiveFormula;
pub use schema::{MissingSentinel, Schema, VariableRole, VariableSpec, VariableType};
