//! Domain layer: config model types, the human input form entity and the
//! repository traits the engine persists through.

pub mod human_input;
pub mod model;
pub mod repository;
