pub mod condition;

pub use condition::{evaluate_case, evaluate_cases, evaluate_condition, ELSE_CASE_ID};
