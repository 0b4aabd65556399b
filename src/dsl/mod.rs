pub mod parser;
pub mod schema;

pub use parser::{graph_config_from_value, parse_graph_config, GraphConfigFormat};
pub use schema::*;
