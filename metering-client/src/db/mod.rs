pub mod cost_queries;
pub mod sample_queries;
pub mod schema;
