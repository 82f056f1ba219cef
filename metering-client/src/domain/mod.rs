mod cost_aggregate;
mod granularity;
mod sample;

pub use cost_aggregate::CostAggregate;
pub use granularity::{Granularity, UnknownGranularity};
pub use sample::Sample;
