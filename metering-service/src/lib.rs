pub mod aggregation;
pub mod clock;
pub mod config;
pub mod cost;
pub mod ingest;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sources;
pub mod store;
pub mod transform;

pub use aggregation::{AggregationScheduler, SchedulerHandle, TickReport};
pub use pipeline::{Envelope, IngestPipeline};
