use std::sync::Arc;

use metering_client::domain::Sample;

use crate::{
    clock::Clock,
    store::{SampleStore, StoreError},
    transform,
};

/// Longest slice of a rejected message kept for logs.
const PAYLOAD_PREVIEW_BYTES: usize = 256;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String, payload: String },
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl IngestError {
    pub fn malformed(reason: impl Into<String>, raw: &[u8]) -> Self {
        let end = raw.len().min(PAYLOAD_PREVIEW_BYTES);
        IngestError::MalformedPayload {
            reason: reason.into(),
            payload: String::from_utf8_lossy(&raw[..end]).into_owned(),
        }
    }
}

/// Turns raw telemetry messages into stored samples.
pub struct Ingestor<K: SampleStore + ?Sized> {
    store: Arc<K>,
    clock: Arc<dyn Clock>,
}

impl<K: SampleStore + ?Sized> Clone for Ingestor<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<K: SampleStore + ?Sized> Ingestor<K> {
    pub fn new(store: Arc<K>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Decode, stamp with arrival time, and append one sample.
    ///
    /// Exactly one store write happens for a valid message and none for an
    /// invalid one. Failures are returned, not retried.
    pub async fn handle(&self, raw: &[u8]) -> Result<Sample, IngestError> {
        let payload = match transform::parse_telemetry(raw) {
            Ok(p) => p,
            Err(e) => {
                metrics::counter!("ingest_malformed_total").increment(1);
                return Err(e);
            }
        };

        let sample = payload.into_sample(self.clock.now());
        if let Err(e) = self.store.append(&sample).await {
            metrics::counter!("ingest_store_errors_total").increment(1);
            return Err(e.into());
        }

        metrics::counter!("samples_ingested_total").increment(1);
        Ok(sample)
    }
}
