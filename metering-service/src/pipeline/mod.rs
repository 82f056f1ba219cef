use std::{pin::Pin, time::SystemTime};

use futures::{Stream, StreamExt};

use crate::{
    ingest::{IngestError, Ingestor},
    store::SampleStore,
};

/// Raw message body as delivered by the transport.
pub type RawMessage = Vec<u8>;

pub type TelemetryStream = Pin<Box<dyn Stream<Item = Result<Envelope<RawMessage>, SourceError>> + Send>>;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("source setup failed: {0}")]
    Setup(String),
    #[error("source error: {0}")]
    Transport(String),
}

/// Delivers raw telemetry messages from one channel.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Take the message stream. Sources support a single consumer.
    async fn stream(&self) -> Result<TelemetryStream, SourceError>;
}

/// Drains a telemetry source into the ingestor.
///
/// Messages are handled concurrently, up to `max_in_flight` at a time.
/// Per-message failures are logged and counted; they never stop the pipeline.
pub struct IngestPipeline<S, K: SampleStore + ?Sized> {
    pub source: S,
    pub ingestor: Ingestor<K>,
    pub max_in_flight: usize,
}

impl<S, K> IngestPipeline<S, K>
where
    S: TelemetrySource,
    K: SampleStore + ?Sized,
{
    /// Runs until the source stream ends.
    pub async fn run(self) -> Result<(), SourceError> {
        let stream = self.source.stream().await?;
        let ingestor = &self.ingestor;

        stream
            .for_each_concurrent(self.max_in_flight.max(1), |item| async move {
                match item {
                    Ok(env) => dispatch(ingestor, env).await,
                    Err(e) => {
                        metrics::counter!("telemetry_source_errors_total").increment(1);
                        tracing::error!(error = %e, "error in telemetry source");
                    }
                }
            })
            .await;

        tracing::info!("telemetry source ended");
        Ok(())
    }
}

async fn dispatch<K: SampleStore + ?Sized>(ingestor: &Ingestor<K>, env: Envelope<RawMessage>) {
    match ingestor.handle(&env.payload).await {
        Ok(sample) => {
            tracing::debug!(
                captured_at = %sample.captured_at,
                power = sample.power,
                "sample stored"
            );
            if let Ok(dur) = SystemTime::now().duration_since(env.received_at) {
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
            }
        }
        Err(IngestError::MalformedPayload { reason, payload }) => {
            tracing::error!(%reason, %payload, "dropping malformed telemetry message");
        }
        Err(e @ IngestError::StoreUnavailable(_)) => {
            tracing::error!(
                error = %e,
                payload = %String::from_utf8_lossy(&env.payload),
                "failed to store sample, message dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::MemoryStore};
    use std::sync::Arc;
    use time::macros::datetime;

    struct VecSource(Vec<Result<Envelope<RawMessage>, SourceError>>);

    #[async_trait::async_trait]
    impl TelemetrySource for VecSource {
        async fn stream(&self) -> Result<TelemetryStream, SourceError> {
            let items: Vec<_> = self
                .0
                .iter()
                .map(|item| match item {
                    Ok(env) => Ok(env.clone()),
                    Err(e) => Err(SourceError::Transport(e.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn message(power: f64) -> Result<Envelope<RawMessage>, SourceError> {
        let body = format!(
            r#"{{"voltage":220,"current":1,"power":{power},"energy":0,"frequency":50,"pf":1}}"#
        );
        Ok(Envelope::now(body.into_bytes()))
    }

    #[tokio::test]
    async fn stores_valid_messages_and_skips_bad_ones() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(datetime!(2024-03-15 14:37:52 UTC));
        let source = VecSource(vec![
            message(100.0),
            Ok(Envelope::now(b"not json".to_vec())),
            Err(SourceError::Transport("connection reset".to_string())),
            message(200.0),
        ]);

        let pipeline = IngestPipeline {
            source,
            ingestor: Ingestor::new(store.clone(), Arc::new(clock)),
            max_in_flight: 4,
        };
        pipeline.run().await.expect("pipeline runs to completion");

        let mut powers: Vec<f64> = store.samples().await.iter().map(|s| s.power).collect();
        powers.sort_by(f64::total_cmp);
        assert_eq!(powers, vec![100.0, 200.0]);
    }

    /// Log sink shared between the test and a `fmt` subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn malformed_message_is_logged_as_an_error_with_its_payload() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::ERROR)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(datetime!(2024-03-15 14:37:52 UTC));
        let missing_power =
            br#"{"voltage":220,"current":1,"energy":0,"frequency":50,"pf":1}"#.to_vec();
        let pipeline = IngestPipeline {
            source: VecSource(vec![Ok(Envelope::now(missing_power))]),
            ingestor: Ingestor::new(store.clone(), Arc::new(clock)),
            max_in_flight: 1,
        };
        pipeline.run().await.expect("pipeline runs to completion");

        assert!(store.samples().await.is_empty());
        let out = logs.contents();
        assert!(out.contains("ERROR"), "{out}");
        assert!(out.contains("dropping malformed telemetry message"), "{out}");
        assert!(out.contains(r#""voltage":220"#), "{out}");
    }
}
