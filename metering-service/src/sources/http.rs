use std::{net::SocketAddr, sync::Arc};

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::{Envelope, RawMessage, SourceError, TelemetrySource, TelemetryStream};

#[derive(Clone)]
struct SharedSender {
    tx: mpsc::Sender<Envelope<RawMessage>>,
}

/// Accepts telemetry over `POST /ingest/telemetry`, one JSON message per request.
///
/// The body is forwarded untouched; decoding happens in the ingestor so both
/// transports reject malformed payloads the same way.
#[derive(Clone)]
pub struct HttpSource {
    receiver: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Envelope<RawMessage>>>>>,
}

impl HttpSource {
    pub async fn new(addr: SocketAddr, channel_capacity: usize) -> Result<Self, SourceError> {
        let (tx, rx) = mpsc::channel(channel_capacity);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| SourceError::Setup(format!("failed to bind {addr}: {e}")))?;

        tokio::spawn(async move {
            tracing::info!(%addr, "HTTP telemetry source listening");
            if let Err(e) = axum::serve(listener, router(tx).into_make_service()).await {
                tracing::error!(error = %e, "HTTP telemetry source server error");
            }
        });

        Ok(Self {
            receiver: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        })
    }
}

fn router(tx: mpsc::Sender<Envelope<RawMessage>>) -> Router {
    Router::new()
        .route("/ingest/telemetry", post(ingest_telemetry))
        .with_state(SharedSender { tx })
}

#[async_trait::async_trait]
impl TelemetrySource for HttpSource {
    async fn stream(&self) -> Result<TelemetryStream, SourceError> {
        let rx = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| SourceError::Setup("HTTP stream already taken".to_string()))?;

        Ok(Box::pin(ReceiverStream::new(rx).map(Ok)))
    }
}

async fn ingest_telemetry(State(sender): State<SharedSender>, body: Bytes) -> StatusCode {
    metrics::counter!("http_ingest_requests_total").increment(1);

    if sender.tx.send(Envelope::now(body.to_vec())).await.is_err() {
        // Pipeline is gone; nothing will consume the message.
        metrics::counter!("http_ingest_failed_total").increment(1);
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handler_forwards_body_and_reports_closed_pipeline() {
        let (tx, mut rx) = mpsc::channel(1);
        let state = SharedSender { tx };

        let status = ingest_telemetry(State(state.clone()), Bytes::from_static(b"{\"power\":1}")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let env = rx.recv().await.expect("forwarded");
        assert_eq!(env.payload, b"{\"power\":1}".to_vec());

        drop(rx);
        let status = ingest_telemetry(State(state), Bytes::from_static(b"{}")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn stream_can_only_be_taken_once() {
        let source = HttpSource::new("127.0.0.1:0".parse().unwrap(), 4)
            .await
            .expect("bind ephemeral port");

        assert!(source.stream().await.is_ok());
        assert!(matches!(source.stream().await, Err(SourceError::Setup(_))));
    }
}
