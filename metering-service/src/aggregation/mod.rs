//! Periodic cost aggregation over the raw sample table.
//!
//! Every tick evaluates all granularities against a single instant `now`:
//! each reads the trailing window `[now - window, now]`, converts it to a cost
//! and upserts it under the calendar bucket containing `now`. The trailing
//! window and the bucket label are independent, so a bucket row
//! is overwritten on every tick until `now` moves into the next bucket.
//!
//! After the last granularity, samples older than `now - tick_period` are
//! retired. A store failure abandons the rest of the tick (including
//! retention); whatever was already upserted stays, and the next tick
//! recomputes everything from scratch.

use std::{sync::Arc, time::Duration};

use metering_client::domain::{CostAggregate, Granularity};
use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    config::AggregationConfig,
    cost::{window_hours, CostCalculator},
    store::{AggregateStore, SampleStore, StoreError},
};

/// Trailing window length per granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub minute: Duration,
    pub hour: Duration,
    pub day: Duration,
    pub month: Duration,
}

impl Windows {
    pub fn get(&self, granularity: Granularity) -> Duration {
        match granularity {
            Granularity::Minute => self.minute,
            Granularity::Hour => self.hour,
            Granularity::Day => self.day,
            Granularity::Month => self.month,
        }
    }
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            minute: Granularity::Minute.default_window(),
            hour: Granularity::Hour.default_window(),
            day: Granularity::Day.default_window(),
            month: Granularity::Month.default_window(),
        }
    }
}

impl From<&AggregationConfig> for Windows {
    fn from(cfg: &AggregationConfig) -> Self {
        Self {
            minute: cfg.window(Granularity::Minute),
            hour: cfg.window(Granularity::Hour),
            day: cfg.window(Granularity::Day),
            month: cfg.window(Granularity::Month),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStep {
    RangeQuery,
    Upsert,
    Retention,
}

impl std::fmt::Display for TickStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TickStep::RangeQuery => "range query",
            TickStep::Upsert => "upsert",
            TickStep::Retention => "retention delete",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AggregationError {
    #[error("{step} failed{}: {source}", for_granularity(.granularity))]
    Store {
        granularity: Option<Granularity>,
        step: TickStep,
        /// Lower bound of the failed query: the window start, or the retention cutoff.
        since: OffsetDateTime,
        #[source]
        source: StoreError,
    },
    #[error("cannot look back {span:?} from {now}: out of range")]
    OutOfRange { span: Duration, now: OffsetDateTime },
}

fn for_granularity(granularity: &Option<Granularity>) -> String {
    granularity.map(|g| format!(" for {g}")).unwrap_or_default()
}

impl AggregationError {
    fn store(
        granularity: Option<Granularity>,
        step: TickStep,
        since: OffsetDateTime,
        source: StoreError,
    ) -> Self {
        AggregationError::Store {
            granularity,
            step,
            since,
            source,
        }
    }

    /// Lower bound of the query that failed, if a store call was involved.
    pub fn since(&self) -> Option<OffsetDateTime> {
        match self {
            AggregationError::Store { since, .. } => Some(*since),
            AggregationError::OutOfRange { .. } => None,
        }
    }
}

/// `now - span`, or an error when either side leaves the representable range.
fn look_back(now: OffsetDateTime, span: Duration) -> Result<OffsetDateTime, AggregationError> {
    time::Duration::try_from(span)
        .ok()
        .and_then(|d| now.checked_sub(d))
        .ok_or(AggregationError::OutOfRange { span, now })
}

/// Outcome of one successful tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub now: OffsetDateTime,
    pub written: Vec<CostAggregate>,
    /// Granularities with no samples in their window this tick.
    pub skipped: Vec<Granularity>,
    pub retention_cutoff: OffsetDateTime,
    pub retired: u64,
}

pub struct AggregationScheduler<S: SampleStore + ?Sized, A: AggregateStore + ?Sized> {
    samples: Arc<S>,
    aggregates: Arc<A>,
    calculator: CostCalculator,
    clock: Arc<dyn Clock>,
    windows: Windows,
    tick_period: Duration,
}

impl<S, A> AggregationScheduler<S, A>
where
    S: SampleStore + ?Sized + 'static,
    A: AggregateStore + ?Sized + 'static,
{
    pub fn new(
        samples: Arc<S>,
        aggregates: Arc<A>,
        calculator: CostCalculator,
        clock: Arc<dyn Clock>,
        windows: Windows,
        tick_period: Duration,
    ) -> Self {
        Self {
            samples,
            aggregates,
            calculator,
            clock,
            windows,
            tick_period,
        }
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// One tick evaluated at the clock's current time.
    pub async fn tick(&self) -> Result<TickReport, AggregationError> {
        self.tick_at(self.clock.now()).await
    }

    /// One tick evaluated at `now`.
    ///
    /// Stops at the first store error; upserts already issued are kept.
    pub async fn tick_at(&self, now: OffsetDateTime) -> Result<TickReport, AggregationError> {
        let mut written = Vec::with_capacity(Granularity::ALL.len());
        let mut skipped = Vec::new();

        for granularity in Granularity::ALL {
            let window = self.windows.get(granularity);
            let window_start = look_back(now, window)?;

            let readings = self
                .samples
                .range_query(window_start, now)
                .await
                .map_err(|e| {
                    AggregationError::store(Some(granularity), TickStep::RangeQuery, window_start, e)
                })?;

            if readings.is_empty() {
                tracing::debug!(%granularity, %window_start, %now, "no samples in window");
                skipped.push(granularity);
                continue;
            }

            let aggregate = CostAggregate {
                granularity,
                bucket_start: granularity.align(now),
                total_cost: self.calculator.compute_cost(&readings, window_hours(window)),
            };

            self.aggregates
                .upsert(&aggregate)
                .await
                .map_err(|e| {
                    AggregationError::store(Some(granularity), TickStep::Upsert, window_start, e)
                })?;

            metrics::counter!("cost_aggregates_upserted_total", "granularity" => granularity.as_str())
                .increment(1);
            tracing::debug!(
                %granularity,
                bucket_start = %aggregate.bucket_start,
                samples = readings.len(),
                total_cost = aggregate.total_cost,
                "cost aggregate upserted"
            );
            written.push(aggregate);
        }

        let retention_cutoff = look_back(now, self.tick_period)?;
        let retired = self
            .samples
            .delete_range(retention_cutoff)
            .await
            .map_err(|e| AggregationError::store(None, TickStep::Retention, retention_cutoff, e))?;
        metrics::counter!("samples_retired_total").increment(retired);

        Ok(TickReport {
            now,
            written,
            skipped,
            retention_cutoff,
            retired,
        })
    }

    /// Start the periodic loop on the current runtime.
    ///
    /// The first tick fires one period after start. Ticks never overlap: a
    /// slow tick delays the next one instead of queueing a burst. Cancellation
    /// is observed between ticks, so an in-flight tick always completes.
    pub fn spawn(self, cancel: CancellationToken) -> SchedulerHandle {
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { self.run(loop_cancel).await });
        SchedulerHandle { cancel, handle }
    }

    async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.tick_period;
        let mut interval = tokio::time::interval_at(start, self.tick_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_period_ms = self.tick_period.as_millis() as u64,
            price_per_kwh = self.calculator.price_per_kwh(),
            "aggregation scheduler starting"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let started = std::time::Instant::now();
            let now = self.clock.now();
            let outcome = self.tick_at(now).await;
            metrics::histogram!("aggregation_tick_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            metrics::counter!("aggregation_ticks_total").increment(1);

            match outcome {
                Ok(report) => {
                    tracing::debug!(
                        now = %report.now,
                        written = report.written.len(),
                        skipped = report.skipped.len(),
                        retired = report.retired,
                        "aggregation tick complete"
                    );
                }
                Err(e) => {
                    metrics::counter!("aggregation_tick_failures_total").increment(1);
                    tracing::error!(
                        error = %e,
                        %now,
                        since = ?e.since(),
                        "aggregation tick abandoned, retrying next tick"
                    );
                }
            }
        }

        tracing::info!("aggregation scheduler stopped");
    }
}

/// Owner's handle on a running scheduler loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the in-flight tick (if any) and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "aggregation scheduler task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
