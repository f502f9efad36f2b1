//! Bucket notification consumer.
//!
//! Subscribes to object-creation notifications on the source bucket and hands
//! every record to the [`TransformPipeline`], one at a time, in delivery
//! order. Per-record and per-event failures are logged and never stop the
//! loop. Losing an established stream leads to resubscribing until it
//! succeeds; only a stop request, or failing the very first subscription
//! within the startup budget, ends the consumer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;

use crate::adapters::{NotificationStream, ObjectStore};
use crate::core::{ProcessOutcome, ReconnectPolicy, TransformPipeline};
use crate::domain::{NotificationEvent, OBJECT_CREATED_EVENTS};

/// Consumer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Subscribing,
    WaitingForEvent,
    ProcessingEvent,
    Stopped,
}

/// Counters collected while the consumer ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub events: usize,
    pub records: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stream_errors: usize,
    pub resubscriptions: usize,
}

impl ConsumerReport {
    fn record_outcome(&mut self, outcome: &ProcessOutcome) {
        self.records += 1;
        match outcome {
            ProcessOutcome::Uploaded(_) => self.uploaded += 1,
            ProcessOutcome::Skipped { .. } => self.skipped += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Whether a subscription attempt may give up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Never subscribed yet: bounded by the startup budget
    Startup,
    /// Was subscribed before: retry until stopped
    Running,
}

/// Drives the pipeline from the notification stream
pub struct NotificationConsumer {
    store: Arc<dyn ObjectStore>,
    pipeline: Arc<TransformPipeline>,
    reconnect: ReconnectPolicy,
    state: watch::Sender<ConsumerState>,
}

impl NotificationConsumer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pipeline: Arc<TransformPipeline>,
        reconnect: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            store,
            pipeline,
            reconnect,
            state,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Run on a background task
    pub fn spawn(self) -> ConsumerHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let state = self.state.subscribe();

        let task = tokio::spawn(async move {
            let result = self.run(&mut stop_rx).await;
            if let Err(e) = &result {
                tracing::error!("Consumer error: {:#}", e);
            }
            result
        });

        ConsumerHandle {
            stop_tx,
            state,
            task,
        }
    }

    /// Consume notifications until `stop_rx` fires (or its sender is dropped).
    ///
    /// A stop request is honoured while waiting for an event, while backing
    /// off between subscription attempts, or once the record being processed
    /// is done.
    pub async fn run(&self, stop_rx: &mut mpsc::Receiver<()>) -> Result<ConsumerReport> {
        let mut report = ConsumerReport::default();
        let bucket = self.pipeline.buckets().source.clone();
        let mut phase = Phase::Startup;

        'subscription: loop {
            self.transition(ConsumerState::Subscribing);
            let subscribed = self.subscribe(&bucket, phase, stop_rx).await;
            let mut stream = match subscribed {
                Ok(Some(stream)) => stream,
                Ok(None) => break 'subscription,
                Err(e) => {
                    self.transition(ConsumerState::Stopped);
                    return Err(e);
                }
            };
            if phase == Phase::Startup {
                tracing::info!(bucket = %bucket, store = self.store.name(), "Starting bucket listener");
                phase = Phase::Running;
            }

            loop {
                self.transition(ConsumerState::WaitingForEvent);

                let next = tokio::select! {
                    _ = stop_rx.recv() => break 'subscription,
                    next = stream.next() => next,
                };

                let Some(event) = next else {
                    tracing::warn!(bucket = %bucket, "Notification stream ended, resubscribing");
                    report.resubscriptions += 1;
                    if !pause(self.reconnect.initial_delay(), stop_rx).await {
                        break 'subscription;
                    }
                    continue 'subscription;
                };

                self.transition(ConsumerState::ProcessingEvent);
                if !self.handle_event(event, &mut report, stop_rx).await {
                    break 'subscription;
                }
            }
        }

        self.transition(ConsumerState::Stopped);
        tracing::info!(
            events = report.events,
            records = report.records,
            uploaded = report.uploaded,
            failed = report.failed,
            "Bucket listener stopped"
        );

        Ok(report)
    }

    /// Process one event. Returns false if a stop was requested meanwhile.
    async fn handle_event(
        &self,
        event: NotificationEvent,
        report: &mut ConsumerReport,
        stop_rx: &mut mpsc::Receiver<()>,
    ) -> bool {
        report.events += 1;

        if let Some(err) = &event.stream_error {
            tracing::error!("{}", err);
            report.stream_errors += 1;
        }

        for record in &event.records {
            let outcome = self.pipeline.process(record).await;
            report.record_outcome(&outcome);

            if stop_requested(stop_rx) {
                return false;
            }
        }

        true
    }

    /// Establish the subscription, backing off between failed attempts.
    ///
    /// `Ok(None)` means a stop was requested while backing off. Only the
    /// startup phase can give up.
    async fn subscribe(
        &self,
        bucket: &str,
        phase: Phase,
        stop_rx: &mut mpsc::Receiver<()>,
    ) -> Result<Option<NotificationStream>> {
        let mut backoff = self.reconnect.backoff();

        loop {
            let err = match self.store.subscribe(bucket, &[OBJECT_CREATED_EVENTS]).await {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) => e,
            };

            let delay = backoff.fail();
            if phase == Phase::Startup && backoff.exhausted_at_startup() {
                return Err(err).with_context(|| {
                    format!(
                        "Cannot subscribe to notifications on {} after {} attempts",
                        bucket,
                        backoff.failures()
                    )
                });
            }

            tracing::warn!(
                bucket = %bucket,
                attempt = backoff.failures(),
                ?delay,
                "Cannot subscribe to notifications: {:#}",
                err
            );
            if !pause(delay, stop_rx).await {
                return Ok(None);
            }
        }
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::trace!(from = ?previous, to = ?next, "Consumer state");
        }
    }
}

/// Sleep for `delay`. Returns false if a stop arrived first.
async fn pause(delay: Duration, stop_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        _ = stop_rx.recv() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn stop_requested(stop_rx: &mut mpsc::Receiver<()>) -> bool {
    matches!(stop_rx.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
}

/// Handle to control a spawned consumer
pub struct ConsumerHandle {
    stop_tx: mpsc::Sender<()>,
    state: watch::Receiver<ConsumerState>,
    task: tokio::task::JoinHandle<Result<ConsumerReport>>,
}

impl ConsumerHandle {
    /// Current lifecycle state of the consumer
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Ask the consumer to stop and wait for it
    pub async fn stop(self) -> Result<ConsumerReport> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?
    }

    /// Stop once `shutdown` resolves, unless the consumer finishes first
    pub async fn stop_on<F>(mut self, shutdown: F) -> Result<ConsumerReport>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            result = &mut self.task => return result?,
            _ = shutdown => {}
        }
        self.stop().await
    }

    /// Wait for the consumer to finish on its own
    pub async fn join(self) -> Result<ConsumerReport> {
        let ConsumerHandle { stop_tx, task, .. } = self;
        let result = task.await?;
        drop(stop_tx);
        result
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
