//! 轮询循环 - 采样、检测、上报

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SamplingMode;
use crate::delivery::{DeliveryChannel, DeliveryOutcome};
use crate::detector::{
    ObservedState, RestartCheck, RestartDetector, Transition, TransitionDetector, TransitionKind,
};
use crate::error::Result;
use crate::sampler::StatusSampler;
use crate::state_file::LastValueFile;
use crate::status::ServiceStatus;

/// Loop timing
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub poll_interval: Duration,
    pub unknown_backoff: Duration,
}

enum Tracker {
    Status(TransitionDetector),
    Timestamp(RestartDetector),
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub transition: Option<Transition>,
    pub restart: Option<RestartCheck>,
    pub delivery: Option<DeliveryOutcome>,
    pub sampling_failed: bool,
}

/// The host agent's control loop
pub struct MonitorAgent {
    sampler: StatusSampler,
    channel: Arc<DeliveryChannel>,
    tracker: Tracker,
    state_file: Option<LastValueFile>,
    timing: LoopTiming,
}

impl MonitorAgent {
    /// Build the agent, seeding the baseline from `state_file` when it holds a usable value
    pub fn new(
        sampler: StatusSampler,
        channel: Arc<DeliveryChannel>,
        mode: SamplingMode,
        state_file: Option<LastValueFile>,
        timing: LoopTiming,
    ) -> Self {
        let stored = state_file.as_ref().and_then(LastValueFile::load);

        let tracker = match mode {
            SamplingMode::Status => {
                let state = match stored.as_deref().map(str::parse::<ServiceStatus>) {
                    Some(Ok(status)) => {
                        info!(status = %status, "Restored last known status");
                        ObservedState::seeded(status)
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Ignoring unusable state file content");
                        ObservedState::default()
                    }
                    None => ObservedState::default(),
                };
                Tracker::Status(TransitionDetector::with_state(state))
            }
            SamplingMode::Timestamp => {
                if let Some(ts) = &stored {
                    info!(timestamp = %ts, "Restored last activation timestamp");
                }
                Tracker::Timestamp(RestartDetector::new(stored))
            }
        };

        Self {
            sampler,
            channel,
            tracker,
            state_file,
            timing,
        }
    }

    pub fn channel(&self) -> &Arc<DeliveryChannel> {
        &self.channel
    }

    /// Detector memory, status mode only
    pub fn observed_state(&self) -> Option<&ObservedState> {
        match &self.tracker {
            Tracker::Status(detector) => Some(detector.state()),
            Tracker::Timestamp(_) => None,
        }
    }

    /// One iteration: sample, classify, maybe deliver
    pub async fn tick(&mut self) -> TickReport {
        if matches!(self.tracker, Tracker::Status(_)) {
            self.tick_status().await
        } else {
            self.tick_timestamp().await
        }
    }

    async fn tick_status(&mut self) -> TickReport {
        let Tracker::Status(detector) = &mut self.tracker else {
            return TickReport::default();
        };

        let sample = self.sampler.sample().await;
        let sampling_failed = sample.is_failure();
        let transition = detector.observe(sample.status);
        if detector.was_ever_active() {
            self.channel.mark_active();
        }

        let service = self.sampler.service();
        let mut delivery = None;
        match transition.kind {
            TransitionKind::Uninitialized => {
                info!(service = %service, status = %transition.current, "Baseline status recorded");
                self.persist(transition.current.as_str());
            }
            TransitionKind::NoChange => {
                trace!(service = %service, status = %transition.current, "No change");
            }
            TransitionKind::Changed => {
                info!(
                    service = %service,
                    from = ?transition.previous.map(|s| s.as_str()),
                    to = %transition.current,
                    "Service status changed"
                );
                self.persist(transition.current.as_str());
                let outcome = self.channel.notify(&transition).await;
                debug!(outcome = ?outcome, "Delivery outcome");
                delivery = Some(outcome);
            }
        }

        TickReport {
            transition: Some(transition),
            restart: None,
            delivery,
            sampling_failed,
        }
    }

    async fn tick_timestamp(&mut self) -> TickReport {
        let timestamp = match self.sampler.sample_timestamp().await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(service = %self.sampler.service(), error = %e, "Failed to read activation timestamp");
                return TickReport {
                    sampling_failed: true,
                    ..Default::default()
                };
            }
        };

        let Tracker::Timestamp(detector) = &mut self.tracker else {
            return TickReport::default();
        };
        let check = detector.observe(&timestamp);

        let service = self.sampler.service();
        let mut delivery = None;
        match &check {
            RestartCheck::Initialized { current } => {
                info!(service = %service, timestamp = %current, "Initializing restart monitoring");
            }
            RestartCheck::Restarted { previous, current } => {
                info!(service = %service, previous = %previous, current = %current, "Service has restarted");
                delivery = Some(self.channel.notify_restart(&check).await);
            }
            RestartCheck::NoRestart => {
                trace!(service = %service, "No restart detected");
            }
        }
        if let Some(value) = check.changed_value() {
            self.persist(value);
        }

        TickReport {
            transition: None,
            restart: Some(check),
            delivery,
            sampling_failed: false,
        }
    }

    fn persist(&self, value: &str) {
        if let Some(file) = &self.state_file {
            file.store_or_warn(value);
        }
    }

    /// Tick until `cancel` fires, then close the transport.
    ///
    /// A tick in progress always completes before shutdown.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.timing.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            service = %self.sampler.service(),
            interval_ms = self.timing.poll_interval.as_millis() as u64,
            "Monitor loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.tick().await;
            self.channel.maybe_reconnect();

            if report.sampling_failed && !self.timing.unknown_backoff.is_zero() {
                debug!(
                    backoff_ms = self.timing.unknown_backoff.as_millis() as u64,
                    "Backing off after sampling failure"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.timing.unknown_backoff) => {}
                }
            }
        }

        info!("Monitor loop stopping, closing collector connection");
        self.channel.close().await;
        Ok(())
    }
}
