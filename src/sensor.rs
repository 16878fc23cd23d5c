//! # Session Module
//!
//! One session per device slot: connect, subscribe to every notifying
//! channel, turn notifications into samples until stopped, then unsubscribe
//! and disconnect.
//!
//! ```text
//! Idle -> Connecting -> Subscribed -> Draining -> Disconnected
//!             |                                      ^
//!             +------------- connect failed ---------+
//! ```
//!
//! The session owns its parser buffer and output file; nothing it mutates
//! is reachable from the UI thread. Progress and samples are reported to the
//! UI over a `SensorUpdate` channel.

use crate::error::{ConnectionError, ParseError};
use crate::parser::{Acceleration, DeviceFamily, ParseOutcome, Parser};
use crate::recorder::{format_utc, DataFile};
use crate::transport::{DeviceLink, NotifyChannel, Transport};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Subscribed,
    Draining,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug)]
pub enum SensorUpdate {
    State {
        slot: usize,
        state: SessionState,
    },
    Sample {
        slot: usize,
        relative_secs: f64,
        sample: Acceleration,
        line: String,
    },
    Status {
        message: String,
        severity: Severity,
    },
    /// The worker thread of the current run has exited
    RunFinished,
}

/// Cooperative stop flag shared by every session of a run.
///
/// Waiters are woken as soon as the flag is set and also re-check it on a
/// fixed interval, so a stop is never missed for longer than that interval.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is set
    pub async fn wait(&self, poll_interval: Duration) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent set() cannot slip between
            notified.as_mut().enable();

            if self.is_set() {
                return;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

/// Everything fixed for a session before it connects
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub slot: usize,
    pub address: String,
    pub device_name: String,
    pub family: DeviceFamily,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub samples_written: usize,
    pub dropped: usize,
}

/// Per-notification processing: parse, append to file, forward to display
pub struct SamplePipeline {
    slot: usize,
    parser: Parser,
    file: DataFile,
    started: Option<Instant>,
    updates: Sender<SensorUpdate>,
    summary: SessionSummary,
}

impl SamplePipeline {
    pub fn new(slot: usize, family: DeviceFamily, file: DataFile, updates: Sender<SensorUpdate>) -> Self {
        Self {
            slot,
            parser: Parser::new(family),
            file,
            started: None,
            updates,
            summary: SessionSummary::default(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Process one notification, returning the samples it completed
    pub fn handle(&mut self, raw: &[u8]) -> Vec<Acceleration> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let relative_secs = started.elapsed().as_secs_f64();
        let utc = Utc::now();
        log::trace!("Device {} raw data: {:?}", self.slot + 1, raw);

        let mut recorded = Vec::new();
        let first = match self.parser.parse(raw) {
            Ok(ParseOutcome::Sample(sample)) => Some(Ok(sample)),
            Ok(ParseOutcome::Incomplete) => None,
            Err(e) => Some(Err(e)),
        };
        let mut next = first;
        while let Some(decoded) = next {
            if let Some(sample) = self.record(decoded, relative_secs, &utc) {
                recorded.push(sample);
            }
            next = self.parser.next_decoded();
        }
        recorded
    }

    fn record(
        &mut self,
        decoded: Result<Acceleration, ParseError>,
        relative_secs: f64,
        utc: &DateTime<Utc>,
    ) -> Option<Acceleration> {
        let sample = match decoded {
            Ok(sample) => sample,
            Err(e) => {
                self.summary.dropped += 1;
                log::warn!("Device {}: received invalid data, skipping notification: {}", self.slot + 1, e);
                return None;
            }
        };

        if let Err(e) = self.file.append(utc, &sample) {
            self.summary.dropped += 1;
            log::warn!("Device {}: sample not saved: {}", self.slot + 1, e);
            return None;
        }
        self.summary.samples_written += 1;

        let line = format!(
            "Device {} - Relative time: {:.3}, UTC: {}, Accel: X={:.4}, Y={:.4}, Z={:.4}",
            self.slot + 1,
            relative_secs,
            format_utc(utc),
            sample.x,
            sample.y,
            sample.z
        );
        log::debug!("{}", line);
        let _ = self.updates.send(SensorUpdate::Sample {
            slot: self.slot,
            relative_secs,
            sample,
            line,
        });

        Some(sample)
    }
}

fn report_state(updates: &Sender<SensorUpdate>, slot: usize, state: SessionState) {
    log::info!("Device {}: {:?}", slot + 1, state);
    let _ = updates.send(SensorUpdate::State { slot, state });
}

fn report_error(updates: &Sender<SensorUpdate>, slot: usize, error: &dyn std::fmt::Display) {
    let message = format!("Device {}: {}", slot + 1, error);
    log::error!("{}", message);
    let _ = updates.send(SensorUpdate::Status {
        message,
        severity: Severity::Error,
    });
}

/// Drive one session to completion. Always ends in `Disconnected`.
pub async fn run_session(
    transport: &dyn Transport,
    plan: SessionPlan,
    stop: StopSignal,
    poll_interval: Duration,
    updates: Sender<SensorUpdate>,
) -> SessionSummary {
    let slot = plan.slot;
    log::info!(
        "Device {}: connecting to {} ({})",
        slot + 1,
        plan.device_name,
        plan.address
    );
    report_state(&updates, slot, SessionState::Connecting);

    let file = match DataFile::create(plan.output_path.clone()) {
        Ok(file) => file,
        Err(e) => {
            report_error(&updates, slot, &e);
            report_state(&updates, slot, SessionState::Disconnected);
            return SessionSummary::default();
        }
    };

    // Connect runs to completion even when Stop arrives, so a link that came
    // up is always disconnected below
    let mut link = match transport.connect(&plan.address).await {
        Ok(link) => link,
        Err(e) => {
            report_error(&updates, slot, &e);
            file.discard();
            report_state(&updates, slot, SessionState::Disconnected);
            return SessionSummary::default();
        }
    };

    if stop.is_set() {
        log::info!("Device {}: stopped while connecting", slot + 1);
        file.discard();
        report_state(&updates, slot, SessionState::Draining);
        if let Err(e) = link.disconnect().await {
            report_error(&updates, slot, &e);
        }
        report_state(&updates, slot, SessionState::Disconnected);
        return SessionSummary::default();
    }

    let mut pipeline = SamplePipeline::new(slot, plan.family, file, updates.clone());
    let subscribed = receive(link.as_mut(), &plan, &stop, poll_interval, &mut pipeline).await;

    report_state(&updates, slot, SessionState::Draining);
    for channel in &subscribed {
        if let Err(e) = link.unsubscribe(channel).await {
            log::warn!("Device {}: error stopping notification: {}", slot + 1, e);
        }
    }

    if let Err(e) = link.disconnect().await {
        report_error(&updates, slot, &e);
    }
    report_state(&updates, slot, SessionState::Disconnected);

    let summary = pipeline.summary();
    log::info!(
        "Device {}: {} samples written, {} dropped. Resources freed.",
        slot + 1,
        summary.samples_written,
        summary.dropped
    );
    summary
}

/// Subscribe and process notifications until stopped or the link drops.
/// Returns the channels that were subscribed.
async fn receive(
    link: &mut dyn DeviceLink,
    plan: &SessionPlan,
    stop: &StopSignal,
    poll_interval: Duration,
    pipeline: &mut SamplePipeline,
) -> Vec<NotifyChannel> {
    let slot = plan.slot;
    let mut subscribed = Vec::new();

    let mut notifications = match link.notifications().await {
        Ok(rx) => rx,
        Err(e) => {
            report_error(&pipeline.updates, slot, &e);
            return subscribed;
        }
    };

    for channel in link.channels().into_iter().filter(|c| c.supports_notify) {
        match link.subscribe(&channel).await {
            Ok(()) => subscribed.push(channel),
            Err(e) => log::warn!("Device {}: {}", slot + 1, e),
        }
    }

    if subscribed.is_empty() {
        report_error(
            &pipeline.updates,
            slot,
            &"device offers no notifying channel".to_string(),
        );
        return subscribed;
    }

    report_state(&pipeline.updates, slot, SessionState::Subscribed);

    loop {
        tokio::select! {
            biased;
            _ = stop.wait(poll_interval) => break,
            payload = notifications.recv() => match payload {
                Some(raw) => {
                    pipeline.handle(&raw);
                }
                None => {
                    report_error(&pipeline.updates, slot, &ConnectionError::LinkLost(plan.address.clone()));
                    break;
                }
            },
        }
    }

    subscribed
}
