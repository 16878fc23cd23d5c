//! # Run Management Module
//!
//! Starts a recording run: one dedicated thread per Start, hosting a
//! single-threaded Tokio runtime on which the sessions of both slots run
//! side by side. The UI thread never touches BLE I/O.
//!
//! The stop signal is cleared before the worker thread is spawned, so a
//! stop left over from the previous run cannot end the new one.

use crate::error::ConnectionError;
use crate::sensor::{run_session, SensorUpdate, SessionPlan, SessionSummary, Severity, StopSignal};
use crate::transport::{BtleplugTransport, Transport};
use futures::future::join_all;
use std::future::Future;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub poll_interval: Duration,
    pub scan_duration: Duration,
}

/// Run every plan concurrently on the current task and wait for all of them
pub async fn run_sessions(
    transport: &dyn Transport,
    plans: Vec<SessionPlan>,
    stop: &StopSignal,
    poll_interval: Duration,
    updates: &Sender<SensorUpdate>,
) -> Vec<SessionSummary> {
    let sessions = plans
        .into_iter()
        .map(|plan| run_session(transport, plan, stop.clone(), poll_interval, updates.clone()));
    join_all(sessions).await
}

/// Start a run against the system Bluetooth adapter
pub fn start_run(
    plans: Vec<SessionPlan>,
    settings: RunSettings,
    stop: &StopSignal,
    updates: Sender<SensorUpdate>,
) -> std::io::Result<JoinHandle<()>> {
    let scan_duration = settings.scan_duration;
    start_run_with(plans, settings.poll_interval, stop, updates, move || {
        BtleplugTransport::new(scan_duration)
    })
}

/// Start a run with a caller-supplied transport.
///
/// The transport is built inside the worker's runtime; failing to build it
/// ends the run with a blocking error status.
pub fn start_run_with<T, F, Fut>(
    plans: Vec<SessionPlan>,
    poll_interval: Duration,
    stop: &StopSignal,
    updates: Sender<SensorUpdate>,
    make_transport: F,
) -> std::io::Result<JoinHandle<()>>
where
    T: Transport + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ConnectionError>>,
{
    stop.clear();
    let stop = stop.clone();

    thread::Builder::new()
        .name("ble-run".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let error = ConnectionError::RuntimeCreation(e.to_string());
                    fail_run(&updates, &error);
                    return;
                }
            };

            rt.block_on(async {
                match make_transport().await {
                    Ok(transport) => {
                        log::info!("Run started with {} session(s)", plans.len());
                        let summaries =
                            run_sessions(&transport, plans, &stop, poll_interval, &updates).await;
                        let written: usize = summaries.iter().map(|s| s.samples_written).sum();
                        log::info!("Run finished, {} samples written", written);
                    }
                    Err(e) => fail_run(&updates, &e),
                }
            });

            let _ = updates.send(SensorUpdate::RunFinished);
        })
}

fn fail_run(updates: &Sender<SensorUpdate>, error: &ConnectionError) {
    log::error!("{}", error);
    let _ = updates.send(SensorUpdate::Status {
        message: error.to_string(),
        severity: Severity::Error,
    });
}
