use crate::charts::AccChart;
use crate::config::Config;
use crate::connection::{start_run, RunSettings};
use crate::device_scanner::{scan_devices, BluetoothDevice};
use crate::error::ScanError;
use crate::parser::DeviceFamily;
use crate::recorder::{build_path, default_label};
use crate::sensor::{SensorUpdate, SessionPlan, SessionState, Severity, StopSignal};
use crate::timeseries::AccelerationSeries;
use crate::ui::styles;
use iced::widget::{button, column, container, pick_list, row, scrollable, text, text_input};
use iced::{Alignment, Element, Length, Subscription, Task};
use plotters_iced::ChartWidget;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

pub const SLOT_COUNT: usize = 2;

const CHART_CAPACITY: usize = 400;

/// One of the two positions a sensor can be assigned to
pub struct DeviceSlot {
    pub device: Option<BluetoothDevice>,
    /// Text field contents, applied by Save Inputs
    pub label_input: String,
    pub label: String,
    pub output_path: Option<PathBuf>,
    pub state: SessionState,
    lines: VecDeque<String>,
    series: AccelerationSeries,
}

impl DeviceSlot {
    fn new() -> Self {
        Self {
            device: None,
            label_input: String::new(),
            label: String::new(),
            output_path: None,
            state: SessionState::Idle,
            lines: VecDeque::new(),
            series: AccelerationSeries::new(CHART_CAPACITY),
        }
    }

    fn push_line(&mut self, line: String, limit: usize) {
        self.lines.push_back(line);
        while self.lines.len() > limit {
            self.lines.pop_front();
        }
    }

    fn reset_display(&mut self) {
        self.lines.clear();
        self.series.clear();
        self.state = SessionState::Idle;
    }
}

// Iced Application State
pub struct ImuLogger {
    config: Config,
    pub slots: [DeviceSlot; SLOT_COUNT],
    pub available_devices: Vec<BluetoothDevice>,
    pub scanning: bool,
    pub running: bool,
    pub status: Option<(String, Severity)>,
    stop: StopSignal,
    sender: Sender<SensorUpdate>,
    receiver: Receiver<SensorUpdate>,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    ScanDevices,
    DevicesScanned(Result<Vec<BluetoothDevice>, ScanError>),
    SelectDevice(usize, BluetoothDevice),
    LabelChanged(usize, String),
    SaveInputs,
    Start,
    Stop,
}

impl ImuLogger {
    pub fn new(config: Config) -> (Self, Task<Message>) {
        let (sender, receiver) = mpsc::channel();
        (
            ImuLogger {
                config,
                slots: [DeviceSlot::new(), DeviceSlot::new()],
                available_devices: Vec::new(),
                scanning: false,
                running: false,
                status: None,
                stop: StopSignal::new(),
                sender,
                receiver,
                worker: None,
            },
            Task::none(),
        )
    }

    fn set_status(&mut self, message: impl Into<String>, severity: Severity) {
        self.status = Some((message.into(), severity));
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                // Process all pending messages without blocking
                while let Ok(update) = self.receiver.try_recv() {
                    self.apply(update);
                }
                Task::none()
            }
            Message::ScanDevices => {
                self.scanning = true;
                self.set_status("Scanning for devices...", Severity::Info);
                Task::perform(scan_devices(self.config.clone()), Message::DevicesScanned)
            }
            Message::DevicesScanned(result) => {
                self.scanning = false;
                match result {
                    Ok(devices) if devices.is_empty() => {
                        self.available_devices.clear();
                        self.set_status("No devices found.", Severity::Error);
                    }
                    Ok(devices) => {
                        self.available_devices = devices;
                        self.set_status("Devices discovered. Select from dropdown.", Severity::Info);
                    }
                    Err(e) => {
                        log::error!("Error scanning devices: {}", e);
                        self.set_status(e.to_string(), Severity::Error);
                    }
                }
                Task::none()
            }
            Message::SelectDevice(slot, device) => {
                if self.running {
                    log::warn!("Ignoring device selection during a run");
                } else if let Some(target) = self.slots.get_mut(slot) {
                    log::info!("Device {} selected: {}", slot + 1, device);
                    target.device = Some(device);
                }
                Task::none()
            }
            Message::LabelChanged(slot, value) => {
                if !self.running {
                    if let Some(target) = self.slots.get_mut(slot) {
                        target.label_input = value;
                    }
                }
                Task::none()
            }
            Message::SaveInputs => {
                if !self.running {
                    self.save_inputs();
                }
                Task::none()
            }
            Message::Start => {
                if !self.running {
                    self.start();
                }
                Task::none()
            }
            Message::Stop => {
                if self.running {
                    log::info!("Stop event triggered.");
                    self.stop.set();
                    self.set_status("Stopping...", Severity::Info);
                }
                Task::none()
            }
        }
    }

    fn apply(&mut self, update: SensorUpdate) {
        match update {
            SensorUpdate::State { slot, state } => {
                if let Some(target) = self.slots.get_mut(slot) {
                    target.state = state;
                }
            }
            SensorUpdate::Sample {
                slot,
                relative_secs,
                sample,
                line,
            } => {
                let limit = self.config.display_lines;
                if let Some(target) = self.slots.get_mut(slot) {
                    target.series.push(relative_secs, &sample);
                    target.push_line(line, limit);
                }
            }
            SensorUpdate::Status { message, severity } => {
                self.set_status(message, severity);
            }
            SensorUpdate::RunFinished => {
                self.running = false;
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        log::error!("Run worker panicked");
                    }
                }
                if !matches!(self.status, Some((_, Severity::Error))) {
                    self.set_status("Collection stopped.", Severity::Info);
                }
            }
        }
    }

    fn save_inputs(&mut self) {
        let dir = self.config.output_dir();
        let now = chrono::Local::now().naive_local();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.label = slot.label_input.trim().to_string();
            slot.output_path = slot
                .device
                .as_ref()
                .map(|device| build_path(&dir, &device.name, &slot.label, index, &now));
        }

        let labels: Vec<&str> = self.slots.iter().map(|s| s.label.as_str()).collect();
        log::info!("Patient names saved: {:?}", labels);
        self.set_status("Inputs saved successfully!", Severity::Info);
    }

    fn start(&mut self) {
        let dir = self.config.output_dir();
        let now = chrono::Local::now().naive_local();
        let mut plans = Vec::new();
        let mut problems = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(device) = &slot.device else {
                log::info!("Device {}: no device selected, skipping", index + 1);
                continue;
            };

            let family = match DeviceFamily::identify(&device.name, &device.address, &self.config) {
                Ok(family) => family,
                Err(e) => {
                    log::error!("Device {}: {}", index + 1, e);
                    problems.push(format!("Device {}: {}", index + 1, e));
                    continue;
                }
            };

            // Fixed for the whole session
            let output_path = build_path(&dir, &device.name, &slot.label, index, &now);
            plans.push(SessionPlan {
                slot: index,
                address: device.address.clone(),
                device_name: device.name.clone(),
                family,
                output_path: output_path.clone(),
            });
            slot.output_path = Some(output_path);
            slot.reset_display();
        }

        if plans.is_empty() {
            if problems.is_empty() {
                problems.push("No device selected. Discover and select a device first.".to_string());
            }
            self.set_status(problems.join("; "), Severity::Error);
            return;
        }

        let settings = RunSettings {
            poll_interval: self.config.poll_interval(),
            scan_duration: self.config.scan_duration(),
        };

        match start_run(plans, settings, &self.stop, self.sender.clone()) {
            Ok(worker) => {
                self.worker = Some(worker);
                self.running = true;
                if problems.is_empty() {
                    self.set_status("Collecting data...", Severity::Info);
                } else {
                    self.set_status(problems.join("; "), Severity::Error);
                }
            }
            Err(e) => {
                log::error!("Failed to start worker thread: {}", e);
                self.set_status(format!("Failed to start: {}", e), Severity::Error);
            }
        }
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(std::time::Duration::from_millis(16)).map(|_| Message::Tick)
    }

    pub fn view(&'_ self) -> Element<'_, Message> {
        let controls = self.create_controls();

        let status: Element<'_, Message> = match &self.status {
            Some((message, severity)) => text(message.as_str())
                .color(styles::status_color(*severity))
                .into(),
            None => text("").into(),
        };

        let displays = row![self.create_slot_view(0), self.create_slot_view(1)].spacing(20);

        let content = column![controls, status, displays].spacing(15).padding(20);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn create_controls(&self) -> Element<'_, Message> {
        let discover = button(text(if self.scanning {
            "Scanning..."
        } else {
            "Discover Devices"
        }))
        .on_press_maybe((!self.scanning && !self.running).then_some(Message::ScanDevices))
        .padding(10);

        let mut controls = column![discover].spacing(10);

        for (index, slot) in self.slots.iter().enumerate() {
            let picker = pick_list(
                self.available_devices.as_slice(),
                slot.device.clone(),
                move |device| Message::SelectDevice(index, device),
            )
            .placeholder("Select a device")
            .width(Length::Fixed(320.0));

            controls = controls.push(
                row![
                    text(format!("Device {}:", index + 1)).width(Length::Fixed(90.0)),
                    picker,
                    text(styles::session_state_label(slot.state)),
                ]
                .spacing(10)
                .align_y(Alignment::Center),
            );
        }

        for (index, slot) in self.slots.iter().enumerate() {
            let input = text_input(&default_label(index), &slot.label_input).width(Length::Fixed(320.0));
            let input = if self.running {
                input
            } else {
                input.on_input(move |value| Message::LabelChanged(index, value))
            };

            controls = controls.push(
                row![
                    text(format!("Position {}:", index + 1)).width(Length::Fixed(90.0)),
                    input,
                ]
                .spacing(10)
                .align_y(Alignment::Center),
            );
        }

        let save = button(text("Save Inputs"))
            .on_press_maybe((!self.running).then_some(Message::SaveInputs))
            .padding(10);

        let start = button(text("Start"))
            .on_press_maybe((!self.running).then_some(Message::Start))
            .padding(10)
            .style(styles::start_button_style());

        let stop = button(text("Stop"))
            .on_press_maybe(self.running.then_some(Message::Stop))
            .padding(10)
            .style(styles::stop_button_style());

        controls.push(save).push(row![start, stop].spacing(10)).into()
    }

    fn create_slot_view(&self, index: usize) -> Element<'_, Message> {
        let slot = &self.slots[index];

        let title = text(format!("Device {} Data:", index + 1)).size(16);

        let file_name = slot
            .output_path
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "No output file yet".to_string());

        // Newest first so the latest sample is visible without scrolling
        let lines = column(
            slot.lines
                .iter()
                .rev()
                .map(|line| text(line.as_str()).size(12).into()),
        )
        .spacing(2);

        let log = container(scrollable(lines).height(Length::Fill))
            .style(container::bordered_box)
            .padding(5)
            .width(Length::Fill)
            .height(Length::Fixed(180.0));

        let chart = ChartWidget::new(AccChart {
            series: &slot.series,
            caption: format!("Device {} acceleration", index + 1),
        })
        .width(Length::Fill)
        .height(Length::Fixed(220.0));

        column![title, text(file_name).size(12), log, chart]
            .spacing(8)
            .width(Length::FillPortion(1))
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Acceleration;
    use tempfile::tempdir;

    fn app_in(dir: &std::path::Path) -> ImuLogger {
        let config = Config {
            output_dir: Some(dir.to_path_buf()),
            display_lines: 3,
            ..Config::default()
        };
        ImuLogger::new(config).0
    }

    fn esp32() -> BluetoothDevice {
        BluetoothDevice::new("ESP32C3_IMU", "40:4C:CA:8C:60:5A")
    }

    #[test]
    fn test_save_inputs_previews_paths() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());

        let _ = app.update(Message::SelectDevice(0, esp32()));
        let _ = app.update(Message::LabelChanged(0, "John Doe".to_string()));
        let _ = app.update(Message::SaveInputs);

        assert_eq!(app.slots[0].label, "John Doe");
        let path = app.slots[0].output_path.as_ref().unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("acceleration_data_ESP32C3_IMU_John_Doe_data_"));
        assert!(app.slots[1].output_path.is_none());
        assert_eq!(
            app.status,
            Some(("Inputs saved successfully!".to_string(), Severity::Info))
        );
    }

    #[test]
    fn test_start_without_devices_reports_error() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());

        let _ = app.update(Message::Start);

        assert!(!app.running);
        assert!(matches!(&app.status, Some((msg, Severity::Error)) if msg.contains("No device selected")));
    }

    #[test]
    fn test_start_with_unknown_device_reports_error() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());

        let _ = app.update(Message::SelectDevice(1, BluetoothDevice::new("RandomDevice", "AA:BB")));
        let _ = app.update(Message::Start);

        assert!(!app.running);
        assert!(matches!(&app.status, Some((msg, Severity::Error)) if msg.contains("Unknown device")));
    }

    #[test]
    fn test_inputs_locked_while_running() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());
        let _ = app.update(Message::SelectDevice(0, esp32()));
        let _ = app.update(Message::SaveInputs);
        let saved_path = app.slots[0].output_path.clone();
        app.running = true;

        let _ = app.update(Message::SelectDevice(0, BluetoothDevice::new("CIRCUITPYc67c", "11:22")));
        let _ = app.update(Message::LabelChanged(0, "Other".to_string()));
        let _ = app.update(Message::SaveInputs);

        assert_eq!(app.slots[0].device, Some(esp32()));
        assert!(app.slots[0].label_input.is_empty());
        assert_eq!(app.slots[0].output_path, saved_path);
    }

    #[test]
    fn test_tick_applies_sensor_updates() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());
        app.running = true;

        app.sender
            .send(SensorUpdate::State { slot: 1, state: SessionState::Subscribed })
            .unwrap();
        for i in 0..5 {
            app.sender
                .send(SensorUpdate::Sample {
                    slot: 1,
                    relative_secs: i as f64,
                    sample: Acceleration { x: 1.0, y: 2.0, z: 3.0 },
                    line: format!("line {}", i),
                })
                .unwrap();
        }
        let _ = app.update(Message::Tick);

        assert_eq!(app.slots[1].state, SessionState::Subscribed);
        let lines: Vec<&str> = app.slots[1].lines.iter().map(String::as_str).collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(app.slots[0].state, SessionState::Idle);

        app.sender.send(SensorUpdate::RunFinished).unwrap();
        let _ = app.update(Message::Tick);
        assert!(!app.running);
    }

    #[test]
    fn test_devices_scanned() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());

        let _ = app.update(Message::DevicesScanned(Ok(Vec::new())));
        assert_eq!(app.status, Some(("No devices found.".to_string(), Severity::Error)));

        let _ = app.update(Message::DevicesScanned(Ok(vec![esp32()])));
        assert_eq!(app.available_devices, vec![esp32()]);
        assert_eq!(app.status.as_ref().map(|s| s.1), Some(Severity::Info));

        let _ = app.update(Message::DevicesScanned(Err(ScanError::NoAdapters)));
        assert!(matches!(&app.status, Some((msg, Severity::Error)) if msg.contains("adapters")));
    }

    #[test]
    fn test_stop_sets_shared_signal() {
        let dir = tempdir().unwrap();
        let mut app = app_in(dir.path());

        let _ = app.update(Message::Stop);
        assert!(!app.stop.is_set());

        app.running = true;
        let _ = app.update(Message::Stop);
        assert!(app.stop.is_set());
    }
}
