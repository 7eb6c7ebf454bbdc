//! Shared fakes for the bridge tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use castbridge_core::types::DeviceId;
use castbridge_devices::{
    BusError, CastDevice, CastDeviceProvider, CastEvent, DeviceError, DeviceLink, MessageBus,
};

/// Poll a condition until it holds, panicking after two seconds.
pub(crate) async fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within two seconds");
}

/// Thread-safe list of call descriptions, shared with the test body.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

/// Bus that records everything and always succeeds.
#[derive(Debug, Default)]
pub(crate) struct RecordingBus {
    published: Mutex<Vec<(String, String, bool)>>,
    subs: Mutex<Vec<String>>,
    unsubs: Mutex<Vec<String>>,
}

impl RecordingBus {
    pub fn published(&self) -> Vec<(String, String, bool)> {
        self.published.lock().unwrap().clone()
    }

    /// Every payload published to one topic, in order.
    pub fn values_for(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload.clone())
            .collect()
    }

    /// Most recent payload published to one topic.
    pub fn last_for(&self, topic: &str) -> Option<String> {
        self.values_for(topic).pop()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subs.lock().unwrap().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubs.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string(), retain));
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BusError> {
        self.subs.lock().unwrap().push(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BusError> {
        self.unsubs.lock().unwrap().push(filter.to_string());
        Ok(())
    }
}

/// How a [`FakeDevice`] should fail its commands.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FailureKind {
    /// Every command reports a lost handle
    Fatal,
    /// Every command reports a plain command failure
    Command,
}

/// Scriptable device handle recording every command.
#[derive(Debug)]
pub(crate) struct FakeDevice {
    pub calls: CallLog,
    pub failure: Option<FailureKind>,
    pub duration: Option<f64>,
    friendly_name: String,
    cast_type: String,
    volume: f64,
}

impl FakeDevice {
    pub fn new(friendly_name: &str, cast_type: &str, volume: f64) -> Self {
        Self {
            calls: CallLog::default(),
            failure: None,
            duration: None,
            friendly_name: friendly_name.to_string(),
            cast_type: cast_type.to_string(),
            volume,
        }
    }

    fn outcome(&self) -> Result<(), DeviceError> {
        match self.failure {
            Some(FailureKind::Fatal) => Err(DeviceError::HandleLost("handle gone".to_string())),
            Some(FailureKind::Command) => Err(DeviceError::Command("refused".to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CastDevice for FakeDevice {
    fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    fn cast_type(&self) -> &str {
        &self.cast_type
    }

    fn volume_level(&self) -> f64 {
        self.volume
    }

    fn media_duration(&self) -> Option<f64> {
        self.duration
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.calls.push("disconnect");
        self.outcome()
    }

    async fn set_volume_muted(&mut self, muted: bool) -> Result<(), DeviceError> {
        self.calls.push(format!("set_volume_muted({})", muted));
        self.outcome()
    }

    async fn set_volume(&mut self, level: f64) -> Result<(), DeviceError> {
        self.calls.push(format!("set_volume({})", level));
        self.outcome()?;
        self.volume = level;
        Ok(())
    }

    async fn seek(&mut self, position: f64) -> Result<(), DeviceError> {
        self.calls.push(format!("seek({})", position));
        self.outcome()
    }

    async fn play_media(
        &mut self,
        url: &str,
        content_type: &str,
        autoplay: bool,
    ) -> Result<(), DeviceError> {
        self.calls
            .push(format!("play_media({}, {}, {})", url, content_type, autoplay));
        self.outcome()
    }

    async fn pause(&mut self) -> Result<(), DeviceError> {
        self.calls.push("pause");
        self.outcome()
    }

    async fn play(&mut self) -> Result<(), DeviceError> {
        self.calls.push("play");
        self.outcome()
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.calls.push("stop");
        self.outcome()
    }

    async fn rewind(&mut self) -> Result<(), DeviceError> {
        self.calls.push("rewind");
        self.outcome()
    }
}

/// Provider handing out pre-queued device links.
#[derive(Debug, Default)]
pub(crate) struct FakeProvider {
    links: Mutex<VecDeque<DeviceLink>>,
}

impl FakeProvider {
    /// Queue a device for the next connect and return the sender that
    /// feeds its push-callback stream.
    pub fn push_device(&self, device: FakeDevice) -> mpsc::Sender<CastEvent> {
        let (tx, rx) = mpsc::channel(16);
        self.links.lock().unwrap().push_back(DeviceLink {
            device: Box::new(device),
            events: rx,
        });
        tx
    }
}

#[async_trait]
impl CastDeviceProvider for FakeProvider {
    async fn connect(&self, id: &DeviceId) -> Result<DeviceLink, DeviceError> {
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }
}
