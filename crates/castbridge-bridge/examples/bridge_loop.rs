use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use castbridge_core::config::{BridgeConfig, SharedConfig};
use castbridge_core::types::DeviceId;
use castbridge_devices::bus::{BusError, MessageBus};
use castbridge_devices::device::{CastDevice, CastDeviceProvider, DeviceError, DeviceLink};
use castbridge_devices::status::{CastEvent, CastStatus, MediaStatus};

use castbridge_bridge::EventDispatcher;

// Mock cast device that prints every command it receives
#[derive(Debug)]
struct MockCastDevice {
    friendly_name: String,
    volume: f64,
}

#[async_trait]
impl CastDevice for MockCastDevice {
    fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    fn cast_type(&self) -> &str {
        "audio"
    }

    fn volume_level(&self) -> f64 {
        self.volume
    }

    fn media_duration(&self) -> Option<f64> {
        Some(180.0)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        println!("[device] disconnect");
        Ok(())
    }

    async fn set_volume_muted(&mut self, muted: bool) -> Result<(), DeviceError> {
        println!("[device] set_volume_muted({})", muted);
        Ok(())
    }

    async fn set_volume(&mut self, level: f64) -> Result<(), DeviceError> {
        println!("[device] set_volume({})", level);
        self.volume = level;
        Ok(())
    }

    async fn seek(&mut self, position: f64) -> Result<(), DeviceError> {
        println!("[device] seek({})", position);
        Ok(())
    }

    async fn play_media(
        &mut self,
        url: &str,
        content_type: &str,
        autoplay: bool,
    ) -> Result<(), DeviceError> {
        println!("[device] play_media({}, {}, {})", url, content_type, autoplay);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), DeviceError> {
        println!("[device] pause");
        Ok(())
    }

    async fn play(&mut self) -> Result<(), DeviceError> {
        println!("[device] play");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        println!("[device] stop");
        Ok(())
    }

    async fn rewind(&mut self) -> Result<(), DeviceError> {
        println!("[device] rewind");
        Ok(())
    }
}

// Provider that hands out one mock device per connect
#[derive(Debug, Default)]
struct MockProvider {
    links: Mutex<VecDeque<DeviceLink>>,
}

impl MockProvider {
    fn push_device(&self, device: MockCastDevice) -> mpsc::Sender<CastEvent> {
        let (tx, rx) = mpsc::channel(16);
        self.links.lock().unwrap().push_back(DeviceLink {
            device: Box::new(device),
            events: rx,
        });
        tx
    }
}

#[async_trait]
impl CastDeviceProvider for MockProvider {
    async fn connect(&self, id: &DeviceId) -> Result<DeviceLink, DeviceError> {
        println!("[provider] connect({})", id);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }
}

// Bus that prints retained publishes instead of talking to a broker
#[derive(Debug, Default)]
struct PrintingBus;

#[async_trait]
impl MessageBus for PrintingBus {
    async fn publish(&self, topic: &str, payload: &str, _retain: bool) -> Result<(), BusError> {
        println!("[bus] {} = {:?}", topic, payload);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), BusError> {
        println!("[bus] subscribe {}", filter);
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), BusError> {
        println!("[bus] unsubscribe {}", filter);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    castbridge_core::logging::init()?;

    let config = SharedConfig::new(BridgeConfig::default());
    let bus = Arc::new(PrintingBus);
    let provider = Arc::new(MockProvider::default());

    let events = provider.push_device(MockCastDevice {
        friendly_name: "Living Room speaker".to_string(),
        volume: 0.4,
    });

    // Wire the dispatcher up and start its worker
    let dispatcher = EventDispatcher::new();
    let worker = dispatcher.spawn_worker(bus, provider, config);

    // Simulate the bus coming up and discovery finding a device
    dispatcher.notify_bus_connected();
    dispatcher.notify_device_appeared(
        "living-room".into(),
        "Chromecast Audio",
        "192.168.1.40",
        8009,
    );

    // Commands arrive on the bus the way a broker would deliver them
    dispatcher.notify_message(
        "chromecast/living-room/volume_level",
        Bytes::from_static(b"+10"),
    );
    dispatcher.notify_message(
        "chromecast/living-room/player_state",
        Bytes::from_static(br#"["http://example.org/radio.mp3","audio/mpeg"]"#),
    );

    tokio::time::sleep(Duration::from_millis(200)).await;

    // The device pushes status updates back through its callback stream
    events
        .send(CastEvent::Cast(CastStatus {
            app_id: Some("CC1AD845".to_string()),
            display_name: Some("Default Media Receiver".to_string()),
            volume_level: 0.5,
            volume_muted: false,
            cast_type: Some("audio".to_string()),
            friendly_name: Some("Living Room speaker".to_string()),
        }))
        .await?;
    events
        .send(CastEvent::Media(MediaStatus {
            player_state: "PLAYING".to_string(),
            current_time: Some(3.2),
            duration: Some(3600.0),
            title: Some("Morning show".to_string()),
            album_name: None,
            artist: None,
            album_artist: None,
            track: None,
            images: vec![],
            content_type: Some("audio/mpeg".to_string()),
            content_id: Some("http://example.org/radio.mp3".to_string()),
        }))
        .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Orderly teardown releases every session before the worker exits
    dispatcher.shutdown();
    worker.await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
