#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{Duration, Instant};

use wheelaway_lib::capture::decode::encode_data_uri;
use wheelaway_lib::capture::{CaptureProvider, ImageMime, ScreenCapture};
use wheelaway_lib::classifier::Classifier;
use wheelaway_lib::device::{PortDescriptor, SerialTransport};
use wheelaway_lib::pointer::{PointerPosition, PointerProvider};
use wheelaway_lib::services::{Collaborators, MonitorServices};
use wheelaway_lib::settings::MonitorSettings;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CaptureStart,
    ClassifyStart,
    ClassifyEnd,
    Write(String),
}

/// Shared record of what the collaborators saw, in order.
#[derive(Default)]
pub struct Timeline {
    events: Mutex<Vec<(Instant, Event)>>,
}

impl Timeline {
    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn times_of(&self, wanted: &Event) -> Vec<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e == wanted)
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn writes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(command) => Some(command),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeCapture {
    timeline: Arc<Timeline>,
    failures: Mutex<VecDeque<bool>>,
    pub calls: AtomicUsize,
}

impl FakeCapture {
    /// Queue outcomes for the next captures: `false` makes that capture fail.
    pub fn script(&self, outcomes: &[bool]) {
        self.failures.lock().unwrap().extend(outcomes.iter().map(|ok| !ok));
    }
}

#[async_trait]
impl CaptureProvider for FakeCapture {
    async fn capture_screen(&self) -> anyhow::Result<ScreenCapture> {
        self.timeline.push(Event::CaptureStart);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
            return Err(anyhow!("screen locked"));
        }
        Ok(ScreenCapture {
            data: encode_data_uri(ImageMime::Png, PNG),
            width: 1920,
            height: 1080,
        })
    }
}

pub struct FakeClassifier {
    timeline: Arc<Timeline>,
    latency: Duration,
    replies: Mutex<VecDeque<anyhow::Result<Value>>>,
    pub calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn reply(&self, reply: anyhow::Result<Value>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

pub fn productive() -> Value {
    json!({ "isProductive": true, "confidence": 0.9, "reason": "Editing source code" })
}

pub fn unproductive() -> Value {
    json!({ "isProductive": false, "confidence": 0.8, "reason": "Watching videos" })
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _instruction: &str, image: &[u8], mime: ImageMime) -> anyhow::Result<Value> {
        assert_eq!(image, PNG);
        assert_eq!(mime, ImageMime::Png);
        self.timeline.push(Event::ClassifyStart);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.timeline.push(Event::ClassifyEnd);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(productive()))
    }
}

pub struct FakeTransport {
    timeline: Arc<Timeline>,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl SerialTransport for FakeTransport {
    async fn enumerate_ports(&self) -> anyhow::Result<Vec<PortDescriptor>> {
        Ok(vec![
            PortDescriptor::new("COM3", "USB"),
            PortDescriptor::new("COM5", "Bluetooth"),
        ])
    }

    async fn open_port(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close_port(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn write_command(&self, command: &str) -> anyhow::Result<String> {
        self.timeline.push(Event::Write(command.to_string()));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("write timed out"));
        }
        Ok(format!("LED {command}"))
    }
}

pub struct StillPointer;

impl PointerProvider for StillPointer {
    fn pointer_position(&self) -> anyhow::Result<PointerPosition> {
        Ok(PointerPosition { x: 640, y: 360 })
    }
}

pub struct Harness {
    pub services: MonitorServices,
    pub timeline: Arc<Timeline>,
    pub capture: Arc<FakeCapture>,
    pub classifier: Arc<FakeClassifier>,
    pub transport: Arc<FakeTransport>,
}

/// Services wired to fakes. `classify_latency` is how long each
/// classification takes; it is what keeps a cycle in flight.
pub fn harness(interval_ms: u64, classify_latency: Duration) -> Harness {
    let timeline = Arc::new(Timeline::default());
    let capture = Arc::new(FakeCapture {
        timeline: timeline.clone(),
        failures: Mutex::new(VecDeque::new()),
        calls: AtomicUsize::new(0),
    });
    let classifier = Arc::new(FakeClassifier {
        timeline: timeline.clone(),
        latency: classify_latency,
        replies: Mutex::new(VecDeque::new()),
        calls: AtomicUsize::new(0),
    });
    let transport = Arc::new(FakeTransport {
        timeline: timeline.clone(),
        fail_writes: AtomicBool::new(false),
    });

    let settings = MonitorSettings {
        capture_interval_ms: interval_ms,
        ..MonitorSettings::default()
    };
    let services = MonitorServices::new(
        Collaborators {
            transport: transport.clone(),
            capture: capture.clone(),
            classifier: classifier.clone(),
            pointer: Arc::new(StillPointer),
        },
        &settings,
    );

    Harness {
        services,
        timeline,
        capture,
        classifier,
        transport,
    }
}

pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
