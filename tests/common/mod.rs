//! In-memory stand-ins for the device peripherals, shared by the integration tests.
#![allow(dead_code)]

use anomaly_edge::audio_source::{RawSampleBlock, SampleBlockSource, SourceError};
use anomaly_edge::classifier::{ClassificationResult, Classifier, InferenceError};
use anomaly_edge::reporter::BrokerLink;
use anomaly_edge::signal::FeatureBuffer;
use anomaly_edge::status::{Status, StatusDisplay};
use anomaly_edge::storage::{Storage, StorageError};
use anomaly_edge::trigger::TriggerInput;
use mqtt_protocol::ProtocolError;
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of what the fakes were asked to do
#[derive(Default, Clone)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Storage kept in memory; tracks open writers so closing can be checked
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
    open_writers: Arc<AtomicUsize>,
    pub fail_create: AtomicBool,
    pub fail_open: AtomicBool,
    pub fail_write_after: Mutex<Option<usize>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|data| data.lock().unwrap().clone())
    }

    pub fn samples(&self, name: &str) -> Vec<i16> {
        self.bytes(name)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    pub fn open_writers(&self) -> usize {
        self.open_writers.load(Ordering::SeqCst)
    }
}

struct MemoryWriter {
    data: Arc<Mutex<Vec<u8>>>,
    open_writers: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut data = self.data.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if data.len() + buf.len() > limit {
                return Err(std::io::Error::other("card full"));
            }
        }
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.open_writers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Storage for MemoryStorage {
    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>, StorageError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StorageError::Open {
                name: name.to_string(),
                source: std::io::Error::other("no card"),
            });
        }

        let data = Arc::new(Mutex::new(Vec::new()));
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), data.clone());
        self.open_writers.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryWriter {
            data,
            open_writers: self.open_writers.clone(),
            fail_after: *self.fail_write_after.lock().unwrap(),
        }))
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let missing = || StorageError::Open {
            name: name.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(missing());
        }

        let objects = self.objects.lock().unwrap();
        let data = objects.get(name).ok_or_else(missing)?;
        let bytes = data.lock().unwrap().clone();
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// Delivers `blocks` full blocks of a constant wide sample, then runs dry
pub struct ScriptedSource {
    pub value: i32,
    pub blocks: usize,
    pub delay: Duration,
    pub fail_at_block: Option<usize>,
    delivered: usize,
}

impl ScriptedSource {
    pub fn new(value: i32, blocks: usize) -> Self {
        Self {
            value,
            blocks,
            delay: Duration::ZERO,
            fail_at_block: None,
            delivered: 0,
        }
    }

    pub fn endless(value: i32) -> Self {
        Self::new(value, usize::MAX)
    }
}

impl SampleBlockSource for ScriptedSource {
    fn read_block(&mut self, block: &mut RawSampleBlock) -> Result<(), SourceError> {
        block.clear();
        if self.fail_at_block == Some(self.delivered) {
            return Err(SourceError::Stream("DMA stalled".into()));
        }
        if self.delivered >= self.blocks {
            return Ok(());
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        while block.push(self.value) {}
        self.delivered += 1;
        Ok(())
    }
}

/// Returns queued scores (the last one repeats) and remembers what it saw
pub struct FakeClassifier {
    scores: VecDeque<Result<(f32, f32), ()>>,
    pub seen_counts: Arc<Mutex<Vec<usize>>>,
    pub first_values: Arc<Mutex<Vec<f32>>>,
    events: Events,
}

impl FakeClassifier {
    pub fn new(events: &Events, scores: Vec<Result<(f32, f32), ()>>) -> Self {
        Self {
            scores: scores.into(),
            seen_counts: Arc::default(),
            first_values: Arc::default(),
            events: events.clone(),
        }
    }
}

impl Classifier for FakeClassifier {
    fn classify(&mut self, buffer: &FeatureBuffer) -> Result<ClassificationResult, InferenceError> {
        self.events.push("classify");
        self.seen_counts.lock().unwrap().push(buffer.count());
        if let Some(&first) = buffer.as_slice().first() {
            self.first_values.lock().unwrap().push(first);
        }

        let next = if self.scores.len() > 1 {
            self.scores.pop_front()
        } else {
            self.scores.front().cloned()
        };
        match next {
            Some(Ok((anomalous, normal))) => ClassificationResult::from_outputs(
                &["anomalous".to_string(), "normal".to_string()],
                &[anomalous, normal],
            ),
            _ => Err(InferenceError::Invoke("model returned error status".into())),
        }
    }
}

#[derive(Default)]
pub struct LinkState {
    pub connected: bool,
    pub failing_connects: usize,
    pub connect_attempts: usize,
    pub published: Vec<(String, String)>,
}

/// Broker link whose state the test can change between ticks
#[derive(Clone)]
pub struct FakeLink {
    pub state: Arc<Mutex<LinkState>>,
    events: Events,
}

impl FakeLink {
    pub fn new(events: &Events) -> Self {
        Self {
            state: Arc::default(),
            events: events.clone(),
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().published.clone()
    }

    /// Simulate the broker going away; the next `failing` connects fail
    pub fn drop_connection(&self, failing: usize) {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.failing_connects = failing;
    }
}

impl BrokerLink for FakeLink {
    fn connect(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            self.events.push("connect-failed");
            return Err(ProtocolError::ConnectionClosed);
        }
        state.connected = true;
        self.events.push("connect");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn poll(&mut self) -> Result<(), ProtocolError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ProtocolError::ConnectionClosed)
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        assert!(state.connected, "publish while disconnected");
        state
            .published
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
        self.events.push("publish");
        Ok(())
    }

    fn state_code(&self) -> i8 {
        if self.is_connected() {
            0
        } else {
            -2
        }
    }
}

/// Display that remembers every status it was shown
#[derive(Default)]
pub struct RecordingDisplay(Mutex<Vec<Status>>);

impl RecordingDisplay {
    pub fn shown(&self) -> Vec<Status> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Status> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl StatusDisplay for RecordingDisplay {
    fn show(&self, status: &Status) {
        self.0.lock().unwrap().push(*status);
    }
}

/// Trigger that replays a fixed sequence of samples, then stays released.
/// `None` samples are read faults.
#[derive(Clone, Default)]
pub struct ScriptedTrigger(Arc<Mutex<VecDeque<Option<bool>>>>);

impl ScriptedTrigger {
    pub fn press(&self) {
        self.0.lock().unwrap().push_back(Some(true));
    }

    pub fn release(&self) {
        self.0.lock().unwrap().push_back(Some(false));
    }

    pub fn fault(&self) {
        self.0.lock().unwrap().push_back(None);
    }
}

impl TriggerInput for ScriptedTrigger {
    fn is_asserted(&mut self) -> std::io::Result<bool> {
        match self.0.lock().unwrap().pop_front() {
            Some(Some(asserted)) => Ok(asserted),
            Some(None) => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "trigger value file missing",
            )),
            None => Ok(false),
        }
    }
}
