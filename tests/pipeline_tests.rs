//! End-to-end trigger → record → classify → publish cycles against in-memory peripherals.

mod common;

use anomaly_edge::config::AudioConfig;
use anomaly_edge::decision::Category;
use anomaly_edge::recorder::{RecordError, Recorder, StopReason};
use anomaly_edge::reporter::{ConnectionState, Reporter};
use anomaly_edge::signal::SignalAssembler;
use anomaly_edge::status::Status;
use anomaly_edge::trigger::{CycleError, CycleOutcome, LoopState, TriggerLoop};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOPIC: &str = "machine/audio/inference";
const RECORDING: &str = "audio.raw";

struct Rig {
    events: Events,
    storage: Arc<MemoryStorage>,
    link: FakeLink,
    display: Arc<RecordingDisplay>,
    trigger: ScriptedTrigger,
    seen_counts: Arc<Mutex<Vec<usize>>>,
    first_values: Arc<Mutex<Vec<f32>>>,
    device: TriggerLoop,
}

fn audio_config(record_seconds: u32, block_size: usize) -> AudioConfig {
    AudioConfig {
        record_seconds,
        block_size,
        ..AudioConfig::default()
    }
}

fn rig(source: ScriptedSource, scores: Vec<Result<(f32, f32), ()>>, audio: AudioConfig) -> Rig {
    env_logger::try_init().ok();

    let events = Events::default();
    let storage = MemoryStorage::new();
    let link = FakeLink::new(&events);
    let display = Arc::new(RecordingDisplay::default());
    let trigger = ScriptedTrigger::default();
    let classifier = FakeClassifier::new(&events, scores);
    let seen_counts = classifier.seen_counts.clone();
    let first_values = classifier.first_values.clone();

    let recorder = Recorder::new(
        Box::new(source),
        storage.clone(),
        display.clone(),
        audio.clone(),
        RECORDING,
    );
    let assembler = SignalAssembler::new(storage.clone(), audio.feature_capacity);
    let reporter = Reporter::new(Box::new(link.clone()), TOPIC, Duration::from_millis(5))
        .with_display(display.clone());

    let device = TriggerLoop::new(
        Box::new(trigger.clone()),
        recorder,
        assembler,
        Box::new(classifier),
        reporter,
        display.clone(),
        audio.record_duration(),
        Duration::ZERO,
    );

    Rig {
        events,
        storage,
        link,
        display,
        trigger,
        seen_counts,
        first_values,
        device,
    }
}

fn message(label: &str, score: &str) -> (String, String) {
    (
        TOPIC.to_string(),
        format!(r#"{{"label":"{}","score":{}}}"#, label, score),
    )
}

#[test]
fn test_anomalous_cycle_publishes_one_message() {
    let mut rig = rig(
        ScriptedSource::new(100 << 14, 4),
        vec![Ok((0.82, 0.10))],
        audio_config(1, 1024),
    );

    // First tick only brings the link up
    assert!(rig.device.tick().is_none());
    assert_eq!(rig.device.reporter().state(), ConnectionState::Connected);
    assert_eq!(rig.display.shown(), vec![Status::Connecting, Status::Ready]);
    rig.display.clear();

    rig.trigger.press();
    match rig.device.tick() {
        Some(CycleOutcome::Published(verdict)) => {
            assert_eq!(verdict.category, Category::Anomalous);
            assert_eq!(verdict.confidence, 0.82);
        }
        other => panic!("expected a published verdict, got {:?}", other),
    }

    assert_eq!(rig.link.published(), vec![message("anomalous", "0.820")]);
    assert_eq!(
        rig.display.shown(),
        vec![
            Status::Recording,
            Status::RecordingComplete,
            Status::Result(Category::Anomalous)
        ]
    );
    assert_eq!(rig.device.state(), LoopState::Idle);

    // 4 blocks were stored, shifted down to 16 bits
    let stored = rig.storage.samples(RECORDING);
    assert_eq!(stored.len(), 4 * 1024);
    assert!(stored.iter().all(|&s| s == 100));
    assert_eq!(*rig.seen_counts.lock().unwrap(), vec![4 * 1024]);
    assert_eq!(*rig.first_values.lock().unwrap(), vec![100.0 / 32768.0]);
    assert_eq!(rig.storage.open_writers(), 0);
}

#[test]
fn test_tied_scores_publish_normal() {
    let mut rig = rig(
        ScriptedSource::new(1 << 14, 2),
        vec![Ok((0.40, 0.40))],
        audio_config(1, 1024),
    );

    rig.trigger.press();
    match rig.device.tick() {
        Some(CycleOutcome::Published(verdict)) => {
            assert_eq!(verdict.category, Category::Normal);
            assert_eq!(verdict.confidence, 0.40);
        }
        other => panic!("expected a published verdict, got {:?}", other),
    }
    assert_eq!(rig.link.published(), vec![message("normal", "0.400")]);
    assert_eq!(rig.display.last(), Some(Status::Result(Category::Normal)));
}

#[test]
fn test_storage_fault_aborts_cycle_and_next_trigger_still_works() {
    let mut rig = rig(
        ScriptedSource::new(7 << 14, 3),
        vec![Ok((0.1, 0.9))],
        audio_config(1, 1024),
    );
    rig.storage.fail_create.store(true, Ordering::SeqCst);

    rig.trigger.press();
    match rig.device.tick() {
        Some(CycleOutcome::Aborted(CycleError::Record(RecordError::Storage(_)))) => {}
        other => panic!("expected a storage abort, got {:?}", other),
    }
    assert!(rig.link.published().is_empty());
    assert_eq!(rig.display.last(), Some(Status::StorageError));
    assert!(!rig.events.all().contains(&"classify".to_string()));
    assert_eq!(rig.device.state(), LoopState::Idle);

    // Medium is back: the following trigger runs a normal cycle
    rig.storage.fail_create.store(false, Ordering::SeqCst);
    rig.trigger.press();
    assert!(matches!(
        rig.device.tick(),
        Some(CycleOutcome::Published(_))
    ));
    assert_eq!(rig.link.published(), vec![message("normal", "0.900")]);
}

#[test]
fn test_disconnected_broker_blocks_publish_until_reconnected() {
    let mut rig = rig(
        ScriptedSource::new(3 << 14, 2),
        vec![Ok((0.7, 0.3))],
        audio_config(1, 1024),
    );
    assert!(rig.device.tick().is_none());

    // Broker disappears while the device is idle and refuses two attempts
    rig.link.drop_connection(2);
    let verdict = rig.device.run_cycle().unwrap();
    assert_eq!(verdict.category, Category::Anomalous);

    let events = rig.events.all();
    let cycle: Vec<&str> = events[1..].iter().map(String::as_str).collect();
    assert_eq!(
        cycle,
        vec![
            "classify",
            "connect-failed",
            "connect-failed",
            "connect",
            "publish"
        ]
    );
    assert_eq!(rig.link.published(), vec![message("anomalous", "0.700")]);
    assert_eq!(rig.device.reporter().state(), ConnectionState::Connected);
}

#[test]
fn test_unreadable_recording_reports_file_error() {
    let mut rig = rig(
        ScriptedSource::new(0, 2),
        vec![Ok((0.9, 0.1))],
        audio_config(1, 1024),
    );
    rig.storage.fail_open.store(true, Ordering::SeqCst);

    rig.trigger.press();
    assert!(matches!(
        rig.device.tick(),
        Some(CycleOutcome::Aborted(CycleError::ReadBack(_)))
    ));
    assert_eq!(rig.display.last(), Some(Status::FileError));
    assert!(rig.seen_counts.lock().unwrap().is_empty());
    assert!(rig.link.published().is_empty());
}

#[test]
fn test_inference_fault_skips_publish() {
    let mut rig = rig(
        ScriptedSource::endless(0),
        vec![Err(()), Ok((0.2, 0.8))],
        audio_config(1, 1024),
    );

    rig.trigger.press();
    assert!(matches!(
        rig.device.tick(),
        Some(CycleOutcome::Aborted(CycleError::Inference(_)))
    ));
    assert_eq!(rig.display.last(), Some(Status::InferenceError));
    assert!(rig.link.published().is_empty());

    rig.trigger.press();
    assert!(matches!(
        rig.device.tick(),
        Some(CycleOutcome::Published(_))
    ));
    assert_eq!(rig.link.published().len(), 1);
}

#[test]
fn test_feature_buffer_is_capped_at_capacity() {
    // 20 blocks fit the 2 s budget but exceed the 16000-sample buffer
    let mut rig = rig(
        ScriptedSource::new(-(5 << 14), 20),
        vec![Ok((0.3, 0.6))],
        audio_config(2, 1024),
    );

    rig.trigger.press();
    assert!(matches!(
        rig.device.tick(),
        Some(CycleOutcome::Published(_))
    ));
    assert_eq!(rig.storage.samples(RECORDING).len(), 20 * 1024);
    assert_eq!(*rig.seen_counts.lock().unwrap(), vec![16_000]);
    assert_eq!(*rig.first_values.lock().unwrap(), vec![-5.0 / 32768.0]);
}

#[test]
fn test_no_cycle_without_trigger() {
    let mut rig = rig(
        ScriptedSource::new(0, 1),
        vec![Ok((0.9, 0.1))],
        audio_config(1, 1024),
    );

    for _ in 0..5 {
        assert!(rig.device.tick().is_none());
    }
    assert!(rig.storage.bytes(RECORDING).is_none());
    assert_eq!(rig.link.state.lock().unwrap().connect_attempts, 1);
}

#[test]
fn test_trigger_read_fault_shows_status_once() {
    let mut rig = rig(
        ScriptedSource::new(2 << 14, 3),
        vec![Ok((0.9, 0.1))],
        audio_config(1, 1024),
    );
    assert!(rig.device.tick().is_none());
    rig.display.clear();

    rig.trigger.fault();
    rig.trigger.fault();
    rig.trigger.release();
    for _ in 0..3 {
        assert!(rig.device.tick().is_none());
    }
    assert_eq!(rig.display.shown(), vec![Status::TriggerError, Status::Ready]);

    rig.trigger.press();
    assert!(matches!(
        rig.device.tick(),
        Some(CycleOutcome::Published(_))
    ));
}

#[test]
fn test_recording_stops_at_sample_budget() {
    let storage = MemoryStorage::new();
    let display = Arc::new(RecordingDisplay::default());
    let mut recorder = Recorder::new(
        Box::new(ScriptedSource::endless(2 << 14)),
        storage.clone(),
        display.clone(),
        audio_config(1, 1024),
        RECORDING,
    );

    let handle = recorder.record(Duration::from_secs(1)).unwrap();

    // 16 blocks would be 16384 samples; the last block is cut to fit
    assert_eq!(handle.samples, 16_000);
    assert_eq!(handle.stop_reason, StopReason::BudgetReached);
    assert_eq!(storage.samples(RECORDING).len(), 16_000);
    assert_eq!(storage.open_writers(), 0);
}

#[test]
fn test_recording_stops_when_duration_elapses() {
    let storage = MemoryStorage::new();
    let display = Arc::new(RecordingDisplay::default());
    let mut source = ScriptedSource::endless(1 << 14);
    source.delay = Duration::from_millis(40);
    let mut recorder = Recorder::new(
        Box::new(source),
        storage.clone(),
        display.clone(),
        audio_config(1, 16),
        RECORDING,
    );

    let handle = recorder.record(Duration::from_millis(100)).unwrap();

    assert_eq!(handle.stop_reason, StopReason::DurationElapsed);
    assert!(handle.elapsed > Duration::from_millis(100));
    // Whole blocks only, and far below the 1600-sample budget
    assert_eq!(handle.samples % 16, 0);
    assert!(handle.samples >= 3 * 16 && handle.samples < 1600);
    assert_eq!(storage.samples(RECORDING).len(), handle.samples);
    assert_eq!(display.last(), Some(Status::RecordingComplete));
}

#[test]
fn test_source_fault_closes_recording() {
    let storage = MemoryStorage::new();
    let display = Arc::new(RecordingDisplay::default());
    let mut source = ScriptedSource::endless(9 << 14);
    source.fail_at_block = Some(2);
    let mut recorder = Recorder::new(
        Box::new(source),
        storage.clone(),
        display.clone(),
        audio_config(1, 1024),
        RECORDING,
    );

    assert!(matches!(
        recorder.record(Duration::from_secs(1)),
        Err(RecordError::Source(_))
    ));
    assert_eq!(display.last(), Some(Status::MicError));
    assert_eq!(storage.open_writers(), 0);
    assert_eq!(storage.samples(RECORDING), vec![9; 2 * 1024]);
}

#[test]
fn test_write_fault_closes_recording() {
    let storage = MemoryStorage::new();
    *storage.fail_write_after.lock().unwrap() = Some(4096);
    let display = Arc::new(RecordingDisplay::default());
    let mut recorder = Recorder::new(
        Box::new(ScriptedSource::endless(0)),
        storage.clone(),
        display.clone(),
        audio_config(1, 1024),
        RECORDING,
    );

    assert!(matches!(
        recorder.record(Duration::from_secs(1)),
        Err(RecordError::Storage(_))
    ));
    assert_eq!(display.last(), Some(Status::StorageError));
    assert_eq!(storage.open_writers(), 0);
}

#[test]
fn test_new_recording_replaces_previous_one() {
    let storage = MemoryStorage::new();
    let display = Arc::new(RecordingDisplay::default());
    let mut recorder = Recorder::new(
        Box::new(ScriptedSource::new(4 << 14, 3)),
        storage.clone(),
        display.clone(),
        audio_config(1, 1024),
        RECORDING,
    );

    assert_eq!(recorder.record(Duration::from_secs(1)).unwrap().samples, 3 * 1024);
    // Source is now dry: the second recording is empty, not appended
    let handle = recorder.record(Duration::from_secs(1)).unwrap();
    assert_eq!(handle.samples, 0);
    assert_eq!(handle.stop_reason, StopReason::SourceExhausted);
    assert!(storage.samples(RECORDING).is_empty());
}
