//! End-to-end scenarios for buffering, compaction and recovery.
//!
//! These drive the public API the way a log shipper does and inspect the
//! buffer directory and the uploaded objects directly.

use irpack_core::{
    decompress_frames, frame_lengths, CoreError, FileSink, FlushCode, IrReader, LogEvent,
    StreamBuffer, UploadError, DEFAULT_SIZE_HINT, OBJECT_SUFFIX,
};
use irpack_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

fn disk_buffer(dir: &Path, threshold: u64) -> StreamBuffer {
    let bin = FileSink::open(&dir.join("bin")).unwrap();
    let stack = FileSink::open(&dir.join("stack")).unwrap();
    StreamBuffer::on_disk(bin, stack, "UTC", DEFAULT_SIZE_HINT)
        .unwrap()
        .with_compaction_threshold(threshold)
}

fn decode_stack(path: &Path) -> (usize, Vec<LogEvent>) {
    let data = fs::read(path).unwrap();
    let (frames, valid) = frame_lengths(&data);
    assert_eq!(valid, data.len(), "stack has trailing bytes");
    let ir = decompress_frames(&data).unwrap();
    (frames.len(), IrReader::decode_all(&ir).unwrap().events)
}

fn assert_unique(messages: &[String]) {
    let unique: HashSet<_> = messages.iter().collect();
    assert_eq!(unique.len(), messages.len(), "duplicated records");
}

/// A buffer directory prepared by hand, then handed to a flusher.
struct PreparedDir {
    temp: TempDir,
}

impl PreparedDir {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    fn root(&self) -> std::path::PathBuf {
        disk_config(self.temp.path()).disk_buffer_path
    }

    fn bin(&self, tag: &str, data: &[u8]) {
        write_file(&self.root().join("bin").join(tag), data);
    }

    fn stack(&self, tag: &str, data: &[u8]) {
        write_file(&self.root().join("stack").join(tag), data);
    }

    fn start(self) -> TestFlusher {
        let config = disk_config(self.temp.path());
        TestFlusher::start(config, self.temp)
    }
}

// ============================================================================
// Normal operation
// ============================================================================

#[test]
fn memory_mode_uploads_each_batch_in_order() {
    let t = TestFlusher::memory();
    assert_eq!(t.flush("app", &records(3)), FlushCode::Ok);

    let objects = t.uploader.objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].messages(), messages_from(0, 3));
    assert_eq!(objects[0].metadata.tag, "app");
    assert!(objects[0].key.starts_with("logs/app_"));
    assert!(objects[0].key.ends_with(OBJECT_SUFFIX));
}

#[test]
fn disk_mode_keeps_records_until_restart() {
    let mut t = TestFlusher::disk();
    assert_eq!(t.flush("app", &records(3)), FlushCode::Ok);
    assert!(t.uploader.is_empty());

    let report = t.shutdown();
    assert_eq!(report.retained, ["app"]);
    assert!(report.failures.is_empty());

    t.restart();
    assert_eq!(t.uploader.messages_for("app"), messages_from(0, 3));
    assert_eq!(file_len(&t.bin_path("app")), Some(0));
    assert_eq!(file_len(&t.stack_path("app")), Some(0));
}

#[test]
fn memory_mode_never_references_a_bin() {
    let t = TestFlusher::memory();
    assert_eq!(t.flush("app", &records(2)), FlushCode::Ok);

    let shared = t.flusher().registry().get("app").unwrap();
    let entry = shared.lock();
    assert!(!entry.buffer.uses_disk_buffer());
    assert!(entry.buffer.bin_path().is_none());
    assert!(entry.buffer.stack_path().is_none());
    assert!(!t.buffer_path().exists());
}

#[test]
fn tags_are_kept_apart() {
    let mut t = TestFlusher::disk();
    assert_eq!(t.flush("a", &records_from(0, 2)), FlushCode::Ok);
    assert_eq!(t.flush("b", &records_from(2, 3)), FlushCode::Ok);
    assert_eq!(t.flush("a", &records_from(5, 1)), FlushCode::Ok);

    t.shutdown();
    t.restart();
    assert_eq!(
        t.uploader.messages_for("a"),
        ["line 0", "line 1", "line 5"]
    );
    assert_eq!(t.uploader.messages_for("b"), messages_from(2, 3));
}

#[test]
fn invalid_tag_is_rejected() {
    let t = TestFlusher::disk();
    assert_eq!(t.flush("../escape", &records(1)), FlushCode::Error);
    assert_eq!(t.flush("LOCK", &records(1)), FlushCode::Error);
    assert!(t.flusher().registry().is_empty());
}

// ============================================================================
// Compaction
// ============================================================================

#[test]
fn crossing_threshold_in_one_write_compacts_once() {
    let dir = TempDir::new().unwrap();
    let mut buffer = disk_buffer(dir.path(), 1024);
    buffer.write(&events(64, 64)).unwrap();

    assert_eq!(buffer.frames_closed(), 1);
    assert_eq!(buffer.bin_byte_count(), 0);
    assert_eq!(file_len(&dir.path().join("bin")), Some(0));
    assert_eq!(decode_stack(&dir.path().join("stack")), (1, events(64, 64)));
}

#[test]
fn empty_compaction_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut buffer = disk_buffer(dir.path(), 1 << 20);
    buffer.compact().unwrap();
    buffer.compact().unwrap();
    assert_eq!(buffer.frames_closed(), 0);
    assert_eq!(buffer.size_on_disk().unwrap(), 0);

    buffer.write(&events(3, 8)).unwrap();
    buffer.compact().unwrap();
    let size = buffer.size_on_disk().unwrap();
    buffer.compact().unwrap();
    assert_eq!(buffer.frames_closed(), 1);
    assert_eq!(buffer.size_on_disk().unwrap(), size);
}

#[test]
fn reset_requires_empty_bin() {
    let dir = TempDir::new().unwrap();
    let mut buffer = disk_buffer(dir.path(), 1 << 20);
    buffer.write(&events(4, 8)).unwrap();
    buffer.compact().unwrap();
    buffer.write(&events(2, 8)).unwrap();
    let stack_before = fs::read(dir.path().join("stack")).unwrap();

    assert!(matches!(
        buffer.reset(),
        Err(CoreError::BinNotEmpty { .. })
    ));
    assert_eq!(fs::read(dir.path().join("stack")).unwrap(), stack_before);

    buffer.finish().unwrap();
    buffer.reset().unwrap();
    assert_eq!(buffer.size_on_disk().unwrap(), 0);

    buffer.write(&events(1, 8)).unwrap();
    buffer.finish().unwrap();
    assert_eq!(decode_stack(&dir.path().join("stack")).1, events(1, 8));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn each_crossing_closes_one_decodable_frame(crossings in 1usize..6) {
        let dir = TempDir::new().unwrap();
        let mut buffer = disk_buffer(dir.path(), 512);
        let batch = events(16, 64);
        for _ in 0..crossings {
            buffer.write(&batch).unwrap();
        }
        prop_assert_eq!(buffer.frames_closed(), crossings as u64);

        let data = fs::read(dir.path().join("stack")).unwrap();
        let (frames, valid) = frame_lengths(&data);
        prop_assert_eq!(frames.len(), crossings);
        prop_assert_eq!(valid, data.len());

        let mut ir = Vec::new();
        let mut offset = 0;
        for len in frames {
            ir.extend(decompress_frames(&data[offset..offset + len]).unwrap());
            offset += len;
        }
        let decoded = IrReader::decode_all(&ir).unwrap();
        prop_assert!(!decoded.terminated);
        prop_assert_eq!(decoded.events.len(), crossings * batch.len());
    }

    #[test]
    fn arbitrary_batches_survive_finish(batches in prop::collection::vec(event_batch_strategy(24), 1..5)) {
        let dir = TempDir::new().unwrap();
        let mut buffer = disk_buffer(dir.path(), 256);
        for batch in &batches {
            buffer.write(batch).unwrap();
        }
        buffer.finish().unwrap();

        let expected: Vec<LogEvent> = batches.into_iter().flatten().collect();
        prop_assert_eq!(decode_stack(&dir.path().join("stack")).1, expected);
    }
}

// ============================================================================
// Crash and recovery
// ============================================================================

#[test]
fn crash_after_each_flush_loses_nothing() {
    let mut t = TestFlusher::disk();
    for round in 0..4 {
        assert_eq!(t.flush("app", &records_from(round * 5, 5)), FlushCode::Ok);
        t.crash();
        let report = t.restart();
        assert!(report.is_clean());
        assert_eq!(report.uploaded.len(), 1);
    }

    let messages = t.uploader.messages_for("app");
    assert_unique(&messages);
    assert_eq!(messages, messages_from(0, 20));
}

#[test]
fn torn_bin_tail_costs_only_the_last_record() {
    let mut t = TestFlusher::disk();
    assert_eq!(t.flush("app", &records(5)), FlushCode::Ok);
    t.crash();
    tear_tail(&t.bin_path("app"), 3);

    let report = t.restart();
    assert!(report.is_clean());
    assert_eq!(t.uploader.messages_for("app"), messages_from(0, 4));
}

#[test]
fn recovery_reconciles_every_kind_of_pair() {
    let dir = PreparedDir::new();
    let root = dir.root();

    let a_events = events(3, 16);
    dir.bin("A", &encode_stream(&a_events, false));

    let b_events = events(6, 16);
    let b_ir = encode_stream(&b_events, false);
    let b_stack = compress_split(&b_ir, b_ir.len() / 2);
    dir.stack("B", &b_stack);

    dir.bin("C", b"");
    dir.stack("C", b"");
    dir.stack("D", b"");

    let t = dir.start();
    let report = &t.last_recovery;
    assert!(report.is_clean());
    assert_eq!(report.recovered, ["A", "B"]);

    let a = t.uploader.objects_for("A");
    assert_eq!(a.len(), 1);
    assert_eq!(frame_lengths(&a[0].body).0.len(), 1);
    assert_eq!(a[0].events(), a_events);

    let b = t.uploader.objects_for("B");
    assert_eq!(b.len(), 1);
    assert!(b[0].body.starts_with(&b_stack));
    assert_eq!(b[0].events(), b_events);

    for path in [root.join("bin/C"), root.join("stack/C"), root.join("stack/D")] {
        assert!(report.deleted.contains(&path), "{} not deleted", path.display());
        assert!(!path.exists());
    }
    assert!(t.uploader.objects_for("C").is_empty());
}

#[test]
fn terminated_stack_is_uploaded_unchanged() {
    let dir = PreparedDir::new();
    let stack = compress_chunks(&[&encode_stream(&events(4, 8), true)]);
    dir.stack("done", &stack);

    let t = dir.start();
    let objects = t.uploader.objects_for("done");
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].body, stack);
}

#[test]
fn torn_frame_is_cut_from_stack() {
    let dir = PreparedDir::new();
    let whole = events(5, 8);
    let mut stack = compress_chunks(&[&encode_stream(&whole, false)]);
    stack.extend(partial_frame(&[0xAB; 512]));
    dir.stack("app", &stack);

    let t = dir.start();
    assert!(t.last_recovery.is_clean());
    assert_eq!(t.uploader.objects_for("app")[0].events(), whole);
}

#[test]
fn crash_during_first_compaction_uploads_once() {
    let dir = PreparedDir::new();
    let written = events(3, 8);
    let bin = encode_stream(&written, false);
    dir.stack("app", &compress_chunks(&[&bin]));
    dir.bin("app", &bin);

    let t = dir.start();
    assert!(t.last_recovery.is_clean());
    assert_eq!(t.last_recovery.recovered, ["app"]);
    let objects = t.uploader.objects_for("app");
    assert_eq!(objects.len(), 1);
    assert_eq!(frame_lengths(&objects[0].body).0.len(), 2);
    assert_eq!(objects[0].events(), written);
}

#[test]
fn crash_during_later_compaction_uploads_once() {
    let dir = PreparedDir::new();
    let written = events(6, 8);
    let (head, tail) = encode_split(&written, 3);
    dir.stack("app", &compress_chunks(&[&head, &tail]));
    dir.bin("app", &tail);

    let t = dir.start();
    assert!(t.last_recovery.is_clean());
    assert_unique(&t.uploader.messages_for("app"));
    assert_eq!(t.uploader.objects_for("app")[0].events(), written);
}

#[test]
fn recovered_tag_keeps_accepting_records() {
    let mut t = TestFlusher::disk();
    assert_eq!(t.flush("app", &records(2)), FlushCode::Ok);
    t.crash();
    t.restart();

    assert_eq!(t.flush("app", &records_from(2, 3)), FlushCode::Ok);
    t.shutdown();
    t.restart();

    let objects = t.uploader.objects_for("app");
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[1].messages(), messages_from(2, 3));
    assert_ne!(objects[0].key, objects[1].key);
}

#[test]
fn second_flusher_cannot_share_the_directory() {
    let t = TestFlusher::disk();
    let config = disk_config(t.buffer_path().parent().unwrap());
    let result = irpack_core::Flusher::start(config, t.uploader.clone());
    assert!(matches!(result, Err(CoreError::StoreLocked { .. })));
}

// ============================================================================
// Upload failures
// ============================================================================

#[test]
fn failed_upload_is_retried_before_new_records() {
    let t = TestFlusher::memory();
    t.uploader
        .fail_with(Some(UploadError::Retryable("throttled".into())));
    assert_eq!(t.flush("app", &records_from(0, 2)), FlushCode::Retry);
    assert!(t.uploader.is_empty());
    {
        let shared = t.flusher().registry().get("app").unwrap();
        assert!(shared.lock().buffer.is_finished());
    }

    t.uploader.fail_with(None);
    assert_eq!(t.flush("app", &records_from(2, 1)), FlushCode::Ok);

    let objects = t.uploader.objects();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].messages(), messages_from(0, 2));
    assert_eq!(objects[1].messages(), messages_from(2, 1));
}

#[test]
fn fatal_upload_error_is_reported_as_error() {
    let t = TestFlusher::memory();
    t.uploader
        .fail_with(Some(UploadError::Fatal("no such bucket".into())));
    assert_eq!(t.flush("app", &records(1)), FlushCode::Error);
}

#[test]
fn upload_failure_during_recovery_keeps_the_stack() {
    let mut t = TestFlusher::disk();
    assert_eq!(t.flush("app", &records(4)), FlushCode::Ok);
    t.shutdown();

    t.uploader
        .fail_with(Some(UploadError::Retryable("offline".into())));
    let report = t.restart();
    assert_eq!(report.failures.len(), 1);
    assert!(file_len(&t.stack_path("app")).unwrap() > 0);
    assert!(t.uploader.is_empty());

    t.uploader.fail_with(None);
    t.restart();
    let messages = t.uploader.messages_for("app");
    assert_unique(&messages);
    assert_eq!(messages, messages_from(0, 4));
}

// ============================================================================
// Load
// ============================================================================

#[test]
fn concurrent_flushes_deliver_every_record_once() {
    let mut t = TestFlusher::memory();
    let config = StressConfig {
        threads: 6,
        tags: 4,
        flushes: 30,
        batch: 5,
    };
    let result = run_concurrent_flushes(t.flusher(), config);
    assert_eq!(result.failed_ops, 0);
    t.shutdown();

    let mut all = Vec::new();
    for object in t.uploader.objects() {
        all.extend(object.messages());
    }
    assert_unique(&all);
    assert_eq!(all.len(), config.expected_records());
}
