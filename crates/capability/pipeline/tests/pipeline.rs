use async_trait::async_trait;
use domain::Sample;
use fleet_pipeline::{
    Pipeline, PipelineConfig, PipelineError, SampleWriter, StorageSampleWriter,
};
use fleet_storage::{InMemoryRealtimeStore, InMemorySampleStore, RealtimeStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn sample(i: i64, value: f64) -> Sample {
    Sample {
        device_id: 1,
        tag_name: format!("Tag{i}"),
        value,
        ts_ms: 1_000 + i,
    }
}

fn samples(n: i64) -> Vec<Sample> {
    (0..n).map(|i| sample(i, i as f64)).collect()
}

#[derive(Default)]
struct RecordingWriter {
    batches: Mutex<Vec<usize>>,
    delay: Option<Duration>,
    fail: bool,
}

impl RecordingWriter {
    fn batches(&self) -> Vec<usize> {
        self.batches.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SampleWriter for RecordingWriter {
    async fn write_batch(&self, samples: &[Sample]) -> Result<usize, PipelineError> {
        self.batches.lock().expect("lock").push(samples.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(PipelineError::Writer("disk full".to_string()));
        }
        Ok(samples.len())
    }
}

fn config(capacity: usize, batch_size: usize, flush_ms: u64) -> PipelineConfig {
    PipelineConfig {
        capacity,
        batch_size,
        flush_interval: Duration::from_millis(flush_ms),
    }
}

#[tokio::test(start_paused = true)]
async fn small_burst_is_flushed_once_after_time_threshold() {
    let writer = Arc::new(RecordingWriter::default());
    let pipeline = Pipeline::start(writer.clone(), PipelineConfig::default());

    assert_eq!(pipeline.enqueue(samples(10)).await.expect("enqueue"), 10);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(writer.batches().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(writer.batches(), vec![10]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(writer.batches(), vec![10]);
    let stats = pipeline.stats();
    assert_eq!(stats.received, 10);
    assert_eq!(stats.processed, 10);
    assert_eq!(stats.batches, 1);
    assert!(stats.last_flush_ms > 0);
}

#[tokio::test(start_paused = true)]
async fn full_batches_flush_without_waiting_and_shutdown_drains_rest() {
    let writer = Arc::new(RecordingWriter::default());
    let pipeline = Pipeline::start(writer.clone(), config(100, 5, 3_600_000));

    pipeline.enqueue(samples(12)).await.expect("enqueue");
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(writer.batches(), vec![5, 5]);

    pipeline.shutdown().await.expect("shutdown");
    assert_eq!(writer.batches(), vec![5, 5, 2]);
    assert_eq!(pipeline.stats().processed, 12);
}

#[tokio::test(start_paused = true)]
async fn enqueue_blocks_while_queue_is_full() {
    let writer = Arc::new(RecordingWriter {
        delay: Some(Duration::from_secs(10)),
        ..RecordingWriter::default()
    });
    let pipeline = Pipeline::start(writer.clone(), config(2, 2, 3_600_000));

    // 前两条被消费者取走并卡在写入中，后两条占满队列
    assert_eq!(pipeline.enqueue(samples(4)).await.expect("enqueue"), 4);

    let blocked =
        tokio::time::timeout(Duration::from_secs(1), pipeline.enqueue(samples(1))).await;
    assert!(blocked.is_err(), "enqueue should wait for free capacity");

    tokio::time::sleep(Duration::from_secs(10)).await;
    let accepted = tokio::time::timeout(Duration::from_secs(1), pipeline.enqueue(samples(1)))
        .await
        .expect("capacity available")
        .expect("enqueue");
    assert_eq!(accepted, 1);
    assert_eq!(pipeline.stats().received, 5);
}

#[tokio::test(start_paused = true)]
async fn failing_write_is_counted_and_not_retried() {
    let writer = Arc::new(RecordingWriter {
        fail: true,
        ..RecordingWriter::default()
    });
    let pipeline = Pipeline::start(writer.clone(), config(100, 10, 500));

    pipeline.enqueue(samples(3)).await.expect("enqueue");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(writer.batches(), vec![3]);
    let stats = pipeline.stats();
    assert_eq!(stats.error_batches, 1);
    assert_eq!(stats.error_samples, 3);
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.batches, 1);
}

#[tokio::test(start_paused = true)]
async fn non_finite_values_are_dropped_as_invalid() {
    let writer = Arc::new(RecordingWriter::default());
    let pipeline = Pipeline::start(writer.clone(), PipelineConfig::default());

    let accepted = pipeline
        .enqueue(vec![
            sample(0, f64::NAN),
            sample(1, f64::INFINITY),
            sample(2, 21.5),
        ])
        .await
        .expect("enqueue");
    assert_eq!(accepted, 1);
    assert_eq!(pipeline.stats().dropped_invalid, 2);

    pipeline.shutdown().await.expect("shutdown");
    assert_eq!(writer.batches(), vec![1]);
}

#[tokio::test]
async fn enqueue_after_shutdown_reports_closed() {
    let store = Arc::new(InMemorySampleStore::new());
    let realtime = Arc::new(InMemoryRealtimeStore::new());
    let writer = Arc::new(StorageSampleWriter::new(
        store.clone(),
        Some(realtime.clone() as Arc<dyn RealtimeStore>),
    ));
    let pipeline = Pipeline::start(writer, config(100, 50, 60_000));

    pipeline.enqueue(samples(3)).await.expect("enqueue");
    pipeline.shutdown().await.expect("shutdown");
    assert_eq!(store.len(), 3);
    assert_eq!(realtime.len(), 3);

    let err = pipeline.enqueue(samples(1)).await.expect_err("closed");
    assert!(matches!(err, PipelineError::Closed));
    pipeline.shutdown().await.expect("second shutdown");
}
