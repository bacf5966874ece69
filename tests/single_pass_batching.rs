use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use seqbatch::constants::vocab::STOP_ID;
use seqbatch::{
    Batcher, BatcherConfig, BatcherError, BatcherMode, InMemorySource, RawRecord, RecordSource,
    SourceItem, SourceMode, Vocab, Vocabulary,
};

fn vocab() -> Arc<Vocab> {
    Arc::new(Vocab::from_words(["the", "cat", "sat", "on", "mat", "a", "b"]).unwrap())
}

fn numbered_records(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| RawRecord::new(format!("doc{i} the cat"), "the", format!("a tok{i}")))
        .collect()
}

fn single_pass(batch_size: usize) -> BatcherConfig {
    BatcherConfig::default()
        .with_batch_size(batch_size)
        .with_max_decoder_steps(6)
        .with_single_pass(true)
}

fn drain(batcher: &Batcher) -> Vec<seqbatch::Batch> {
    let mut batches = Vec::new();
    while let Some(batch) = batcher.next_batch().unwrap() {
        batches.push(batch);
    }
    batches
}

#[test]
fn three_records_make_one_dynamically_padded_batch() {
    let records = vec![
        RawRecord::new("the cat", "", "a"),
        RawRecord::new("the cat sat on mat", "", "a"),
        RawRecord::new("the cat sat", "", "a"),
    ];
    let source = InMemorySource::new("scenario", records, SourceMode::Exhaustible);
    let config = single_pass(3).with_bucketing_cache_size(1);
    let batcher = Batcher::new(Box::new(source), vocab(), config).unwrap();

    let batches = drain(&batcher);
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.encoder_width(), 6);
    assert_eq!(batch.encoder_lens, vec![3, 6, 4]);
    assert_eq!(batch.encoder_mask[0], vec![1, 1, 1, 0, 0, 0]);
    assert!(batch.decoder_input_ids.iter().all(|row| row.len() == 6));
    assert!(batcher.is_finished_reading());
    assert!(batcher.next_batch().unwrap().is_none());
}

#[test]
fn every_record_is_visited_once_in_read_order() {
    let records = numbered_records(10);
    let source = InMemorySource::new("ordered", records.clone(), SourceMode::Exhaustible);
    let batcher = Batcher::new(Box::new(source), vocab(), single_pass(3)).unwrap();

    let batches = drain(&batcher);
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);

    let seen: Vec<String> = batches
        .into_iter()
        .flat_map(|batch| batch.original_sources)
        .collect();
    let expected: Vec<String> = records
        .iter()
        .map(|record| record.source().unwrap().to_string())
        .collect();
    assert_eq!(seen, expected);

    let metrics = batcher.metrics();
    assert_eq!(metrics.records_read, 10);
    assert_eq!(metrics.examples_built, 10);
    assert_eq!(metrics.batches_produced, 4);
}

#[test]
fn single_pass_ignores_worker_and_cache_overrides() {
    let records = numbered_records(7);
    let source = InMemorySource::new("overrides", records.clone(), SourceMode::Exhaustible);
    let config = single_pass(2)
        .with_workers(4, 3)
        .with_bucketing_cache_size(50);
    let batcher = Batcher::new(Box::new(source), vocab(), config).unwrap();
    assert_eq!(batcher.worker_status().len(), 2);

    let seen: Vec<String> = drain(&batcher)
        .into_iter()
        .flat_map(|batch| batch.original_sources)
        .collect();
    assert_eq!(seen.len(), 7);
    assert_eq!(seen[0], records[0].source().unwrap());
    assert_eq!(seen[6], records[6].source().unwrap());
    assert_eq!(batcher.check_workers(), 0);
}

#[test]
fn malformed_records_are_skipped_and_counted() {
    let records = vec![
        RawRecord::new("the cat", "", "a"),
        RawRecord::from_fields(vec!["no target".into()]),
        RawRecord::new("", "the", "a"),
        RawRecord::new("the mat", "on", "b"),
    ];
    let source = InMemorySource::new("mixed", records, SourceMode::Exhaustible);
    let batcher = Batcher::new(Box::new(source), vocab(), single_pass(4)).unwrap();

    let batches = drain(&batcher);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].original_sources, vec!["the cat", "the mat"]);
    let metrics = batcher.metrics();
    assert_eq!(metrics.records_read, 4);
    assert_eq!(metrics.records_skipped, 2);
}

#[test]
fn decode_mode_replicates_each_record() {
    let records = numbered_records(3);
    let source = InMemorySource::new("decode", records, SourceMode::Exhaustible);
    let config = single_pass(4).with_mode(BatcherMode::Decode);
    let batcher = Batcher::new(Box::new(source), vocab(), config).unwrap();

    let batches = drain(&batcher);
    assert_eq!(batches.len(), 3);
    for batch in &batches {
        assert_eq!(batch.len(), 4);
        assert!(batch.original_sources.windows(2).all(|w| w[0] == w[1]));
        assert!(batch.encoder_ids_ext.windows(2).all(|w| w[0] == w[1]));
    }
}

#[test]
fn extended_ids_round_trip_through_oov_words() {
    let records = vec![RawRecord::new("zebra the yak", "emu", "yak a zebra")];
    let source = InMemorySource::new("oov", records, SourceMode::Exhaustible);
    let vocab = vocab();
    let batcher = Batcher::new(Box::new(source), vocab.clone(), single_pass(1)).unwrap();

    let batch = batcher.next_batch().unwrap().unwrap();
    assert_eq!(batch.max_oov_count, 3);
    let oovs = batch.oov_words(0).unwrap();
    assert_eq!(oovs, ["zebra", "yak", "emu"]);

    let len = batch.decoder_lens[0];
    let words =
        seqbatch::output_ids_to_words(&batch.target_ids[0][..len], vocab.as_ref(), oovs).unwrap();
    assert_eq!(words, vec!["yak", "a", "zebra", vocab.stop_token()]);
    assert_eq!(batch.target_ids[0][len - 1], STOP_ID);
}

#[test]
fn source_mode_must_match_single_pass() {
    let source = InMemorySource::new("inf", numbered_records(2), SourceMode::Infinite);
    let result = Batcher::new(Box::new(source), vocab(), single_pass(2));
    assert!(matches!(result, Err(BatcherError::Configuration(_))));

    let source = InMemorySource::new("fin", numbered_records(2), SourceMode::Exhaustible);
    let result = Batcher::new(Box::new(source), vocab(), BatcherConfig::default());
    assert!(matches!(result, Err(BatcherError::Configuration(_))));
}

struct FailingSource {
    served: usize,
    panic_instead: bool,
}

impl RecordSource for FailingSource {
    fn id(&self) -> &str {
        "failing"
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Exhaustible
    }

    fn next_record(&mut self) -> Result<SourceItem, BatcherError> {
        self.served += 1;
        if self.served > 2 {
            if self.panic_instead {
                panic!("record store crashed");
            }
            return Err(BatcherError::SourceUnavailable {
                source_id: "failing".into(),
                reason: "disk went away".into(),
            });
        }
        Ok(SourceItem::Record(RawRecord::new("the cat", "", "a")))
    }
}

#[test]
fn source_error_fails_a_single_pass_run() {
    let source = FailingSource {
        served: 0,
        panic_instead: false,
    };
    let batcher = Batcher::new(Box::new(source), vocab(), single_pass(4)).unwrap();
    let err = batcher.next_batch().unwrap_err();
    assert!(matches!(err, BatcherError::PipelineFailed { .. }));
    assert!(err.to_string().contains("disk went away"));
    assert_eq!(batcher.check_workers(), 0);
}

#[test]
fn worker_panic_fails_a_single_pass_run() {
    let source = FailingSource {
        served: 0,
        panic_instead: true,
    };
    let batcher = Batcher::new(Box::new(source), vocab(), single_pass(4)).unwrap();
    let err = batcher.next_batch().unwrap_err();
    assert!(err.to_string().contains("panicked"));
    assert!(batcher.next_batch().is_err());
}

#[test]
fn next_batch_after_shutdown_is_an_error() {
    let source = InMemorySource::new("stop", numbered_records(4), SourceMode::Exhaustible);
    let mut batcher = Batcher::new(Box::new(source), vocab(), single_pass(2)).unwrap();
    batcher.shutdown();
    assert!(matches!(
        batcher.next_batch(),
        Err(BatcherError::PipelineFailed { .. })
    ));
}

/// Exhaustible source that serves whatever arrives on a channel and ends when
/// the sender hangs up.
struct GatedSource {
    records: Receiver<RawRecord>,
}

impl RecordSource for GatedSource {
    fn id(&self) -> &str {
        "gated"
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Exhaustible
    }

    fn next_record(&mut self) -> Result<SourceItem, BatcherError> {
        match self.records.recv() {
            Ok(record) => Ok(SourceItem::Record(record)),
            Err(_) => Ok(SourceItem::EndOfStream),
        }
    }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn waiting_on_an_empty_batch_queue_counts_a_stall() {
    let (tx, rx) = mpsc::channel();
    let source = GatedSource { records: rx };
    let batcher = Batcher::new(Box::new(source), vocab(), single_pass(1)).unwrap();
    assert_eq!(batcher.metrics().queue_stalls, 0);

    let batch = thread::scope(|scope| {
        let consumer = scope.spawn(|| batcher.next_batch());
        assert!(wait_until(Duration::from_secs(5), || {
            batcher.metrics().queue_stalls >= 1
        }));
        tx.send(RawRecord::new("the cat sat", "", "a")).unwrap();
        consumer.join().unwrap()
    });
    let batch = batch.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.original_sources, vec!["the cat sat".to_string()]);
    assert_eq!(batcher.metrics().queue_stalls, 1);

    drop(tx);
    assert!(batcher.next_batch().unwrap().is_none());
    let stalls = batcher.metrics().queue_stalls;
    assert!(batcher.next_batch().unwrap().is_none());
    assert_eq!(batcher.metrics().queue_stalls, stalls);
}
