use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use seqbatch::{
    Batcher, BatcherConfig, LineFileSource, LineFileSourceConfig, RecordSource, SourceItem,
    SourceMode, Vocab,
};

fn write_corpus(root: &Path) {
    fs::create_dir_all(root.join("b")).unwrap();
    fs::write(
        root.join("a.txt"),
        "t1\t\tfirst body\t\tq1\t\tfirst summary\n\nt2\t\tsecond body\t\tq2\t\tsecond summary\n",
    )
    .unwrap();
    fs::write(
        root.join("b").join("c.txt"),
        "t3\t\tthird body\t\tq3\t\tthird summary\nbroken line without delimiters\n",
    )
    .unwrap();
}

fn collect_pass(source: &mut LineFileSource) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    loop {
        match source.next_record().unwrap() {
            SourceItem::Record(record) => records.push(record.fields().to_vec()),
            SourceItem::EndOfStream => return records,
        }
    }
}

#[test]
fn exhaustible_pass_reads_files_in_sorted_order() {
    let temp = tempdir().unwrap();
    write_corpus(temp.path());
    let mut source = LineFileSource::new(LineFileSourceConfig::new("corpus", temp.path())).unwrap();
    assert_eq!(source.mode(), SourceMode::Exhaustible);
    assert_eq!(source.files().len(), 2);

    let records = collect_pass(&mut source);
    assert_eq!(records.len(), 4);
    assert_eq!(records[0], ["t1/first body", "q1", "first summary"]);
    assert_eq!(records[2], ["t3/third body", "q3", "third summary"]);
    assert_eq!(records[3], ["broken line without delimiters"]);
    assert_eq!(source.passes(), 1);
}

#[test]
fn infinite_mode_keeps_cycling_through_every_record() {
    let temp = tempdir().unwrap();
    write_corpus(temp.path());
    let config = LineFileSourceConfig::new("corpus", temp.path())
        .with_mode(SourceMode::Infinite)
        .with_seed(5);
    let mut source = LineFileSource::new(config).unwrap();

    let mut seen = HashSet::new();
    for _ in 0..12 {
        match source.next_record().unwrap() {
            SourceItem::Record(record) => {
                seen.insert(record.fields().to_vec());
            }
            SourceItem::EndOfStream => panic!("infinite source ended"),
        }
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(source.passes(), 2);
}

#[test]
fn single_pass_batcher_over_line_files() {
    let temp = tempdir().unwrap();
    write_corpus(temp.path());
    let vocab = Arc::new(Vocab::from_words(["body", "summary", "first", "second"]).unwrap());
    let source = LineFileSource::new(LineFileSourceConfig::new("corpus", temp.path())).unwrap();
    let config = BatcherConfig::default()
        .with_batch_size(2)
        .with_max_decoder_steps(4)
        .with_single_pass(true);
    let batcher = Batcher::new(Box::new(source), vocab, config).unwrap();

    let mut targets = Vec::new();
    let mut queries = Vec::new();
    while let Some(batch) = batcher.next_batch().unwrap() {
        targets.extend(batch.original_targets);
        queries.extend(batch.original_queries);
    }
    assert_eq!(
        targets,
        vec!["first summary", "second summary", "third summary"]
    );
    assert_eq!(queries, vec!["q1", "q2", "q3"]);
    assert_eq!(batcher.metrics().records_skipped, 1);
}
