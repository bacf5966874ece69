use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::constants::batcher::DEFAULT_SEED;
use crate::constants::record::{LINE_FIELD_COUNT, LINE_FIELD_DELIMITER, SOURCE_FIELD_JOINER};
use crate::data::RawRecord;
use crate::errors::BatcherError;
use crate::hash::stable_hash_str;
use crate::source::{RecordSource, SourceItem, SourceMode};
use crate::types::SourceId;

/// Configuration for a directory-backed line source.
#[derive(Clone, Debug)]
pub struct LineFileSourceConfig {
    /// Stable source identifier used in logs and errors.
    pub source_id: SourceId,
    /// Directory walked for record files.
    pub root: PathBuf,
    /// Single pass in sorted file order, or endless reshuffled passes.
    pub mode: SourceMode,
    /// Seed for the per-pass file shuffle in infinite mode.
    pub seed: u64,
    /// Whether to follow symlinks while walking `root`.
    pub follow_links: bool,
    /// Only read files with this extension, when set.
    pub extension: Option<String>,
}

impl LineFileSourceConfig {
    pub fn new(source_id: impl Into<SourceId>, root: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            root: root.into(),
            mode: SourceMode::Exhaustible,
            seed: DEFAULT_SEED,
            follow_links: true,
            extension: None,
        }
    }

    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }
}

/// Record source reading one record per line from every file under a root.
///
/// Lines hold fields separated by a double tab. A four-field line
/// `a, b, c, d` becomes source `a/b`, query `c` and target `d`. Blank lines
/// are skipped and any other line is handed over unchanged for the builder
/// to reject. An infinite pass without a single well-formed record fails with
/// [`BatcherError::EmptySource`].
pub struct LineFileSource {
    config: LineFileSourceConfig,
    files: Vec<PathBuf>,
    next_file: usize,
    lines: Option<(PathBuf, Lines<BufReader<File>>)>,
    records_this_pass: usize,
    passes: u64,
    rng: StdRng,
}

impl LineFileSource {
    /// Index the files under `config.root`.
    ///
    /// Fails with [`BatcherError::EmptySource`] when no file matches.
    pub fn new(config: LineFileSourceConfig) -> Result<Self, BatcherError> {
        let rng = StdRng::seed_from_u64(stable_hash_str(config.seed, &config.source_id));
        let mut source = Self {
            config,
            files: Vec::new(),
            next_file: 0,
            lines: None,
            records_this_pass: 0,
            passes: 0,
            rng,
        };
        source.start_pass()?;
        info!(
            source_id = %source.config.source_id,
            root = %source.config.root.display(),
            files = source.files.len(),
            mode = ?source.config.mode,
            "indexed line file source"
        );
        Ok(source)
    }

    /// Files of the current pass, in read order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Completed passes so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn start_pass(&mut self) -> Result<(), BatcherError> {
        let mut files = self.list_files();
        if files.is_empty() {
            warn!(
                source_id = %self.config.source_id,
                root = %self.config.root.display(),
                "no record files found"
            );
            return Err(self.empty());
        }
        if self.config.mode == SourceMode::Infinite {
            files.shuffle(&mut self.rng);
        }
        self.files = files;
        self.next_file = 0;
        self.lines = None;
        self.records_this_pass = 0;
        Ok(())
    }

    fn list_files(&self) -> Vec<PathBuf> {
        let mut walker = WalkDir::new(&self.config.root);
        if self.config.follow_links {
            walker = walker.follow_links(true);
        }
        let mut files: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.matches_extension(path))
            .collect();
        files.sort();
        files
    }

    fn matches_extension(&self, path: &Path) -> bool {
        match &self.config.extension {
            Some(wanted) => path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy() == wanted.trim_start_matches('.')),
            None => true,
        }
    }

    fn empty(&self) -> BatcherError {
        BatcherError::EmptySource {
            source_id: self.config.source_id.clone(),
        }
    }

    fn unavailable(&self, reason: String) -> BatcherError {
        BatcherError::SourceUnavailable {
            source_id: self.config.source_id.clone(),
            reason,
        }
    }
}

impl RecordSource for LineFileSource {
    fn id(&self) -> &str {
        &self.config.source_id
    }

    fn mode(&self) -> SourceMode {
        self.config.mode
    }

    fn next_record(&mut self) -> Result<SourceItem, BatcherError> {
        loop {
            if let Some((path, lines)) = self.lines.as_mut() {
                match lines.next() {
                    Some(line) => {
                        let line = line.map_err(|err| BatcherError::SourceUnavailable {
                            source_id: self.config.source_id.clone(),
                            reason: format!("read failed for {}: {err}", path.display()),
                        })?;
                        if let Some(record) = parse_line(&line) {
                            if record.validate().is_ok() {
                                self.records_this_pass += 1;
                            }
                            return Ok(SourceItem::Record(record));
                        }
                        continue;
                    }
                    None => {
                        debug!(path = %path.display(), "finished record file");
                        self.lines = None;
                        continue;
                    }
                }
            }

            if let Some(path) = self.files.get(self.next_file).cloned() {
                self.next_file += 1;
                let file = File::open(&path).map_err(|err| {
                    self.unavailable(format!("open failed for {}: {err}", path.display()))
                })?;
                self.lines = Some((path, BufReader::new(file).lines()));
                continue;
            }

            self.passes += 1;
            match self.config.mode {
                SourceMode::Exhaustible => return Ok(SourceItem::EndOfStream),
                SourceMode::Infinite => {
                    if self.records_this_pass == 0 {
                        return Err(self.empty());
                    }
                    debug!(
                        source_id = %self.config.source_id,
                        pass = self.passes,
                        records = self.records_this_pass,
                        "restarting infinite pass"
                    );
                    self.start_pass()?;
                }
            }
        }
    }
}

/// Parse one stored line. Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<RawRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let fields: Vec<&str> = line.split(LINE_FIELD_DELIMITER).collect();
    if fields.len() == LINE_FIELD_COUNT {
        let source = format!(
            "{}{SOURCE_FIELD_JOINER}{}",
            fields[0].trim(),
            fields[1].trim()
        );
        return Some(RawRecord::new(source, fields[2].trim(), fields[3].trim()));
    }
    Some(RawRecord::from_fields(
        fields.into_iter().map(str::to_string).collect(),
    ))
}
