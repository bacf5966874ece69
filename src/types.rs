/// Integer id of a token in the base or extended vocabulary.
/// Examples: `0` (padding), `2` (stop marker), `50_003` (first in-example OOV of a 50k vocab)
pub type TokenId = u32;
/// Whitespace-delimited token text.
/// Examples: `the`, `[STOP]`, `xbrl`
pub type Word = String;
/// Identifier for the store that produced raw records.
/// Examples: `train_files`, `in_memory`
pub type SourceId = String;
/// Row-major matrix of token ids, one row per example in a batch.
pub type IdMatrix = Vec<Vec<TokenId>>;
/// Row-major padding mask (`1` = real token, `0` = padding), one row per example.
pub type MaskMatrix = Vec<Vec<u8>>;
