//! Layout of a saturation mutagenesis scores archive.

/// Sequence annotations shared by every replicate of an experiment.
pub const BASE_KEYS: [&str; 5] = ["seqs", "chr", "start", "end", "strand"];

/// Default file name of a scores archive inside a replicate output directory.
pub const DEFAULT_SCORES_NAME: &str = "scores.npz";

pub fn is_base_key(key: &str) -> bool {
    BASE_KEYS.contains(&key)
}

/// Split archive keys into `(base, statistics)`, preserving their order.
pub fn partition_keys(keys: &[String]) -> (Vec<String>, Vec<String>) {
    keys.iter().cloned().partition(|k| is_base_key(k))
}
