//! Search configuration (spec §6), following the source stack's own
//! convention of a `serde`-deserializable struct with a `#[serde(default =
//! "...")]` free function per field, so a caller can hand in a partial
//! TOML/JSON document and get sane defaults for the rest.

use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Enable dual-selector overlapped lanes (spec §4.5).
    #[serde(default = "flow_direct_overlapped")]
    pub flow_direct_overlapped: bool,

    /// Allow per-batch virtual-loss adjustment.
    #[serde(default = "use_dynamic_vloss")]
    pub use_dynamic_vloss: bool,

    /// Stop early once the leading child cannot be caught within budget.
    #[serde(default = "futility_pruning_stop_search_enabled")]
    pub futility_pruning_stop_search_enabled: bool,

    #[serde(default = "cache_mode")]
    pub cache_mode: CacheMode,

    #[serde(default)]
    pub secondary_network_id: Option<String>,

    /// 0, 1, or 2 plies of synchronous root preloading (spec §4.5).
    #[serde(default = "root_preload_depth")]
    pub root_preload_depth: u8,

    #[serde(default = "smart_size_batches")]
    pub smart_size_batches: bool,

    #[serde(default = "reuse_position_evaluations_from_other_tree")]
    pub reuse_position_evaluations_from_other_tree: bool,

    /// PUCT exploration constant (may be scaled by a schedule in the
    /// selector; this is the base value at `sum_N == cpuct_base`).
    #[serde(default = "cpuct_init")]
    pub cpuct_init: f32,
    #[serde(default = "cpuct_base")]
    pub cpuct_base: f32,
    #[serde(default = "cpuct_factor")]
    pub cpuct_factor: f32,

    /// First-play-urgency reduction applied to the parent's Q for
    /// unvisited children.
    #[serde(default = "fpu_reduction")]
    pub fpu_reduction: f32,

    /// Virtual loss magnitude applied per in-flight visit.
    #[serde(default = "virtual_loss")]
    pub virtual_loss: f32,

    /// Initial `target_batch_size` before the batch params manager has any
    /// throughput history to learn from.
    #[serde(default = "initial_batch_size")]
    pub initial_batch_size: usize,

    /// Hard cap on descents per batch-construction call, independent of
    /// `target_batch_size` (guards against pathological collision loops).
    #[serde(default = "max_descents_per_batch")]
    pub max_descents_per_batch: usize,

    #[serde(default = "node_pool_capacity")]
    pub node_pool_capacity: usize,
    #[serde(default = "child_pool_capacity")]
    pub child_pool_capacity: usize,

    /// Minimum fraction of the prior root's `N` the reused subtree must
    /// retain for `search_continue` to accept it (spec §4.10, §9 open
    /// question: kept as configuration, not a hardcoded constant).
    #[serde(default = "reuse_threshold_fraction")]
    pub reuse_threshold_fraction: f32,

    /// Minimum spacing between progress callback invocations.
    #[serde(default = "progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Temperature for the first-move softmax sampler; `None` disables it.
    #[serde(default)]
    pub first_move_sampler_temperature: Option<f32>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            flow_direct_overlapped: flow_direct_overlapped(),
            use_dynamic_vloss: use_dynamic_vloss(),
            futility_pruning_stop_search_enabled: futility_pruning_stop_search_enabled(),
            cache_mode: cache_mode(),
            secondary_network_id: None,
            root_preload_depth: root_preload_depth(),
            smart_size_batches: smart_size_batches(),
            reuse_position_evaluations_from_other_tree: reuse_position_evaluations_from_other_tree(),
            cpuct_init: cpuct_init(),
            cpuct_base: cpuct_base(),
            cpuct_factor: cpuct_factor(),
            fpu_reduction: fpu_reduction(),
            virtual_loss: virtual_loss(),
            initial_batch_size: initial_batch_size(),
            max_descents_per_batch: max_descents_per_batch(),
            node_pool_capacity: node_pool_capacity(),
            child_pool_capacity: child_pool_capacity(),
            reuse_threshold_fraction: reuse_threshold_fraction(),
            progress_interval_ms: progress_interval_ms(),
            first_move_sampler_temperature: None,
        }
    }
}

fn flow_direct_overlapped() -> bool {
    false
}
fn use_dynamic_vloss() -> bool {
    false
}
fn futility_pruning_stop_search_enabled() -> bool {
    true
}
fn cache_mode() -> CacheMode {
    CacheMode::ReadWrite
}
fn root_preload_depth() -> u8 {
    1
}
fn smart_size_batches() -> bool {
    true
}
fn reuse_position_evaluations_from_other_tree() -> bool {
    false
}
fn cpuct_init() -> f32 {
    2.5
}
fn cpuct_base() -> f32 {
    19652.0
}
fn cpuct_factor() -> f32 {
    2.0
}
fn fpu_reduction() -> f32 {
    0.25
}
fn virtual_loss() -> f32 {
    1.0
}
fn initial_batch_size() -> usize {
    32
}
fn max_descents_per_batch() -> usize {
    256
}
fn node_pool_capacity() -> usize {
    4_000_000
}
fn child_pool_capacity() -> usize {
    20_000_000
}
fn reuse_threshold_fraction() -> f32 {
    0.05
}
fn progress_interval_ms() -> u64 {
    100
}
