//! Tracker configuration, injected once at construction.

use serde::{Deserialize, Serialize};

/// Behavior toggles for a [`LoopStack`](crate::LoopStack).
///
/// Earlier revisions of this machinery read environment variables on
/// every decision point; the configuration is now resolved once, either
/// programmatically or via [`TrackerConfig::from_env`], and never
/// re-queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Summarize recursive functions with one reusable node per
    /// function instead of one record per aborted call site.
    pub abstract_recursion: bool,
    /// How many times a called function may still be inlined inside an
    /// abstract call before it is summarized itself.
    pub inlining_depth: u32,
    /// Also havoc misc inputs (read-only loop variables) at the
    /// last-iteration boundary. Over-approximates harder, but is safe
    /// when the read-only classification is not trusted.
    pub carry_misc_inputs: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            abstract_recursion: false,
            inlining_depth: 0,
            carry_misc_inputs: false,
        }
    }
}

impl TrackerConfig {
    /// Read the historical environment toggles. `ENABLE_REC_GRAPH`
    /// switches abstract recursion on; a non-empty
    /// `REC_GRAPH_INLINING` both switches it on and sets the
    /// re-inlining depth.
    pub fn from_env() -> Self {
        let inlining = std::env::var("REC_GRAPH_INLINING")
            .ok()
            .filter(|v| !v.is_empty());
        let depth = inlining
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self {
            abstract_recursion: std::env::var_os("ENABLE_REC_GRAPH").is_some()
                || inlining.is_some(),
            inlining_depth: depth,
            carry_misc_inputs: false,
        }
    }
}
