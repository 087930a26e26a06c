use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one decoder.
///
/// Updated on the decoder thread; safe to read from another thread (the owner
/// typically forwards [`DecoderStats::to_json`] to a diagnostics page).
#[derive(Debug, Default)]
pub struct DecoderStats {
    batches: AtomicU64,
    commands: AtomicU64,
    protocol_errors: AtomicU64,
    deferrals: AtomicU64,
    yields: AtomicU64,
    draws: AtomicU64,
    draws_rejected: AtomicU64,
    lazy_clears: AtomicU64,
    attrib0_emulations: AtomicU64,
    attrib0_cache_hits: AtomicU64,
    fixed_attrib_conversions: AtomicU64,
    async_uploads_completed: AtomicU64,
    readbacks_completed: AtomicU64,
    context_losses: AtomicU64,
}

macro_rules! counters {
    ($($inc:ident => $field:ident),* $(,)?) => {
        impl DecoderStats {
            $(
                pub fn $inc(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> DecoderStatsSnapshot {
                DecoderStatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    inc_batches => batches,
    inc_commands => commands,
    inc_protocol_errors => protocol_errors,
    inc_deferrals => deferrals,
    inc_yields => yields,
    inc_draws => draws,
    inc_draws_rejected => draws_rejected,
    inc_lazy_clears => lazy_clears,
    inc_attrib0_emulations => attrib0_emulations,
    inc_attrib0_cache_hits => attrib0_cache_hits,
    inc_fixed_attrib_conversions => fixed_attrib_conversions,
    inc_async_uploads_completed => async_uploads_completed,
    inc_readbacks_completed => readbacks_completed,
    inc_context_losses => context_losses,
}

impl DecoderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_commands(&self, n: u64) {
        self.commands.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecoderStatsSnapshot {
    pub batches: u64,
    pub commands: u64,
    pub protocol_errors: u64,
    pub deferrals: u64,
    pub yields: u64,
    pub draws: u64,
    pub draws_rejected: u64,
    pub lazy_clears: u64,
    pub attrib0_emulations: u64,
    pub attrib0_cache_hits: u64,
    pub fixed_attrib_conversions: u64,
    pub async_uploads_completed: u64,
    pub readbacks_completed: u64,
    pub context_losses: u64,
}

impl DecoderStatsSnapshot {
    pub fn to_json(&self) -> String {
        // A struct of plain integers always serialises.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
