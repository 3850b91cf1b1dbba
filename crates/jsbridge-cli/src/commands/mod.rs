//! CLI command implementations.

pub mod run;
pub mod stats;

use jsbridge_core::HandleStats;

/// Handle table counters, one per line
pub(crate) fn print_stats(stats: &HandleStats) {
    println!("Handle table");
    println!("============");
    println!("Slots:             {}", stats.total_slots);
    println!("  in use:          {}", stats.in_use);
    println!("  disposing:       {}", stats.disposing);
    println!("  weak:            {}", stats.weak);
    println!("  recycled:        {}", stats.recycled);
    println!("Pending weak:      {}", stats.pending_weak);
    println!("Pending strong:    {}", stats.pending_strong);
    println!("Pending releases:  {}", stats.pending_releases);
    println!("Identity mappings: {}", stats.identity_mappings);
    println!("Pooled strings:    {}", stats.pooled_strings);
}
