//! Stats command - run a synthetic allocate/dispose cycle and report the
//! handle table afterwards.

use anyhow::Result;
use clap::Args;
use jsbridge_core::{EngineSession, GcCallback, HandleStats, ProxyInfo};
use serde::Serialize;
use std::sync::Arc;

use super::print_stats;
use crate::config::Config;

#[derive(Args)]
pub struct StatsCommand {
    /// Values allocated per round
    #[arg(long, default_value_t = 1000)]
    pub count: usize,

    /// Number of allocate/dispose rounds
    #[arg(long, default_value_t = 3)]
    pub rounds: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct RoundReport {
    pub round: usize,
    /// Table right after allocation
    pub allocated: HandleStats,
    /// Table after disposal and a full collection
    pub settled: HandleStats,
}

impl StatsCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let reports = self.cycle(config)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            return Ok(());
        }
        for report in &reports {
            println!(
                "Round {}: {} slots, {} in use after allocation",
                report.round, report.allocated.total_slots, report.allocated.in_use
            );
        }
        if let Some(last) = reports.last() {
            println!();
            print_stats(&last.settled);
        }
        Ok(())
    }

    /// Each round allocates `count` values split three ways: numbers disposed
    /// outright, strings held through [`jsbridge_core::Handle`]s and dropped,
    /// and objects with managed ids handed to the collector as weak proxies.
    pub fn cycle(&self, config: &Config) -> Result<Vec<RoundReport>> {
        let session = EngineSession::new(config.session.clone());
        let collect: GcCallback = Arc::new(|_: &ProxyInfo| true);
        session.register_gc_callback(Some(collect));

        let mut reports = Vec::with_capacity(self.rounds);
        for round in 0..self.rounds {
            let mut numbers = Vec::new();
            let mut strings = Vec::new();
            let mut objects = Vec::new();
            for i in 0..self.count {
                match i % 3 {
                    0 => numbers.push(session.create_number(i as f64 + 0.5)?),
                    1 => strings.push(session.wrap(session.create_string(&format!("value {i}"))?)?),
                    _ => objects.push(session.create_object(i32::try_from(i).unwrap_or(i32::MAX))?),
                }
            }
            let allocated = session.stats();

            for id in numbers {
                session.try_dispose(id);
            }
            drop(strings);
            for id in objects {
                if session.mark_disposing(id) {
                    session.request_weak(id)?;
                }
            }
            session.drain_transitions();
            session.force_gc()?;
            let settled = session.stats();

            tracing::debug!(round, recycled = settled.recycled, "round settled");
            reports.push(RoundReport {
                round: round + 1,
                allocated,
                settled,
            });
        }
        session.shutdown();
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(count: usize, rounds: usize) -> StatsCommand {
        StatsCommand {
            count,
            rounds,
            json: false,
        }
    }

    #[test]
    fn test_cycle_recycles_everything() {
        let reports = command(30, 2).cycle(&Config::default()).unwrap();
        assert_eq!(reports.len(), 2);

        for report in &reports {
            assert!(report.allocated.in_use >= 30);
            assert_eq!(report.settled.in_use, 0);
            assert_eq!(report.settled.weak, 0);
            assert_eq!(report.settled.identity_mappings, 0);
        }
    }

    #[test]
    fn test_second_round_reuses_slots() {
        let reports = command(30, 2).cycle(&Config::default()).unwrap();
        assert_eq!(reports[0].settled.total_slots, reports[1].settled.total_slots);
        assert_eq!(reports[1].settled.recycled, reports[1].settled.total_slots);
    }

    #[test]
    fn test_report_serializes() {
        let reports = command(3, 1).cycle(&Config::default()).unwrap();
        let json = serde_json::to_value(&reports).unwrap();
        assert_eq!(json[0]["round"], 1);
        assert!(json[0]["settled"]["total_slots"].as_u64().unwrap() >= 3);
    }
}
