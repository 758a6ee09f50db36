//! Cost estimation from execution timings.
//!
//! Converts summed worker duration plus memory/disk tier and invocation count
//! into a monetary figure via a fixed per-region price table. Mid-render
//! values extrapolate conservatively and are advisory; only the post-render
//! computation over real durations is authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::render::{ChunkTiming, RenderMetadata};

/// Ephemeral disk included with every worker before extra billing applies.
pub const BUNDLED_DISK_MB: u32 = 512;

/// Price points for one region, in USD.
#[derive(Debug, Clone, Copy)]
pub struct RegionPrice {
    pub region: &'static str,
    /// Per GiB-second of configured memory
    pub memory_gib_second: f64,
    /// Per GiB-second of ephemeral disk above the bundled allowance
    pub disk_gib_second: f64,
    /// Per invocation
    pub invocation: f64,
}

/// Fixed per-region price table.
const REGION_PRICES: &[RegionPrice] = &[
    RegionPrice {
        region: "us-east-1",
        memory_gib_second: 0.000_016_666_7,
        disk_gib_second: 0.000_000_030_9,
        invocation: 0.000_000_2,
    },
    RegionPrice {
        region: "us-west-2",
        memory_gib_second: 0.000_016_666_7,
        disk_gib_second: 0.000_000_030_9,
        invocation: 0.000_000_2,
    },
    RegionPrice {
        region: "eu-central-1",
        memory_gib_second: 0.000_016_666_7,
        disk_gib_second: 0.000_000_036_7,
        invocation: 0.000_000_2,
    },
    RegionPrice {
        region: "eu-west-1",
        memory_gib_second: 0.000_016_666_7,
        disk_gib_second: 0.000_000_036_7,
        invocation: 0.000_000_2,
    },
    RegionPrice {
        region: "ap-south-1",
        memory_gib_second: 0.000_016_666_7,
        disk_gib_second: 0.000_000_034_2,
        invocation: 0.000_000_2,
    },
    RegionPrice {
        region: "ap-northeast-1",
        memory_gib_second: 0.000_016_666_7,
        disk_gib_second: 0.000_000_037_0,
        invocation: 0.000_000_2,
    },
    RegionPrice {
        region: "af-south-1",
        memory_gib_second: 0.000_022_1,
        disk_gib_second: 0.000_000_041_1,
        invocation: 0.000_000_28,
    },
    RegionPrice {
        region: "sa-east-1",
        memory_gib_second: 0.000_022_1,
        disk_gib_second: 0.000_000_041_1,
        invocation: 0.000_000_28,
    },
];

/// Look up the price point for a region, falling back to us-east-1 pricing
/// for regions not in the table.
pub fn price_for_region(region: &str) -> RegionPrice {
    REGION_PRICES
        .iter()
        .find(|p| p.region == region)
        .copied()
        .unwrap_or(REGION_PRICES[0])
}

/// A monetary cost estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    /// Estimated cost accrued so far, USD, rounded to 5 decimal places
    pub accrued_so_far: f64,
    /// Human-readable cost string
    pub display_cost: String,
    pub currency: String,
    /// Whether this figure includes mid-render extrapolation
    pub estimate_only: bool,
}

fn round_to_precision(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Convert a billed duration and resource tier into a monetary estimate.
pub fn estimate_cost(
    region: &str,
    duration_ms: u64,
    memory_size_mb: u32,
    disk_size_mb: u32,
    invocations: u32,
) -> CostEstimate {
    let price = price_for_region(region);
    let seconds = duration_ms as f64 / 1_000.0;

    let memory_gib = memory_size_mb as f64 / 1_024.0;
    let memory_cost = memory_gib * seconds * price.memory_gib_second;

    let extra_disk_gib = disk_size_mb.saturating_sub(BUNDLED_DISK_MB) as f64 / 1_024.0;
    let disk_cost = extra_disk_gib * seconds * price.disk_gib_second;

    let invocation_cost = invocations as f64 * price.invocation;

    let accrued = round_to_precision(memory_cost + disk_cost + invocation_cost);

    CostEstimate {
        accrued_so_far: accrued,
        display_cost: format!("${:.5}", accrued),
        currency: "USD".to_string(),
        estimate_only: false,
    }
}

/// Billed duration so far: sum of confirmed chunk durations plus, for every
/// still-unfinished chunk, the full wall-clock elapsed since render start.
/// Assumes every pending chunk has run exactly as long as the render itself,
/// which makes the mid-render figure an upper-leaning estimate.
pub fn estimated_billing_duration_ms(
    timings: &[ChunkTiming],
    total_chunks: u32,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> u64 {
    let finished: u64 = timings.iter().map(ChunkTiming::duration_ms).sum();

    let elapsed_ms = (now - started_at).num_milliseconds().max(0) as u64;
    let unfinished = total_chunks.saturating_sub(timings.len() as u32) as u64;

    finished + elapsed_ms * unfinished
}

/// Mid-render cost estimate from store-confirmed timings. Advisory only.
pub fn accrued_so_far(
    metadata: &RenderMetadata,
    timings: &[ChunkTiming],
    invocations: u32,
    now: DateTime<Utc>,
) -> CostEstimate {
    let billed_ms = estimated_billing_duration_ms(
        timings,
        metadata.total_chunks,
        metadata.started_at,
        now,
    );

    let mut estimate = estimate_cost(
        &metadata.region,
        billed_ms,
        metadata.memory_size_mb,
        metadata.disk_size_mb,
        invocations,
    );
    estimate.estimate_only = timings.len() < metadata.total_chunks as usize;
    estimate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Codec, Privacy, RenderId};
    use chrono::TimeZone;

    fn timing(chunk: u32, start: i64, end: i64) -> ChunkTiming {
        ChunkTiming {
            chunk,
            started_at_ms: start,
            rendered_at_ms: end,
        }
    }

    fn metadata(total_chunks: u32, started_at: DateTime<Utc>) -> RenderMetadata {
        RenderMetadata {
            render_id: RenderId::from_string("r1"),
            started_at,
            total_chunks,
            total_frames: 300,
            fps: 30.0,
            codec: Codec::H264,
            composition_id: "main".to_string(),
            output_key: "renders/r1/out.mp4".to_string(),
            privacy: Privacy::Private,
            frames_per_chunk: 20,
            memory_size_mb: 2_048,
            disk_size_mb: 2_048,
            region: "us-east-1".to_string(),
            verbose: false,
        }
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let a = estimate_cost("us-east-1", 120_000, 2_048, 2_048, 15);
        let b = estimate_cost("us-east-1", 120_000, 2_048, 2_048, 15);
        assert_eq!(a, b);
    }

    #[test]
    fn test_estimate_known_value() {
        // 60s at 1 GiB memory, no extra disk, one invocation:
        // 60 * 0.0000166667 + 0.0000002 = 0.0010002 rounded to 0.001
        let cost = estimate_cost("us-east-1", 60_000, 1_024, BUNDLED_DISK_MB, 1);
        assert!((cost.accrued_so_far - 0.001).abs() < 1e-9);
        assert_eq!(cost.display_cost, "$0.00100");
        assert_eq!(cost.currency, "USD");
    }

    #[test]
    fn test_extra_disk_is_billed() {
        let without = estimate_cost("us-east-1", 600_000, 2_048, BUNDLED_DISK_MB, 10);
        let with = estimate_cost("us-east-1", 600_000, 2_048, 10_240, 10);
        assert!(with.accrued_so_far > without.accrued_so_far);
    }

    #[test]
    fn test_unknown_region_falls_back() {
        let known = estimate_cost("us-east-1", 60_000, 1_024, 512, 1);
        let unknown = estimate_cost("xx-nowhere-9", 60_000, 1_024, 512, 1);
        assert_eq!(known.accrued_so_far, unknown.accrued_so_far);
    }

    #[test]
    fn test_rounding_precision() {
        let cost = estimate_cost("us-east-1", 1, 128, 512, 0);
        let cents = cost.accrued_so_far * 100_000.0;
        assert!((cents - cents.round()).abs() < 1e-9);
    }

    #[test]
    fn test_extrapolation_counts_unfinished_chunks() {
        let started = Utc.timestamp_millis_opt(0).unwrap();
        let now = Utc.timestamp_millis_opt(10_000).unwrap();
        let timings = vec![timing(0, 0, 4_000), timing(1, 0, 6_000)];

        // 4s + 6s finished, 3 unfinished chunks assumed to have run 10s each.
        let billed = estimated_billing_duration_ms(&timings, 5, started, now);
        assert_eq!(billed, 4_000 + 6_000 + 3 * 10_000);
    }

    #[test]
    fn test_mid_render_estimate_at_least_finished_cost() {
        let started = Utc.timestamp_millis_opt(0).unwrap();
        let now = Utc.timestamp_millis_opt(45_000).unwrap();
        let meta = metadata(5, started);
        let timings = vec![timing(0, 0, 9_000), timing(1, 2_000, 13_000)];

        let finished_ms: u64 = timings.iter().map(ChunkTiming::duration_ms).sum();
        let finished_only =
            estimate_cost(&meta.region, finished_ms, meta.memory_size_mb, meta.disk_size_mb, 2);
        let mid_render = accrued_so_far(&meta, &timings, 2, now);

        assert!(mid_render.accrued_so_far >= finished_only.accrued_so_far);
        assert!(mid_render.estimate_only);
    }

    #[test]
    fn test_complete_render_is_authoritative() {
        let started = Utc.timestamp_millis_opt(0).unwrap();
        let now = Utc.timestamp_millis_opt(60_000).unwrap();
        let meta = metadata(2, started);
        let timings = vec![timing(0, 0, 9_000), timing(1, 0, 8_000)];

        let cost = accrued_so_far(&meta, &timings, 2, now);
        assert!(!cost.estimate_only);

        // No extrapolation once every chunk reported a timing.
        let billed = estimated_billing_duration_ms(&timings, 2, started, now);
        assert_eq!(billed, 17_000);
    }
}
