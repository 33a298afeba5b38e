use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use e2e_tests::{random_entries, TestHarness};
use vismatch_index::{EmbeddingIndex, IndexCell};
use vismatch_search::Matcher;
use vismatch_types::FeatureVector;

const DEFAULT_ITERATIONS: usize = 5;
const DEFAULT_QUERIES: usize = 20;
const DIMENSION: usize = 2048;

#[derive(Parser, Debug)]
#[command(name = "perf_bench", about = "vismatch index and scan benchmark harness")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(long, default_value_t = DEFAULT_QUERIES)]
    queries: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Write the JSON report here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
    Large,
}

impl DatasetTier {
    fn catalog_size(self) -> usize {
        match self {
            DatasetTier::Small => 1_000,
            DatasetTier::Medium => 10_000,
            DatasetTier::Large => 50_000,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
    samples: usize,
}

#[derive(Debug, Serialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    catalog_size: usize,
    dimension: usize,
    iterations: usize,
    generated_at: String,
    steps: BTreeMap<String, StepMetrics>,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn summarize(mut samples: Vec<f64>) -> StepMetrics {
    samples.sort_by(f64::total_cmp);
    StepMetrics {
        p50_ms: percentile(&samples, 50.0),
        p90_ms: percentile(&samples, 90.0),
        p99_ms: percentile(&samples, 99.0),
        samples: samples.len(),
    }
}

fn time_ms<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed().as_secs_f64() * 1000.0)
}

fn bench_scan(matcher: Matcher, index: &EmbeddingIndex, queries: &[FeatureVector]) -> Vec<f64> {
    queries
        .iter()
        .map(|q| {
            let (result, ms) = time_ms(|| matcher.match_query(q, index));
            if let Err(e) = result {
                eprintln!("scan failed: {e}");
            }
            ms
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let size = args.tier.catalog_size();

    let (ids, vectors) = random_entries(&mut rng, size, DIMENSION);
    let (_, queries) = random_entries(&mut rng, args.queries, DIMENSION);
    let index = EmbeddingIndex::new(ids, vectors)?;

    let mut steps: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for _ in 0..args.iterations {
        let harness = TestHarness::new();

        let (written, ms) = time_ms(|| index.save(&harness.files));
        written?;
        steps.entry("codec_write".into()).or_default().push(ms);

        let (read, ms) = time_ms(|| EmbeddingIndex::load(&harness.files));
        read?;
        steps.entry("codec_read".into()).or_default().push(ms);

        let cell = IndexCell::new(harness.files.clone());
        let start = Instant::now();
        cell.get().await?;
        steps
            .entry("cold_load".into())
            .or_default()
            .push(start.elapsed().as_secs_f64() * 1000.0);

        let sequential = Matcher::new(0.70).with_parallel_scan_min(usize::MAX);
        steps
            .entry("scan_sequential".into())
            .or_default()
            .extend(bench_scan(sequential, &index, &queries));

        let parallel = Matcher::new(0.70).with_parallel_scan_min(1);
        steps
            .entry("scan_parallel".into())
            .or_default()
            .extend(bench_scan(parallel, &index, &queries));
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        catalog_size: size,
        dimension: DIMENSION,
        iterations: args.iterations,
        generated_at: Utc::now().to_rfc3339(),
        steps: steps
            .into_iter()
            .map(|(name, samples)| (name, summarize(samples)))
            .collect(),
    };

    let json = serde_json::to_string_pretty(&output)?;
    match args.out {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}
