// Matrix row-sum benchmark
//
// Every row is handed to a unit as a byte buffer; the same rows are then
// summed one after another on a single-unit pool. Totals must agree.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Args;
use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::PoolArgs;
use crate::output::{print_field, OutputFormat};
use crate::tasks;

#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Number of matrix rows (one invocation each)
    #[arg(long, default_value = "64")]
    pub rows: usize,

    /// Bytes per row
    #[arg(long, default_value = "1048576")]
    pub cols: usize,

    /// Seed of the random matrix
    #[arg(long, default_value = "7")]
    pub seed: u64,

    #[command(flatten)]
    pub pool: PoolArgs,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    rows: usize,
    cols: usize,
    max_units: usize,
    isolation: String,
    total: u64,
    parallel_ms: u64,
    sequential_ms: u64,
    speedup: f64,
}

pub async fn run(args: BenchArgs, output: OutputFormat) -> Result<()> {
    let matrix = random_matrix(args.rows, args.cols, args.seed);

    let parallel_pool = args.pool.pool(tasks::ROW_SUM)?;
    let max_units = parallel_pool.config().max_units;
    let (total, parallel) = sum_rows(&parallel_pool, &matrix).await?;
    parallel_pool.terminate();

    let mut sequential_args = args.pool.clone();
    sequential_args.max_units = Some(1);
    let sequential_pool = sequential_args.pool(tasks::ROW_SUM)?;
    let (sequential_total, sequential) = sum_rows(&sequential_pool, &matrix).await?;
    sequential_pool.terminate();

    if total != sequential_total {
        bail!("parallel total {total} does not match sequential total {sequential_total}");
    }

    let report = BenchReport {
        rows: args.rows,
        cols: args.cols,
        max_units,
        isolation: args.pool.isolation.clone(),
        total,
        parallel_ms: parallel.as_millis() as u64,
        sequential_ms: sequential.as_millis() as u64,
        speedup: sequential.as_secs_f64() / parallel.as_secs_f64().max(f64::EPSILON),
    };

    if output.is_text() {
        print_field("Matrix", &format!("{} x {}", report.rows, report.cols));
        print_field("Units", &format!("{} ({})", report.max_units, report.isolation));
        print_field("Total", &report.total.to_string());
        print_field("Parallel", &format!("{} ms", report.parallel_ms));
        print_field("Sequential", &format!("{} ms", report.sequential_ms));
        print_field("Speedup", &format!("{:.2}x", report.speedup));
    } else {
        output.print_value(&report)?;
    }

    Ok(())
}

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows)
        .map(|_| {
            let mut row = vec![0u8; cols];
            rng.fill(row.as_mut_slice());
            row
        })
        .collect()
}

/// Submit every row, then wait for all of them
async fn sum_rows(pool: &parallel_workers::WorkerPool, matrix: &[Vec<u8>]) -> Result<(u64, Duration)> {
    let started = Instant::now();
    let invocations = matrix
        .iter()
        .map(|row| pool.submit_with_buffers(Vec::new(), vec![row.clone()]));
    let sums = try_join_all(invocations).await?;
    let elapsed = started.elapsed();

    let mut total = 0u64;
    for sum in sums {
        match sum.as_u64() {
            Some(value) => total += value,
            None => bail!("row_sum returned a non-integer: {sum}"),
        }
    }
    Ok((total, elapsed))
}
