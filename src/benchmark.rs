//! Throughput benchmark for piped channels
//!
//! Builds a source of `elements` integers piped through `depth` identity
//! stages (optionally fanned out through `concat_map`) and runs it to
//! completion `runs` times.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::effect::Exit;
use crate::engine::Engine;
use crate::types::Val;

pub struct BenchmarkParams {
    pub depth: usize,
    pub elements: usize,
    pub runs: usize,
    pub concat: bool,
    pub timeout: Option<String>,
}

struct BenchmarkMetrics {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    runs: usize,
    elements_per_run: usize,
    failed_runs: usize,
    run_durations: Vec<Duration>,
}

pub async fn run_benchmark(engine: &Engine, params: BenchmarkParams) -> Result<()> {
    println!("🚀 Starting Conduit Benchmark");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    validate_params(&params)?;

    println!("\n📋 Configuration:");
    println!("   Pipe depth: {}", params.depth);
    println!("   Elements: {}", params.elements);
    println!("   Runs: {}", params.runs);
    if params.concat {
        println!("   Concat fan-out: on");
    }

    let timeout = match &params.timeout {
        Some(duration_str) => parse_duration(duration_str)?,
        None => Duration::from_secs(300),
    };

    let channel = build_pipeline(&params);
    let start_time = Utc::now();
    let started = Instant::now();

    println!("\n⏳ Running...");
    let mut run_durations = Vec::with_capacity(params.runs);
    let mut failed_runs = 0;
    for _ in 0..params.runs {
        if started.elapsed() > timeout {
            println!("⚠️  Timeout reached");
            break;
        }
        let run_start = Instant::now();
        let exit = engine.run_drain(channel.clone()).await;
        run_durations.push(run_start.elapsed());
        if let Exit::Failure(cause) = exit {
            println!("   Run failed: {}", cause);
            failed_runs += 1;
        }
    }
    println!("✓ Done");

    let metrics = BenchmarkMetrics {
        start_time,
        end_time: Utc::now(),
        runs: run_durations.len(),
        elements_per_run: expected_elements(&params),
        failed_runs,
        run_durations,
    };
    display_report(&metrics);

    Ok(())
}

fn validate_params(params: &BenchmarkParams) -> Result<()> {
    if params.runs == 0 {
        return Err(anyhow!("Must run at least once"));
    }
    if params.elements == 0 {
        return Err(anyhow!("Must specify --elements greater than 0"));
    }
    Ok(())
}

/// Source piped through `depth` identity stages
pub fn build_pipeline(params: &BenchmarkParams) -> Channel {
    let source = Channel::write_all((0..params.elements as i64).map(Val::Int));
    let source = if params.concat {
        source.concat_map(|value: Val| {
            let n = value.as_int().unwrap_or_default();
            Channel::write_all(vec![n, -n])
        })
    } else {
        source
    };

    (0..params.depth).fold(source, |upstream, _| upstream.pipe_to(Channel::identity()))
}

fn expected_elements(params: &BenchmarkParams) -> usize {
    if params.concat {
        params.elements * 2
    } else {
        params.elements
    }
}

fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim();
    let (number, unit) = duration_str
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| duration_str.split_at(idx))
        .unwrap_or((duration_str, "s"));

    let value: u64 = number
        .parse()
        .map_err(|_| anyhow!("Invalid duration '{}'", duration_str))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(anyhow!("Invalid duration unit '{}'. Use ms, s or m", unit)),
    }
}

fn display_report(metrics: &BenchmarkMetrics) {
    let duration_secs = (metrics.end_time - metrics.start_time).num_milliseconds() as f64 / 1000.0;
    let total_elements = metrics.runs * metrics.elements_per_run;
    let throughput = if duration_secs > 0.0 {
        total_elements as f64 / duration_secs
    } else {
        0.0
    };
    let average_ms = if metrics.run_durations.is_empty() {
        0.0
    } else {
        let total: Duration = metrics.run_durations.iter().sum();
        total.as_secs_f64() * 1000.0 / metrics.run_durations.len() as f64
    };

    println!("\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📊 Benchmark Results");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("⏱️  Duration: {:.2}s", duration_secs);
    println!();
    println!("📋 Work:");
    println!("   Runs: {} ({} failed)", metrics.runs, metrics.failed_runs);
    println!("   Elements per run: {}", metrics.elements_per_run);
    println!();
    println!("🚀 Throughput: {:.1} elements/sec", throughput);
    println!();
    println!("📈 Average Run: {:.2}ms", average_ms);
    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(depth: usize, elements: usize, concat: bool) -> BenchmarkParams {
        BenchmarkParams {
            depth,
            elements,
            runs: 1,
            concat,
            timeout: None,
        }
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert!(parse_duration("3h").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_runs() {
        let mut p = params(1, 10, false);
        p.runs = 0;
        assert!(validate_params(&p).is_err());
    }

    #[tokio::test]
    async fn test_deep_pipeline_preserves_elements() {
        // Many stacked pipes must not lose or reorder elements
        let engine = Engine::new();
        let channel = build_pipeline(&params(64, 20, false));

        let exit = engine.run_collect(channel).await;

        let Exit::Success(Val::List(parts)) = exit else {
            unreachable!("Expected [elements, done], got {:?}", exit);
        };
        let expected: Vec<Val> = (0..20).map(Val::Int).collect();
        assert_eq!(parts[0], Val::List(expected));
    }

    #[tokio::test]
    async fn test_concat_pipeline_fans_out() {
        let engine = Engine::new();
        let channel = build_pipeline(&params(2, 3, true));

        let exit = engine.run_collect(channel).await;

        let Exit::Success(Val::List(parts)) = exit else {
            unreachable!("Expected [elements, done], got {:?}", exit);
        };
        let expected: Vec<Val> = [0, 0, 1, -1, 2, -2].into_iter().map(Val::Int).collect();
        assert_eq!(parts[0], Val::List(expected));
    }
}
