//! gateway-probe: 对真实后端发起若干请求并打印网关指标
//!
//! Usage:
//!   gateway-probe [--config <file.yaml>] [--path <url>] [--count <n>] [--batch] [--window-secs <s>]
//!
//! Issues `count` GETs against the configured backend (through the full
//! cache/dedup/retry/breaker/queue pipeline, or through the batch aggregator
//! with `--batch`), then prints the metrics window.

use anyhow::{bail, Context};
use marketplace_gateway::client::KeyringTokenProvider;
use marketplace_gateway::{GatewayClient, GatewayConfig, RequestDescriptor};
use std::sync::Arc;
use std::time::Duration;

struct Options {
    config: Option<String>,
    path: String,
    count: usize,
    batch: bool,
    window_secs: u64,
}

fn print_usage() {
    println!(
        r#"gateway-probe: marketplace gateway smoke test

USAGE:
    gateway-probe [OPTIONS]

OPTIONS:
    --config <file>       YAML gateway config (GATEWAY_* variables still apply)
    --path <url>          Request path or absolute URL (default: /health)
    --count <n>           Number of requests (default: 10)
    --batch               Send through the batch aggregator
    --window-secs <s>     Metrics window (default: 60)
    -h, --help            Show this help message

ENVIRONMENT:
    GATEWAY_BASE_URL          Full base URL
    MARKETPLACE_GATEWAY_TOKEN Bearer token when none is in the keyring
    RUST_LOG                  Log filter (default: info)"#
    );
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut opts = Options {
        config: None,
        path: "/health".to_string(),
        count: 10,
        batch: false,
        window_secs: 60,
    };
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => opts.config = Some(it.next().context("--config needs a value")?.clone()),
            "--path" => opts.path = it.next().context("--path needs a value")?.clone(),
            "--count" => {
                opts.count = it
                    .next()
                    .context("--count needs a value")?
                    .parse()
                    .context("--count must be a number")?
            }
            "--window-secs" => {
                opts.window_secs = it
                    .next()
                    .context("--window-secs needs a value")?
                    .parse()
                    .context("--window-secs must be a number")?
            }
            "--batch" => opts.batch = true,
            "-h" | "--help" => return Ok(None),
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(Some(opts))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(opts) = parse_args(&args)? else {
        print_usage();
        return Ok(());
    };

    let config = match &opts.config {
        Some(path) => GatewayConfig::from_yaml_file(path)
            .with_context(|| format!("loading {path}"))?
            .apply_env(),
        None => GatewayConfig::from_env(),
    };
    println!("Backend: {}", config.base_url);

    let client = GatewayClient::builder()
        .config(config)
        .auth(Arc::new(KeyringTokenProvider::new("marketplace-gateway", "default")))
        .build()?;

    let descriptors: Vec<RequestDescriptor> = (0..opts.count)
        .map(|_| RequestDescriptor::get(opts.path.clone()))
        .collect();

    let (ok, failed) = if opts.batch {
        let result = client.batcher().submit_all(descriptors).await;
        for (i, err) in &result.failures {
            println!("  [{i}] FAIL {err}");
        }
        (result.success_count(), result.failure_count())
    } else {
        let outcomes =
            futures::future::join_all(descriptors.into_iter().map(|d| client.execute(d))).await;
        let mut ok = 0;
        let mut failed = 0;
        for (i, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Ok(_) => ok += 1,
                Err(e) => {
                    failed += 1;
                    println!("  [{i}] FAIL ({}) {e}", e.class());
                }
            }
        }
        (ok, failed)
    };

    let window = Duration::from_secs(opts.window_secs);
    let m = client.performance(window);
    let signals = client.signals();

    println!("\n=== Summary ===");
    println!("{ok} ok, {failed} failed");
    println!("transport attempts : {}", m.total_requests);
    println!("avg / p95 / p99 ms : {:.1} / {:.1} / {:.1}", m.average_duration_ms, m.p95_ms, m.p99_ms);
    println!("error rate         : {:.2}", m.error_rate);
    println!("requests/sec       : {:.2}", m.requests_per_second);
    println!("breaker            : {:?}", signals.circuit_breaker.state);
    println!(
        "cache              : {} entries, hit ratio {:.2}",
        signals.cache_entries,
        signals.cache.hit_ratio()
    );
    for (status, n) in client.metrics().status_breakdown(window) {
        println!("  status {status}: {n}");
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
