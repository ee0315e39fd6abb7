//! Command-line load generator.
//!
//! Run with:
//! `cargo run --example loadtest -- http://127.0.0.1:9001/ -c 10 -n 1000`
//!
//! Set `RUST_LOG=rsload=debug` for per-request detail.

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;
use rsload::{Body, ClientMode, Config, LoadTest, TlsOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Closed- and open-loop HTTP/WebSocket load generator")]
struct Args {
    /// Target URL (http, https, ws or wss)
    url: String,

    /// Concurrent virtual users (closed loop)
    #[arg(short = 'c', long, default_value_t = 10)]
    concurrency: usize,

    /// Target requests per second (switches to open loop)
    #[arg(long)]
    rps: Option<f64>,

    /// Stop after this many requests
    #[arg(short = 'n', long)]
    max_requests: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 't', long)]
    max_seconds: Option<f64>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// HTTP method
    #[arg(short = 'm', long, default_value = "GET")]
    method: String,

    /// Extra header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Cookie as `name=value` (repeatable)
    #[arg(short = 'C', long = "cookie")]
    cookies: Vec<String>,

    /// Request body text
    #[arg(short = 'b', long)]
    body: Option<String>,

    /// Request body as JSON
    #[arg(long, conflicts_with = "body")]
    json: Option<String>,

    /// Content-Type for the body
    #[arg(short = 'T', long)]
    content_type: Option<String>,

    /// Token replaced by a unique value in every request
    #[arg(long)]
    index_param: Option<String>,

    /// Send `Connection: close` and reconnect for every request
    #[arg(long)]
    no_keep_alive: bool,

    /// Use the raw-socket client
    #[arg(long)]
    raw: bool,

    /// HTTP proxy URL
    #[arg(long)]
    proxy: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Extra CA bundle (PEM)
    #[arg(long)]
    cafile: Option<std::path::PathBuf>,

    /// Stop at the first transport error
    #[arg(long)]
    no_recover: bool,

    /// Seconds between partial reports
    #[arg(long, default_value_t = 5.0)]
    report_interval: f64,

    /// Suppress partial reports
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn split_pair<'a>(value: &'a str, sep: char, what: &str) -> Result<(&'a str, &'a str), String> {
    value
        .split_once(sep)
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| format!("invalid {} {:?}", what, value))
}

fn config_from(args: Args) -> Result<Config, Box<dyn Error>> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())?;
    let mut config = Config::new(args.url)
        .with_method(method)
        .with_concurrency(args.concurrency)
        .with_keep_alive(!args.no_keep_alive)
        .with_recover(!args.no_recover)
        .with_quiet(args.quiet)
        .with_report_interval(
            (args.report_interval > 0.0).then(|| Duration::from_secs_f64(args.report_interval)),
        )
        .with_tls(TlsOptions {
            insecure: args.insecure,
            ca_file: args.cafile,
        });

    if let Some(rps) = args.rps {
        config = config.with_requests_per_second(rps);
    }
    if let Some(max) = args.max_requests {
        config = config.with_max_requests(max);
    }
    if let Some(secs) = args.max_seconds {
        config = config.with_max_seconds(Duration::from_secs_f64(secs));
    }
    if let Some(ms) = args.timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    for header in &args.headers {
        let (name, value) = split_pair(header, ':', "header")?;
        config = config.with_header(name, value);
    }
    for cookie in &args.cookies {
        let (name, value) = split_pair(cookie, '=', "cookie")?;
        config = config.with_cookie(name, value);
    }
    if let Some(text) = args.body {
        config = config.with_body(Body::Text(text));
    }
    if let Some(json) = args.json {
        config = config.with_body(Body::Json(serde_json::from_str(&json)?));
    }
    if let Some(content_type) = args.content_type {
        config = config.with_content_type(content_type);
    }
    if let Some(token) = args.index_param {
        config = config.with_index_param(token);
    }
    if let Some(proxy) = args.proxy {
        config = config.with_proxy(proxy);
    }
    if args.raw {
        config = config.with_mode(ClientMode::RawSocket);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rsload=info")))
        .init();

    let config = config_from(Args::parse())?;
    let mut test = LoadTest::new(config)?;

    let stop = test.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let result = test.run().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
