//! Demo server for the apiary framework.
//!
//! Registers a handful of example routes, optionally applies a TOML config
//! file, then either serves over HTTP or replays a single synthetic
//! request from the command line (`--mock "GET /hello/world"`).

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apiary::dispatch::handler::HandlerResult;
use apiary::{App, RequestContext, Value};

#[derive(Parser)]
#[command(name = "apiary", about = "apiary demo application")]
struct Args {
    /// Bind address for the HTTP server.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Optional TOML config file ([globals], routes, redirects).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay a synthetic request instead of serving,
    /// e.g. "GET /hello/world".
    #[arg(long)]
    mock: Option<String>,
}

fn demo_app() -> Result<App, apiary::FrameworkError> {
    let app = App::new();
    app.set("CACHE", "memory")?;

    app.handler(
        "hello",
        |ctx: &mut RequestContext, _: &BTreeMap<String, Value>| -> HandlerResult {
            ctx.write("Hello, world!\n");
            Ok(Value::Bool(true))
        },
    );
    app.route_named("GET home: /", "hello", 0, 0)?;

    app.route(
        "GET greet: /hello/@name",
        |ctx: &mut RequestContext, params: &BTreeMap<String, Value>| -> HandlerResult {
            let name = params
                .get("name")
                .map(Value::to_display)
                .unwrap_or_default();
            ctx.write(format!("Hello, {name}!\n"));
            Ok(Value::Bool(true))
        },
    )?;

    // cached for a minute, delivered at 16 KiB/s
    app.route_with(
        "GET /report",
        |ctx: &mut RequestContext, _: &BTreeMap<String, Value>| -> HandlerResult {
            let generated = ctx.hive().get_float("TIME");
            ctx.write(format!("report generated at {generated}\n"));
            Ok(Value::Bool(true))
        },
        60,
        16,
    )?;

    app.route(
        "GET /session/bump",
        |ctx: &mut RequestContext, _: &BTreeMap<String, Value>| -> HandlerResult {
            let count = ctx.hive().get_int("SESSION.visits") + 1;
            ctx.hive().set("SESSION.visits", count)?;
            ctx.write(format!("visit #{count}\n"));
            Ok(Value::Bool(true))
        },
    )?;

    app.redirect("GET /old-home", "@home", true)?;
    Ok(app)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apiary=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let app = demo_app()?;
    if let Some(path) = &args.config {
        app.configure_file(path)?;
        tracing::info!(config = %path.display(), "configuration applied");
    }

    if let Some(pattern) = &args.mock {
        let (mut ctx, result) = app.mock(pattern, None, Vec::new()).await?;
        print!("{}", ctx.hive().get_str("RESPONSE"));
        tracing::info!(
            status = ctx.hive().response.status,
            result = %result.to_display(),
            "mock request finished"
        );
        return Ok(());
    }

    let listener = TcpListener::bind(&args.bind).await?;
    tracing::info!(bind = %args.bind, "apiary demo starting");
    app.serve(listener).await?;
    Ok(())
}
