use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use moe_router::config::RouterConfig;
use moe_router::invoke::HttpInvoker;
use moe_router::types::{ChatMessage, RequestContext};
use moe_router::Router;

/// Route one chat request through the expert roster and print the reply.
#[derive(Parser, Debug)]
#[command(name = "moe-router", version, about)]
struct Args {
    /// The prompt to route.
    prompt: String,

    /// Attach an image by URL (routes to a vision expert).
    #[arg(long)]
    image_url: Option<String>,

    /// Pin a specific expert id instead of classifying ("auto" to classify).
    #[arg(long)]
    model: Option<String>,

    /// Request id for log correlation.
    #[arg(long, default_value = "cli")]
    request_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = RouterConfig::default();
    info!(
        base_url = %config.endpoint.base_url,
        deadline_ms = config.max_latency.as_millis() as u64,
        "router starting"
    );

    let invoker = HttpInvoker::new(&config.endpoint).context("building HTTP invoker")?;
    let router = Router::new(&config, Arc::new(invoker));

    let message = match args.image_url {
        Some(url) => ChatMessage::user_with_image(args.prompt, url),
        None => ChatMessage::user(args.prompt),
    };
    let mut ctx = RequestContext::new(args.request_id, vec![message]);
    if let Some(model) = args.model {
        ctx = ctx.with_override(model);
    }

    let routed = router.route(ctx).await.context("routing request")?;

    info!(
        served_by = %routed.served_by,
        degraded = routed.degraded,
        attempts = routed.attempts.len(),
        "request served"
    );
    for warning in &routed.warnings {
        eprintln!("warning: {warning}");
    }
    println!("{}", routed.response.content);

    Ok(())
}
