//! `turnwright run`: one run, events streamed to stdout as JSON lines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use turnwright_agent::{AgentEngine, RunParams};
use turnwright_core::EventSink;

use crate::sink::JsonLinesSink;
use crate::workspace::WorkspaceTools;

pub struct RunArgs {
    pub message: String,
    pub model: Option<String>,
    pub system: String,
    pub workspace: Option<PathBuf>,
    pub no_tools: bool,
}

pub async fn run(
    config_path: Option<&Path>,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let registry = turnwright_providers::build_from_config(&config);
    let model = args.model.unwrap_or_else(|| config.default_model.clone());
    let provider = registry.resolve(&model).ok_or_else(|| {
        format!(
            "No provider can serve model '{model}'. \
             Configure one or set an API key (ANTHROPIC_API_KEY, OPENAI_API_KEY)."
        )
    })?;

    let root = match args.workspace {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let tools = WorkspaceTools::new(&root);
    let definitions = if args.no_tools {
        Vec::new()
    } else {
        WorkspaceTools::definitions()
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_ctrl_c.cancel();
        }
    });

    info!(provider = %provider.id, model = %provider.model, workspace = %root.display(), "Running");

    let params = RunParams::new(args.system, args.message)
        .with_tools(definitions)
        .with_cancel(cancel);
    let sink: Arc<dyn EventSink> = Arc::new(JsonLinesSink::new(std::io::stdout()));

    let engine = AgentEngine::from_config(&config);
    let result = engine.run(&provider, &tools, params, Some(sink)).await;

    let summary = serde_json::json!({ "type": "run_result", "result": result });
    println!("{summary}");

    if result.success {
        Ok(())
    } else {
        Err(result
            .error
            .unwrap_or_else(|| format!("run ended: {:?}", result.stop_reason))
            .into())
    }
}
