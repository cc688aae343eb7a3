//! `turnwright providers`: List configured providers and model routes.

use std::path::Path;

use turnwright_config::ProviderKind;
use turnwright_providers::ProviderRegistry;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = turnwright_providers::build_from_config(&config);

    println!("Configured providers");
    println!("====================");
    print!("{}", render(&registry));

    let skipped: Vec<&str> = config
        .providers
        .keys()
        .map(String::as_str)
        .filter(|id| registry.get(id).is_none())
        .collect();
    if !skipped.is_empty() {
        println!();
        println!("  Not available (missing API key?): {}", skipped.join(", "));
    }

    println!();
    match registry.resolve(&config.default_model) {
        Some(handle) => println!("  Default model: {} -> {}", config.default_model, handle.id),
        None => println!("  Default model: {} (no provider)", config.default_model),
    }
    Ok(())
}

fn kind_label(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "anthropic messages",
        ProviderKind::Responses => "responses",
        ProviderKind::ResponsesCompat => "responses (compat)",
        ProviderKind::Local => "local chat completions",
    }
}

fn render(registry: &ProviderRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!("  {:<16} {}\n", "ID", "PROTOCOL"));
    for (id, kind) in registry.list() {
        out.push_str(&format!("  {id:<16} {}\n", kind_label(kind)));
    }

    let routes = registry.routes();
    if !routes.is_empty() {
        out.push_str("\n  Model routes:\n");
        for (model, provider) in routes {
            out.push_str(&format!("    {model} -> {provider}\n"));
        }
    }
    out
}
