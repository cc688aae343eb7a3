//! `turnwright config`: Configuration management commands.

use std::path::Path;

use turnwright_config::{EngineConfig, ProviderKind};

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Model:          {}", config.default_model);
    println!("   Max iterations: {}", config.max_iterations);
    println!("   Providers:      {}", config.providers.len());
    println!("   Context tokens: {}", config.context.max_context_tokens);
    Ok(())
}

pub fn print_default() {
    println!("{}", EngineConfig::default_toml());
}

fn warnings(config: &EngineConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for (id, provider) in &config.providers {
        let needs_key = matches!(provider.kind, ProviderKind::Anthropic | ProviderKind::Responses);
        if needs_key && provider.api_key.is_none() {
            warnings.push(format!("provider '{id}' has no API key and will be skipped"));
        }
    }

    if config.tools.allow_list.as_ref().is_some_and(Vec::is_empty) {
        warnings.push("tools.allow_list is empty: no tools will be offered".into());
    }

    if config.max_iterations > 200 {
        warnings.push(format!(
            "max_iterations = {} is unusually high",
            config.max_iterations
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_warns_about_missing_keys() {
        let w = warnings(&EngineConfig::default());
        assert!(w.iter().any(|m| m.contains("'anthropic'")));
        assert!(w.iter().any(|m| m.contains("'openai'")));
        assert!(!w.iter().any(|m| m.contains("'ollama'")));
    }

    #[test]
    fn empty_allow_list_is_flagged() {
        let mut config = EngineConfig::default();
        config.tools.allow_list = Some(Vec::new());
        assert!(warnings(&config).iter().any(|m| m.contains("allow_list")));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_iterations = 12\n").unwrap();
        let config = crate::commands::load_config(Some(&path)).unwrap();
        assert_eq!(config.max_iterations, 12);
    }
}
