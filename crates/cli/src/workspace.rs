//! Built-in, read-only workspace tools for `turnwright run`.
//!
//! Every path is resolved against the workspace root and must stay inside
//! it. Edits are only ever proposed (`queue_edit`); nothing is written.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use turnwright_core::{
    ToolCategory, ToolContext, ToolDefinition, ToolError, ToolExecutor, ToolValue,
};

/// Files larger than this are refused by `read_file`.
const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;

pub struct WorkspaceTools {
    root: PathBuf,
}

impl WorkspaceTools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        let path_schema = |desc: &str| {
            json!({
                "type": "object",
                "properties": { "path": { "type": "string", "description": desc } },
                "required": ["path"]
            })
        };
        vec![
            ToolDefinition {
                name: "list_directory".into(),
                description: "List the entries of a directory in the workspace.".into(),
                parameters: path_schema("Directory path relative to the workspace root"),
                category: Some(ToolCategory::File),
            },
            ToolDefinition {
                name: "read_file".into(),
                description: "Read a UTF-8 text file from the workspace.".into(),
                parameters: path_schema("File path relative to the workspace root"),
                category: Some(ToolCategory::File),
            },
            ToolDefinition {
                name: "propose_edit".into(),
                description: "Propose an edit to a workspace file. The user reviews and applies it."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "instructions": { "type": "string" },
                        "patch": { "type": "string", "description": "Unified diff, optional" }
                    },
                    "required": ["path", "instructions"]
                }),
                category: Some(ToolCategory::Document),
            },
        ]
    }

    /// Resolve a model-supplied path, refusing anything that leaves the root.
    fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let relative = Path::new(raw.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::InvalidArguments(format!(
                        "path '{raw}' escapes the workspace"
                    )));
                }
            }
        }
        Ok(resolved)
    }

    async fn list_directory(&self, path: &str) -> Result<ToolValue, ToolError> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| failed("list_directory", e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| failed("list_directory", e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(ToolValue::Json(json!({ "path": path, "entries": entries })))
    }

    async fn read_file(&self, path: &str) -> Result<ToolValue, ToolError> {
        let file = self.resolve(path)?;
        let meta = tokio::fs::metadata(&file)
            .await
            .map_err(|e| failed("read_file", e))?;
        if meta.len() > MAX_READ_BYTES {
            return Ok(ToolValue::error(format!(
                "{path} is {} bytes, larger than the {MAX_READ_BYTES} byte read limit",
                meta.len()
            )));
        }
        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| failed("read_file", e))?;
        Ok(ToolValue::Json(json!({ "path": path, "content": content })))
    }

    fn propose_edit(&self, arguments: &Value) -> Result<ToolValue, ToolError> {
        let path = required_str(arguments, "path")?;
        self.resolve(path)?;
        let instructions = required_str(arguments, "instructions")?;
        Ok(ToolValue::Json(json!({
            "action": "queue_edit",
            "filePath": path,
            "instructions": instructions,
            "patch": arguments.get("patch").cloned().unwrap_or(Value::Null),
        })))
    }
}

#[async_trait]
impl ToolExecutor for WorkspaceTools {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<ToolValue, ToolError> {
        debug!(tool = name, call_id = %ctx.call_id, "Executing workspace tool");
        match name {
            "list_directory" => {
                let path = arguments.get("path").and_then(Value::as_str).unwrap_or(".");
                self.list_directory(path).await
            }
            "read_file" => {
                let path = required_str(&arguments, "path")?;
                ctx.report_progress(format!("Reading {path}"));
                self.read_file(path).await
            }
            "propose_edit" => self.propose_edit(&arguments),
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{key}' argument")))
}

fn failed(tool: &str, e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnwright_core::EventEmitter;

    fn ctx(name: &str) -> ToolContext {
        ToolContext::new("call_1", name, EventEmitter::headless())
    }

    fn json_of(value: ToolValue) -> Value {
        match value {
            ToolValue::Json(v) => v,
            other => panic!("expected JSON, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lists_and_reads_inside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let tools = WorkspaceTools::new(dir.path());

        let listing = json_of(
            tools
                .execute("list_directory", json!({"path": "."}), &ctx("list_directory"))
                .await
                .unwrap(),
        );
        assert_eq!(listing["entries"], json!(["notes.txt", "src/"]));

        let file = json_of(
            tools
                .execute("read_file", json!({"path": "notes.txt"}), &ctx("read_file"))
                .await
                .unwrap(),
        );
        assert_eq!(file["content"], "hello");
    }

    #[tokio::test]
    async fn escaping_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let tools = WorkspaceTools::new(dir.path());
        let err = tools
            .execute("read_file", json!({"path": "../etc/passwd"}), &ctx("read_file"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn edits_are_only_proposed() {
        let dir = tempfile::tempdir().unwrap();
        let tools = WorkspaceTools::new(dir.path());
        let out = json_of(
            tools
                .execute(
                    "propose_edit",
                    json!({"path": "src/lib.rs", "instructions": "add docs"}),
                    &ctx("propose_edit"),
                )
                .await
                .unwrap(),
        );
        assert_eq!(out["action"], "queue_edit");
        assert_eq!(out["filePath"], "src/lib.rs");
        assert!(!dir.path().join("src/lib.rs").exists());
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let tools = WorkspaceTools::new(".");
        let err = tools
            .execute("rm_rf", json!({}), &ctx("rm_rf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
