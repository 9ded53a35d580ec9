//! Read-only inspection tools offered to agents.
//!
//! Tools are registered explicitly by name at startup. Arguments are checked
//! against each tool's declared schema, then deserialized into typed params.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::agents::{ToolCall, ToolSpec};
use crate::io::files::FileMutator;

/// Largest file body returned by `read_file`, in bytes.
const READ_LIMIT_BYTES: usize = 20_000;
/// Most matches returned by `find_text`.
const MAX_MATCHES: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    Unknown(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("{0}")]
    Failed(String),
}

/// Object-safe tool interface used by the registry.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters_schema(&self) -> Value;
    fn invoke(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Tool with typed parameters. Implementing this provides [`Tool`].
pub trait TypedTool: Send + Sync {
    type Params: DeserializeOwned;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn schema(&self) -> Value;
    fn call(&self, params: Self::Params) -> Result<String, ToolError>;
}

impl<T: TypedTool> Tool for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn description(&self) -> &'static str {
        T::DESCRIPTION
    }

    fn parameters_schema(&self) -> Value {
        self.schema()
    }

    fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        let params: T::Params =
            serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
                tool: T::NAME.to_string(),
                message: err.to_string(),
            })?;
        self.call(params)
    }
}

/// Name → tool map built at startup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the read-only inspection tools over `files`.
    pub fn read_only(files: Arc<dyn FileMutator>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadFile {
            files: Arc::clone(&files),
        }));
        registry.register(Arc::new(GetLine {
            files: Arc::clone(&files),
        }));
        registry.register(Arc::new(GetRange {
            files: Arc::clone(&files),
        }));
        registry.register(Arc::new(FindText { files }));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Validate `call.arguments` against the tool's schema, then invoke it.
    pub fn invoke(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::Unknown(call.name.clone()))?;
        let schema = tool.parameters_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|err| {
            ToolError::Failed(format!("tool {} has an invalid schema: {err}", call.name))
        })?;
        let problems: Vec<String> = validator
            .iter_errors(&call.arguments)
            .map(|err| err.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: call.name.clone(),
                message: problems.join("; "),
            });
        }
        debug!(tool = %call.name, "invoking tool");
        tool.invoke(call.arguments.clone())
    }
}

fn read_existing(files: &dyn FileMutator, path: &str) -> Result<String, ToolError> {
    files
        .read(path)
        .map_err(|err| ToolError::Failed(err.to_string()))?
        .ok_or_else(|| ToolError::Failed(format!("{path}: file does not exist")))
}

struct ReadFile {
    files: Arc<dyn FileMutator>,
}

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

impl TypedTool for ReadFile {
    type Params = PathParams;
    const NAME: &'static str = "read_file";
    const DESCRIPTION: &'static str =
        "Read a workspace file. Returns its full text (truncated for very large files).";

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn call(&self, params: PathParams) -> Result<String, ToolError> {
        let mut text = read_existing(self.files.as_ref(), &params.path)?;
        if text.len() > READ_LIMIT_BYTES {
            let mut cut = READ_LIMIT_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            let dropped = text.len() - cut;
            text.truncate(cut);
            text.push_str(&format!("\n[truncated {dropped} bytes]"));
        }
        Ok(text)
    }
}

struct GetLine {
    files: Arc<dyn FileMutator>,
}

#[derive(Deserialize)]
struct LineParams {
    path: String,
    line: usize,
}

impl TypedTool for GetLine {
    type Params = LineParams;
    const NAME: &'static str = "get_line";
    const DESCRIPTION: &'static str =
        "Return one line of a workspace file. Lines are numbered from 1.";

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "line": {"type": "integer", "minimum": 1}
            },
            "required": ["path", "line"],
            "additionalProperties": false
        })
    }

    fn call(&self, params: LineParams) -> Result<String, ToolError> {
        let text = read_existing(self.files.as_ref(), &params.path)?;
        text.lines()
            .nth(params.line.saturating_sub(1))
            .map(str::to_string)
            .ok_or_else(|| ToolError::Failed(format!("{}: no line {}", params.path, params.line)))
    }
}

struct GetRange {
    files: Arc<dyn FileMutator>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeParams {
    path: String,
    start_line: usize,
    end_line: usize,
}

impl TypedTool for GetRange {
    type Params = RangeParams;
    const NAME: &'static str = "get_range";
    const DESCRIPTION: &'static str =
        "Return lines startLine..=endLine of a workspace file, each with its 1-based number.";

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "startLine": {"type": "integer", "minimum": 1},
                "endLine": {"type": "integer", "minimum": 1}
            },
            "required": ["path", "startLine", "endLine"],
            "additionalProperties": false
        })
    }

    fn call(&self, params: RangeParams) -> Result<String, ToolError> {
        if params.end_line < params.start_line {
            return Err(ToolError::InvalidArguments {
                tool: Self::NAME.to_string(),
                message: "endLine is before startLine".to_string(),
            });
        }
        let text = read_existing(self.files.as_ref(), &params.path)?;
        let lines: Vec<String> = text
            .lines()
            .enumerate()
            .skip(params.start_line - 1)
            .take(params.end_line - params.start_line + 1)
            .map(|(idx, line)| format!("{:>5} | {line}", idx + 1))
            .collect();
        Ok(lines.join("\n"))
    }
}

struct FindText {
    files: Arc<dyn FileMutator>,
}

#[derive(Deserialize)]
struct FindParams {
    path: String,
    pattern: String,
}

impl TypedTool for FindText {
    type Params = FindParams;
    const NAME: &'static str = "find_text";
    const DESCRIPTION: &'static str =
        "Search a workspace file for a regular expression. Returns numbered matching lines.";

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "pattern": {"type": "string", "minLength": 1}
            },
            "required": ["path", "pattern"],
            "additionalProperties": false
        })
    }

    fn call(&self, params: FindParams) -> Result<String, ToolError> {
        let re = regex::Regex::new(&params.pattern).map_err(|err| ToolError::InvalidArguments {
            tool: Self::NAME.to_string(),
            message: err.to_string(),
        })?;
        let text = read_existing(self.files.as_ref(), &params.path)?;
        let hits: Vec<String> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| re.is_match(line))
            .take(MAX_MATCHES)
            .map(|(idx, line)| format!("{}: {line}", idx + 1))
            .collect();
        if hits.is_empty() {
            return Ok("no matches".to_string());
        }
        Ok(hits.join("\n"))
    }
}
