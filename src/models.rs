//! Request/response shapes and dependency tree types.
//!
//! All public entry points speak these types. Responses are plain values:
//! "no dependencies found" and "request failed" are both ordinary returns
//! distinguished by message text and empty data, never by exceptions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::EngineError;

/// The four supported fetch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointType {
    /// Fixed OK payload, no file analysis
    #[serde(rename = "health_check")]
    HealthCheck,
    /// Named function lookup within a file
    #[serde(rename = "fetch_dependencies_by_component")]
    FetchByComponent,
    /// Symbol at a specific position
    #[serde(rename = "fetch_dependencies_by_line_character")]
    FetchByLineCharacter,
    /// All identifier tokens within a line range (diff/hunk review)
    #[serde(rename = "fetch_dependencies_by_file")]
    FetchByFile,
}

impl EndpointType {
    /// Parse the wire name of an endpoint type.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "health_check" => Some(Self::HealthCheck),
            "fetch_dependencies_by_component" => Some(Self::FetchByComponent),
            "fetch_dependencies_by_line_character" => Some(Self::FetchByLineCharacter),
            "fetch_dependencies_by_file" => Some(Self::FetchByFile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::FetchByComponent => "fetch_dependencies_by_component",
            Self::FetchByLineCharacter => "fetch_dependencies_by_line_character",
            Self::FetchByFile => "fetch_dependencies_by_file",
        }
    }
}

/// Normalized fetch input.
///
/// `file` is required for every endpoint except health-check;
/// `function_name` for component lookup; `line` + `character` for position
/// lookup; `start` + `end` (line numbers) for file-range lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub project_root: PathBuf,
    pub output_dir: PathBuf,
    pub project_id: String,
    pub endpoint: EndpointType,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub character: Option<u32>,
    #[serde(default, rename = "start")]
    pub start_line: Option<u32>,
    #[serde(default, rename = "end")]
    pub end_line: Option<u32>,
    #[serde(default = "default_level")]
    pub level: u32,
}

fn default_level() -> u32 {
    1
}

impl FetchRequest {
    /// Validate required fields per endpoint type.
    ///
    /// Runs before any subprocess or disk state is touched.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.endpoint == EndpointType::HealthCheck {
            return Ok(());
        }
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| EngineError::Validation("'file' is required".to_string()))?;
        if file.as_os_str().is_empty() {
            return Err(EngineError::Validation("'file' must not be empty".to_string()));
        }
        match self.endpoint {
            EndpointType::FetchByComponent => {
                match self.function_name.as_deref() {
                    Some(name) if !name.trim().is_empty() => Ok(()),
                    _ => Err(EngineError::Validation(
                        "'function_name' is required for fetch_dependencies_by_component"
                            .to_string(),
                    )),
                }
            }
            EndpointType::FetchByLineCharacter => {
                if self.line.is_none() || self.character.is_none() {
                    Err(EngineError::Validation(
                        "'line' and 'character' are required for fetch_dependencies_by_line_character"
                            .to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            EndpointType::FetchByFile => {
                match (self.start_line, self.end_line) {
                    (Some(start), Some(end)) if start <= end => Ok(()),
                    (Some(_), Some(_)) => Err(EngineError::Validation(
                        "'start' must be <= 'end'".to_string(),
                    )),
                    _ => Err(EngineError::Validation(
                        "'start' and 'end' are required for fetch_dependencies_by_file".to_string(),
                    )),
                }
            }
            EndpointType::HealthCheck => Ok(()),
        }
    }
}

/// Value returned from every public entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchResponse {
    pub message: String,
    pub data: serde_json::Value,
}

impl FetchResponse {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }

    /// A failure response. Data is an empty object, never null.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: serde_json::json!({}),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        }
    }
}

/// A resolved symbol reference in the call graph.
///
/// Positions follow the indexer protocol: 0-indexed lines and characters.
/// `end_line` is the last line of the full definition range, used to slice
/// definition text out of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub character: u32,
    pub end_line: u32,
    pub kind: String,
}

/// One node in a dependency tree level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyNode {
    pub name: String,
    pub definition: String,
    pub file: PathBuf,
    pub line: u32,
    pub character: u32,
    pub kind: String,
}

/// Levels keyed 0..N, each mapping stable node ids to nodes.
pub type LevelMap = BTreeMap<u32, BTreeMap<String, DependencyNode>>;

/// A resolved symbol with its bounded successor/predecessor trees.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DependencyResult {
    pub name: String,
    pub file: PathBuf,
    pub source: String,
    pub successors: LevelMap,
    pub predecessors: LevelMap,
    /// Non-fatal traversal notes, e.g. dropped nodes at a saturated level
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// On-demand aggregate of engine health. Never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub indexer_available: bool,
    pub indexer_version: Option<String>,
    pub index_present: bool,
    pub cache_writable: bool,
    pub tokenizer_available: bool,
    pub stale_cache_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: EndpointType) -> FetchRequest {
        FetchRequest {
            project_root: PathBuf::from("/proj"),
            output_dir: PathBuf::from("/out"),
            project_id: "proj".to_string(),
            endpoint,
            file: Some(PathBuf::from("src/foo.c")),
            function_name: None,
            line: None,
            character: None,
            start_line: None,
            end_line: None,
            level: 1,
        }
    }

    #[test]
    fn test_endpoint_parse_roundtrip() {
        for name in [
            "health_check",
            "fetch_dependencies_by_component",
            "fetch_dependencies_by_line_character",
            "fetch_dependencies_by_file",
        ] {
            let endpoint = EndpointType::parse(name).unwrap();
            assert_eq!(endpoint.as_str(), name);
        }
        assert!(EndpointType::parse("fetch_everything").is_none());
    }

    #[test]
    fn test_health_check_needs_nothing() {
        let mut req = request(EndpointType::HealthCheck);
        req.file = None;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_component_requires_function_name() {
        let mut req = request(EndpointType::FetchByComponent);
        assert!(req.validate().is_err());
        req.function_name = Some("  ".to_string());
        assert!(req.validate().is_err());
        req.function_name = Some("bar".to_string());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_position_requires_line_and_character() {
        let mut req = request(EndpointType::FetchByLineCharacter);
        assert!(req.validate().is_err());
        req.line = Some(10);
        assert!(req.validate().is_err());
        req.character = Some(4);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_file_range_requires_ordered_bounds() {
        let mut req = request(EndpointType::FetchByFile);
        assert!(req.validate().is_err());
        req.start_line = Some(20);
        req.end_line = Some(10);
        assert!(req.validate().is_err());
        req.end_line = Some(25);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_range_bounds_use_short_wire_names() {
        let mut req = request(EndpointType::FetchByFile);
        req.start_line = Some(10);
        req.end_line = Some(25);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["start"], 10);
        assert_eq!(value["end"], 25);
        assert!(value.get("start_line").is_none());

        let parsed: FetchRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.start_line, Some(10));
        assert_eq!(parsed.end_line, Some(25));
    }

    #[test]
    fn test_missing_file_rejected() {
        let mut req = request(EndpointType::FetchByLineCharacter);
        req.file = None;
        req.line = Some(1);
        req.character = Some(1);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_failure_response_has_empty_object_data() {
        let resp = FetchResponse::failure("nope");
        assert_eq!(resp.data, serde_json::json!({}));
        assert!(resp.is_empty());
    }
}
