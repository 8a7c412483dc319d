//! External document parser seam.
//!
//! A parser reads one input file and writes `marker.json` (block structure),
//! `chunks.json` (chunk index) and `marker.md` into an output directory, plus
//! any page assets under `images/`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use docket::artifacts::ParserIdentity;
use docket::hashing::stable_json;
use docket::Sha256Hex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

pub const STRUCTURE_FILE: &str = "marker.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const MARKDOWN_FILE: &str = "marker.md";
pub const ASSETS_DIR: &str = "images";

const REQUIRED_OUTPUTS: [&str; 3] = [STRUCTURE_FILE, CHUNKS_FILE, MARKDOWN_FILE];

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("parser_binary_not_found: {0}")]
    BinaryNotFound(String),
    #[error("parser_run_failed: exit {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("parser_output_missing: {0}")]
    OutputMissing(String),
    #[error("parser I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parser output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Paths written by one parser run, plus who produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutput {
    pub structure_path: PathBuf,
    pub chunks_path: PathBuf,
    pub markdown_path: PathBuf,
    pub asset_paths: Vec<PathBuf>,
    pub identity: ParserIdentity,
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Hash of the canonical parser configuration.
    fn config_sha(&self) -> Sha256Hex;

    async fn parse(&self, input: &Path, out_dir: &Path) -> Result<ParseOutput, ParserError>;
}

/// Runs an external parser as `<bin> [args..] --in <input> --out <dir>`.
#[derive(Debug, Clone)]
pub struct CommandParser {
    bin: PathBuf,
    args: Vec<String>,
}

impl CommandParser {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn config(&self) -> Value {
        let bin_name = self
            .bin
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut argv: Vec<Value> = self.args.iter().map(|a| json!(a)).collect();
        argv.extend(["--in", "<input>", "--out", "<output>"].map(|a| json!(a)));
        json!({"runner": "command", "bin": bin_name, "argv": argv})
    }
}

#[async_trait]
impl DocumentParser for CommandParser {
    fn config_sha(&self) -> Sha256Hex {
        Sha256Hex::digest(stable_json(&self.config()))
    }

    async fn parse(&self, input: &Path, out_dir: &Path) -> Result<ParseOutput, ParserError> {
        let bin = which::which(&self.bin)
            .map_err(|_| ParserError::BinaryNotFound(self.bin.display().to_string()))?;
        tokio::fs::create_dir_all(out_dir).await?;

        info!("Running parser {} on {}", bin.display(), input.display());
        let started = Instant::now();
        let output = Command::new(&bin)
            .args(&self.args)
            .arg("--in")
            .arg(input)
            .arg("--out")
            .arg(out_dir)
            .output()
            .await?;
        let timing_ms = started.elapsed().as_millis() as u64;

        if !output.status.success() {
            return Err(ParserError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let structure_path = out_dir.join(STRUCTURE_FILE);
        verify_outputs(out_dir).await?;
        let structure: Value = serde_json::from_slice(&tokio::fs::read(&structure_path).await?)?;

        let engine = structure
            .pointer("/meta/engine")
            .and_then(Value::as_str)
            .unwrap_or("command")
            .to_string();
        let version = structure
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(ParseOutput {
            structure_path,
            chunks_path: out_dir.join(CHUNKS_FILE),
            markdown_path: out_dir.join(MARKDOWN_FILE),
            asset_paths: list_assets(out_dir).await?,
            identity: ParserIdentity {
                engine,
                version,
                config_sha: self.config_sha(),
                stdout_sha256: Sha256Hex::digest(&output.stdout),
                stderr_sha256: Sha256Hex::digest(&output.stderr),
                timing_ms,
            },
        })
    }
}

/// Built-in parser: one block per non-empty line, page = line number.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineParser;

impl LineParser {
    pub const ENGINE: &'static str = "docket-line";

    fn config() -> Value {
        json!({"runner": Self::ENGINE, "version": env!("CARGO_PKG_VERSION")})
    }

    pub fn classify(line: &str) -> &'static str {
        let lower = line.to_lowercase();
        if line.contains('|') || line.contains('\t') || lower.contains("table") {
            "table"
        } else if line.starts_with("![") {
            "figure"
        } else if line.starts_with("```") {
            "code"
        } else {
            "text"
        }
    }

    /// Structure, chunk index and markdown for `source`.
    pub fn render(source: &str) -> (Value, Value, String) {
        let lines: Vec<&str> = source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let mut blocks = Vec::with_capacity(lines.len());
        let mut chunks = Vec::with_capacity(lines.len());
        let mut markdown = vec!["# Marker Output".to_string(), String::new()];

        for (index, line) in lines.iter().enumerate() {
            let block_type = Self::classify(line);
            let content_sha = Sha256Hex::digest(line.as_bytes());
            blocks.push(json!({
                "id": format!("b-{:03}", index),
                "page": index + 1,
                "type": block_type,
                "text": line,
                "bbox": [0, 0, 100, 20],
                "content_sha256": content_sha,
            }));
            chunks.push(json!({
                "chunk_id": format!("chunk-{:03}", index),
                "page": index + 1,
                "type": block_type,
                "text": line,
                "content_sha256": content_sha,
            }));
            markdown.push(format!("- [{}] {}", block_type, line));
        }

        let structure = json!({
            "version": concat!("docket-line-", env!("CARGO_PKG_VERSION")),
            "meta": {"engine": Self::ENGINE, "line_count": lines.len()},
            "blocks": blocks,
        });
        let markdown = format!("{}\n", markdown.join("\n").trim());
        (structure, Value::Array(chunks), markdown)
    }
}

#[async_trait]
impl DocumentParser for LineParser {
    fn config_sha(&self) -> Sha256Hex {
        Sha256Hex::digest(stable_json(&Self::config()))
    }

    async fn parse(&self, input: &Path, out_dir: &Path) -> Result<ParseOutput, ParserError> {
        let started = Instant::now();
        let raw = tokio::fs::read(input).await?;
        let source = String::from_utf8_lossy(&raw);
        let (structure, chunks, markdown) = Self::render(&source);

        tokio::fs::create_dir_all(out_dir).await?;
        let structure_path = out_dir.join(STRUCTURE_FILE);
        let chunks_path = out_dir.join(CHUNKS_FILE);
        let markdown_path = out_dir.join(MARKDOWN_FILE);
        tokio::fs::write(&structure_path, serde_json::to_vec_pretty(&structure)?).await?;
        tokio::fs::write(&chunks_path, serde_json::to_vec_pretty(&chunks)?).await?;
        tokio::fs::write(&markdown_path, markdown.as_bytes()).await?;

        let line_count = structure["meta"]["line_count"].as_u64().unwrap_or(0);
        debug!(lines = line_count, "Line parser finished");
        let stdout = format!("{{\"blocks\":{}}}\n", line_count);

        Ok(ParseOutput {
            structure_path,
            chunks_path,
            markdown_path,
            asset_paths: list_assets(out_dir).await?,
            identity: ParserIdentity {
                engine: Self::ENGINE.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                config_sha: self.config_sha(),
                stdout_sha256: Sha256Hex::digest(stdout.as_bytes()),
                stderr_sha256: Sha256Hex::digest(b""),
                timing_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}

async fn verify_outputs(out_dir: &Path) -> Result<(), ParserError> {
    for file in REQUIRED_OUTPUTS {
        match tokio::fs::metadata(out_dir.join(file)).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(ParserError::OutputMissing(file.to_string())),
        }
    }
    Ok(())
}

/// Files under `images/`, sorted by path. A missing directory means no assets.
async fn list_assets(out_dir: &Path) -> Result<Vec<PathBuf>, ParserError> {
    let dir = out_dir.join(ASSETS_DIR);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(LineParser::classify("a | b"), "table");
        assert_eq!(LineParser::classify("Table 3: totals"), "table");
        assert_eq!(LineParser::classify("![scan](p1.png)"), "figure");
        assert_eq!(LineParser::classify("```rust"), "code");
        assert_eq!(LineParser::classify("plain words"), "text");
    }

    #[test]
    fn test_render_skips_blank_lines() {
        let (structure, chunks, markdown) = LineParser::render("first\n\n  second  \n");
        let blocks = structure["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["page"], json!(2));
        assert_eq!(blocks[1]["text"], json!("second"));
        assert_eq!(chunks[0]["chunk_id"], json!("chunk-000"));
        assert_eq!(markdown, "# Marker Output\n\n- [text] first\n- [text] second\n");
    }

    #[tokio::test]
    async fn test_line_parser_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        tokio::fs::write(&input, "alpha\nbeta | gamma\n").await.unwrap();

        let out = LineParser.parse(&input, &dir.path().join("out")).await.unwrap();
        assert!(out.structure_path.ends_with(STRUCTURE_FILE));
        assert!(out.asset_paths.is_empty());
        assert_eq!(out.identity.engine, LineParser::ENGINE);
        assert_eq!(out.identity.config_sha, LineParser.config_sha());

        let structure: Value =
            serde_json::from_slice(&std::fs::read(&out.structure_path).unwrap()).unwrap();
        assert_eq!(structure["blocks"][1]["type"], json!("table"));
    }

    #[tokio::test]
    async fn test_command_parser_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let parser = CommandParser::new("/nonexistent/docket-parser");
        let err = parser
            .parse(&dir.path().join("in.txt"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ParserError::BinaryNotFound(_)));
    }

    #[test]
    fn test_command_parser_config_sha_tracks_args() {
        let a = CommandParser::new("/usr/bin/marker");
        let b = CommandParser::new("/opt/marker").with_args(["--use_llm=1"]);
        assert_ne!(a.config_sha(), b.config_sha());
        assert_eq!(a.config_sha(), CommandParser::new("/other/marker").config_sha());
    }
}
