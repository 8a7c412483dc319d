//! Run artifacts and their provenance records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{RunId, Sha256Hex};

/// Current provenance record layout.
pub const PROVENANCE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    Raw,
    Docir,
    ChunkIndex,
    Memo,
    OcrReport,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Raw => "raw",
            ArtifactType::Docir => "docir",
            ArtifactType::ChunkIndex => "chunk-index",
            ArtifactType::Memo => "memo",
            ArtifactType::OcrReport => "ocr-report",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the parser run that produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserIdentity {
    pub engine: String,
    pub version: String,
    pub config_sha: Sha256Hex,
    pub stdout_sha256: Sha256Hex,
    pub stderr_sha256: Sha256Hex,
    pub timing_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceHash {
    pub artifact_sha256: Sha256Hex,
    pub source_sha256: Sha256Hex,
}

/// Where an artifact came from: ids and hashes only, never content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub version: u32,
    pub run_id: RunId,
    pub artifact_type: ArtifactType,
    pub producer_step: String,
    pub hash: ProvenanceHash,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<ParserIdentity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_keys: Vec<String>,
    /// Fields added by newer producers, kept verbatim.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Provenance {
    pub fn new(
        run_id: RunId,
        artifact_type: ArtifactType,
        producer_step: impl Into<String>,
        artifact_sha256: Sha256Hex,
        source_sha256: Sha256Hex,
    ) -> Self {
        Self {
            version: PROVENANCE_VERSION,
            run_id,
            artifact_type,
            producer_step: producer_step.into(),
            hash: ProvenanceHash {
                artifact_sha256,
                source_sha256,
            },
            inputs: Vec::new(),
            parser: None,
            object_keys: Vec::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_parser(mut self, parser: ParserIdentity) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_object_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.object_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }
}

/// One artifact produced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub run_id: RunId,
    pub artifact_type: ArtifactType,
    pub format: String,
    pub uri: String,
    pub sha256: Sha256Hex,
    pub prov: Provenance,
}

impl Artifact {
    pub fn new(
        artifact_type: ArtifactType,
        format: impl Into<String>,
        uri: impl Into<String>,
        sha256: Sha256Hex,
        prov: Provenance,
    ) -> Self {
        let run_id = prov.run_id.clone();
        Self {
            artifact_id: artifact_id(&run_id, artifact_type),
            run_id,
            artifact_type,
            format: format.into(),
            uri: uri.into(),
            sha256,
            prov,
        }
    }
}

/// `"{run}:{type}"`: at most one artifact of each type per run.
pub fn artifact_id(run_id: &RunId, artifact_type: ArtifactType) -> String {
    format!("{}:{}", run_id, artifact_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provenance_serialization_keeps_extensions() {
        let run = RunId::parse("run-7").unwrap();
        let prov = Provenance::new(
            run.clone(),
            ArtifactType::ChunkIndex,
            "store-parse",
            Sha256Hex::digest(b"chunks"),
            Sha256Hex::digest(b"raw"),
        )
        .with_inputs(["doc-0123"])
        .with_extension("page_count", json!(3));

        let value = serde_json::to_value(&prov).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["artifact_type"], "chunk-index");
        assert_eq!(value["page_count"], 3);
        assert!(value.get("parser").is_none());
        assert!(value.get("object_keys").is_none());

        let back: Provenance = serde_json::from_value(value).unwrap();
        assert_eq!(back, prov);
    }

    #[test]
    fn test_artifact_id() {
        let run = RunId::parse("run-7").unwrap();
        assert_eq!(artifact_id(&run, ArtifactType::OcrReport), "run-7:ocr-report");
        let prov = Provenance::new(
            run,
            ArtifactType::Memo,
            "memo",
            Sha256Hex::digest(b"m"),
            Sha256Hex::digest(b"r"),
        );
        let artifact = Artifact::new(
            ArtifactType::Memo,
            "text/markdown",
            "file:///tmp/memo.md",
            Sha256Hex::digest(b"m"),
            prov,
        );
        assert_eq!(artifact.artifact_id, "run-7:memo");
    }
}
