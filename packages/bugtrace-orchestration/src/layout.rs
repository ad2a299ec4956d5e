//! Per-pass names and locations
//!
//! Every path a pass touches is derived from `{record_id}-{variant}`:
//!
//! ```text
//! workspace   {workspace_root}/js-i42nt-bug
//! archive     {workspace_root}/js-i42nt-bug.tar
//! build dir   {workspace_root}/js-i42nt-bug-build
//! binary      bin/jerry-i42nt-bug                       (store key)
//! raw trace   jerry-i42nt-bug.cgt                       (store key)
//! graph json  jerry-i42nt-bug.cgt.all.graph.json        (store key)
//! symbol map  jerry-i42nt-bug.dynamic.map               (store key)
//! graph       jerry-i42nt-bug.dynamic.graphml.gz        (store key)
//! ledger      jerry-i42nt-bug-passfail.data             (store key)
//! ```

use std::path::PathBuf;

use bugtrace_storage::{ArtifactKey, ArtifactKind};

use crate::config::{NamingConfig, PathsConfig};
use crate::error::Result;
use crate::job::Variant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassLayout {
    pub record_id: String,
    pub variant: Variant,
    pub revision: String,
    pub workspace_dir: PathBuf,
    pub archive_path: PathBuf,
    pub build_dir: PathBuf,
    /// Working directory of tracer and converters
    pub work_dir: PathBuf,
    pub binary: ArtifactKey,
    pub raw_trace: ArtifactKey,
    pub graph_json: ArtifactKey,
    pub symbol_map: ArtifactKey,
    /// Uncompressed graph written by the formatter
    pub graphml: ArtifactKey,
    /// Final compressed graph; its existence marks the pass as traced
    pub graph: ArtifactKey,
    pub ledger: ArtifactKey,
}

impl PassLayout {
    /// `{record_id}-{variant}`
    pub fn pass_name(&self) -> String {
        format!("{}-{}", self.record_id, self.variant)
    }

    /// Published binary name (`jerry-i42nt-bug`)
    pub fn binary_name(&self) -> &str {
        self.binary.file_name()
    }
}

/// Builds [`PassLayout`]s from the configured roots and naming scheme
#[derive(Debug, Clone)]
pub struct LayoutPlanner {
    paths: PathsConfig,
    naming: NamingConfig,
    trace_extension: String,
}

impl LayoutPlanner {
    pub fn new(paths: PathsConfig, naming: NamingConfig, trace_extension: impl Into<String>) -> Self {
        Self {
            paths,
            naming,
            trace_extension: trace_extension.into(),
        }
    }

    pub fn plan(&self, record_id: &str, variant: Variant, revision: &str) -> Result<PassLayout> {
        let pass = format!("{}-{}", record_id, variant);
        let workspace_dir = self
            .paths
            .workspace_root
            .join(format!("{}{}", self.naming.workspace_prefix, pass));

        let binary_name = format!("{}{}", self.naming.binary_prefix, pass);
        let raw_trace = format!("{}{}", binary_name, self.trace_extension);
        let key = |kind, path: String| ArtifactKey::new(kind, path);

        Ok(PassLayout {
            record_id: record_id.to_string(),
            variant,
            revision: revision.to_string(),
            archive_path: sibling(&workspace_dir, &format!(".{}", self.naming.archive_extension)),
            build_dir: sibling(&workspace_dir, "-build"),
            workspace_dir,
            work_dir: self.paths.output_dir.clone(),
            binary: key(
                ArtifactKind::Binary,
                format!("{}/{}", self.naming.binary_dir, binary_name),
            )?,
            graph_json: key(ArtifactKind::GraphJson, format!("{}.all.graph.json", raw_trace))?,
            raw_trace: key(ArtifactKind::RawTrace, raw_trace)?,
            symbol_map: key(ArtifactKind::SymbolMap, format!("{}.dynamic.map", binary_name))?,
            graphml: key(ArtifactKind::Graph, format!("{}.dynamic.graphml", binary_name))?,
            graph: key(ArtifactKind::Graph, format!("{}.dynamic.graphml.gz", binary_name))?,
            ledger: key(ArtifactKind::Ledger, format!("{}-passfail.data", binary_name))?,
        })
    }
}

fn sibling(dir: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = dir.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
