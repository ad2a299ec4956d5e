//! Trace to graph conversion
//!
//! Three external programs run in the pass working directory:
//!
//! 1. chain tool: `{trace}` -> `{trace}.all.graph.json`
//! 2. symbol mapper (optional): `{binary}` -> `{binary}.dynamic.map`
//! 3. graph formatter: graph json (+ map) -> `{binary}.dynamic.graphml`
//!
//! Then the raw trace, the graph json and the graphml are gzipped, graphml
//! last: `{binary}.dynamic.graphml.gz` appearing is what marks the pass done.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bugtrace_storage::ArtifactStore;
use tracing::{debug, info};

use crate::compress::gzip_file_async;
use crate::config::ConverterConfig;
use crate::error::{ReproError, Result};
use crate::layout::PassLayout;
use crate::pipeline::{ConvertStage, GraphArtifact, RawTrace};
use crate::process::{program_in, CommandSpec, ProcessRunner};

pub struct TraceToGraphConverter {
    config: ConverterConfig,
    converter_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn ArtifactStore>,
}

impl TraceToGraphConverter {
    pub fn new(
        config: ConverterConfig,
        converter_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            converter_dir: converter_dir.into(),
            runner,
            store,
        }
    }

    /// Run one step; a spawn failure, a failure status or a missing output
    /// file all fail the conversion
    async fn step(&self, name: &str, spec: CommandSpec, expected: &Path) -> Result<()> {
        debug!(step = name, command = %spec, "Converting");
        let output = self
            .runner
            .run(&spec, None)
            .await
            .map_err(|e| ReproError::conversion(name, e))?;
        if !output.success() {
            return Err(ReproError::conversion(
                name,
                format!("{} exited with {:?}", spec.program_name(), output.exit_code),
            ));
        }
        if !tokio::fs::try_exists(expected).await.unwrap_or(false) {
            return Err(ReproError::conversion(
                name,
                format!("{} was not produced", expected.display()),
            ));
        }
        Ok(())
    }

    async fn compress(&self, name: &str, path: PathBuf) -> Result<PathBuf> {
        gzip_file_async(path)
            .await
            .map_err(|e| ReproError::conversion(name, e))
    }
}

#[async_trait]
impl ConvertStage for TraceToGraphConverter {
    async fn convert(&self, layout: &PassLayout, trace: &RawTrace) -> Result<GraphArtifact> {
        let graph_json = self.store.locate(&layout.graph_json);
        let graphml = self.store.locate(&layout.graphml);

        let chain = CommandSpec::new(program_in(&self.converter_dir, &self.config.chain_tool))
            .args(self.config.chain_args.iter().cloned())
            .arg(trace.path.display().to_string())
            .current_dir(&layout.work_dir);
        self.step("chain-to-graph", chain, &graph_json).await?;

        let symbol_map = match &self.config.symbol_mapper {
            Some(mapper) => {
                let map = self.store.locate(&layout.symbol_map);
                let spec = CommandSpec::new(program_in(&self.converter_dir, mapper))
                    .arg(self.store.locate(&layout.binary).display().to_string())
                    .arg(map.display().to_string())
                    .current_dir(&layout.work_dir);
                self.step("elf-to-map", spec, &map).await?;
                Some(map)
            }
            None => None,
        };

        let mut format = CommandSpec::new(program_in(&self.converter_dir, &self.config.graph_formatter))
            .arg(graph_json.display().to_string())
            .arg(graphml.display().to_string())
            .current_dir(&layout.work_dir);
        if let Some(map) = &symbol_map {
            format = format.arg("-m").arg(map.display().to_string());
        }
        self.step("convert-graph-formats", format, &graphml).await?;

        let compressed = vec![
            self.compress("compress-trace", trace.path.clone()).await?,
            self.compress("compress-graph-json", graph_json).await?,
        ];
        let graph = self.compress("compress-graph", graphml).await?;

        info!(graph = %graph.display(), "Graph ready");
        Ok(GraphArtifact { graph, compressed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, Preset};
    use crate::job::Variant;
    use crate::layout::LayoutPlanner;
    use crate::testing::{self, ScriptedRunner};
    use bugtrace_storage::FsArtifactStore;
    use pretty_assertions::assert_eq;

    struct Fixture {
        _root: tempfile::TempDir,
        config: PipelineConfig,
        layout: PassLayout,
        store: Arc<FsArtifactStore>,
        trace: RawTrace,
    }

    fn fixture(preset: Preset) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::preset(preset);
        config.paths.converter_dir = root.path().join("conv");
        config.paths.output_dir = root.path().join("out");
        config.paths.workspace_root = root.path().join("ws");
        let layout = LayoutPlanner::new(
            config.paths.clone(),
            config.naming.clone(),
            config.tracer.trace_extension.clone(),
        )
        .plan("i42nt", Variant::Bug, "abc")
        .unwrap();
        let store = Arc::new(FsArtifactStore::new(&config.paths.output_dir));
        std::fs::create_dir_all(&layout.work_dir).unwrap();
        let trace_path = store.locate(&layout.raw_trace);
        std::fs::write(&trace_path, "## START PROGRAM\nmain\n## QUIT PROGRAM\n").unwrap();

        Fixture {
            _root: root,
            config,
            layout,
            store,
            trace: RawTrace {
                path: trace_path,
                ledger: None,
                executions: 1,
            },
        }
    }

    fn converter(fx: &Fixture, runner: Arc<ScriptedRunner>) -> TraceToGraphConverter {
        TraceToGraphConverter::new(
            fx.config.converter.clone(),
            &fx.config.paths.converter_dir,
            runner,
            fx.store.clone(),
        )
    }

    fn full_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("chain-to-graph.py", testing::emulate_chain_tool())
            .on("trace-to-graph.py", testing::emulate_chain_tool())
            .on("elf-to-map.py", testing::emulate_symbol_mapper())
            .on("convert-graph-formats.py", testing::emulate_graph_formatter())
    }

    #[tokio::test]
    async fn test_callgrind_conversion_without_symbol_map() {
        let fx = fixture(Preset::Callgrind);
        let runner = Arc::new(full_runner());

        let artifact = converter(&fx, runner.clone())
            .convert(&fx.layout, &fx.trace)
            .await
            .unwrap();

        let out = &fx.layout.work_dir;
        assert_eq!(artifact.graph, out.join("jerry-i42nt-bug.dynamic.graphml.gz"));
        assert_eq!(
            artifact.compressed,
            vec![
                out.join("jerry-i42nt-bug.cgt.gz"),
                out.join("jerry-i42nt-bug.cgt.all.graph.json.gz"),
            ]
        );
        assert!(fx.store.exists(&fx.layout.graph).await);
        assert!(!out.join("jerry-i42nt-bug.cgt").exists());
        assert!(!out.join("jerry-i42nt-bug.dynamic.graphml").exists());

        let programs: Vec<String> = runner.invocations().iter().map(|c| c.program_name()).collect();
        assert_eq!(programs, vec!["chain-to-graph.py", "convert-graph-formats.py"]);

        let chain = &runner.invocations()[0];
        assert_eq!(chain.program, fx.config.paths.converter_dir.join("chain-to-graph.py"));
        assert_eq!(chain.args[..2].to_vec(), vec!["-m".to_string(), "-g".to_string()]);
        assert_eq!(chain.cwd.as_deref(), Some(out.as_path()));
    }

    #[tokio::test]
    async fn test_symbol_map_passed_to_formatter() {
        let fx = fixture(Preset::FunctionTrace);
        let runner = Arc::new(full_runner());

        converter(&fx, runner.clone())
            .convert(&fx.layout, &fx.trace)
            .await
            .unwrap();

        let calls = runner.invocations();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].program_name(), "elf-to-map.py");
        let map = fx.layout.work_dir.join("jerry-i42nt-bug.dynamic.map");
        assert_eq!(calls[2].args[2..].to_vec(), vec!["-m".to_string(), map.display().to_string()]);
    }

    #[tokio::test]
    async fn test_failing_step_stops_conversion() {
        let fx = fixture(Preset::Callgrind);
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("chain-to-graph.py", testing::exit_with(1)),
        );

        let err = converter(&fx, runner.clone())
            .convert(&fx.layout, &fx.trace)
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::Conversion { ref step, .. } if step == "chain-to-graph"));
        assert_eq!(runner.invocations().len(), 1);
        assert!(!fx.store.exists(&fx.layout.graph).await);
        // Raw trace stays uncompressed for a retry
        assert!(fx.trace.path.exists());
    }

    #[tokio::test]
    async fn test_missing_output_is_conversion_error() {
        let fx = fixture(Preset::Callgrind);
        let runner = Arc::new(
            ScriptedRunner::new().on("chain-to-graph.py", testing::emulate_chain_tool()),
        );

        let err = converter(&fx, runner)
            .convert(&fx.layout, &fx.trace)
            .await
            .unwrap_err();

        assert!(matches!(err, ReproError::Conversion { ref step, .. } if step == "convert-graph-formats"));
    }
}
