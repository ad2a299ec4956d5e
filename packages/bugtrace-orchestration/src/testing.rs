//! Scripted collaborators for driving stages without git or external tools
//!
//! [`ScriptedRunner`] records every invocation and answers with per-program
//! handlers; the `emulate_*` handlers reproduce the file side effects of the
//! real tools (build script, tracer, converters) so a whole pass can run in
//! a temp directory.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use crate::vcs::{VcsArchiver, VcsError};

pub type Handler = Box<dyn Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync>;

/// Process runner that never spawns anything
///
/// Programs are matched by file name (`python3`, `valgrind`,
/// `jerry-i42nt-bug`). Unmatched programs exit 0 with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    handlers: Vec<(String, Handler)>,
    invocations: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, program: &str, handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
    {
        self.handlers.push((program.to_string(), Box::new(handler)));
        self
    }

    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.lock().clone()
    }

    pub fn invocations_of(&self, program: &str) -> Vec<CommandSpec> {
        self.invocations
            .lock()
            .iter()
            .filter(|spec| spec.program_name() == program)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        self.invocations.lock().push(spec.clone());
        let name = spec.program_name();
        match self.handlers.iter().find(|(program, _)| *program == name) {
            Some((_, handler)) => handler(spec),
            None => Ok(ok_output()),
        }
    }
}

fn ok_output() -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        stdout: String::new(),
    }
}

fn io_failure(spec: &CommandSpec, source: std::io::Error) -> ProcessError {
    ProcessError::Wait {
        program: spec.program_name(),
        source,
    }
}

fn write_file(spec: &CommandSpec, path: PathBuf, content: &[u8], append: bool) -> Result<(), ProcessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_failure(spec, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(&path)
        .map_err(|e| io_failure(spec, e))?;
    file.write_all(content).map_err(|e| io_failure(spec, e))
}

fn arg(spec: &CommandSpec, index: usize) -> Result<PathBuf, ProcessError> {
    spec.args.get(index).map(PathBuf::from).ok_or_else(|| {
        io_failure(
            spec,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing argument"),
        )
    })
}

/// Exit with `code`, no side effects
pub fn exit_with(code: i32) -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    move |_| {
        Ok(ProcessOutput {
            exit_code: Some(code),
            stdout: String::new(),
        })
    }
}

/// Print `text` on stdout and exit 0
pub fn print_stdout(text: &str) -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let text = text.to_string();
    move |_| {
        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: text.clone(),
        })
    }
}

pub fn timed_out(spec: &CommandSpec) -> ProcessError {
    ProcessError::TimedOut {
        program: spec.program_name(),
        limit: Duration::from_secs(30),
    }
}

/// Behave as if the timeout elapsed
pub fn time_out() -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    |spec| Err(timed_out(spec))
}

/// Behave as if the program does not exist
pub fn fail_to_spawn() -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    |spec| {
        Err(ProcessError::Spawn {
            program: spec.program_name(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        })
    }
}

/// Build script: writes an executable at `{--builddir}/{binary}`
pub fn emulate_build(binary: &str) -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let binary = binary.to_string();
    move |spec| {
        let build_dir = spec
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--builddir="))
            .map(PathBuf::from)
            .ok_or_else(|| {
                io_failure(
                    spec,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no --builddir"),
                )
            })?;
        write_file(spec, build_dir.join(&binary), b"\x7fELF jerry", false)?;
        Ok(ok_output())
    }
}

/// Instrumented binary: appends one chain to `{cwd}/{trace_file}` per run
pub fn emulate_trace_file(trace_file: &str) -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let trace_file = trace_file.to_string();
    move |spec| {
        let cwd = spec.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        let input = spec.args.first().cloned().unwrap_or_default();
        write_file(
            spec,
            cwd.join(&trace_file),
            format!("main-->run:{}\n", input).as_bytes(),
            true,
        )?;
        Ok(ok_output())
    }
}

/// Instrumented binary that starts a trace and never finishes
pub fn partial_trace_then_timeout(
    trace_file: &str,
) -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let write = emulate_trace_file(trace_file);
    move |spec| {
        write(spec)?;
        Err(timed_out(spec))
    }
}

/// Chain tool: `{last arg}` -> `{last arg}.all.graph.json`
pub fn emulate_chain_tool() -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    |spec| {
        let trace = arg(spec, spec.args.len().saturating_sub(1))?;
        let mut json = trace.into_os_string();
        json.push(".all.graph.json");
        write_file(spec, PathBuf::from(json), b"{\"nodes\": [], \"edges\": []}", false)?;
        Ok(ok_output())
    }
}

/// Symbol mapper: `{binary} {map}` writes `{map}`
pub fn emulate_symbol_mapper() -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    |spec| {
        write_file(spec, arg(spec, 1)?, b"0x401000 main\n", false)?;
        Ok(ok_output())
    }
}

/// Graph formatter: `{json} {graphml} [-m map]` writes `{graphml}`
pub fn emulate_graph_formatter() -> impl Fn(&CommandSpec) -> Result<ProcessOutput, ProcessError> {
    |spec| {
        write_file(spec, arg(spec, 1)?, b"<graphml/>", false)?;
        Ok(ok_output())
    }
}

/// Archiver serving fixed file trees per revision
#[derive(Default)]
pub struct ScriptedArchiver {
    trees: HashMap<String, Vec<(String, Vec<u8>)>>,
    corrupt: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_revision(mut self, revision: &str, files: &[(&str, &str)]) -> Self {
        self.trees.insert(
            revision.to_string(),
            files
                .iter()
                .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
                .collect(),
        );
        self
    }

    /// `revision` archives to bytes that are not a tar stream
    pub fn with_corrupt_revision(mut self, revision: &str) -> Self {
        self.corrupt.insert(revision.to_string());
        self
    }

    /// Revisions requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl VcsArchiver for ScriptedArchiver {
    fn write_archive(&self, revision: &str, out: &mut dyn Write) -> Result<(), VcsError> {
        self.calls.lock().push(revision.to_string());

        if self.corrupt.contains(revision) {
            out.write_all(&[0xFF; 1024])?;
            return Ok(());
        }

        let files = self
            .trees
            .get(revision)
            .ok_or_else(|| VcsError::UnknownRevision {
                revision: revision.to_string(),
                source: git2::Error::from_str("revspec not found"),
            })?;

        let mut builder = tar::Builder::new(out);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, content.as_slice())?;
        }
        builder.finish()?;
        Ok(())
    }
}
