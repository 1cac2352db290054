//! The IaC engine invocation contract.
//!
//! Every sub-resource is an independently applyable working directory
//! with a variables file. This module builds the argv for the three
//! engine verbs and runs them through the shared [`CommandRunner`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::console::Progress;
use crate::error::Result;
use crate::outputs::OutputDocument;
use crate::runner::{CommandRunner, CommandSpec, LineScanner, RunOutput};

/// Binary name of the IaC engine looked up on `$PATH`.
pub const IAC_TOOL: &str = "terraform";

/// Handle on the IaC engine binary plus the runner that executes it.
#[derive(Clone)]
pub struct Iac {
    program: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl Iac {
    pub fn new(program: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `<iac> apply -var-file <file>` in `work_dir`.
    pub fn apply_command(&self, work_dir: &Path, var_file: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("apply")
            .arg("-var-file")
            .arg(var_file.display().to_string())
            .current_dir(work_dir)
    }

    /// `<iac> destroy -force -var-file <file>` in `work_dir`.
    pub fn destroy_command(&self, work_dir: &Path, var_file: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("destroy")
            .arg("-force")
            .arg("-var-file")
            .arg(var_file.display().to_string())
            .current_dir(work_dir)
    }

    /// `<iac> output -json` in `work_dir`.
    pub fn output_command(&self, work_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("output")
            .arg("-json")
            .current_dir(work_dir)
    }

    /// Run a prepared command.
    pub async fn run(
        &self,
        cmd: &CommandSpec,
        scanner: Option<&dyn LineScanner>,
        progress: Option<&dyn Progress>,
    ) -> Result<RunOutput> {
        self.runner.run(cmd, scanner, progress).await
    }

    pub async fn apply(
        &self,
        work_dir: &Path,
        var_file: &Path,
        scanner: Option<&dyn LineScanner>,
        progress: Option<&dyn Progress>,
    ) -> Result<RunOutput> {
        info!(dir = %work_dir.display(), "running IaC apply");
        self.run(&self.apply_command(work_dir, var_file), scanner, progress)
            .await
    }

    pub async fn destroy(
        &self,
        work_dir: &Path,
        var_file: &Path,
        progress: Option<&dyn Progress>,
    ) -> Result<RunOutput> {
        info!(dir = %work_dir.display(), "running IaC destroy");
        self.run(&self.destroy_command(work_dir, var_file), None, progress)
            .await
    }

    /// Fetch and parse the outputs of the resource in `work_dir`.
    pub async fn output(&self, work_dir: &Path) -> Result<OutputDocument> {
        let out = self.run(&self.output_command(work_dir), None, None).await?;
        OutputDocument::parse(&out.stdout())
    }
}
