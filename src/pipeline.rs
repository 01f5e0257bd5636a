use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use thiserror::Error;

use crate::utils;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to run `{0}`: {1}")]
    Spawn(String, #[source] std::io::Error),
    #[error("`{0}` exited with {1}")]
    Failed(String, std::process::ExitStatus),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no rule optimizer found; set LPOPT_BIN_PATH or pass --lpopt")]
    MissingOptimizer,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// The external preparation steps run before any counting: translate,
/// optimize, ground.
#[derive(Debug)]
pub struct Pipeline {
    translator: PathBuf,
    optimizer: PathBuf,
    grounder: PathBuf,
}

impl Pipeline {
    pub fn new(
        translator: PathBuf,
        optimizer: Option<PathBuf>,
        grounder: PathBuf,
    ) -> Result<Self> {
        let optimizer = optimizer
            .or_else(|| std::env::var_os("LPOPT_BIN_PATH").map(PathBuf::from))
            .ok_or(PipelineError::MissingOptimizer)?;
        Ok(Self {
            translator,
            optimizer,
            grounder,
        })
    }

    /// Translates the task twice: once without action predicates (the
    /// theory that gets grounded) and once with them (the schema theory the
    /// encoder scans).
    pub fn translate(
        &self,
        domain: &Path,
        instance: &Path,
        theory: &Path,
        theory_with_actions: &Path,
        inequality_rules: bool,
    ) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            domain.into(),
            instance.into(),
            "--only-output-direct-program".into(),
        ];
        self.run_to_file(
            &self.translator,
            args.iter()
                .map(OsString::as_os_str)
                .chain([OsStr::new("--remove-action-predicates")]),
            theory,
        )?;
        tracing::info!("theory written to {}", theory.display());

        if inequality_rules {
            args.push("--inequality-rules".into());
        }
        self.run_to_file(
            &self.translator,
            args.iter().map(OsString::as_os_str),
            theory_with_actions,
        )?;
        tracing::info!(
            "theory with actions written to {}",
            theory_with_actions.display()
        );
        Ok(())
    }

    /// Runs the rule optimizer over the theory in place. The temporary file
    /// lives in the same directory so the rename cannot cross filesystems.
    pub fn optimize(&self, theory: &Path) -> Result<()> {
        let dir = theory.parent().filter(|p| !p.as_os_str().is_empty());
        let temp = tempfile::NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
        self.run(
            &self.optimizer,
            [OsStr::new("-f"), theory.as_os_str()],
            temp.reopen()?,
        )?;
        temp.persist(theory).map_err(|err| err.error)?;
        tracing::info!("optimized theory written to {}", theory.display());
        Ok(())
    }

    pub fn ground(&self, theory: &Path, model: &Path) -> Result<()> {
        let start = Instant::now();
        self.run_to_file(
            &self.grounder,
            [theory.as_os_str(), OsStr::new("--output"), OsStr::new("text")],
            model,
        )?;
        tracing::info!("grounding time: {:.5}s", start.elapsed().as_secs_f64());
        tracing::info!(
            "number of atoms (not actions): {}",
            utils::count_instance_atoms(model)?
        );
        Ok(())
    }

    fn run_to_file<'a>(
        &self,
        program: &Path,
        args: impl IntoIterator<Item = &'a OsStr>,
        output: &Path,
    ) -> Result<()> {
        self.run(program, args, File::create(output)?)
    }

    fn run<'a>(
        &self,
        program: &Path,
        args: impl IntoIterator<Item = &'a OsStr>,
        stdout: File,
    ) -> Result<()> {
        let label = program.display().to_string();
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| PipelineError::Spawn(label.clone(), err))?;
        if !status.success() {
            return Err(PipelineError::Failed(label, status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optimizer_is_reported() {
        if std::env::var_os("LPOPT_BIN_PATH").is_some() {
            return;
        }
        let err = Pipeline::new("translate".into(), None, "gringo".into()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingOptimizer));
    }

    #[cfg(unix)]
    #[test]
    fn optimize_rewrites_the_theory_in_place() {
        use std::io::Write as _;
        use std::os::unix::fs::PermissionsExt;

        // an "optimizer" that upcases its input file
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "#!/bin/sh").unwrap();
        writeln!(script, "tr a-z A-Z < \"$2\"").unwrap();
        let script = script.into_temp_path();
        let mut permissions = std::fs::metadata(&script).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&script, permissions).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("output.theory");
        std::fs::write(&theory, "p(a).\n").unwrap();

        let pipeline = Pipeline::new(
            "translate".into(),
            Some(script.to_path_buf()),
            "gringo".into(),
        )
        .unwrap();
        pipeline.optimize(&theory).unwrap();
        assert_eq!(std::fs::read_to_string(&theory).unwrap(), "P(A).\n");
    }

    #[test]
    fn failing_step_surfaces_the_status() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            "false".into(),
            Some(PathBuf::from("lpopt")),
            "gringo".into(),
        )
        .unwrap();
        let err = pipeline
            .translate(
                Path::new("d.pddl"),
                Path::new("i.pddl"),
                &dir.path().join("t"),
                &dir.path().join("ta"),
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Failed(_, _) | PipelineError::Spawn(_, _)
        ));
    }
}
