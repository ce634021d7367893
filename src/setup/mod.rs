//! Environment provisioning.
//!
//! Runs a fixed sequence of checks and preparation steps, reporting each one.
//! A failing step never stops the steps after it; the summary says whether
//! the environment is ready.

pub mod scripts;

use crate::{hardware::HardwareReport, process::CommandRunner};
use scripts::{Platform, ScriptKind, ScriptPaths};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::Output,
};

/// Directory holding the isolated runtime, relative to the project.
pub const RUNTIME_DIR: &str = ".medgemma";
/// Hub cache inside the runtime directory.
pub const CACHE_DIR: &str = "hub-cache";

const RULE: &str = "==================================================";

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("project directory {path} is not usable: {source}")]
    ProjectDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Passed(String),
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, StepOutcome::Failed(_))
    }
}

pub struct SetupContext<'a, R> {
    pub project_dir: PathBuf,
    pub skip_build: bool,
    pub platform: Platform,
    pub runner: &'a R,
}

impl<'a, R: CommandRunner> SetupContext<'a, R> {
    pub fn new(project_dir: &Path, skip_build: bool, runner: &'a R) -> Result<Self, SetupError> {
        let project_dir = project_dir
            .canonicalize()
            .map_err(|source| SetupError::ProjectDir {
                path: project_dir.to_path_buf(),
                source,
            })?;
        Ok(Self {
            project_dir,
            skip_build,
            platform: Platform::current(),
            runner,
        })
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.project_dir.join(RUNTIME_DIR)
    }

    pub fn release_dir(&self) -> PathBuf {
        self.project_dir.join("target").join("release")
    }

    fn session_binary(&self) -> PathBuf {
        self.release_dir()
            .join(format!("medgemma{}", std::env::consts::EXE_SUFFIX))
    }

    fn script_paths(&self) -> ScriptPaths {
        ScriptPaths {
            project: self.project_dir.clone(),
            cache: self.runtime_dir().join(CACHE_DIR),
            bin: self.release_dir(),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<Output, String> {
        let output = self
            .runner
            .run(program, args, Some(&self.project_dir))
            .map_err(|e| format!("could not run {program}: {e}"))?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(format!(
                "{program} {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

type StepFn<R> = fn(&SetupContext<'_, R>) -> StepOutcome;

/// The setup sequence, in execution order.
pub fn steps<R: CommandRunner>() -> Vec<(&'static str, StepFn<R>)> {
    let steps: [(&'static str, StepFn<R>); 8] = [
        ("Toolchain", check_toolchain),
        ("Runtime directory", create_runtime_dir),
        ("Dependencies", install_dependencies),
        (".env file", check_env_file),
        ("GPU support", check_gpu),
        ("Activation scripts", generate_activation_scripts),
        ("Run scripts", generate_run_scripts),
        ("Installation test", test_installation),
    ];
    Vec::from(steps)
}

fn check_toolchain<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    match ctx.run("cargo", &["--version"]) {
        Ok(output) => StepOutcome::Passed(String::from_utf8_lossy(&output.stdout).trim().to_string()),
        Err(e) => StepOutcome::Failed(format!("{e}; install Rust from https://rustup.rs")),
    }
}

fn create_runtime_dir<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    let runtime = ctx.runtime_dir();
    let existed = runtime.exists();
    match std::fs::create_dir_all(runtime.join(CACHE_DIR)) {
        Ok(()) if existed => StepOutcome::Passed("Runtime directory already exists".to_string()),
        Ok(()) => StepOutcome::Passed(format!("Runtime directory created at {}", runtime.display())),
        Err(e) => StepOutcome::Failed(format!("Error creating runtime directory: {e}")),
    }
}

fn install_dependencies<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    if ctx.skip_build {
        return StepOutcome::Skipped("Build skipped (--skip-build)".to_string());
    }
    if !ctx.project_dir.join("Cargo.toml").exists() {
        return StepOutcome::Failed("Cargo.toml not found".to_string());
    }

    let result = ctx
        .run("cargo", &["fetch"])
        .and_then(|_| ctx.run("cargo", &["build", "--release", "--bins"]));
    match result {
        Ok(_) => StepOutcome::Passed("Dependencies installed and binaries built".to_string()),
        Err(e) => StepOutcome::Failed(format!("Installation error: {e}")),
    }
}

/// Validates `.env` the same way the session validates `HF_TOKEN`.
pub fn check_env_file<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    let path = ctx.project_dir.join(".env");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return StepOutcome::Failed(
                ".env file not found; create it and add your HF_TOKEN".to_string(),
            );
        }
        Err(e) => return StepOutcome::Failed(format!("Could not read .env: {e}")),
    };

    if content.contains(crate::config::TOKEN_PLACEHOLDER_PREFIX) || !content.contains("HF_TOKEN=") {
        return StepOutcome::Failed(
            "HF_TOKEN not configured in .env; update it with your token from huggingface.co"
                .to_string(),
        );
    }
    StepOutcome::Passed(".env file configured".to_string())
}

fn check_gpu<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    let report = HardwareReport::probe(ctx.runner);
    let message = match report.primary_accelerator() {
        Some(gpu) => format!("GPU: {}", gpu.name),
        None => "GPU not available (CPU mode)".to_string(),
    };
    StepOutcome::Passed(message)
}

fn generate_scripts<R: CommandRunner>(ctx: &SetupContext<'_, R>, kind: ScriptKind) -> StepOutcome {
    match scripts::write_scripts(&ctx.project_dir, kind, &ctx.script_paths()) {
        Ok(written) => {
            let names: Vec<String> = written
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            StepOutcome::Passed(format!("Generated {}", names.join(", ")))
        }
        Err(e) => StepOutcome::Failed(format!("Error generating scripts: {e}")),
    }
}

fn generate_activation_scripts<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    generate_scripts(ctx, ScriptKind::Activate)
}

fn generate_run_scripts<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    generate_scripts(ctx, ScriptKind::Run)
}

fn test_installation<R: CommandRunner>(ctx: &SetupContext<'_, R>) -> StepOutcome {
    let binary = ctx.session_binary();
    if !binary.exists() {
        return StepOutcome::Failed(format!("{} not found", binary.display()));
    }
    match ctx.run(&binary.to_string_lossy(), &["--help"]) {
        Ok(_) => StepOutcome::Passed("medgemma starts correctly".to_string()),
        Err(e) => StepOutcome::Failed(e),
    }
}

pub struct SetupReport {
    pub results: Vec<(&'static str, StepOutcome)>,
}

impl SetupReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|(_, outcome)| outcome.is_ok())
    }
}

/// Runs every step and prints progress plus the final summary to `out`.
pub fn run_setup<R, W>(ctx: &SetupContext<'_, R>, out: &mut W) -> io::Result<SetupReport>
where
    R: CommandRunner,
    W: Write,
{
    writeln!(out, "MEDGEMMA AUTOMATIC SETUP")?;
    writeln!(out, "{RULE}")?;

    let mut results = Vec::new();
    for (name, step) in steps::<R>() {
        writeln!(out, "\n{name}...")?;
        out.flush()?;
        let outcome = step(ctx);
        match &outcome {
            StepOutcome::Passed(msg) | StepOutcome::Skipped(msg) => writeln!(out, "{msg}")?,
            StepOutcome::Failed(msg) => {
                log::warn!("{name} failed: {msg}");
                writeln!(out, "{msg}")?;
            }
        }
        results.push((name, outcome));
    }

    let report = SetupReport { results };
    writeln!(out, "\n{RULE}")?;
    if report.all_passed() {
        print_success(ctx, out)?;
    } else {
        print_failure(out)?;
    }
    writeln!(out, "{RULE}")?;
    Ok(report)
}

fn print_success<R, W: Write>(ctx: &SetupContext<'_, R>, out: &mut W) -> io::Result<()> {
    writeln!(out, "SETUP COMPLETED SUCCESSFULLY!")?;
    writeln!(out, "\nHOW TO USE MEDGEMMA:\n")?;
    for line in ctx.platform.usage() {
        writeln!(out, "{line}")?;
    }
    writeln!(out, "\nFIRST TEST:")?;
    writeln!(out, "   1. Start MedGemma")?;
    writeln!(out, "   2. Type: test")?;
    writeln!(out, "   3. Wait for the analysis of the sample X-ray")?;
    writeln!(out, "\nRuntime directory:")?;
    writeln!(out, "   Location: {}", ctx.project_dir.join(RUNTIME_DIR).display())?;
    writeln!(out, "   Managed automatically by the scripts")
}

fn print_failure<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "SETUP INCOMPLETE")?;
    writeln!(out, "\nTROUBLESHOOTING:")?;
    writeln!(out, "1. Check that a Rust toolchain is installed (https://rustup.rs)")?;
    writeln!(out, "2. Check that .env exists with a valid HF_TOKEN")?;
    writeln!(out, "3. Make sure you have an internet connection")?;
    writeln!(out, "4. For memory problems, try:")?;
    writeln!(out, "   - Close other applications")?;
    writeln!(out, "   - Set DEVICE=cpu in .env")?;
    writeln!(out, "\nTo run setup again: medgemma-setup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;

    fn ctx<'a>(dir: &Path, runner: &'a FakeRunner, skip_build: bool) -> SetupContext<'a, FakeRunner> {
        SetupContext::new(dir, skip_build, runner).unwrap()
    }

    #[test]
    fn env_file_validation() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let ctx = ctx(dir.path(), &runner, true);

        assert!(matches!(check_env_file(&ctx), StepOutcome::Failed(msg) if msg.contains("not found")));

        std::fs::write(dir.path().join(".env"), "HF_TOKEN=hf_xxxxxxxx\n").unwrap();
        assert!(matches!(check_env_file(&ctx), StepOutcome::Failed(msg) if msg.contains("not configured")));

        std::fs::write(dir.path().join(".env"), "MODEL_NAME=x\n").unwrap();
        assert!(!check_env_file(&ctx).is_ok());

        std::fs::write(dir.path().join(".env"), "HF_TOKEN=hf_realtoken\n").unwrap();
        assert!(check_env_file(&ctx).is_ok());
    }

    #[test]
    fn runtime_dir_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let ctx = ctx(dir.path(), &runner, true);

        assert!(matches!(create_runtime_dir(&ctx), StepOutcome::Passed(msg) if msg.contains("created")));
        assert!(ctx.runtime_dir().join(CACHE_DIR).is_dir());
        assert!(matches!(create_runtime_dir(&ctx), StepOutcome::Passed(msg) if msg.contains("already exists")));
    }

    #[test]
    fn dependencies_fetch_then_build() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        let runner = FakeRunner::default().reply("cargo", 0, "");
        let ctx = ctx(dir.path(), &runner, false);

        assert!(install_dependencies(&ctx).is_ok());
        assert_eq!(
            *runner.calls.borrow(),
            vec!["cargo fetch".to_string(), "cargo build --release --bins".to_string()]
        );
    }

    #[test]
    fn dependencies_can_be_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let ctx = ctx(dir.path(), &runner, true);

        assert!(matches!(install_dependencies(&ctx), StepOutcome::Skipped(_)));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn missing_toolchain_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let ctx = ctx(dir.path(), &runner, true);

        assert!(matches!(check_toolchain(&ctx), StepOutcome::Failed(msg) if msg.contains("rustup")));
    }

    #[test]
    fn every_step_runs_even_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::default();
        let ctx = ctx(dir.path(), &runner, true);

        let mut out = Vec::new();
        let report = run_setup(&ctx, &mut out).unwrap();
        let output = String::from_utf8(out).unwrap();

        assert_eq!(report.results.len(), steps::<FakeRunner>().len());
        assert!(!report.all_passed());
        assert!(output.contains("SETUP INCOMPLETE"));
        // scripts are still generated after the toolchain and .env failures
        assert!(dir.path().join("run_medgemma.sh").exists());
        assert!(dir.path().join("activate_env.bat").exists());
    }

    #[test]
    fn successful_setup_prints_usage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "HF_TOKEN=hf_realtoken\n").unwrap();

        // stand-in for the built session binary
        let release = dir.path().canonicalize().unwrap().join("target").join("release");
        std::fs::create_dir_all(&release).unwrap();
        let binary = release.join(format!("medgemma{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&binary, "").unwrap();

        let runner = FakeRunner::default()
            .reply("cargo", 0, "cargo 1.85.0")
            .reply(&binary.to_string_lossy(), 0, "Usage: medgemma");
        let ctx = ctx(dir.path(), &runner, true);

        let mut out = Vec::new();
        let report = run_setup(&ctx, &mut out).unwrap();
        let output = String::from_utf8(out).unwrap();

        assert!(report.all_passed(), "{output}");
        assert!(output.contains("SETUP COMPLETED SUCCESSFULLY!"));
        for line in ctx.platform.usage() {
            assert!(output.contains(line));
        }
    }
}
