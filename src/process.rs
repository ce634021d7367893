use std::{
    io,
    path::Path,
    process::{Command, Output},
};

/// Runs external programs on behalf of the probes and setup steps.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<Output>;
}

/// Spawns real processes and waits for them to finish.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<Output> {
        log::debug!("running {program} {}", args.join(" "));
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command.output()
    }
}
