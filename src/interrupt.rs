//! Ctrl-C outside the line editor.
//!
//! The prompt reports Ctrl-C as input, but blocking hub calls, inference
//! requests and child processes would otherwise die on SIGINT. Both programs
//! install a handler that prints a farewell and exits normally instead.

use std::io::{self, Write};

pub const SETUP_INTERRUPTED: &str = "Setup interrupted by user";
pub const SESSION_INTERRUPTED: &str = "User interrupt. Goodbye!";

/// Writes the farewell and returns the exit code of an interrupted run.
pub fn farewell<W: Write>(out: &mut W, message: &str) -> i32 {
    if let Err(e) = writeln!(out, "\n\n{message}").and_then(|()| out.flush()) {
        log::debug!("could not print farewell: {e}");
    }
    0
}

/// Makes SIGINT print `message` and end the process with a normal exit.
pub fn exit_on_interrupt(message: &'static str) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        let code = farewell(&mut io::stdout(), message);
        std::process::exit(code);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn farewell_is_a_normal_exit() {
        let mut out = Vec::new();
        let code = farewell(&mut out, SETUP_INTERRUPTED);

        assert_eq!(code, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "\n\nSetup interrupted by user\n");
    }

    #[cfg(unix)]
    const CHILD_ENV: &str = "MEDGEMMA_INTERRUPT_CHILD";

    // Runs only inside the child spawned below.
    #[cfg(unix)]
    #[test]
    fn interrupted_child() {
        if std::env::var_os(CHILD_ENV).is_none() {
            return;
        }
        exit_on_interrupt(SESSION_INTERRUPTED).unwrap();
        std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        std::thread::sleep(std::time::Duration::from_secs(10));
        panic!("SIGINT did not end the process");
    }

    #[cfg(unix)]
    #[test]
    fn sigint_prints_farewell_and_exits_zero() {
        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args(["--exact", "interrupt::tests::interrupted_child", "--nocapture"])
            .env(CHILD_ENV, "1")
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(0));
        assert!(String::from_utf8_lossy(&output.stdout).contains(SESSION_INTERRUPTED));
    }
}
