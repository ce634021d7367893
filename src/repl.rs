use crate::{
    interrupt::SESSION_INTERRUPTED,
    pipeline::Pipeline,
    session::{Analysis, AnalysisError, InferenceSession},
};
use rustyline::{DefaultEditor, error::ReadlineError};
use std::{
    io::{self, Write},
    path::PathBuf,
};

/// Chest X-ray analyzed by the `test` command.
pub const SAMPLE_IMAGE_URL: &str =
    "https://upload.wikimedia.org/wikipedia/commons/c/c8/Chest_Xray_PA_3-8-2010.png";
pub const SAMPLE_QUESTION: &str = "Describe this chest X-ray. What can you observe?";
pub const DEFAULT_QUESTION: &str = "Describe this medical image in detail";

const PROMPT: &str = "\nCommand: ";
const RULE: &str = "==================================================";
const HELP: &str = "Unrecognized command. Use 'test', 'url', 'file' or 'quit'";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageTarget {
    Url(String),
    File(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Analyze {
        target: ImageTarget,
        question: String,
    },
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            return Command::Quit;
        }
        if line.eq_ignore_ascii_case("test") {
            return Command::Analyze {
                target: ImageTarget::Url(SAMPLE_IMAGE_URL.to_string()),
                question: SAMPLE_QUESTION.to_string(),
            };
        }

        let parsed = if let Some(rest) = line.strip_prefix("url ") {
            split_target(rest).map(|(url, question)| (ImageTarget::Url(url.to_string()), question))
        } else if let Some(rest) = line.strip_prefix("file ") {
            split_target(rest).map(|(path, question)| (ImageTarget::File(PathBuf::from(path)), question))
        } else {
            None
        };

        match parsed {
            Some((target, question)) => Command::Analyze { target, question },
            None => Command::Unknown(line.to_string()),
        }
    }
}

/// Splits `<target> [question]` at the first space.
fn split_target(rest: &str) -> Option<(&str, String)> {
    let rest = rest.trim_start();
    let (target, question) = match rest.split_once(' ') {
        Some((target, question)) => (target, question.trim()),
        None => (rest, ""),
    };
    if target.is_empty() {
        return None;
    }
    let question = if question.is_empty() {
        DEFAULT_QUESTION
    } else {
        question
    };
    Some((target, question.to_string()))
}

pub enum ReadOutcome {
    Line(String),
    Interrupted,
    Eof,
}

/// Where the loop reads commands from.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome>;
}

/// Interactive terminal input with line editing and history.
pub struct Terminal {
    editor: DefaultEditor,
}

impl Terminal {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for Terminal {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadOutcome> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(ReadOutcome::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(ReadOutcome::Interrupted),
            Err(ReadlineError::Eof) => Ok(ReadOutcome::Eof),
            Err(ReadlineError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Quit,
    Interrupted,
    EndOfInput,
}

fn print_menu<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "\nMEDGEMMA INTERACTIVE MODE")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "Available commands:")?;
    writeln!(out, "  url <URL> <question>     - Analyze an image from a URL")?;
    writeln!(out, "  file <path> <question>   - Analyze a local file")?;
    writeln!(out, "  test                     - Test with a sample X-ray")?;
    writeln!(out, "  quit                     - Exit")?;
    writeln!(out, "{RULE}")
}

/// Reads commands until `quit`, an interrupt or end of input.
///
/// Every command is an independent single-turn request; failures are
/// printed and the loop keeps reading.
pub fn run<P, L, W>(
    session: &mut InferenceSession<P>,
    input: &mut L,
    out: &mut W,
) -> io::Result<LoopExit>
where
    P: Pipeline,
    L: LineSource,
    W: Write,
{
    print_menu(out)?;

    loop {
        out.flush()?;
        let line = match input.read_line(PROMPT)? {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Interrupted => {
                writeln!(out, "\n{SESSION_INTERRUPTED}")?;
                return Ok(LoopExit::Interrupted);
            }
            ReadOutcome::Eof => {
                writeln!(out, "\nGoodbye!")?;
                return Ok(LoopExit::EndOfInput);
            }
        };

        match Command::parse(&line) {
            Command::Quit => {
                writeln!(out, "Goodbye!")?;
                return Ok(LoopExit::Quit);
            }
            Command::Analyze { target, question } => {
                let result = match &target {
                    ImageTarget::Url(url) => session.analyze_url(url, &question),
                    ImageTarget::File(path) => session.analyze_file(path, &question),
                };
                print_result(out, result)?;
            }
            Command::Unknown(other) => {
                log::debug!("unrecognized command {other:?}");
                writeln!(out, "{HELP}")?;
            }
        }
    }
}

fn print_result<W: Write>(out: &mut W, result: Result<Analysis, AnalysisError>) -> io::Result<()> {
    match result {
        Ok(analysis) => {
            let (width, height) = analysis.image_size;
            writeln!(out, "\nMEDGEMMA RESPONSE:\n{}", analysis.response)?;
            writeln!(
                out,
                "\n[{width}x{height} image, {:.1}s]",
                analysis.duration.as_secs_f32()
            )
        }
        Err(e) => {
            log::warn!("request failed: {e}");
            writeln!(out, "\nMEDGEMMA RESPONSE:\n{e}")
        }
    }
}
