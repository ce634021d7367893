use argh::FromArgs;
use medgemma_infernum::{
    ChatCompletionsPipeline, GenerationParams, HubClient, InferenceSession, StartupError,
    config::{self, SessionConfig},
    hub::http_client,
    interrupt,
    process::SystemRunner,
    repl::{self, Terminal},
    startup,
};
use std::{path::PathBuf, process::ExitCode};

// defaults for the session
const DEFAULT_ENV_FILE: &str = ".env";
const RULE: &str = "==================================================";

#[derive(FromArgs)]
/// Interactive medical image analysis with MedGemma.
struct SessionArgs {
    /// the .env file to read settings from
    #[argh(option, short = 'e', default = "PathBuf::from(DEFAULT_ENV_FILE)")]
    env_file: PathBuf,
}

fn init_logger() {
    let default_filter = if config::debug_enabled(std::env::var("DEBUG").ok().as_deref()) {
        "medgemma_infernum=debug,medgemma=debug,info"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .init();
}

fn fail(err: StartupError) -> ExitCode {
    println!("ERROR: {err}");
    for line in err.remediation() {
        println!("{line}");
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let args: SessionArgs = argh::from_env();

    // settings from the .env file must be visible before the logger reads DEBUG
    let env_loaded = config::load_env_file(&args.env_file);
    init_logger();
    if let Err(e) = interrupt::exit_on_interrupt(interrupt::SESSION_INTERRUPTED) {
        log::warn!("Failed to install Ctrl+C handler: {e}");
    }

    println!("MEDGEMMA TEST SUITE");
    println!("{RULE}");

    match env_loaded {
        Ok(true) => log::debug!("Loaded settings from {}", args.env_file.display()),
        Ok(false) => log::debug!("{} not found, using the environment", args.env_file.display()),
        Err(e) => return fail(e.into()),
    }

    let ready = startup::bring_up(
        |key: &str| std::env::var(key).ok(),
        |config: &SessionConfig| {
            let client = http_client(config.request_timeout)
                .map_err(|e| StartupError::Connect(e.to_string()))?;
            Ok(HubClient::new(client, &config.hub_endpoint))
        },
        &SystemRunner,
        |hub, config| {
            let client = http_client(config.request_timeout)
                .map_err(|e| medgemma_infernum::LoadError::Other(e.to_string()))?;
            ChatCompletionsPipeline::load(hub, client, config)
        },
    );
    let ready = match ready {
        Ok(ready) => ready,
        Err(e) => return fail(e),
    };

    println!("MedGemma ready to use!");
    println!("{RULE}");

    let client = match http_client(ready.config.request_timeout) {
        Ok(client) => client,
        Err(e) => return fail(StartupError::Connect(e.to_string())),
    };
    let params =
        GenerationParams::deterministic(ready.config.max_new_tokens, ready.config.temperature);
    let mut session = InferenceSession::new(ready.pipeline, client, params);
    log::debug!("pipeline: {:?}", session.pipeline().spec());

    let mut terminal = match Terminal::new() {
        Ok(terminal) => terminal,
        Err(e) => {
            println!("ERROR: cannot open the terminal: {e}");
            return ExitCode::FAILURE;
        }
    };

    match repl::run(&mut session, &mut terminal, &mut std::io::stdout()) {
        Ok(exit) => {
            log::debug!("command loop ended: {exit:?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
