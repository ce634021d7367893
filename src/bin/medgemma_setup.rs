use argh::FromArgs;
use medgemma_infernum::{
    interrupt,
    process::SystemRunner,
    setup::{self, SetupContext},
};
use std::{path::PathBuf, process::ExitCode};

#[derive(FromArgs)]
/// Prepares the local environment for running MedGemma.
struct SetupArgs {
    /// the project directory to set up (defaults to the current directory)
    #[argh(option, short = 'd', default = "PathBuf::from(\".\")")]
    project_dir: PathBuf,

    /// skip fetching dependencies and building the binaries
    #[argh(switch)]
    skip_build: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_target(false)
        .init();
    let args: SetupArgs = argh::from_env();
    if let Err(e) = interrupt::exit_on_interrupt(interrupt::SETUP_INTERRUPTED) {
        log::warn!("Failed to install Ctrl+C handler: {e}");
    }

    let runner = SystemRunner;
    let ctx = match SetupContext::new(&args.project_dir, args.skip_build, &runner) {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("\nUnexpected error: {e}");
            println!("Try again or check the prerequisites");
            return ExitCode::FAILURE;
        }
    };

    // the summary already tells the operator whether setup succeeded
    if let Err(e) = setup::run_setup(&ctx, &mut std::io::stdout()) {
        log::error!("could not write setup output: {e}");
    }
    ExitCode::SUCCESS
}
