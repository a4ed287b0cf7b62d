pub type CmdResult<T> = pipewright::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub verbose: u8,
}

pub mod config;
pub mod run;
pub mod show;
pub mod validate;

/// Commands whose output is a raw document instead of the JSON envelope.
pub(crate) fn run_raw(
    command: crate::Commands,
    global: &GlobalArgs,
) -> pipewright::Result<(String, i32)> {
    match command {
        crate::Commands::Show(args) => show::run(args, global),
        _ => Err(pipewright::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support raw output",
            None,
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (pipewright::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Validate(args) => dispatch!(args, global, validate),
        crate::Commands::Config(args) => dispatch!(args, global, config),

        // Show uses raw output mode
        crate::Commands::Show(_) => {
            let err = pipewright::Error::validation_invalid_argument(
                "output_mode",
                "Show command uses raw output mode",
                None,
                None,
            );
            crate::output::map_cmd_result_to_json::<serde_json::Value>(Err(err))
        }
    }
}
