use std::path::Path;

pub type CmdResult<T> = whiskey::Result<(T, i32)>;

pub mod deploy;
pub mod remote;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($config:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($config))
    };
}

pub(crate) fn run_json(
    config: &Path,
    remote_mode: bool,
) -> (whiskey::Result<serde_json::Value>, i32) {
    if remote_mode {
        dispatch!(config, remote)
    } else {
        dispatch!(config, deploy)
    }
}
