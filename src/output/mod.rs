//! CLI output: JSON envelope and exit codes.

mod response;

pub use response::{exit_code_to_u8, map_cmd_result_to_json, print_json_result};
