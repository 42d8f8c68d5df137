//! JSON output for the CLI
//!
//! Every command prints exactly one JSON object on stdout:
//! - success: `{"status":"ok","data":...}`
//! - failure: `{"status":"error","code":...,"class":...,"message":...}`
//!
//! Logs go to stderr and never interleave with it.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::{CliError, CliResult};

fn write_line(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Success envelope
pub fn response(data: Value) -> Value {
    serde_json::json!({
        "status": "ok",
        "data": data
    })
}

/// Error envelope
pub fn error_response(err: &CliError) -> Value {
    serde_json::json!({
        "status": "error",
        "code": err.code().code(),
        "class": err.class().as_str(),
        "message": err.message()
    })
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    write_line(&response(data))
}

/// Write an error response to stdout
pub fn write_error(err: &CliError) -> CliResult<()> {
    write_line(&error_response(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope() {
        let err = CliError::already_initialized("main");
        let value = error_response(&err);
        assert_eq!(value["status"], "error");
        assert_eq!(value["code"], "REPL_CLI_ALREADY_INITIALIZED");
        assert_eq!(value["class"], "PreconditionFailed");
        assert!(value["message"].as_str().unwrap().contains("main"));
    }

    #[test]
    fn test_success_envelope() {
        let value = response(serde_json::json!({"initialized": true}));
        assert_eq!(value["status"], "ok");
        assert_eq!(value["data"]["initialized"], true);
    }
}
