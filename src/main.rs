//! Vigil - command-line entry point

use std::process::ExitCode;

use vigil::cli::{CliApp, exit_codes};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        // Only warn if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let code = match CliApp::new() {
        Ok(app) => match app.run().await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                exit_codes::INTERNAL_ERROR
            }
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_codes::CONFIG_ERROR
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
