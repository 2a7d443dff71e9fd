use std::process::ExitCode;
use xmpp_e2e_matrix::cli;

#[tokio::main]
async fn main() -> ExitCode {
    match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(cli::EXIT_SETUP_ERROR)
        }
    }
}
