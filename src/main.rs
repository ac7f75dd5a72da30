use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use rudis::server::RedisServer;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = match RedisServer::new(std::env::args()) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "invalid command line arguments");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "server failed to start");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
