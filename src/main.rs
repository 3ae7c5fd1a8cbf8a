use clap::Parser;
use gateway::{
    app,
    cli::{backend_config_path, groups_config_path, Cli, Commands},
    logging,
};
use gateway_core::GatewayError;

/// Exit codes: 0 clean shutdown, 1 fatal error, 2 invalid configuration.
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<GatewayError>() {
        Some(GatewayError::ConfigInvalid(_)) => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            group,
            backend_config,
            groups_config,
        } => {
            app::run_serve(
                group,
                backend_config_path(backend_config),
                groups_config_path(groups_config),
            )
            .await
        }
        Commands::Check {
            backend_config,
            groups_config,
        } => {
            app::run_check(
                backend_config_path(backend_config),
                groups_config_path(groups_config),
            )
            .await
        }
    };

    if let Err(error) = result {
        tracing::error!(error = %error, "fatal");
        std::process::exit(exit_code(&error));
    }
}
