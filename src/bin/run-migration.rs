//! Run a single migration: `run-migration <MIGRATION_FILE>`.

use std::process::ExitCode;

use stockroom_migrate::cli::{self, RunOneCli};
use stockroom_migrate::config::DbConfig;
use stockroom_migrate::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args: RunOneCli = cli::parse_args();
    logging::init(args.common.verbose);

    let result = async {
        let db = DbConfig::from_env()?;
        cli::run_one(args, db).await
    }
    .await;

    cli::exit_with(result)
}
