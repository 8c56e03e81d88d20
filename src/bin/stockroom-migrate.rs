//! Run every migration in the plan, or show status.

use std::process::ExitCode;

use stockroom_migrate::cli::{self, MigrateCli};
use stockroom_migrate::config::DbConfig;
use stockroom_migrate::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args: MigrateCli = cli::parse_args();
    logging::init(args.common.verbose);

    let result = async {
        let db = DbConfig::from_env()?;
        cli::migrate(args, db).await
    }
    .await;

    cli::exit_with(result)
}
