use std::process::ExitCode;

use clap::Parser;
use db_backup_lib::cli::RecoverCli;
use db_backup_lib::engine::PgTools;
use db_backup_lib::recovery::{Outcome, RecoverySession, Step, TerminalPrompt};

fn main() -> ExitCode {
    // a missing .env file is fine, the variables may be set already
    let _ = dotenv::dotenv();
    let cli = RecoverCli::parse();
    cli.common.init_logger();

    let config = match cli.common.load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let target = match cli.common.database_settings().resolve() {
        Ok(target) => target,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Database Recovery Tool");
    println!("{}", "-".repeat(50));

    let mut prompt = TerminalPrompt::stdio();
    let session = RecoverySession::new(
        PgTools::new(config.engine.clone()),
        &mut prompt,
        config.backup_dir(),
        config.extension.as_str(),
    );

    match session.run(&target) {
        Ok(Outcome::Restored(record)) => {
            println!(
                "✅ Database {} recovered from {}",
                target.database(),
                record.file_name()
            );
            ExitCode::SUCCESS
        }
        Ok(Outcome::Cancelled) => {
            println!("Recovery cancelled, nothing was changed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Recovery failed: {e}");
            match e.step() {
                Some(Step::Create) => eprintln!(
                    "⚠️  The database {} has been dropped and does not exist anymore!",
                    target.database()
                ),
                Some(Step::Restore) => eprintln!(
                    "⚠️  The database {} has been recreated but is empty or only partially restored!",
                    target.database()
                ),
                Some(Step::Drop) | None => {}
            }
            ExitCode::FAILURE
        }
    }
}
