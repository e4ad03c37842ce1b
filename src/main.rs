use std::process::ExitCode;
use std::thread;

use clap::Parser;
use db_backup_lib::backup::{Backup, BackupExecutor, DatabaseBackup};
use db_backup_lib::cli::Cli;
use db_backup_lib::engine::PgTools;
use db_backup_lib::schedule::Scheduler;
use db_backup_lib::util::StopSignal;

fn main() -> ExitCode {
    // a missing .env file is fine, the variables may be set already
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    cli.common.init_logger();

    let config = match cli.common.load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let settings = cli.common.database_settings();
    if let Err(e) = settings.resolve() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    let schedule = cli.schedule_config(&config);
    if let Err(e) = schedule.validate() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let backup_dir = config.backup_dir();
    log::info!("Backup directory: {}", backup_dir.display());

    if cli.schedule {
        let engine = PgTools::new(config.engine).in_own_process_group();
        let backup = DatabaseBackup::new(
            BackupExecutor::new(engine, backup_dir, config.extension),
            settings,
        );

        let mut scheduler = Scheduler::new(backup, schedule).dry_run(dry_run);
        stop_on_interrupt(scheduler.stop_signal());
        let summary = scheduler.run();
        log::info!(
            "{} backup(s) ({} failed), {} cleanup(s) ({} failed)",
            summary.backups,
            summary.failed_backups,
            summary.sweeps,
            summary.failed_sweeps
        );

        return ExitCode::SUCCESS;
    }

    let executor = BackupExecutor::new(PgTools::new(config.engine), backup_dir, config.extension);
    let backup = DatabaseBackup::new(executor, settings);

    let res = if dry_run {
        backup.backup(true)
    } else {
        backup.create().map(|record| {
            println!("File saved as: {}", record.file_name());
            println!("File size: {} bytes", record.size_bytes);
        })
    };

    match res {
        Ok(()) => {
            println!("✅ Backup completed successfully!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Backup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Raises `stop` on Ctrl+C.
///
/// The scheduler finishes its running cycle before it returns.
fn stop_on_interrupt(stop: StopSignal) {
    let spawned = thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::warn!(target: "scheduler", "Interrupts can't be handled: {e}");
                    return;
                }
            };

            match runtime.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => {
                    log::info!(target: "scheduler", "Interrupted, stopping after the running cycle");
                    stop.stop();
                }
                Err(e) => log::warn!(target: "scheduler", "Listening for interrupts failed: {e}"),
            }
        });

    if let Err(e) = spawned {
        log::warn!(target: "scheduler", "Interrupts can't be handled: {e}");
    }
}
