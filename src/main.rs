use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::exit;
use tenant_backup::backup::task::TaskConfig;
use tracing::{error, info, warn};

/// Back up tenant files and restore tenant databases from SQL dumps
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive the files of every configured tenant
    Backup {
        /// Directory receiving one `tenant-<id>.tar` per tenant
        #[arg(short, long)]
        out_dir: PathBuf,
    },
    /// Replay a dump directory into a SQLite database
    Restore {
        /// Tenant to restore, may be omitted when only one is configured
        #[arg(short, long)]
        tenant_id: Option<u32>,
        /// Directory holding `tables/*.sql` and `procedures/*.sql`
        #[arg(long)]
        dump_dir: PathBuf,
        /// SQLite database file, created when missing
        #[arg(long)]
        database: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = match TaskConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            exit(2);
        }
    };

    let ok = match args.command {
        Command::Backup { out_dir } => backup(&config, out_dir),
        Command::Restore {
            tenant_id,
            dump_dir,
            database,
        } => restore(&config, tenant_id, dump_dir, database),
    };

    if !ok {
        exit(1);
    }
}

fn backup(config: &TaskConfig, out_dir: PathBuf) -> bool {
    let thread_pool = match config.build_thread_pool() {
        Ok(pool) => pool,
        Err(e) => {
            error!("{e}");
            return false;
        }
    };

    let mut ok = true;
    for (tenant_id, res) in config.backup_all(&out_dir, &thread_pool) {
        match res {
            Ok((file_path, non_fatal_error)) => {
                info!("Tenant {tenant_id} backed up to {file_path:?}");
                if let Some(non_fatal_error) = non_fatal_error {
                    warn!("Received non fatal error: {non_fatal_error}")
                }
            }
            Err(e) => {
                error!("Backup of tenant {tenant_id} failed: {e}");
                ok = false;
            }
        }
    }
    ok
}

fn restore(
    config: &TaskConfig,
    tenant_id: Option<u32>,
    dump_dir: PathBuf,
    database: PathBuf,
) -> bool {
    let tenant_id = match (tenant_id, config.tenants.as_slice()) {
        (Some(id), _) => id,
        (None, [only]) => *only.tenant_id(),
        (None, _) => {
            error!("Several tenants configured, pass --tenant-id");
            return false;
        }
    };

    match config.restore_tenant(tenant_id, &dump_dir, &database) {
        Ok(report) => {
            for e in &report.errors {
                warn!("Received non fatal error: {e}");
            }
            info!(
                "Tenant {tenant_id} restored: {} statements ok, {} failed",
                report.statements.succeeded(),
                report.statements.failed
            );
            true
        }
        Err(e) => {
            error!("Restore of tenant {tenant_id} failed: {e}");
            false
        }
    }
}
