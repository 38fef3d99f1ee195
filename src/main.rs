use chrono::Utc;
use clap::{Parser, Subcommand};
use rimsync::config::{self, DropboxCredentials, FtpCredentials};
use rimsync::matting::RembgClient;
use rimsync::pipeline::{self, RunContext};
use rimsync::publish::{FtpTarget, Publisher};
use rimsync::remote::DropboxClient;
use rimsync::sync;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rimsync")]
#[command(about = "Incremental Dropbox-to-FTP product photo publisher")]
#[command(long_about = "\
Incremental Dropbox-to-FTP product photo publisher

Mirrors new photos from a Dropbox namespace (or shared link) into a local
staging directory, removes their backgrounds via a rembg-compatible HTTP
service, builds web derivatives (full-size cutout, thumbnail, folder icon),
and republishes each folder to an FTP web host.

Runs are incremental and safe to repeat: a watermark file records the last
fully successful run, a retry list re-queues failed downloads, and the
publisher skips files the host already has.

Credentials come from the environment, never from the config file:

  DROPBOX_APP_KEY, DROPBOX_APP_SECRET, DROPBOX_REFRESH_TOKEN
  FTP_HOST, FTP_USER, FTP_PASSWORD

Run 'rimsync gen-config' to generate a documented rimsync.toml.")]
#[command(version)]
struct Cli {
    /// Path to the job config file
    #[arg(long, default_value = "rimsync.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full run: mirror, derive, publish, checkpoint
    Sync,
    /// Mirror new files into staging without processing or publishing
    Pull,
    /// Run the derivative pipeline over everything already staged
    Process,
    /// Republish staged folders to the FTP host
    Publish,
    /// Print a stock rimsync.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let staging = PathBuf::from(&cfg.staging.dir);

    match cli.command {
        Command::Sync => {
            let dropbox = DropboxClient::connect(&DropboxCredentials::from_env()?.0)?;
            let matting =
                RembgClient::new(cfg.matting.endpoint.clone(), cfg.matting.model.clone());
            let ftp = FtpCredentials::from_env()?;
            let mut target = FtpTarget::connect(&ftp.host, &ftp.user, &ftp.password)?;

            let report = sync::run_sync(&dropbox, &matting, &mut target, &cfg, &staging, Utc::now());
            target.quit();
            let report = report?;
            println!("{report}");
            if !report.clean() {
                std::process::exit(1);
            }
        }
        Command::Pull => {
            let dropbox = DropboxClient::connect(&DropboxCredentials::from_env()?.0)?;
            let report = sync::run_pull(&dropbox, &cfg, &staging, Utc::now())?;
            println!("{report}");
            if report.downloads_failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Process => {
            let matting =
                RembgClient::new(cfg.matting.endpoint.clone(), cfg.matting.model.clone());
            let derivative_config = cfg.derivatives.derivative_config(&cfg.filter.extensions);
            let mut ctx = RunContext::new();
            let reports =
                pipeline::process_tree(&matting, &staging, &derivative_config, &mut ctx)?;
            let mut failed = 0;
            for (dir, report) in &reports {
                println!(
                    "{}: {} processed, {} failed, icon {}",
                    dir.display(),
                    report.processed,
                    report.failed,
                    if report.icon_written { "written" } else { "kept" }
                );
                failed += report.failed;
            }
            println!("{} folders processed", reports.len());
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Publish => {
            let ftp = FtpCredentials::from_env()?;
            let mut target = FtpTarget::connect(&ftp.host, &ftp.user, &ftp.password)?;
            let publisher = Publisher::new(
                cfg.publish.base_path.clone(),
                cfg.publish.policy.conflict_policy(),
            );

            let mut folders: Vec<PathBuf> = std::fs::read_dir(&staging)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            folders.sort();

            let mut totals = (0usize, 0usize, 0usize);
            let mut outcome = Ok(());
            for folder in &folders {
                let name = folder
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match publisher.publish_folder(&mut target, folder, &name) {
                    Ok(report) => {
                        println!(
                            "{name}: {} uploaded, {} skipped, {} failed",
                            report.uploaded, report.skipped, report.failed
                        );
                        totals.0 += report.uploaded;
                        totals.1 += report.skipped;
                        totals.2 += report.failed;
                    }
                    Err(err) => {
                        outcome = Err(err);
                        break;
                    }
                }
            }
            target.quit();
            outcome?;
            println!(
                "total: {} uploaded, {} skipped, {} failed",
                totals.0, totals.1, totals.2
            );
            if totals.2 > 0 {
                std::process::exit(1);
            }
        }
        Command::GenConfig => unreachable!("handled before config load"),
    }

    Ok(())
}
