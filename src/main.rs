use std::fs::File;
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use linkhubd::application::Application;
use linkhubd::cli::Cli;
use linkhubd::config::ConfigManager;
use linkhubd::supervisor::NoDeviceStarted;

fn init_log(debug: bool) -> Result<()> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "linkhubd".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/linkhubd.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    #[cfg(feature = "tokio-console")]
    console_subscriber::init();

    let mut config_manager = ConfigManager::load(cli.config.clone())?;
    cli.apply(config_manager.get_mut());
    config_manager.get().validate()?;

    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?
        .run()
        .await
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_log(cli.debug) {
        eprintln!("linkhubd: logger: {e}");
        return ExitCode::from(1);
    }
    if cli.daemonize
        && let Err(e) = into_daemon()
    {
        error!("Daemonize failed: {e}");
        return ExitCode::from(1);
    }

    // the runtime is built after daemonizing so its threads survive the fork
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => {
            info!("linkhubd stopped");
            ExitCode::SUCCESS
        }
        Err(e) if e.downcast_ref::<NoDeviceStarted>().is_some() => {
            error!("{e:#}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
