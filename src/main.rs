use anyhow::Result;
use clap::Parser;
use std::process;

use uninstall_worker_lib::commands;
use uninstall_worker_lib::modules::common::logging;

#[derive(Parser, Debug)]
#[command(name = "uninstall-worker")]
#[command(about = "监视单个卸载程序的运行直到结束", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// 详细输出模式
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let result = match cli.command {
        commands::Command::Uninstall(cmd) => commands::uninstall::execute(cmd).await,
        commands::Command::Browsers(cmd) => commands::browsers::execute(cmd).await,
        commands::Command::Msi(cmd) => commands::msi::execute(cmd).await,
    };

    if let Err(e) = result {
        if cli.verbose {
            tracing::error!("错误: {:#}", e);
        } else {
            eprintln!("错误: {}", e);
        }
        process::exit(1);
    }

    Ok(())
}
