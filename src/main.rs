use clap::Parser;
use sftpsync_lib::logging::{self, LogConfig};
use sftpsync_lib::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::new(cli.verbosity(), cli.log_file.clone());
    // guard 持有到进程结束，保证文件日志写完
    let _guard = match logging::init(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("日志初始化失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match sftpsync_lib::run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
