use anyhow::{bail, Result};
use avast_scan::function::config::{Command, Config, Settings};
use avast_scan::function::logging::{init_logging, LogConfig};
use avast_scan::function::runner::CommandRunner;
use avast_scan::function::sink::{Dispatcher, SinkSelection, SINK_DATABASE};
use avast_scan::function::{service, Scanner};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 解析命令行参数
    let config = Config::from_args();
    init_logging(LogConfig::from_flag(config.verbose));
    config.validate()?;

    let settings = Arc::new(Settings::from_config(&config));
    log::debug!("avast {} (构建于 {})", settings.build.version, settings.build.build_time);
    let scanner = Scanner::new(Arc::new(CommandRunner), settings);

    match &config.command {
        Some(Command::Update) => update(&scanner).await,
        Some(Command::Web { .. }) => Ok(service::serve(scanner).await?),
        None => scan_file(&config, &scanner).await,
    }
}

async fn update(scanner: &Scanner) -> Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("正在更新 Avast 病毒库...");

    let result = scanner.update_definitions().await;
    pb.finish_and_clear();

    println!("{}", result?.trim_end());
    Ok(())
}

async fn scan_file(config: &Config, scanner: &Scanner) -> Result<()> {
    let Some(file) = &config.file else {
        bail!("请提供要扫描的文件");
    };

    let dispatcher = Dispatcher::new(SinkSelection::from_config(config))?;

    // 2. 执行扫描, 路径不存在时不会启动任何进程
    let (request, result) = scanner
        .scan_file(file, config.scan_timeout(), config.scan_id.clone())
        .await?;

    // 3. 投递结果
    let report = dispatcher
        .deliver(&request.id, &result, &mut std::io::stdout().lock())
        .await;

    if report.failed(SINK_DATABASE) {
        bail!("扫描结果写入 Elasticsearch 失败");
    }
    Ok(())
}
