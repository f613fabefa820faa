// scanner.rs
// 扫描调度: 启动守护进程 -> 扫描 -> 解析 (失败重试一次) -> 补齐版本信息
use super::config::Settings;
use super::parser::{format_build_date, parse_scan_output, parse_updated_marker, parse_version};
use super::retry::RetryPolicy;
use super::runner::{Invocation, ProcessRunner};
use super::{ScanError, ScanRequest, ScanResult};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// 扫描压缩包, 跳过引导扇区, 只报告感染项
pub const SCAN_FLAGS: &str = "-abfu";

/// 发现感染时 scan 以 1 退出
const SCAN_EXIT_CODES: &[i32] = &[0, 1];

#[derive(Clone)]
pub struct Scanner {
    runner: Arc<dyn ProcessRunner>,
    settings: Arc<Settings>,
    retry: RetryPolicy,
}

impl Scanner {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: Arc<Settings>) -> Self {
        Self {
            runner,
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// 启动 avast 守护进程; 已经在运行时重复启动是安全的
    pub async fn start_daemon(&self) -> Result<(), ScanError> {
        let deadline = Instant::now() + self.settings.daemon_grace;
        let invocation = Invocation::new(&self.settings.tools.daemon_script, ["start"]);
        let output = self.runner.run(deadline, &invocation).await?;
        log::debug!("守护进程: {}", output.trim());
        Ok(())
    }

    /// 命令行入口: 先确认文件存在, 再扫描
    pub async fn scan_file(
        &self,
        path: &Path,
        timeout: Duration,
        scan_id: Option<String>,
    ) -> Result<(ScanRequest, ScanResult), ScanError> {
        let request = ScanRequest::resolve(path, timeout, scan_id)?;
        let result = self.scan(&request.path, request.timeout).await?;
        Ok((request, result))
    }

    pub async fn scan(&self, path: &Path, timeout: Duration) -> Result<ScanResult, ScanError> {
        self.start_daemon().await?;

        // 重试和版本查询都与首次尝试共用同一个截止时间, 总耗时不超过 timeout
        let deadline = Instant::now() + timeout;
        let invocation = Invocation::new(
            &self.settings.tools.scan_binary,
            [SCAN_FLAGS.to_string(), path.to_string_lossy().into_owned()],
        )
        .accept_exit_codes(SCAN_EXIT_CODES);

        let runner = &self.runner;
        let invocation = &invocation;
        let verdict = self
            .retry
            .run("Avast 扫描", move |attempt| async move {
                log::debug!("扫描 {} (第 {} 次)", invocation.command_line(), attempt);
                let output = runner.run(deadline, invocation).await?;
                parse_scan_output(&output)
            })
            .await?;

        let (engine, database) = tokio::try_join!(
            self.engine_version(deadline),
            self.database_version(deadline)
        )?;
        let updated = self.updated_date().await;

        Ok(ScanResult {
            infected: verdict.infected,
            result: verdict.label,
            engine,
            database,
            updated,
        })
    }

    /// `limit` 为调用方的截止时间, 查询不会超过它
    pub async fn engine_version(&self, limit: Instant) -> Result<String, ScanError> {
        let version = self.query_version("-v", limit).await?;
        log::debug!("Avast 引擎版本: {}", version);
        Ok(version)
    }

    pub async fn database_version(&self, limit: Instant) -> Result<String, ScanError> {
        let version = self.query_version("-V", limit).await?;
        log::debug!("Avast 病毒库版本: {}", version);
        Ok(version)
    }

    async fn query_version(&self, flag: &str, limit: Instant) -> Result<String, ScanError> {
        let deadline = (Instant::now() + self.settings.metadata_timeout).min(limit);
        let invocation = Invocation::new(&self.settings.tools.scan_binary, [flag]);
        let output = self.runner.run(deadline, &invocation).await?;
        Ok(parse_version(&output))
    }

    /// 病毒库更新日期: 优先读标记文件, 否则退回到构建时间
    pub async fn updated_date(&self) -> String {
        let marker = &self.settings.tools.updated_marker;
        match tokio::fs::read_to_string(marker).await {
            Ok(contents) => {
                if let Some(date) = parse_updated_marker(&contents) {
                    return date;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("无法读取更新标记 {:?}: {}", marker, e),
        }
        format_build_date(&self.settings.build.build_time)
    }

    /// 更新病毒库并刷新标记文件
    pub async fn update_definitions(&self) -> Result<String, ScanError> {
        self.start_daemon().await?;

        let deadline = Instant::now() + self.settings.update_timeout;
        let invocation = Invocation::new(&self.settings.tools.update_script, Vec::<String>::new());
        let output = self.runner.run(deadline, &invocation).await?;

        let marker = &self.settings.tools.updated_marker;
        if let Some(parent) = marker.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScanError::IOError(format!("无法创建目录 {:?}: {}", parent, e)))?;
        }
        let today = Local::now().format("%Y%m%d").to_string();
        tokio::fs::write(marker, &today)
            .await
            .map_err(|e| ScanError::IOError(format!("写入更新标记失败: {}", e)))?;

        log::info!("病毒库已更新, 标记日期 {}", today);
        Ok(output)
    }
}
