// runner.rs
// 外部进程执行: 带截止时间, 合并 stdout/stderr, 不做任何重试
use super::ScanError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
#[cfg(any(test, feature = "testing"))]
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

/// 一次外部命令调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// 视为成功的退出码
    pub ok_exit_codes: Vec<i32>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ok_exit_codes: vec![0],
        }
    }

    pub fn accept_exit_codes(mut self, codes: &[i32]) -> Self {
        self.ok_exit_codes = codes.to_vec();
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// 执行命令直到 `deadline`, 返回合并后的输出文本
    async fn run(&self, deadline: Instant, invocation: &Invocation) -> Result<String, ScanError>;
}

/// 基于 tokio::process 的真实实现
#[derive(Debug, Default, Clone)]
pub struct CommandRunner;

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, deadline: Instant, invocation: &Invocation) -> Result<String, ScanError> {
        log::debug!("执行命令: {}", invocation.command_line());

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 请求被取消 (future 被丢弃) 时一并结束子进程
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ScanError::MissingBinary(invocation.program.clone()),
                _ => ScanError::SpawnFailed {
                    program: invocation.program.clone(),
                    message: e.to_string(),
                },
            })?;

        let output = timeout_at(deadline, child.wait_with_output())
            .await
            .map_err(|_| ScanError::Timeout(invocation.command_line()))??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let code = output.status.code();
        match code {
            Some(code) if invocation.ok_exit_codes.contains(&code) => Ok(text),
            _ => Err(ScanError::ExitStatus {
                program: invocation.program.clone(),
                code,
                output: text.trim().to_string(),
            }),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
type Script = dyn Fn(&Invocation) -> Result<String, ScanError> + Send + Sync;

/// 测试用的假执行器: 由闭包决定输出, 并记录每一次调用
#[cfg(any(test, feature = "testing"))]
#[derive(Clone)]
pub struct FakeRunner {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

#[cfg(any(test, feature = "testing"))]
impl FakeRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Invocation) -> Result<String, ScanError> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 调用某个程序时带有指定参数的次数
    pub fn count(&self, program: &str, arg: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program == program && c.args.iter().any(|a| a == arg))
            .count()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, deadline: Instant, invocation: &Invocation) -> Result<String, ScanError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        if Instant::now() >= deadline {
            return Err(ScanError::Timeout(invocation.command_line()));
        }
        (self.script)(invocation)
    }
}
