//错误处理板块
use thiserror::Error;
use std::io;
use std::path::PathBuf;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("配置错误: {0}")]
    InvalidConfig(String),

    #[error("找不到可执行文件: {0}")]
    MissingBinary(String),

    #[error("无法启动进程 {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("{program} 退出码异常 ({code:?}): {output}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{0} 执行超时")]
    Timeout(String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("文件不存在: {0}")]
    PathError(PathBuf),

    #[error("结果投递失败 [{sink}]: {message}")]
    SinkError { sink: &'static str, message: String },

    #[error("文件操作错误: {0}")]
    IOError(String),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("请求失败: {0}")]
    RequestFailed(String),

    #[error("HTTP客户端错误: {0}")]
    ClientError(String),

    #[error("序列化错误: {0}")]
    SerializationError(String),
}

impl ScanError {
    /// 只有扫描输出解析失败才值得整体重跑一次
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::ParseError(_))
    }

    /// 外部进程层面的失败 (缺少程序 / 退出码 / 超时)
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            ScanError::MissingBinary(_)
                | ScanError::SpawnFailed { .. }
                | ScanError::ExitStatus { .. }
                | ScanError::Timeout(_)
        )
    }

    pub fn sink(sink: &'static str, err: impl std::fmt::Display) -> Self {
        ScanError::SinkError {
            sink,
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        ScanError::IOError(err.to_string())
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScanError::NetworkError(format!("请求超时: {}", err))
        } else if err.is_connect() {
            ScanError::NetworkError(format!("连接错误: {}", err))
        } else {
            ScanError::RequestFailed(format!("请求失败: {}", err))
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::SerializationError(err.to_string())
    }
}
