// parser.rs
// 纯文本解析: 不访问文件系统, 不启动进程
use super::ScanError;
use chrono::DateTime;
use regex::Regex;
use std::sync::OnceLock;

/// 干净文件的标记
pub const CLEAN_SENTINEL: &str = "[OK]";

/// 扫描结论, 版本信息由调用方补齐
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub infected: bool,
    pub label: String,
}

impl Verdict {
    pub fn clean() -> Self {
        Self {
            infected: false,
            label: String::new(),
        }
    }
}

/// 解析 `scan -abfu` 的输出
///
/// 任意一行含有 `[OK]` 即为干净; 否则取第一条带制表符的行,
/// 路径之后的字段就是检测名。找不到这种结构时返回 `ParseError`,
/// 由调度器决定是否重试。
pub fn parse_scan_output(raw: &str) -> Result<Verdict, ScanError> {
    log::debug!("Avast 输出: {}", raw);

    if raw.trim().is_empty() {
        return Err(ScanError::ParseError("扫描输出为空".into()));
    }

    if raw.lines().any(|line| line.contains(CLEAN_SENTINEL)) {
        return Ok(Verdict::clean());
    }

    let line = raw
        .lines()
        .find(|line| line.contains('\t'))
        .ok_or_else(|| ScanError::ParseError(format!("缺少制表符分隔: {:?}", raw.trim())))?;

    let label = line
        .split('\t')
        .nth(1)
        .map(str::trim)
        .unwrap_or_default();

    if label.is_empty() {
        return Err(ScanError::ParseError(format!("检测名为空: {:?}", line)));
    }

    Ok(Verdict {
        infected: true,
        label: label.to_string(),
    })
}

/// 版本查询只需要去掉首尾空白
pub fn parse_version(raw: &str) -> String {
    raw.trim().to_string()
}

fn ymd_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{8}$").expect("合法的正则"))
}

/// 把构建时间 (RFC-1123 风格, 如 `Mon, 02 Jan 2006 15:04:05 +0000`) 转成 `YYYYMMDD`
pub fn format_build_date(build_time: &str) -> String {
    let build_time = build_time.trim();
    if ymd_pattern().is_match(build_time) {
        return build_time.to_string();
    }

    match DateTime::parse_from_rfc2822(build_time) {
        Ok(t) => t.format("%Y%m%d").to_string(),
        Err(e) => {
            log::warn!("无法解析构建时间 {:?}: {}", build_time, e);
            build_time.to_string()
        }
    }
}

/// 更新标记文件里的日期; 内容不是 `YYYYMMDD` 时返回 None
pub fn parse_updated_marker(contents: &str) -> Option<String> {
    let contents = contents.trim();
    if ymd_pattern().is_match(contents) {
        Some(contents.to_string())
    } else {
        log::warn!("更新标记内容异常: {:?}", contents);
        None
    }
}
