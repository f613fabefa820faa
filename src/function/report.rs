// report.rs
use super::config::{PLUGIN_CATEGORY, PLUGIN_NAME};
use super::ScanError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 一次扫描的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub infected: bool,
    pub result: String,
    pub engine: String,
    pub database: String,
    pub updated: String,
}

/// 对外 JSON 形状: `{"avast": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvastReport {
    pub avast: ScanResult,
}

impl From<ScanResult> for AvastReport {
    fn from(avast: ScanResult) -> Self {
        Self { avast }
    }
}

/// 持久化文档
#[derive(Debug, Clone, Serialize)]
pub struct PluginResults {
    pub id: String,
    pub name: &'static str,
    pub category: &'static str,
    pub data: ScanResult,
}

impl PluginResults {
    pub fn new(id: &str, data: ScanResult) -> Self {
        Self {
            id: id.to_string(),
            name: PLUGIN_NAME,
            category: PLUGIN_CATEGORY,
            data,
        }
    }
}

/// 一次扫描请求, 用完即弃
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub path: PathBuf,
    pub timeout: Duration,
    /// 关联 ID: 显式指定或文件的 SHA256
    pub id: String,
}

impl ScanRequest {
    /// 解析为绝对路径, 文件不存在时直接失败
    pub fn resolve(path: &Path, timeout: Duration, id: Option<String>) -> Result<Self, ScanError> {
        let path = std::path::absolute(path).map_err(|_| ScanError::PathError(path.to_path_buf()))?;
        if !path.is_file() {
            return Err(ScanError::PathError(path));
        }

        let id = match id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => sha256_file(&path)?,
        };

        Ok(Self { path, timeout, id })
    }
}

pub fn sha256_file(path: &Path) -> Result<String, ScanError> {
    let file = File::open(path).map_err(|_| ScanError::PathError(path.to_path_buf()))?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Markdown 表格
pub fn markdown_table(result: &ScanResult) -> String {
    let mut out = String::from("#### Avast\n");
    let _ = writeln!(out, "| Infected | Result | Engine | Updated |");
    let _ = writeln!(out, "|----------|--------|--------|---------|");
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} |",
        result.infected,
        escape_cell(&result.result),
        escape_cell(&result.engine),
        escape_cell(&result.updated)
    );
    out
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> ScanResult {
        ScanResult {
            infected: true,
            result: "EICAR Test-NOT virus!!!".to_string(),
            engine: "2.1.2".to_string(),
            database: "17101904".to_string(),
            updated: "20171019".to_string(),
        }
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_value(AvastReport::from(sample())).unwrap();
        assert_eq!(json["avast"]["infected"], true);
        assert_eq!(json["avast"]["result"], "EICAR Test-NOT virus!!!");
        assert_eq!(json["avast"]["engine"], "2.1.2");
        assert_eq!(json["avast"]["database"], "17101904");
        assert_eq!(json["avast"]["updated"], "20171019");
    }

    #[test]
    fn json_round_trip() {
        let report = AvastReport::from(sample());
        let text = serde_json::to_string(&report).unwrap();
        let back: AvastReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn table_has_header_and_row() {
        let table = markdown_table(&sample());
        assert!(table.starts_with("#### Avast\n"));
        assert!(table.contains("| Infected | Result | Engine | Updated |"));
        assert!(table.contains("| true | EICAR Test-NOT virus!!! | 2.1.2 | 20171019 |"));
    }

    #[test]
    fn table_escapes_pipes() {
        let mut result = sample();
        result.result = "a|b".to_string();
        assert!(markdown_table(&result).contains("a\\|b"));
    }

    #[test]
    fn request_uses_content_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let req = ScanRequest::resolve(file.path(), Duration::from_secs(60), None).unwrap();
        assert!(req.path.is_absolute());
        assert_eq!(
            req.id,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn request_prefers_explicit_id() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let req = ScanRequest::resolve(file.path(), Duration::from_secs(1), Some("abc".into())).unwrap();
        assert_eq!(req.id, "abc");
    }

    #[test]
    fn missing_file_is_path_error() {
        let err = ScanRequest::resolve(Path::new("/no/such/file"), Duration::from_secs(1), None).unwrap_err();
        assert!(matches!(err, ScanError::PathError(_)));
    }
}
