// service.rs
// 扫描 web 服务: POST /scan, multipart 字段 `malware`
use super::config::WebSettings;
use super::report::AvastReport;
use super::scanner::Scanner;
use super::ScanError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;

/// 上传表单里的文件字段名
pub const UPLOAD_FIELD: &str = "malware";

const BAD_UPLOAD: &str = "Please supply a valid file to scan.";

#[derive(Clone)]
struct AppState {
    scanner: Scanner,
    web: WebSettings,
}

#[derive(Debug)]
pub enum ApiError {
    BadUpload(String),
    Scan(ScanError),
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        ApiError::Scan(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadUpload(reason) => {
                log::error!("无效上传: {}", reason);
                (StatusCode::BAD_REQUEST, format!("{}\n", BAD_UPLOAD)).into_response()
            }
            ApiError::Scan(err) => {
                log::error!("扫描失败: {}", err);
                let status = match &err {
                    ScanError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    e if e.is_process_error() || e.is_retryable() => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string()).into_response()
            }
        }
    }
}

pub fn router(scanner: Scanner) -> Router {
    let web = scanner.settings().web.clone();
    Router::new()
        .route("/scan", post(scan_upload))
        .layer(DefaultBodyLimit::max(web.body_limit))
        .with_state(AppState { scanner, web })
}

/// 启动服务, 直到进程退出
pub async fn serve(scanner: Scanner) -> Result<(), ScanError> {
    let web = scanner.settings().web.clone();
    tokio::fs::create_dir_all(&web.scratch_dir)
        .await
        .map_err(|e| ScanError::IOError(format!("无法创建临时目录 {:?}: {}", web.scratch_dir, e)))?;

    let listener = tokio::net::TcpListener::bind(&web.listen)
        .await
        .map_err(|e| ScanError::InvalidConfig(format!("无法监听 {}: {}", web.listen, e)))?;
    log::info!("web 服务监听于 {}", web.listen);

    axum::serve(listener, router(scanner)).await?;
    Ok(())
}

async fn scan_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AvastReport>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadUpload(e.body_text()))?;
    let data = read_upload(&mut multipart).await?;

    // TempPath 在离开作用域 (包括请求被取消) 时删除文件
    let upload = materialize(&state.web.scratch_dir, data).await?;
    let result = state.scanner.scan(&upload, state.web.scan_timeout).await;
    if let Err(e) = upload.close() {
        log::warn!("删除临时文件失败: {}", e);
    }

    Ok(Json(result?.into()))
}

async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadUpload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        log::debug!("上传文件名: {}", field.file_name().unwrap_or("<none>"));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadUpload(e.body_text()))?;
        return Ok(bytes.to_vec());
    }
    Err(ApiError::BadUpload(format!("缺少字段 {}", UPLOAD_FIELD)))
}

/// 写入临时目录下唯一命名的文件
async fn materialize(dir: &Path, data: Vec<u8>) -> Result<TempPath, ScanError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<TempPath, ScanError> {
        let mut file = tempfile::Builder::new().prefix("web_").tempfile_in(&dir)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(file.into_temp_path())
    })
    .await
    .map_err(|e| ScanError::IOError(format!("写入临时文件失败: {}", e)))?
}
