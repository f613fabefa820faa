// sink.rs
// 结果投递: stdout (JSON/表格), Elasticsearch, webhook; 各自独立, 互不影响
use super::config::{Config, PLUGIN_CATEGORY, PLUGIN_NAME};
use super::report::{markdown_table, AvastReport, PluginResults};
use super::{ScanError, ScanResult};
use reqwest::Client;
use serde_json::json;
use std::io::Write;
use std::time::Duration;

pub const SINK_STDOUT: &str = "stdout";
pub const SINK_DATABASE: &str = "elasticsearch";
pub const SINK_WEBHOOK: &str = "webhook";

/// webhook 里携带关联 ID 的请求头
pub const SCAN_ID_HEADER: &str = "X-Malice-ID";

const SINK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendering {
    Json,
    Table,
}

/// 需要投递到哪些目的地
#[derive(Debug, Clone, Default)]
pub struct SinkSelection {
    pub rendering: Option<Rendering>,
    pub elasticsearch: Option<String>,
    pub webhook: Option<String>,
    pub proxy: Option<String>,
}

impl SinkSelection {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rendering: Some(if config.table { Rendering::Table } else { Rendering::Json }),
            elasticsearch: (!config.no_store).then(|| config.elasticsearch.clone()),
            webhook: if config.callback { config.endpoint.clone() } else { None },
            proxy: config.active_proxy().map(str::to_string),
        }
    }
}

#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub result: Result<String, ScanError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<SinkOutcome>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &SinkOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn failed(&self, sink: &str) -> bool {
        self.failures().any(|o| o.sink == sink)
    }

    pub fn get(&self, sink: &str) -> Option<&SinkOutcome> {
        self.outcomes.iter().find(|o| o.sink == sink)
    }
}

pub struct Dispatcher {
    selection: SinkSelection,
    /// Elasticsearch 直连, 不走代理
    database_client: Client,
    webhook_client: Client,
}

impl Dispatcher {
    pub fn new(selection: SinkSelection) -> Result<Self, ScanError> {
        let database_client = build_client(None)?;
        let webhook_client = build_client(selection.proxy.as_deref())?;
        Ok(Self {
            selection,
            database_client,
            webhook_client,
        })
    }

    /// 把一次扫描结果投递到所有选中的目的地
    pub async fn deliver<W: Write>(
        &self,
        scan_id: &str,
        result: &ScanResult,
        out: &mut W,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        if let Some(rendering) = self.selection.rendering {
            report.outcomes.push(SinkOutcome {
                sink: SINK_STDOUT,
                result: render(rendering, result, out),
            });
        }

        let database = async {
            match &self.selection.elasticsearch {
                Some(url) => Some(self.store(url, scan_id, result).await),
                None => None,
            }
        };
        let webhook = async {
            match &self.selection.webhook {
                Some(url) => Some(self.post_webhook(url, scan_id, result).await),
                None => None,
            }
        };
        let (database, webhook) = futures::join!(database, webhook);

        if let Some(result) = database {
            report.outcomes.push(SinkOutcome { sink: SINK_DATABASE, result });
        }
        if let Some(result) = webhook {
            report.outcomes.push(SinkOutcome { sink: SINK_WEBHOOK, result });
        }

        for outcome in report.failures() {
            if let Err(e) = &outcome.result {
                log::error!("{}", e);
            }
        }

        report
    }

    /// 以关联 ID 为主键 upsert 到 Elasticsearch
    async fn store(&self, base: &str, scan_id: &str, result: &ScanResult) -> Result<String, ScanError> {
        let url = format!("{}/malice/_update/{}", base.trim_end_matches('/'), scan_id);
        let doc = upsert_document(&PluginResults::new(scan_id, result.clone()));

        let response = self
            .database_client
            .post(&url)
            .json(&doc)
            .send()
            .await
            .map_err(|e| ScanError::sink(SINK_DATABASE, ScanError::from(e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::sink(SINK_DATABASE, ScanError::from(e)))?;
        if !status.is_success() {
            return Err(ScanError::sink(SINK_DATABASE, format!("状态 {}: {}", status, body)));
        }

        log::debug!("已写入 Elasticsearch: {}", scan_id);
        Ok(body)
    }

    /// POST 到 webhook; 响应体只做记录, 不校验
    async fn post_webhook(&self, url: &str, scan_id: &str, result: &ScanResult) -> Result<String, ScanError> {
        let response = self
            .webhook_client
            .post(url)
            .header(SCAN_ID_HEADER, scan_id)
            .json(&AvastReport::from(result.clone()))
            .send()
            .await
            .map_err(|e| ScanError::sink(SINK_WEBHOOK, ScanError::from(e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        log::info!("webhook 响应 {}: {}", status, body);
        Ok(body)
    }
}

/// 部分更新文档, 结果挂在 plugins.<分类>.<插件名> 下
pub fn upsert_document(results: &PluginResults) -> serde_json::Value {
    json!({
        "doc": {
            "id": results.id,
            "plugins": {
                (PLUGIN_CATEGORY): {
                    (PLUGIN_NAME): results.data,
                }
            }
        },
        "doc_as_upsert": true,
    })
}

fn render<W: Write>(rendering: Rendering, result: &ScanResult, out: &mut W) -> Result<String, ScanError> {
    let text = match rendering {
        Rendering::Json => serde_json::to_string(&AvastReport::from(result.clone()))?,
        Rendering::Table => markdown_table(result),
    };
    writeln!(out, "{}", text.trim_end()).map_err(|e| ScanError::sink(SINK_STDOUT, e))?;
    Ok(text)
}

fn build_client(proxy: Option<&str>) -> Result<Client, ScanError> {
    let mut client_builder = Client::builder().timeout(SINK_TIMEOUT);

    // 配置代理
    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ScanError::InvalidConfig(format!("代理配置错误: {}", e)))?;
        client_builder = client_builder.proxy(proxy);
    }

    let client = client_builder
        .build()
        .map_err(|e| ScanError::ClientError(format!("创建HTTP客户端失败: {}", e)))?;

    Ok(client)
}
