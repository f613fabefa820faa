// config.rs
use structopt::StructOpt;
use std::path::PathBuf;
use std::time::Duration;
use super::ScanError;

/// 插件名称与分类, 同时用作持久化文档里的键
pub const PLUGIN_NAME: &str = "avast";
pub const PLUGIN_CATEGORY: &str = "av";

#[derive(Debug, StructOpt)]
#[structopt(name = "avast", about = "Malice Avast 杀毒插件", version_short = "v")]
pub struct Config {
    /// 输出调试日志
    #[structopt(short = "V", long)]
    pub verbose: bool,

    /// Elasticsearch 地址, 用于保存扫描结果
    #[structopt(long, env = "MALICE_ELASTICSEARCH", default_value = "http://elasticsearch:9200")]
    pub elasticsearch: String,

    /// 不写入 Elasticsearch
    #[structopt(long)]
    pub no_store: bool,

    /// 以 Markdown 表格输出
    #[structopt(short, long)]
    pub table: bool,

    /// 将结果 POST 回 Malice webhook
    #[structopt(short, long)]
    pub callback: bool,

    /// webhook 地址
    #[structopt(long, env = "MALICE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// webhook 请求走代理
    #[structopt(short = "x", long)]
    pub proxy: bool,

    /// 代理服务器 (例如: http://localhost:8080)
    #[structopt(long, env = "MALICE_PROXY")]
    pub proxy_url: Option<String>,

    /// 扫描超时时间 (秒)
    #[structopt(long, env = "MALICE_TIMEOUT", default_value = "60")]
    pub timeout: u64,

    /// 关联 ID, 缺省为文件的 SHA256
    #[structopt(long, env = "MALICE_SCANID")]
    pub scan_id: Option<String>,

    /// 待扫描文件
    #[structopt(parse(from_os_str))]
    pub file: Option<PathBuf>,

    #[structopt(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// 更新病毒库
    #[structopt(name = "update", alias = "u")]
    Update,

    /// 启动 Avast 扫描 web 服务
    #[structopt(name = "web")]
    Web {
        /// 监听地址
        #[structopt(long, default_value = "0.0.0.0:3993")]
        listen: String,

        /// 上传文件的临时目录
        #[structopt(long, default_value = "/malware", parse(from_os_str))]
        scratch_dir: PathBuf,
    },
}

impl Config {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.timeout == 0 {
            return Err(ScanError::InvalidConfig("超时时间必须大于0。".to_string()));
        }

        // 只有单次扫描会写入 Elasticsearch
        if self.command.is_none() && !self.no_store {
            check_url("elasticsearch", &self.elasticsearch)?;
        }

        // 回调必须有地址
        if self.callback {
            match &self.endpoint {
                Some(endpoint) => check_url("webhook", endpoint)?,
                None => {
                    return Err(ScanError::InvalidConfig(
                        "启用回调时必须设置 MALICE_ENDPOINT。".to_string(),
                    ));
                }
            }
        }

        // 验证代理
        if self.proxy {
            match &self.proxy_url {
                Some(proxy) => check_url("代理", proxy)?,
                None => {
                    return Err(ScanError::InvalidConfig(
                        "启用代理时必须设置 MALICE_PROXY。".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// 实际生效的代理, 只有 `--proxy` 打开时才使用
    pub fn active_proxy(&self) -> Option<&str> {
        if self.proxy { self.proxy_url.as_deref() } else { None }
    }
}

fn check_url(what: &str, url: &str) -> Result<(), ScanError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ScanError::InvalidConfig(format!(
            "{}地址必须以http://或https://开头: {}",
            what, url
        )));
    }
    Ok(())
}

/// 构建信息, 由 build.rs 在编译期写入
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: String,
    pub build_time: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_time: env!("AVAST_BUILD_TIME").to_string(),
        }
    }
}

/// 外部 Avast 工具的位置
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub scan_binary: String,
    pub daemon_script: String,
    pub update_script: String,
    pub updated_marker: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            scan_binary: "scan".to_string(),
            daemon_script: "/etc/init.d/avast".to_string(),
            update_script: "/var/lib/avast/Setup/avast.vpsupdate".to_string(),
            updated_marker: PathBuf::from("/opt/malice/UPDATED"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSettings {
    pub listen: String,
    pub scratch_dir: PathBuf,
    pub scan_timeout: Duration,
    pub body_limit: usize,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3993".to_string(),
            scratch_dir: PathBuf::from("/malware"),
            scan_timeout: Duration::from_secs(60),
            body_limit: 32 << 20,
        }
    }
}

/// 进程启动时构建一次, 之后只读共享
#[derive(Debug, Clone)]
pub struct Settings {
    pub build: BuildInfo,
    pub tools: ToolPaths,
    /// 启动守护进程的固定宽限时间, 与扫描超时无关
    pub daemon_grace: Duration,
    /// 查询引擎/病毒库版本的超时
    pub metadata_timeout: Duration,
    pub update_timeout: Duration,
    pub web: WebSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build: BuildInfo::default(),
            tools: ToolPaths::default(),
            daemon_grace: Duration::from_secs(10),
            metadata_timeout: Duration::from_secs(10),
            update_timeout: Duration::from_secs(600),
            web: WebSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Settings::default();
        if let Some(Command::Web { listen, scratch_dir }) = &config.command {
            settings.web.listen = listen.clone();
            settings.web.scratch_dir = scratch_dir.clone();
        }
        settings
    }
}
