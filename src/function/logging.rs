// logging.rs
use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

pub struct LogConfig {
    pub level: LevelFilter,
    /// 是否输出模块路径
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            module_path: false,
        }
    }
}

impl LogConfig {
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::Debug,
            module_path: true,
        }
    }

    pub fn from_flag(verbose: bool) -> Self {
        if verbose { Self::verbose() } else { Self::default() }
    }
}

/// 初始化日志, 输出到 stderr, 以免污染 stdout 上的 JSON
pub fn init_logging(config: LogConfig) {
    let mut builder = Builder::new();
    builder.filter_level(config.level);
    builder.target(env_logger::Target::Stderr);

    builder.format(move |buf, record| {
        let mut line = format!("{} [{}] ", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level());
        if config.module_path {
            if let Some(path) = record.module_path() {
                line.push_str(path);
                line.push_str(": ");
            }
        }
        writeln!(buf, "{}{}", line, record.args())
    });

    // 测试里可能重复初始化
    if builder.try_init().is_err() {
        log::debug!("日志已初始化");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_info() {
        let config = LogConfig::default();
        assert_eq!(config.level, LevelFilter::Info);
        assert!(!config.module_path);
    }

    #[test]
    fn verbose_flag_enables_debug() {
        let config = LogConfig::from_flag(true);
        assert_eq!(config.level, LevelFilter::Debug);
        assert!(config.module_path);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LogConfig::default());
        init_logging(LogConfig::verbose());
    }
}
