
pub mod config;
pub mod error;
pub mod logging;
pub mod parser;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scanner;
pub mod service;
pub mod sink;

pub use self::config::{Config, Settings};
pub use self::error::ScanError;
pub use self::report::{AvastReport, ScanRequest, ScanResult};
pub use self::scanner::Scanner;
pub use self::sink::Dispatcher;
