use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

/// TLS 私钥文件路径的环境变量名
pub const ENV_TLS_KEY: &str = "STATIC_SERVER_KEY";
/// TLS 证书文件路径的环境变量名
pub const ENV_TLS_CERT: &str = "STATIC_SERVER_CERT";

/// 服务器不可变配置。启动时构建一次，此后只读共享。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    root: String,
    port: u16,
    worker_threads: usize,
    local: bool,
    #[serde(default = "default_index_filename")]
    index_filename: String,
    #[serde(default)]
    not_found_filename: Option<String>,
    #[serde(default)]
    follow_symlinks: bool,
    #[serde(default)]
    cors_pattern: Option<String>,
    #[serde(default)]
    cache_enabled: bool,
    #[serde(default)]
    https: bool,
    #[serde(default = "default_streaming_threshold")]
    streaming_threshold: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(skip)]
    tls_key_path: Option<String>,
    #[serde(skip)]
    tls_cert_path: Option<String>,
}

fn default_index_filename() -> String {
    "index.html".to_string()
}

fn default_streaming_threshold() -> u64 {
    10485760 // 10MB
}

fn default_chunk_size() -> usize {
    262144 // 256KB
}

impl Config {
    pub fn new() -> Self {
        Self {
            root: ".".to_string(),
            port: 9080,
            worker_threads: 0,
            local: true,
            index_filename: default_index_filename(),
            not_found_filename: None,
            follow_symlinks: false,
            cors_pattern: None,
            cache_enabled: false,
            https: false,
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            tls_key_path: None,
            tls_cert_path: None,
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => panic!("no such file {} exception:{}", filename, e),
        };
        let mut str_val = String::new();
        match file.read_to_string(&mut str_val) {
            Ok(s) => s,
            Err(e) => panic!("Error Reading file: {}", e),
        };

        let mut raw_config: Config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(_) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置");
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.index_filename.is_empty() {
            warn!("index_filename被设置为空字符串，将回退为index.html");
            raw_config.index_filename = default_index_filename();
        }
        // 密钥与证书材料不写入配置文件，从环境变量读取路径
        raw_config.tls_key_path = std::env::var(ENV_TLS_KEY).ok();
        raw_config.tls_cert_path = std::env::var(ENV_TLS_CERT).ok();
        raw_config
    }

    /// 覆写根目录。供测试和命令行层在运行时指定服务目录。
    pub fn with_root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_index_filename(mut self, filename: &str) -> Self {
        self.index_filename = filename.to_string();
        self
    }

    pub fn with_not_found_filename(mut self, filename: Option<&str>) -> Self {
        self.not_found_filename = filename.map(|s| s.to_string());
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn with_cors_pattern(mut self, pattern: Option<&str>) -> Self {
        self.cors_pattern = pattern.map(|s| s.to_string());
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_streaming_threshold(mut self, threshold: u64) -> Self {
        self.streaming_threshold = threshold;
        self
    }

    pub fn with_https(mut self, https: bool, key_path: Option<&str>, cert_path: Option<&str>) -> Self {
        self.https = https;
        self.tls_key_path = key_path.map(|s| s.to_string());
        self.tls_cert_path = cert_path.map(|s| s.to_string());
        self
    }
}

impl Config {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn index_filename(&self) -> &str {
        &self.index_filename
    }

    pub fn not_found_filename(&self) -> Option<&str> {
        self.not_found_filename.as_deref()
    }

    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    pub fn cors_pattern(&self) -> Option<&str> {
        self.cors_pattern.as_deref()
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn https(&self) -> bool {
        self.https
    }

    pub fn streaming_threshold(&self) -> u64 {
        self.streaming_threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn tls_key_path(&self) -> Option<&str> {
        self.tls_key_path.as_deref()
    }

    pub fn tls_cert_path(&self) -> Option<&str> {
        self.tls_cert_path.as_deref()
    }
}
