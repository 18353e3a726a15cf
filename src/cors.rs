//! # 跨域资源共享（CORS）决策模块
//!
//! 根据配置的来源模式与请求的 `Origin` 标头决定附加哪些 CORS 响应头。
//! 模式未配置时完全不参与；配置为 `*` 时无条件放行所有来源；
//! 其余情况把模式视为字面量或带单个 `*` 通配段的匹配器，命中时回显请求
//! 的 Origin 值（而非模式本身）并追加 `Vary: Origin`。

use regex::Regex;

enum PatternMode {
    Disabled,
    AllowAll,
    Matcher(Regex),
}

/// CORS 决策器。模式在启动时编译一次，此后只读共享。
pub struct CorsPolicy {
    mode: PatternMode,
}

impl CorsPolicy {
    /// 从配置的来源模式构建决策器。
    ///
    /// 模式先经 `regex::escape` 转义，再把通配段还原为 `.*`，因此编译
    /// 失败在实践中不会发生；万一发生则关闭 CORS 而不是放宽放行范围。
    pub fn from_pattern(pattern: Option<&str>) -> Self {
        let mode = match pattern {
            None => PatternMode::Disabled,
            Some("*") => PatternMode::AllowAll,
            Some(p) => {
                let escaped = regex::escape(p).replace("\\*", ".*");
                match Regex::new(&format!("^{}$", escaped)) {
                    Ok(re) => PatternMode::Matcher(re),
                    Err(_) => PatternMode::Disabled,
                }
            }
        };
        Self { mode }
    }

    /// 为一个请求计算应附加的 CORS 响应头，可能为空。
    pub fn headers_for(&self, origin: Option<&str>) -> Vec<(&'static str, String)> {
        match &self.mode {
            PatternMode::Disabled => vec![],
            PatternMode::AllowAll => {
                vec![("Access-Control-Allow-Origin", "*".to_string())]
            }
            PatternMode::Matcher(re) => match origin {
                Some(origin) if re.is_match(origin) => vec![
                    ("Access-Control-Allow-Origin", origin.to_string()),
                    ("Vary", "Origin".to_string()),
                ],
                _ => vec![],
            },
        }
    }
}
