use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// 一个文件的缓存校验器：实体标签与最后修改时间。
///
/// 每次请求都从实时文件元数据重新计算，绝不跨请求持久化，
/// 因此外部修改文件后下一个请求立即看到新的校验器。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValidators {
    etag: String,
    last_modified: DateTime<Utc>,
}

impl CacheValidators {
    /// 从文件元数据计算校验器。
    ///
    /// ETag 取 `(大小, 修改秒)` 的十六进制指纹，不做任何散列。
    /// Last-Modified 截断到秒（HTTP 日期的精度上限）。
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
        let secs = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let truncated: SystemTime = UNIX_EPOCH + Duration::from_secs(secs);
        Self {
            etag: format!("\"{:x}-{:x}\"", metadata.len(), secs),
            last_modified: DateTime::<Utc>::from(truncated),
        }
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// `Last-Modified` 头的字符串形态
    pub fn last_modified_http(&self) -> String {
        self.last_modified.to_rfc2822()
    }
}

/// 条件缓存决策结果
#[derive(Debug)]
pub struct CacheDecision {
    /// true 表示客户端缓存仍然新鲜，应答 304 且不携带响应体
    pub not_modified: bool,
    /// 关闭缓存时为 None，此时响应不携带任何缓存头
    pub validators: Option<CacheValidators>,
}

/// 条件缓存评估器。这是一个可选特性：关闭时所有请求一律按 200 处理。
pub struct ConditionalCache {
    enabled: bool,
}

impl ConditionalCache {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// 根据请求携带的条件标头与文件实时元数据判定 200 / 304。
    ///
    /// `If-None-Match` 是强校验器，存在时优先于 `If-Modified-Since`：
    /// 标签不匹配则即便日期新鲜也必须返回完整响应。
    pub fn evaluate(
        &self,
        if_none_match: Option<&str>,
        if_modified_since: Option<&str>,
        metadata: &Metadata,
    ) -> CacheDecision {
        if !self.enabled {
            return CacheDecision {
                not_modified: false,
                validators: None,
            };
        }

        let validators = CacheValidators::from_metadata(metadata);

        let not_modified = match if_none_match {
            Some(tag) => tag.trim() == validators.etag(),
            None => match if_modified_since {
                Some(since) => match DateTime::parse_from_rfc2822(since) {
                    Ok(t) => t.with_timezone(&Utc) >= validators.last_modified(),
                    // 无法解析的日期视为无条件请求
                    Err(_) => false,
                },
                None => false,
            },
        };

        CacheDecision {
            not_modified,
            validators: Some(validators),
        }
    }
}
