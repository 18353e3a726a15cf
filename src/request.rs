// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节码解析为强类型的 `Request` 结构体。
//! 它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、版本）。
//! 2. 条件缓存标头（`If-None-Match` / `If-Modified-Since`）的提取。
//! 3. 跨域标头（`Origin`）与客户端标识（`User-Agent`）的提取。

use crate::{exception::Exception, param::*};
use log::error;

/// 表示一个完整的 HTTP 请求元数据。
///
/// 该结构体不包含请求体（Body）部分：静态文件服务只消费请求头。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, HEAD 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（原始形态，未经百分号解码）
    path: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 客户端标识字符串
    user_agent: String,
    /// 跨域请求的来源（`Origin` 标头）
    origin: Option<String>,
    /// 条件缓存：客户端持有的实体标签
    if_none_match: Option<String>,
    /// 条件缓存：客户端持有的最后修改时间（原始字符串，由缓存组件解析）
    if_modified_since: Option<String>,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求数据是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、路径和协议版本。
    /// 3. 迭代解析标头：识别 `User-Agent`, `Origin`, `If-None-Match`,
    ///    `If-Modified-Since` 等字段。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    ///
    /// # 错误处理
    /// 如果请求格式不符合 HTTP 规范或使用了无法识别的方法/版本，将返回相应的 `Exception`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 1. 将字节流转换为字符串，失败则判定为非法的 HTTP 请求
        let request_string = match String::from_utf8(buffer.to_vec()) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let request_lines: Vec<&str> = request_string.split(CRLF).collect();

        // 2. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::BadRequestLine);
        }

        // 解析方法名
        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "DELETE" => HttpRequestMethod::Delete,
            _ => {
                error!("[ID{}]无法识别的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnsupportedRequestMethod);
            }
        };

        // 解析协议版本
        let version_str = first_line_parts.last().unwrap().to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 解析路径（考虑到路径中可能包含空格的情况，虽然不规范但通过 join 尝试恢复）
        let path = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };

        // 3. 迭代各行解析 Headers
        let mut user_agent = "".to_string();
        let mut origin = None;
        let mut if_none_match = None;
        let mut if_modified_since = None;
        for line in &request_lines[1..] {
            let line_lower = line.to_lowercase();
            if line_lower.starts_with("user-agent:") {
                if let Some(val) = line.split(": ").nth(1) {
                    user_agent = val.to_string();
                }
            } else if line_lower.starts_with("origin:") {
                if let Some(val) = line.split(": ").nth(1) {
                    origin = Some(val.to_string());
                }
            } else if line_lower.starts_with("if-none-match:") {
                if let Some(val) = line.split(": ").nth(1) {
                    if_none_match = Some(val.to_string());
                }
            } else if line_lower.starts_with("if-modified-since:") {
                if let Some(val) = line.split(": ").nth(1) {
                    if_modified_since = Some(val.to_string());
                }
            }
        }

        Ok(Self {
            method,
            path,
            version,
            user_agent,
            origin,
            if_none_match,
            if_modified_since,
        })
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径（原始形态）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 获取跨域请求来源
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// 获取客户端持有的实体标签
    pub fn if_none_match(&self) -> Option<&str> {
        self.if_none_match.as_deref()
    }

    /// 获取客户端持有的最后修改时间
    pub fn if_modified_since(&self) -> Option<&str> {
        self.if_modified_since.as_deref()
    }
}
