// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了静态文件服务器在启动和请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：区分致命的配置/监听错误（启动前暴露）与每请求的非致命错误。
//! - **语义映射**：每请求变体对应特定的 HTTP 响应状态码，由引擎完成转化。
//! - **边界约束**：每请求错误只会终结当前连接，绝不会终止服务器进程。

use std::fmt;

/// 服务器启动与请求处理过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回。致命变体只会出现在
/// `ServerLifecycle::start` 之前或其中；其余变体均为每请求错误。
#[derive(Debug)]
pub enum Exception {
    /// 配置的根目录不存在或无法规范化。致命，启动前暴露。
    RootNotFound(String),
    /// 启用 HTTPS 时缺少密钥或证书材料。致命，启动前暴露。
    MissingTlsMaterial,
    /// 密钥或证书文件存在但无法解析为有效的 PEM 材料。致命，启动前暴露。
    TlsMaterialUnreadable(String),
    /// 监听套接字绑定失败（端口被占用、权限不足等）。致命。
    BindFailed(std::io::Error),
    /// `start` 被重复调用。生命周期为 Created → Listening → Stopped，不可回绕。
    AlreadyStarted,
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行缺少方法、路径或版本字段，无法继续解析。
    BadRequestLine,
    /// 客户端使用了无法识别的 HTTP 方法。
    UnsupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求头部超过了读取上限，拒绝继续接收。
    RequestHeadTooLarge,
}

use Exception::*;

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
///
/// 这些描述信息用于系统日志以及 `Response` 事件的 error 字段。
impl fmt::Display for Exception {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootNotFound(path) => write!(f, "Root path {} does not exist", path),
            MissingTlsMaterial => write!(
                f,
                "HTTPS requested but key/cert material is missing (set STATIC_SERVER_KEY and STATIC_SERVER_CERT)"
            ),
            TlsMaterialUnreadable(detail) => write!(f, "Unreadable TLS material: {}", detail),
            BindFailed(e) => write!(f, "Failed to bind listening socket: {}", e),
            AlreadyStarted => write!(f, "Server was already started"),
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            BadRequestLine => write!(f, "Malformed request line"),
            UnsupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            RequestHeadTooLarge => write!(f, "Request head exceeds size limit"),
        }
    }
}
