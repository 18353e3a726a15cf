//! # 事件通道模块
//!
//! 核心引擎自身不写任何日志，而是把请求生命周期中的关键节点作为结构化事件
//! 发往一条 mpsc 通道，由外部的 CLI/日志层消费。单个请求的事件顺序固定：
//! `Request` → `SymbolicLink`(零或多次) → `Response` → `MimetypeNotFound`(至多一次)。
//! 并发请求之间的事件顺序不作保证。

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::param::HttpRequestMethod;

/// 请求生命周期事件。
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// 收到请求，解析完成后、任何路径解析工作之前发出。
    Request {
        id: u128,
        method: HttpRequestMethod,
        path: String,
    },
    /// 路径解析过程中跟随了一个符号链接（仅在允许跟随时发出）。
    SymbolicLink {
        id: u128,
        link: PathBuf,
        target: PathBuf,
    },
    /// 请求的终态。响应头与响应体写出之后发出，每个请求恰好一次。
    Response {
        id: u128,
        method: HttpRequestMethod,
        path: String,
        status: u16,
        error: Option<String>,
        file: Option<PathBuf>,
        size: Option<u64>,
        elapsed: Duration,
    },
    /// 命中了 MIME 表中不存在的文件后缀，Content-Type 已兜底为二进制流。
    MimetypeNotFound { id: u128, extension: String },
}

/// 事件发送端的轻量包装。
///
/// 克隆成本低廉，可随连接任务自由复制。未挂接消费者或消费者提前退出时，
/// 事件被静默丢弃，绝不反压请求处理路径。
#[derive(Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<ServerEvent>>,
}

impl EventSink {
    /// 构造一对相互连接的发送端与接收端。
    pub fn channel() -> (Self, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// 构造一个不连接任何消费者的发送端，事件直接丢弃。
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.tx {
            // 接收端关闭属于正常情况（日志层先于服务器退出）
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_receive() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(ServerEvent::Request {
            id: 1,
            method: HttpRequestMethod::Get,
            path: "/a.txt".to_string(),
        });

        match rx.try_recv() {
            Ok(ServerEvent::Request { id, method, path }) => {
                assert_eq!(id, 1);
                assert_eq!(method, HttpRequestMethod::Get);
                assert_eq!(path, "/a.txt");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_disconnected_sink_drops_silently() {
        let sink = EventSink::disconnected();
        sink.emit(ServerEvent::MimetypeNotFound {
            id: 0,
            extension: "xyz".to_string(),
        });
    }

    #[test]
    fn test_closed_receiver_drops_silently() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(ServerEvent::Request {
            id: 2,
            method: HttpRequestMethod::Head,
            path: "/".to_string(),
        });
    }
}
