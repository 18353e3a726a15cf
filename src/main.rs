// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 异步静态文件服务器
//!
//! 该模块实现了基于 Tokio 运行时的静态文件服务器命令行入口。
//! 核心功能包括：
//! - 请求路径到文件系统的安全映射（越权守卫与符号链接策略）
//! - 条件缓存（ETag / Last-Modified，HTTP 304）
//! - 可配置的 CORS 放行策略
//! - 目录索引文件与自定义 404 模板
//! - HTTP 与 HTTPS（rustls）监听
//!
//! 核心引擎自身不写日志：本入口订阅引擎的事件通道，把请求生命周期
//! 渲染为日志行，并提供交互式管理控制台（stop/status/help）。

mod cache;      // 条件缓存校验器
mod config;     // 配置解析与管理
mod cors;       // CORS 决策
mod engine;     // 请求编排引擎
mod event;      // 生命周期事件通道
mod exception;  // 自定义异常与错误处理
mod param;      // 全局常量与静态参数
mod request;    // HTTP 请求报文解析器
mod resolve;    // 路径解析与越权守卫
mod response;   // HTTP 响应报文构建器
mod server;     // 监听套接字与生命周期
mod util;       // 通用工具函数

use config::Config;
use event::{EventSink, ServerEvent};
use server::StaticServer;
use util::format_file_size;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
    sync::mpsc::UnboundedReceiver,
};

use crate::param::STATUS_CODES;

/// # 程序入口点
///
/// 初始化日志系统、加载配置并启动主事件循环。
fn main() {
    // 1. 初始化日志系统：采用 log4rs 日志架构，通过外部 YAML 灵活配置级别与输出目的地
    log4rs::init_file("config/log4rs.yaml", Default::default()).unwrap();

    // 2. 环境配置加载：从 TOML 文件读取运行参数，TLS 材料路径来自环境变量
    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入");
    info!("服务根目录: {}", config.root());

    // 3. 异步运行时定制：根据配置文件动态分配工作线程数
    let worker_threads = config.worker_threads();
    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(run(config));
}

async fn run(config: Config) {
    let protocol = if config.https() { "https" } else { "http" };
    let port = config.port();

    // 4. 事件通道：核心引擎只发结构化事件，由下面的消费任务渲染日志
    let (sink, receiver) = EventSink::channel();
    tokio::spawn(consume_events(receiver));

    // 5. 启动服务器。配置与绑定错误均为致命错误
    let mut server = StaticServer::new(config, sink);
    if let Err(e) = server.start().await {
        error!("服务器启动失败：{}", e);
        panic!("服务器启动失败：{}", e);
    }
    let addr = server.local_addr().unwrap();
    info!("服务器已启动：{}://{}", protocol, addr);
    if addr.port() != port {
        debug!("配置端口{}由内核改写为{}", port, addr.port());
    }

    // 6. 交互式管理控制台：stop / status / help；Ctrl-C 等价于 stop
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut input = String::new();
    loop {
        input.clear();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到中断信号，开始优雅停机...");
                break;
            }
            line = reader.read_line(&mut input) => {
                match line {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                match input.trim() {
                    "stop" => {
                        println!("停机指令已激活，等待在途请求处理完毕...");
                        break;
                    }
                    "help" => {
                        println!("== staticserver Help ==");
                        println!("stop   - 发出停机信号");
                        println!("status - 查看当前服务器运行状态");
                        println!("help   - 显示此帮助信息");
                        println!("=======================");
                    }
                    "status" => {
                        println!("== staticserver 状态 ==");
                        println!("监听地址: {}://{}", protocol, addr);
                        println!("当前活跃连接数: {}", server.active_connections());
                        println!("=======================");
                    }
                    other => {
                        println!("无效的命令：{}", other);
                    }
                }
            }
        }
    }

    server.stop().await;
    info!("服务器已停止");
}

/// # 事件消费任务
///
/// 把引擎的生命周期事件渲染为日志行。箭头风格：`<--` 表示请求进入，
/// `-->` 表示响应写出，`---` 表示解析过程中跟随了符号链接。
async fn consume_events(mut receiver: UnboundedReceiver<ServerEvent>) {
    while let Some(event) = receiver.recv().await {
        match event {
            ServerEvent::Request { id, method, path } => {
                debug!("[ID{}] <-- [{}] {}", id, method, path);
            }
            ServerEvent::SymbolicLink { id, link, target } => {
                debug!(
                    "[ID{}] --- \"{}\" > \"{}\"",
                    id,
                    link.display(),
                    target.display()
                );
            }
            ServerEvent::Response {
                id,
                method,
                path,
                status,
                error,
                file,
                size,
                elapsed,
            } => {
                let phrase = STATUS_CODES.get(&status).unwrap_or(&"");
                if status >= 400 {
                    warn!(
                        "[ID{}] --> [{}] {} {} {} ({:?})",
                        id, method, status, phrase, path, elapsed
                    );
                } else if let Some(file) = file {
                    info!(
                        "[ID{}] --> [{}] {} {} {} ({}) ({:?})",
                        id,
                        method,
                        status,
                        phrase,
                        path,
                        format_file_size(size.unwrap_or(0)),
                        elapsed
                    );
                    debug!("[ID{}] 实际提供文件: {}", id, file.display());
                } else {
                    info!(
                        "[ID{}] --> [{}] {} {} {} ({:?})",
                        id, method, status, phrase, path, elapsed
                    );
                }
                if let Some(error) = error {
                    error!("[ID{}] ERROR :: {}", id, error);
                }
            }
            ServerEvent::MimetypeNotFound { id, extension } => {
                error!("[ID{}] !!! 未在MIME表中找到后缀：{}", id, extension);
            }
        }
    }
}
