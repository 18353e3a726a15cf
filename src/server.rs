// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器生命周期模块
//!
//! 生命周期：Created → Listening → Stopped（终态）。`start` 负责启动前的
//! 全部校验（根目录规范化、TLS 材料检查）、套接字绑定与接收循环的启动；
//! `stop` 通知接收循环退出，并在有限时间内等待在途连接排空。
//!
//! 明文与 TLS 监听共用同一引擎：TLS 仅仅是把接受到的 TCP 流先交给
//! rustls 握手，再交给引擎处理。

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use crate::config::Config;
use crate::engine::RequestEngine;
use crate::event::EventSink;
use crate::exception::Exception;

/// 停机时等待在途连接排空的时间上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Listening,
    Stopped,
}

/// 静态文件服务器：绑定监听套接字并把连接分发给请求引擎。
pub struct StaticServer {
    config: Arc<Config>,
    events: EventSink,
    state: LifecycleState,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    active_connections: Arc<Mutex<u32>>,
}

impl StaticServer {
    pub fn new(config: Config, events: EventSink) -> Self {
        Self {
            config: Arc::new(config),
            events,
            state: LifecycleState::Created,
            local_addr: None,
            shutdown_tx: None,
            accept_task: None,
            active_connections: Arc::new(Mutex::new(0u32)),
        }
    }

    /// 实际监听地址。绑定端口 0 时由内核分配，测试依赖该读取器。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 当前在途连接数
    pub fn active_connections(&self) -> u32 {
        *self.active_connections.lock().unwrap()
    }

    /// 校验配置、绑定套接字并启动接收循环。
    ///
    /// 重复调用是错误；所有致命配置问题都在这里暴露，监听开始之后
    /// 不再出现致命错误。
    pub async fn start(&mut self) -> Result<(), Exception> {
        if self.state != LifecycleState::Created {
            return Err(Exception::AlreadyStarted);
        }

        // 根目录启动时规范化一次，后续所有解析以它为前缀基准
        let root = self.canonical_root()?;

        // TLS 材料在绑定之前检查：缺失属于致命配置错误
        let tls_acceptor = if self.config.https() {
            let key_path = self
                .config
                .tls_key_path()
                .ok_or(Exception::MissingTlsMaterial)?;
            let cert_path = self
                .config
                .tls_cert_path()
                .ok_or(Exception::MissingTlsMaterial)?;
            Some(build_tls_acceptor(key_path, cert_path)?)
        } else {
            None
        };

        let address = match self.config.local() {
            true => Ipv4Addr::new(127, 0, 0, 1),
            false => Ipv4Addr::new(0, 0, 0, 0),
        };
        let socket = SocketAddrV4::new(address, self.config.port());
        let listener = TcpListener::bind(socket)
            .await
            .map_err(Exception::BindFailed)?;
        self.local_addr = Some(listener.local_addr().map_err(Exception::BindFailed)?);

        let engine = Arc::new(RequestEngine::new(
            Arc::clone(&self.config),
            root,
            self.events.clone(),
        ));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        let active_connections = Arc::clone(&self.active_connections);

        let task = tokio::spawn(async move {
            let mut id: u128 = 0;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => {
                        let (stream, _addr) = match accepted {
                            Ok(pair) => pair,
                            Err(_) => continue,
                        };
                        let conn_id = id;
                        let engine = Arc::clone(&engine);
                        let active_connections = Arc::clone(&active_connections);
                        let tls_acceptor = tls_acceptor.clone();
                        tokio::spawn(async move {
                            {
                                let mut lock = active_connections.lock().unwrap();
                                *lock += 1;
                            }
                            match tls_acceptor {
                                Some(acceptor) => {
                                    // 握手失败只丢弃这一条连接
                                    if let Ok(mut tls_stream) = acceptor.accept(stream).await {
                                        engine.handle_connection(&mut tls_stream, conn_id).await;
                                        let _ = tls_stream.shutdown().await;
                                    }
                                }
                                None => {
                                    let mut stream = stream;
                                    engine.handle_connection(&mut stream, conn_id).await;
                                    let _ = stream.shutdown().await;
                                }
                            }
                            {
                                let mut lock = active_connections.lock().unwrap();
                                *lock -= 1;
                            }
                        });
                        id += 1;
                    }
                }
            }
        });
        self.accept_task = Some(task);
        self.state = LifecycleState::Listening;
        Ok(())
    }

    /// 通知接收循环退出并在有限时间内等待在途连接排空。
    pub async fn stop(&mut self) {
        if self.state != LifecycleState::Listening {
            self.state = LifecycleState::Stopped;
            return;
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.active_connections() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.state = LifecycleState::Stopped;
    }

    fn canonical_root(&self) -> Result<PathBuf, Exception> {
        let root = std::fs::canonicalize(self.config.root())
            .map_err(|_| Exception::RootNotFound(self.config.root().to_string()))?;
        if !root.is_dir() {
            return Err(Exception::RootNotFound(self.config.root().to_string()));
        }
        Ok(root)
    }
}

/// 从 PEM 文件装配 rustls 接收器。材料缺失或无法解析均为致命配置错误。
fn build_tls_acceptor(key_path: &str, cert_path: &str) -> Result<TlsAcceptor, Exception> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| Exception::TlsMaterialUnreadable(e.to_string()))?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Exception::TlsMaterialUnreadable(e.to_string()))?;
    if certs.is_empty() {
        return Err(Exception::TlsMaterialUnreadable(
            "no certificate found in PEM file".to_string(),
        ));
    }

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| Exception::TlsMaterialUnreadable(e.to_string()))?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| Exception::TlsMaterialUnreadable(e.to_string()))?
        .ok_or_else(|| {
            Exception::TlsMaterialUnreadable("no private key found in PEM file".to_string())
        })?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Exception::TlsMaterialUnreadable(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
