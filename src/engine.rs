// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求引擎模块
//!
//! 引擎负责单个连接的完整生命周期：读取并解析请求、调用路径解析器、
//! 评估条件缓存、附加 CORS 头、写出响应（整块或流式），并按固定顺序
//! 发出生命周期事件。引擎自身不写日志，观测全部走事件通道。
//!
//! ## 失败语义
//! - 每请求错误只影响当前连接，绝不终止服务器进程。
//! - 响应头一旦写出，Content-Length 便已承诺：之后磁盘读取失败或文件
//!   中途变短时直接放弃连接，绝不发送与声明长度不符的数据。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::fs::File as TokioFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cache::{CacheDecision, ConditionalCache};
use crate::config::Config;
use crate::cors::CorsPolicy;
use crate::event::{EventSink, ServerEvent};
use crate::exception::Exception;
use crate::param::*;
use crate::request::Request;
use crate::resolve::{PathResolver, ResolvedTarget};
use crate::response::Response;

/// 每请求的瞬态上下文。由处理协程独占，响应结束即销毁。
struct RequestContext {
    id: u128,
    method: HttpRequestMethod,
    path: String,
    start: Instant,
}

/// 请求处理的终态，用于装配 `Response` 事件。
struct RequestOutcome {
    status: u16,
    error: Option<String>,
    file: Option<PathBuf>,
    size: Option<u64>,
    /// MIME 表中查不到的后缀（事件延迟到 `Response` 之后发出）
    missing_ext: Option<String>,
}

impl RequestOutcome {
    fn plain(status: u16) -> Self {
        Self {
            status,
            error: None,
            file: None,
            size: None,
            missing_ext: None,
        }
    }
}

/// 请求编排器：持有解析器、条件缓存、CORS 决策器与事件发送端。
pub struct RequestEngine {
    config: Arc<Config>,
    resolver: PathResolver,
    conditional: ConditionalCache,
    cors: CorsPolicy,
    events: EventSink,
}

impl RequestEngine {
    /// `root_canonical` 必须是启动时规范化过的根目录（见 `ServerLifecycle`）。
    pub fn new(config: Arc<Config>, root_canonical: PathBuf, events: EventSink) -> Self {
        let resolver = PathResolver::new(
            root_canonical,
            config.index_filename(),
            config.follow_symlinks(),
        );
        let conditional = ConditionalCache::new(config.cache_enabled());
        let cors = CorsPolicy::from_pattern(config.cors_pattern());
        Self {
            config,
            resolver,
            conditional,
            cors,
            events,
        }
    }

    /// 处理一条已建立的连接上的单个请求。
    pub async fn handle_connection<S>(&self, stream: &mut S, id: u128)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = Instant::now();

        // 1. 读取请求头部（到空行为止，带长度上限）
        let head = match read_request_head(stream).await {
            Ok(Some(head)) => head,
            // 对端在发出完整请求前关闭了连接
            Ok(None) => return,
            Err(_) => {
                let response = Response::from_status_code(400);
                let _ = stream.write_all(&response.as_bytes()).await;
                return;
            }
        };

        // 2. 协议解析。失败时没有可归属的请求，不发事件，直接应答
        let request = match Request::try_from(&head, id) {
            Ok(request) => request,
            Err(e) => {
                let code = match e {
                    Exception::UnsupportedRequestMethod => 405,
                    _ => 400,
                };
                let response = Response::from_status_code(code);
                let _ = stream.write_all(&response.as_bytes()).await;
                return;
            }
        };

        let context = RequestContext {
            id,
            method: request.method(),
            path: request.path().to_string(),
            start,
        };

        // 3. 接收事件：任何解析工作开始之前发出
        self.events.emit(ServerEvent::Request {
            id: context.id,
            method: context.method,
            path: context.path.clone(),
        });

        let headonly = context.method == HttpRequestMethod::Head;

        // 4. 方法过滤：只有 GET/HEAD 提供服务
        let outcome = if !ALLOWED_METHODS.contains(&context.method) {
            self.send_builtin(stream, 405, headonly).await
        } else {
            match self.resolver.resolve(request.path(), id, &self.events) {
                ResolvedTarget::Forbidden => self.send_builtin(stream, 403, headonly).await,
                ResolvedTarget::NotFound | ResolvedTarget::Directory(_) => {
                    self.send_not_found(stream, &request, id, headonly).await
                }
                ResolvedTarget::File { path, metadata } => {
                    self.send_file(stream, &request, path, metadata, 200, true, headonly)
                        .await
                }
            }
        };

        // 5. 终态事件，每请求恰好一次
        self.events.emit(ServerEvent::Response {
            id: context.id,
            method: context.method,
            path: context.path.clone(),
            status: outcome.status,
            error: outcome.error,
            file: outcome.file,
            size: outcome.size,
            elapsed: context.start.elapsed(),
        });
        if let Some(extension) = outcome.missing_ext {
            self.events.emit(ServerEvent::MimetypeNotFound {
                id: context.id,
                extension,
            });
        }
    }

    /// 写出内置错误页（403/404/405/500）。
    async fn send_builtin<S>(&self, stream: &mut S, code: u16, headonly: bool) -> RequestOutcome
    where
        S: AsyncWrite + Unpin,
    {
        let mut response = Response::from_status_code(code);
        response.set_date();
        if headonly {
            response.drop_content();
        }
        let mut outcome = RequestOutcome::plain(code);
        if let Err(e) = stream.write_all(&response.as_bytes()).await {
            outcome.error = Some(e.to_string());
        }
        outcome
    }

    /// 未找到目标：优先尝试配置的 404 模板，其自身解析失败则回退内置页面。
    async fn send_not_found<S>(
        &self,
        stream: &mut S,
        request: &Request,
        id: u128,
        headonly: bool,
    ) -> RequestOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(template) = self.config.not_found_filename() {
            let template_path = format!("/{}", template);
            if let ResolvedTarget::File { path, metadata } =
                self.resolver.resolve(&template_path, id, &self.events)
            {
                // 模板按 404 状态发送，不参与条件缓存
                return self
                    .send_file(stream, request, path, metadata, 404, false, headonly)
                    .await;
            }
        }
        self.send_builtin(stream, 404, headonly).await
    }

    /// 发送一个已解析的常规文件。
    ///
    /// `use_conditional` 控制是否参与条件缓存评估（404 模板不参与）。
    async fn send_file<S>(
        &self,
        stream: &mut S,
        request: &Request,
        path: PathBuf,
        metadata: std::fs::Metadata,
        status: u16,
        use_conditional: bool,
        headonly: bool,
    ) -> RequestOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let file_size = metadata.len();

        // MIME 查询。表中缺失的后缀兜底为二进制流并记录待发事件
        let (mime, missing_ext) = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => match mime_for(ext) {
                Some(m) => (m, None),
                None => ("application/octet-stream", Some(ext.to_string())),
            },
            None => ("application/octet-stream", None),
        };

        let decision = if use_conditional {
            self.conditional.evaluate(
                request.if_none_match(),
                request.if_modified_since(),
                &metadata,
            )
        } else {
            CacheDecision {
                not_modified: false,
                validators: None,
            }
        };

        let mut response = Response::new();
        response
            .set_date()
            .set_code(status)
            .set_content_type(mime)
            .set_content_length(file_size)
            .set_cors_headers(self.cors.headers_for(request.origin()));
        if let Some(validators) = &decision.validators {
            response.set_validators(validators.etag(), &validators.last_modified_http());
        }

        let mut outcome = RequestOutcome {
            status,
            error: None,
            file: Some(path.clone()),
            size: Some(file_size),
            missing_ext,
        };

        // 客户端缓存仍然新鲜：只写头部
        if decision.not_modified {
            response.set_code(304);
            outcome.status = 304;
            if let Err(e) = stream.write_all(&response.as_bytes()).await {
                outcome.error = Some(e.to_string());
            }
            return outcome;
        }

        // HEAD：与 GET 相同的头部，永不写响应体
        if headonly {
            if let Err(e) = stream.write_all(&response.as_bytes()).await {
                outcome.error = Some(e.to_string());
            }
            return outcome;
        }

        if file_size > self.config.streaming_threshold() {
            // --- 流式传输 ---
            // 先打开文件再承诺头部，避免打开失败时框架已不可挽回
            let mut file = match TokioFile::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    outcome.status = 500;
                    outcome.error = Some(e.to_string());
                    let response = Response::from_status_code(500);
                    let _ = stream.write_all(&response.as_bytes()).await;
                    return outcome;
                }
            };
            if let Err(e) = stream.write_all(&response.as_bytes()).await {
                outcome.error = Some(e.to_string());
                return outcome;
            }
            let mut buffer = vec![0u8; self.config.chunk_size()];
            let mut total_sent: u64 = 0;
            loop {
                match file.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = stream.write_all(&buffer[..n]).await {
                            // 对端中途离开：放弃传输，连接随任务结束关闭
                            outcome.error = Some(e.to_string());
                            return outcome;
                        }
                        total_sent += n as u64;
                    }
                    Err(e) => {
                        // 磁盘读取失败：头部已承诺，只能放弃连接
                        outcome.status = 500;
                        outcome.error = Some(e.to_string());
                        return outcome;
                    }
                }
            }
            if total_sent != file_size {
                // 文件在传输过程中被截短，声明长度已无法兑现
                outcome.status = 500;
                outcome.error = Some(format!(
                    "file truncated during transfer: sent {} of {} bytes",
                    total_sent, file_size
                ));
                return outcome;
            }
            let _ = stream.flush().await;
        } else {
            // --- 整块传输 ---
            let contents = match tokio::fs::read(&path).await {
                Ok(c) => c,
                Err(e) => {
                    outcome.status = 500;
                    outcome.error = Some(e.to_string());
                    let response = Response::from_status_code(500);
                    let _ = stream.write_all(&response.as_bytes()).await;
                    return outcome;
                }
            };
            // Content-Length 以实际读到的字节数为准
            response.set_content_length(contents.len() as u64);
            outcome.size = Some(contents.len() as u64);
            response.set_content(bytes::Bytes::from(contents));
            if let Err(e) = stream.write_all(&response.as_bytes()).await {
                outcome.error = Some(e.to_string());
                return outcome;
            }
            let _ = stream.flush().await;
        }

        outcome
    }
}

/// 读取请求头部直至空行。返回 `Ok(None)` 表示对端提前关闭。
async fn read_request_head<S>(stream: &mut S) -> Result<Option<Vec<u8>>, Exception>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    let mut buffer = vec![0u8; 1024];
    loop {
        let n = match stream.read(&mut buffer).await {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(_) => return Ok(None),
        };
        head.extend_from_slice(&buffer[..n]);
        if let Some(pos) = head.windows(4).position(|w| w == b"\r\n\r\n") {
            head.truncate(pos + 4);
            return Ok(Some(head));
        }
        if head.len() > MAX_REQUEST_HEAD {
            return Err(Exception::RequestHeadTooLarge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::{tempdir, TempDir};
    use tokio::io::duplex;

    fn engine_for(dir: &TempDir, config: Config) -> RequestEngine {
        let config = config.with_root(dir.path().to_str().unwrap());
        let root = fs::canonicalize(dir.path()).unwrap();
        RequestEngine::new(Arc::new(config), root, EventSink::disconnected())
    }

    fn engine_with_events(dir: &TempDir, config: Config) -> (RequestEngine, tokio::sync::mpsc::UnboundedReceiver<ServerEvent>) {
        let config = config.with_root(dir.path().to_str().unwrap());
        let root = fs::canonicalize(dir.path()).unwrap();
        let (sink, rx) = EventSink::channel();
        (RequestEngine::new(Arc::new(config), root, sink), rx)
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) {
        let mut f = File::create(dir.path().join(name)).unwrap();
        write!(f, "{}", content).unwrap();
    }

    /// 通过内存双工流驱动引擎，返回完整响应文本
    async fn drive(engine: &RequestEngine, request: &str) -> String {
        let (mut client, mut server) = duplex(1 << 20);
        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        engine.handle_connection(&mut server, 0).await;
        drop(server);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).to_string()
    }

    fn body_of(response: &str) -> &str {
        response.split("\r\n\r\n").nth(1).unwrap_or("")
    }

    #[tokio::test]
    async fn test_get_serves_file_with_headers() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "0123456789");
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Type: text/plain\r\n"));
        assert!(response.contains("Content-Length: 10\r\n"));
        assert_eq!(body_of(&response), "0123456789");
    }

    #[tokio::test]
    async fn test_traversal_is_403() {
        let dir = tempdir().unwrap();
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "GET /../../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 403 Forbidden"));
    }

    #[tokio::test]
    async fn test_missing_file_is_404_builtin() {
        let dir = tempdir().unwrap();
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "GET /missing.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert!(body_of(&response).contains("404"));
    }

    #[tokio::test]
    async fn test_missing_file_serves_configured_template() {
        let dir = tempdir().unwrap();
        write_file(&dir, "404.html", "<h1>nope</h1>");
        let engine = engine_for(&dir, Config::new().with_not_found_filename(Some("404.html")));

        let response = drive(&engine, "GET /missing.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert!(response.contains("Content-Type: text/html"));
        assert_eq!(body_of(&response), "<h1>nope</h1>");
    }

    #[tokio::test]
    async fn test_post_is_405_with_allow() {
        let dir = tempdir().unwrap();
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "POST /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed"));
        assert!(response.contains("Allow: GET, HEAD\r\n"));
    }

    #[tokio::test]
    async fn test_head_has_headers_but_no_body() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "0123456789");
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "HEAD /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Length: 10\r\n"));
        assert_eq!(body_of(&response), "");
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let dir = tempdir().unwrap();
        write_file(&dir, "index.html", "<html>home</html>");
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Type: text/html"));
        assert_eq!(body_of(&response), "<html>home</html>");
    }

    #[tokio::test]
    async fn test_unknown_extension_falls_back_and_reports() {
        let dir = tempdir().unwrap();
        write_file(&dir, "data.xyzzy", "blob");
        let (engine, mut rx) = engine_with_events(&dir, Config::new());

        let response = drive(&engine, "GET /data.xyzzy HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.contains("Content-Type: application/octet-stream\r\n"));

        // 事件顺序：Request → Response → MimetypeNotFound
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Request { .. })));
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Response { status: 200, .. })));
        match rx.try_recv() {
            Ok(ServerEvent::MimetypeNotFound { extension, .. }) => {
                assert_eq!(extension, "xyzzy")
            }
            other => panic!("expected MimetypeNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cache_round_trip_yields_304() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "cache me");
        let engine = engine_for(&dir, Config::new().with_cache_enabled(true));

        let first = drive(&engine, "GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let etag_line = first
            .lines()
            .find(|l| l.starts_with("ETag: "))
            .expect("first response must carry an ETag");
        let etag = etag_line.trim_start_matches("ETag: ").trim();

        let second = drive(
            &engine,
            &format!("GET /a.txt HTTP/1.1\r\nHost: x\r\nIf-None-Match: {}\r\n\r\n", etag),
        )
        .await;

        assert!(second.starts_with("HTTP/1.1 304 Not Modified"));
        assert_eq!(body_of(&second), "");
        assert!(second.contains("ETag: "));
        assert!(second.contains("Last-Modified: "));
        assert!(second.contains("Content-Length: 8\r\n"));
    }

    #[tokio::test]
    async fn test_cache_disabled_omits_validators() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "no cache");
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(!response.contains("ETag"));
        assert!(!response.contains("Last-Modified"));
    }

    #[tokio::test]
    async fn test_cors_star_header_attached() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "x");
        let engine = engine_for(&dir, Config::new().with_cors_pattern(Some("*")));

        let response = drive(
            &engine,
            "GET /a.txt HTTP/1.1\r\nHost: x\r\nOrigin: https://anywhere.example\r\n\r\n",
        )
        .await;

        assert!(response.contains("Access-Control-Allow-Origin: *\r\n"));
    }

    #[tokio::test]
    async fn test_no_cors_without_pattern() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "x");
        let engine = engine_for(&dir, Config::new());

        let response = drive(
            &engine,
            "GET /a.txt HTTP/1.1\r\nHost: x\r\nOrigin: https://anywhere.example\r\n\r\n",
        )
        .await;

        assert!(!response.contains("Access-Control-Allow-Origin"));
    }

    #[tokio::test]
    async fn test_unknown_method_token_is_405() {
        let dir = tempdir().unwrap();
        let engine = engine_for(&dir, Config::new());

        let response = drive(&engine, "BREW /pot HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed"));
    }

    #[tokio::test]
    async fn test_streaming_transfer_matches_content_length() {
        let dir = tempdir().unwrap();
        write_file(&dir, "big.bin", "0123456789abcdef0123456789abcdef");
        // 阈值压到 4 字节，强制走流式传输路径
        let engine = engine_for(&dir, Config::new().with_streaming_threshold(4));

        let response = drive(&engine, "GET /big.bin HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Length: 32\r\n"));
        assert_eq!(body_of(&response), "0123456789abcdef0123456789abcdef");
    }

    #[tokio::test]
    async fn test_response_event_carries_elapsed_and_file() {
        let dir = tempdir().unwrap();
        write_file(&dir, "a.txt", "abc");
        let (engine, mut rx) = engine_with_events(&dir, Config::new());

        drive(&engine, "GET /a.txt HTTP/1.1\r\nHost: x\r\n\r\n").await;

        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Request { .. })));
        match rx.try_recv() {
            Ok(ServerEvent::Response {
                status,
                error,
                file,
                size,
                ..
            }) => {
                assert_eq!(status, 200);
                assert!(error.is_none());
                assert!(file.unwrap().ends_with("a.txt"));
                assert_eq!(size, Some(3));
            }
            other => panic!("expected Response event, got {:?}", other),
        }
    }
}
