use crate::{param::*, util::HtmlBuilder};

use bytes::Bytes;
use chrono::prelude::*;
use log::error;

/// HTTP 响应报文构建器。
///
/// 只负责头部装配与字节序列化；文件内容的读取与流式发送由引擎完成。
/// `content` 为 `None` 且 `content_length` 大于零时表示响应体将由引擎
/// 在头部之后另行写出（流式传输或 HEAD 略去响应体）。
#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    etag: Option<String>,
    last_modified: Option<String>,
    cors_headers: Vec<(&'static str, String)>,
    content: Option<Bytes>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            allow: None,
            etag: None,
            last_modified: None,
            cors_headers: vec![],
            content: None,
        }
    }

    /// 构建内置错误响应（403/404/405/500 等），响应体为最小化 HTML 页面。
    pub fn from_status_code(code: u16) -> Self {
        let mut response = Self::new();
        let content = match code {
            403 => HtmlBuilder::from_status_code(403, Some(
                r"<h2>噢！</h2><p>你请求的路径越出了服务目录，访问被拒绝。</p>",
            )),
            404 => HtmlBuilder::from_status_code(404, Some(
                r"<h2>噢！</h2><p>你指定的网页无法找到。</p>",
            )),
            405 => HtmlBuilder::from_status_code(405, Some(
                r"<h2>噢！</h2><p>本服务器只支持GET和HEAD方法。</p>",
            )),
            500 => HtmlBuilder::from_status_code(500, Some(
                r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>",
            )),
            _ => HtmlBuilder::from_status_code(code, None),
        }
        .build();
        let bytes = Bytes::from(content.into_bytes());
        response.content_length = bytes.len() as u64;
        response.content = Some(bytes);
        response.content_type = Some("text/html;charset=utf-8".to_string());
        response.set_code(code);
        if code == 405 {
            response.allow = Some(ALLOWED_METHODS.to_vec());
        }
        response
    }

    pub fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&phrase) => phrase.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_content_type(&mut self, mime: &str) -> &mut Self {
        self.content_type = Some(mime.to_string());
        self
    }

    pub fn set_content_length(&mut self, length: u64) -> &mut Self {
        self.content_length = length;
        self
    }

    pub fn set_validators(&mut self, etag: &str, last_modified: &str) -> &mut Self {
        self.etag = Some(etag.to_string());
        self.last_modified = Some(last_modified.to_string());
        self
    }

    pub fn set_cors_headers(&mut self, headers: Vec<(&'static str, String)>) -> &mut Self {
        self.cors_headers = headers;
        self
    }

    pub fn set_content(&mut self, content: Bytes) -> &mut Self {
        self.content_length = content.len() as u64;
        self.content = Some(content);
        self
    }

    /// 清空响应体但保留 Content-Length（HEAD 请求与 304 响应使用）
    pub fn drop_content(&mut self) -> &mut Self {
        self.content = None;
        self
    }

    /// 序列化响应头与内联响应体。
    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let status_code: &str = &self.status_code.to_string();
        let information: &str = &self.information;
        let content_length: &str = &self.content_length.to_string();
        let date: &str = &self.date.to_rfc2822();
        let server: &str = &self.server_name;

        let mut cors = String::new();
        for (name, value) in &self.cors_headers {
            cors.push_str(name);
            cors.push_str(": ");
            cors.push_str(value);
            cors.push_str(CRLF);
        }

        let header = [
            version,
            " ",
            status_code,
            " ",
            information,
            CRLF,
            match &self.content_type {
                Some(t) => ["Content-Type: ", t, CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            "Content-Length: ",
            content_length,
            CRLF,
            "Date: ",
            date,
            CRLF,
            "Server: ",
            server,
            CRLF,
            match &self.etag {
                Some(tag) => ["ETag: ", tag, CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            match &self.last_modified {
                Some(lm) => ["Last-Modified: ", lm, CRLF].concat(),
                None => "".to_string(),
            }
            .as_str(),
            match &self.allow {
                Some(a) => {
                    let mut allow_str = String::new();
                    for (index, method) in a.iter().enumerate() {
                        allow_str.push_str(&format!("{}", method));
                        if index < a.len() - 1 {
                            allow_str.push_str(", ");
                        }
                    }
                    ["Allow: ", &allow_str, CRLF].concat()
                }
                None => "".to_string(),
            }
            .as_str(),
            cors.as_str(),
            CRLF,
        ]
        .concat();
        [
            header.as_bytes(),
            match &self.content {
                Some(c) => c,
                None => b"",
            },
        ]
        .concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// 响应体是否由引擎在头部之后另行写出
    pub fn is_streaming(&self) -> bool {
        self.content.is_none() && self.content_type.is_some() && self.content_length > 0
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_new() {
        let response = Response::new();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.information(), "OK");
        assert_eq!(response.content_length(), 0);
    }

    #[test]
    fn test_response_as_bytes_basic() {
        let response = Response::new();
        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.starts_with("HTTP/1.1 200 OK"));
        assert!(response_str.contains("Content-Length: 0"));
        assert!(response_str.contains("Server: staticserver"));
        assert!(response_str.contains("\r\n\r\n"));
    }

    #[test]
    fn test_response_as_bytes_with_content() {
        let mut response = Response::new();
        response.set_content(Bytes::from("Hello"));
        response.set_content_type("text/plain");

        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.contains("Content-Type: text/plain"));
        assert!(response_str.contains("Content-Length: 5"));
        assert!(response_str.ends_with("Hello"));
    }

    #[test]
    fn test_response_status_code_setter() {
        let mut response = Response::new();
        response.set_code(404);

        assert_eq!(response.status_code(), 404);
        assert_eq!(response.information(), "Not Found");
    }

    #[test]
    fn test_response_status_code_various() {
        for (code, expected_info) in [
            (200, "OK"),
            (304, "Not Modified"),
            (400, "Bad Request"),
            (403, "Forbidden"),
            (404, "Not Found"),
            (405, "Method Not Allowed"),
            (500, "Internal Server Error"),
        ] {
            let mut response = Response::new();
            response.set_code(code);
            assert_eq!(response.status_code(), code);
            assert_eq!(response.information(), expected_info);
        }
    }

    #[test]
    fn test_validators_are_rendered() {
        let mut response = Response::new();
        response.set_validators("\"a-3f\"", "Tue, 05 Aug 2025 10:00:00 +0000");

        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.contains("ETag: \"a-3f\"\r\n"));
        assert!(response_str.contains("Last-Modified: Tue, 05 Aug 2025 10:00:00 +0000\r\n"));
    }

    #[test]
    fn test_no_validators_by_default() {
        let response = Response::new();
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert!(!response_str.contains("ETag"));
        assert!(!response_str.contains("Last-Modified"));
    }

    #[test]
    fn test_cors_headers_are_rendered() {
        let mut response = Response::new();
        response.set_cors_headers(vec![
            ("Access-Control-Allow-Origin", "https://app.example.com".to_string()),
            ("Vary", "Origin".to_string()),
        ]);

        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert!(response_str
            .contains("Access-Control-Allow-Origin: https://app.example.com\r\n"));
        assert!(response_str.contains("Vary: Origin\r\n"));
    }

    #[test]
    fn test_405_carries_allow_header() {
        let response = Response::from_status_code(405);
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();

        assert!(response_str.starts_with("HTTP/1.1 405 Method Not Allowed"));
        assert!(response_str.contains("Allow: GET, HEAD\r\n"));
    }

    #[test]
    fn test_builtin_error_pages_have_html_bodies() {
        for code in [403u16, 404, 500] {
            let response = Response::from_status_code(code);
            assert!(response.content_length() > 0);
            let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
            assert!(response_str.contains("<!DOCTYPE html>"));
            assert!(response_str.contains(&code.to_string()));
        }
    }

    #[test]
    fn test_head_style_response_keeps_length() {
        let mut response = Response::new();
        response.set_content(Bytes::from("0123456789"));
        response.set_content_type("text/plain");
        response.drop_content();

        assert_eq!(response.content_length(), 10);
        let response_str = String::from_utf8_lossy(&response.as_bytes()).to_string();
        assert!(response_str.contains("Content-Length: 10"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_streaming_flag() {
        let mut response = Response::new();
        response.set_content_type("video/mp4");
        response.set_content_length(1 << 30);
        assert!(response.is_streaming());

        let mut inline = Response::new();
        inline.set_content(Bytes::from("x"));
        inline.set_content_type("text/plain");
        assert!(!inline.is_streaming());
    }
}
