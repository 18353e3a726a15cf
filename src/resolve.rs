// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路径解析模块
//!
//! 该模块是静态文件服务器的安全核心，负责把请求 URI 映射到服务根目录下的
//! 物理文件，同时执行以下防线：
//! 1. 百分号解码与空字节（Null Byte）拦截。
//! 2. `.` / `..` 段的词法归一化，向上越界直接判定为越权。
//! 3. 符号链接策略：不跟随时最终段为链接视作不存在；跟随时逐个上报事件。
//! 4. 越权守卫（Traversal Guard）：物理解析后的路径必须仍位于根目录之内，
//!    与符号链接策略无关，永不绕过。

use std::fs::{self, Metadata};
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::event::{EventSink, ServerEvent};

/// 一次路径解析的结果。每个请求产生一份，响应结束后即丢弃。
#[derive(Debug)]
pub enum ResolvedTarget {
    /// 解析到一个常规文件，携带其实时元数据
    File { path: PathBuf, metadata: Metadata },
    /// 解析到一个目录，但其中不存在配置的索引文件（由引擎映射为 404）
    Directory(PathBuf),
    /// 目标不存在，或不是常规文件/目录
    NotFound,
    /// 解码失败、包含空字节，或物理路径越出服务根目录
    Forbidden,
}

/// 把请求路径解析为根目录之下安全的绝对路径。
///
/// `root` 必须是启动时规范化（canonicalize）过的绝对路径，这是越权守卫
/// 前缀比较正确性的前提。
pub struct PathResolver {
    root: PathBuf,
    index_filename: String,
    follow_symlinks: bool,
}

impl PathResolver {
    pub fn new(root_canonical: PathBuf, index_filename: &str, follow_symlinks: bool) -> Self {
        Self {
            root: root_canonical,
            index_filename: index_filename.to_string(),
            follow_symlinks,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析一个请求路径。
    ///
    /// 解析过程中跟随的每个符号链接都会以 `SymbolicLink` 事件上报
    /// （仅在允许跟随符号链接时）。
    pub fn resolve(&self, request_path: &str, id: u128, events: &EventSink) -> ResolvedTarget {
        // 查询串与片段标识不参与文件定位
        let raw = request_path
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or("");

        // 1. 百分号解码。解码产物必须是合法 UTF-8 且不含空字节
        let decoded = match percent_decode_str(raw).decode_utf8() {
            Ok(s) => s.into_owned(),
            Err(_) => return ResolvedTarget::Forbidden,
        };
        if decoded.contains('\0') {
            return ResolvedTarget::Forbidden;
        }

        // 空路径等价于 "/"
        let decoded = if decoded.is_empty() {
            "/".to_string()
        } else {
            decoded
        };
        let wants_directory = decoded.ends_with('/');

        // 2. 词法归一化。".." 把已累积的段弹出；在根处继续向上即为越权尝试
        let mut segments: Vec<&str> = Vec::new();
        for component in Path::new(&decoded).components() {
            match component {
                Component::Normal(seg) => match seg.to_str() {
                    Some(s) => segments.push(s),
                    None => return ResolvedTarget::Forbidden,
                },
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return ResolvedTarget::Forbidden;
                    }
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        let mut full = self.root.clone();
        for seg in &segments {
            full.push(seg);
        }

        // 3–4. 物理解析与越权守卫
        let target = self.resolve_physical(&full, id, events);

        match target {
            // 文件路径带尾部斜杠：文件不是目录，按不存在处理
            ResolvedTarget::File { .. } if wants_directory => ResolvedTarget::NotFound,
            // 5. 目录：在其中查找索引文件，找到则对索引文件重走 3–4
            ResolvedTarget::Directory(dir) => {
                let candidate = dir.join(&self.index_filename);
                match self.resolve_physical(&candidate, id, events) {
                    found @ ResolvedTarget::File { .. } => found,
                    ResolvedTarget::Forbidden => ResolvedTarget::Forbidden,
                    // 索引缺失或本身不是常规文件：目录按缺失索引处理
                    _ => ResolvedTarget::Directory(dir),
                }
            }
            t => t,
        }
    }

    /// 对一条已位于根目录之下（词法上）的绝对路径做物理解析。
    fn resolve_physical(&self, full: &Path, id: u128, events: &EventSink) -> ResolvedTarget {
        if self.follow_symlinks {
            self.walk_following(full, id, events)
        } else {
            self.lstat_final(full)
        }
    }

    /// 跟随符号链接的解析：逐段前进，遇到链接读出目标、上报事件后继续。
    fn walk_following(&self, full: &Path, id: u128, events: &EventSink) -> ResolvedTarget {
        let rel = match full.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) => return ResolvedTarget::Forbidden,
        };

        let mut cur = self.root.clone();
        let mut meta = match fs::symlink_metadata(&cur) {
            Ok(m) => m,
            Err(_) => return ResolvedTarget::NotFound,
        };

        for seg in rel.components() {
            cur.push(seg);
            loop {
                meta = match fs::symlink_metadata(&cur) {
                    Ok(m) => m,
                    Err(_) => return ResolvedTarget::NotFound,
                };
                if !meta.file_type().is_symlink() {
                    break;
                }
                let link = cur.clone();
                let raw_target = match fs::read_link(&cur) {
                    Ok(t) => t,
                    Err(_) => return ResolvedTarget::NotFound,
                };
                // 相对目标以链接所在目录为基准
                let joined = if raw_target.is_absolute() {
                    raw_target
                } else {
                    match link.parent() {
                        Some(parent) => parent.join(&raw_target),
                        None => raw_target,
                    }
                };
                let resolved = lexical_clean(&joined);
                events.emit(ServerEvent::SymbolicLink {
                    id,
                    link,
                    target: resolved.clone(),
                });
                cur = resolved;
            }
        }

        // 越权守卫：与符号链接策略无关，永远执行
        if !cur.starts_with(&self.root) {
            return ResolvedTarget::Forbidden;
        }

        if meta.is_dir() {
            ResolvedTarget::Directory(cur)
        } else if meta.is_file() {
            ResolvedTarget::File {
                path: cur,
                metadata: meta,
            }
        } else {
            ResolvedTarget::NotFound
        }
    }

    /// 不跟随符号链接的解析：父级链规范化，最终段用 lstat 检查。
    /// 最终段本身是符号链接时按不存在处理，且不产生任何事件。
    fn lstat_final(&self, full: &Path) -> ResolvedTarget {
        if full == self.root {
            return ResolvedTarget::Directory(self.root.clone());
        }
        let (parent, name) = match (full.parent(), full.file_name()) {
            (Some(p), Some(n)) => (p, n),
            _ => return ResolvedTarget::NotFound,
        };
        let canonical_parent = match fs::canonicalize(parent) {
            Ok(p) => p,
            Err(_) => return ResolvedTarget::NotFound,
        };
        // 越权守卫：中间段经符号链接逃出根目录同样拦截
        if !canonical_parent.starts_with(&self.root) {
            return ResolvedTarget::Forbidden;
        }
        let final_path = canonical_parent.join(name);
        let meta = match fs::symlink_metadata(&final_path) {
            Ok(m) => m,
            Err(_) => return ResolvedTarget::NotFound,
        };
        if meta.file_type().is_symlink() {
            return ResolvedTarget::NotFound;
        }
        if meta.is_dir() {
            ResolvedTarget::Directory(final_path)
        } else if meta.is_file() {
            ResolvedTarget::File {
                path: final_path,
                metadata: meta,
            }
        } else {
            ResolvedTarget::NotFound
        }
    }
}

/// 只做词法清理的路径折叠：吸收 `.`，让 `..` 弹出上一段。
/// 用于符号链接目标，避免在事件中暴露未折叠的中间形态。
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // 已到文件系统根时无处可弹，丢弃该段
                cleaned.pop();
            }
            Component::CurDir => {}
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
