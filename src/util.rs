use crate::param::STATUS_CODES;

/// 内置错误页构建器。只服务于 403/404/405/500 等极简错误响应，
/// 正常的文件响应永远直接回源文件内容，不经过这里。
pub struct HtmlBuilder {
    title: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let description = match note {
            Some(n) => n,
            None => match STATUS_CODES.get(&code) {
                Some(d) => *d,
                None => {
                    panic!("非法的状态码：{}", code);
                }
            },
        };
        Self {
            title: format!("{}", code),
            body: format!("<h1>{}</h1>\n<p>{}</p>", code, description),
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
<!-- 本文件由staticserver自动生成 -->
<html>
    <head>
        <meta charset="utf-8">
        <title>{}</title>
        <style>
            body {{
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }}
        </style>
    </head>
    <body>
        {}
    </body>
</html>"##,
            self.title, self.body
        )
    }
}

/// 把字节数渲染为人类可读的大小：取最大的不小于 1 的单位，
/// 保留两位小数并去掉无意义的尾零（如 "1.5 KB"、"1 MB"）。
pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];

    for i in (0..units.len()).rev() {
        let div = 1024u64.pow(i as u32);
        if size >= div {
            let value = size as f64 / div as f64;
            let mut rendered = format!("{:.2}", value);
            while rendered.ends_with('0') {
                rendered.pop();
            }
            if rendered.ends_with('.') {
                rendered.pop();
            }
            return format!("{} {}", rendered, units[i]);
        }
    }

    "0 B".to_string()
}
