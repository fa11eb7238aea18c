//! Response framing for the serving layer: status lines, headers, MIME types
//! and error pages.

use std::io::Write;

use crate::constants::{DEFAULT_CONTENT_TYPE, SERVER_NAME};

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        303 => "See Other",
        400 => "Bad Request",
        404 => "Not Found",
        414 => "URI Too Long",
        _ => "Server Error",
    }
}

/// MIME type for `path` by extension; `text/plain` when unknown or absent.
pub fn content_type(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = match file_name.rfind('.') {
        Some(pos) => &file_name[pos + 1..],
        None => return DEFAULT_CONTENT_TYPE,
    };
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "xml" => "text/xml",
        "xhtml" => "application/xhtml+xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Status line and headers, terminated by the blank line.
pub fn response_head(
    status: u16,
    content_type: &str,
    content_length: usize,
    keep_alive: bool,
) -> Vec<u8> {
    let mut head = Vec::with_capacity(128);
    // Writing into a Vec cannot fail.
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
        status,
        status_text(status),
        content_type,
        content_length,
        if keep_alive { "keep-alive" } else { "close" },
    );
    head
}

/// Small HTML body for an error status.
pub fn error_page(status: u16) -> Vec<u8> {
    let text = status_text(status);
    format!(
        "<html>\r\n\
         <head><title>{status} {text}</title></head>\r\n\
         <body>\r\n\
         <center><h1>{status} {text}</h1></center>\r\n\
         <hr><center>{SERVER_NAME}</center>\r\n\
         </body>\r\n\
         </html>\r\n"
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type("/site/index.html"), "text/html");
        assert_eq!(content_type("logo.PNG"), "image/png");
        assert_eq!(content_type("photo.jpeg"), "image/jpeg");
        assert_eq!(content_type("style.css"), "text/css");
        assert_eq!(content_type("archive.tar.xz"), "text/plain");
        assert_eq!(content_type("Makefile"), "text/plain");
        assert_eq!(content_type("dir.d/README"), "text/plain");
    }

    #[test]
    fn head_has_required_headers() {
        let head = String::from_utf8(response_head(200, "text/plain", 10, true)).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/plain\r\n"));
        assert!(head.contains("Content-Length: 10\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.ends_with("\r\n\r\n"));

        let head = String::from_utf8(response_head(404, "text/html", 0, false)).unwrap();
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Connection: close\r\n"));
    }

    #[test]
    fn error_page_names_status() {
        let page = String::from_utf8(error_page(404)).unwrap();
        assert!(page.contains("<title>404 Not Found</title>"));
        assert!(page.contains(SERVER_NAME));
    }
}
