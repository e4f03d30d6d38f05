//! `multipart/form-data` body decoding.
//!
//! The IDE uploads project files as one multipart body with a part per
//! file, keyed by the `filename` parameter of its `Content-Disposition`
//! header. This decoder covers exactly that shape: text parts, one
//! boundary, no nested multiparts. Parts without a filename or with
//! non-UTF-8 content are dropped, not fatal.

use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::workspace::UploadedFile;

/// Extract the boundary parameter from a `multipart/form-data` content type.
#[must_use]
pub fn boundary(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    if !params
        .next()?
        .trim()
        .eq_ignore_ascii_case("multipart/form-data")
    {
        return None;
    }
    params.find_map(|param| {
        let value = param.trim().strip_prefix("boundary=")?;
        Some(value.trim_matches('"'))
    })
}

/// Decode a multipart body into uploaded files.
pub fn parse(content_type: &str, body: &[u8]) -> Result<Vec<UploadedFile>, GatewayError> {
    let boundary = boundary(content_type)
        .ok_or_else(|| GatewayError::InvalidBody("missing multipart boundary".into()))?;
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut cursor = find(body, delimiter, 0)
        .ok_or_else(|| GatewayError::InvalidBody("no multipart delimiter".into()))?
        + delimiter.len();

    let mut files = Vec::new();
    loop {
        if body[cursor..].starts_with(b"--") {
            // closing delimiter
            break;
        }
        let start = skip_newline(body, cursor);
        let Some(end) = find(body, delimiter, start) else {
            break;
        };
        if let Some(file) = decode_part(&body[start..end]) {
            files.push(file);
        }
        cursor = end + delimiter.len();
    }
    Ok(files)
}

fn decode_part(part: &[u8]) -> Option<UploadedFile> {
    let (headers, content) = split_headers(part)?;
    let headers = String::from_utf8_lossy(headers);
    let Some(name) = filename(&headers) else {
        debug!("skipping multipart part without filename");
        return None;
    };
    // the newline before the next delimiter belongs to the framing
    let content = strip_trailing_newline(content);
    match std::str::from_utf8(content) {
        Ok(text) => Some(UploadedFile {
            name,
            content: text.to_string(),
        }),
        Err(err) => {
            warn!(file = name.as_str(), %err, "dropping non-utf8 part");
            None
        }
    }
}

fn filename(headers: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        let (field, value) = line.split_once(':')?;
        if !field.trim().eq_ignore_ascii_case("content-disposition") {
            return None;
        }
        value.split(';').find_map(|param| {
            let value = param.trim().strip_prefix("filename=")?;
            Some(value.trim_matches('"').to_string())
        })
    })
}

fn split_headers(part: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find(part, b"\r\n\r\n", 0) {
        return Some((&part[..pos], &part[pos + 4..]));
    }
    find(part, b"\n\n", 0).map(|pos| (&part[..pos], &part[pos + 2..]))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn skip_newline(body: &[u8], mut cursor: usize) -> usize {
    if body[cursor..].starts_with(b"\r\n") {
        cursor += 2;
    } else if body[cursor..].starts_with(b"\n") {
        cursor += 1;
    }
    cursor
}

fn strip_trailing_newline(content: &[u8]) -> &[u8] {
    if content.ends_with(b"\r\n") {
        &content[..content.len() - 2]
    } else if content.ends_with(b"\n") {
        &content[..content.len() - 1]
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----geckoformboundary1234";

    fn body(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut out = String::new();
        for (name, content) in parts {
            out.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
            ));
        }
        out.push_str(&format!("--{BOUNDARY}--\r\n"));
        out.into_bytes()
    }

    #[test]
    fn boundary_parameter() {
        assert_eq!(
            boundary("multipart/form-data; boundary=abc"),
            Some("abc")
        );
        assert_eq!(
            boundary("multipart/form-data; charset=utf-8; boundary=\"a b\""),
            Some("a b")
        );
        assert_eq!(boundary("application/json"), None);
    }

    #[test]
    fn single_file() {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        let files = parse(&content_type, &body(&[("main.py", "print('hi')")])).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "main.py");
        assert_eq!(files[0].content, "print('hi')");
    }

    #[test]
    fn several_files_keep_their_order() {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        let files = parse(
            &content_type,
            &body(&[(".project.json", "{}"), ("/lib/util.py", "pass")]),
        )
        .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec![".project.json", "/lib/util.py"]);
        assert_eq!(files[1].content, "pass");
    }

    #[test]
    fn content_newlines_survive() {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        let files = parse(&content_type, &body(&[("a.txt", "one\ntwo\n")])).unwrap();
        assert_eq!(files[0].content, "one\ntwo\n");
    }

    #[test]
    fn part_without_filename_is_skipped() {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        let raw = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\njust a field\r\n--{BOUNDARY}--\r\n"
        );
        let files = parse(&content_type, raw.as_bytes()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn missing_boundary_is_an_error() {
        assert!(matches!(
            parse("multipart/form-data", b""),
            Err(GatewayError::InvalidBody(_))
        ));
    }
}
