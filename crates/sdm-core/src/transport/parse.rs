//! Response header collection and parsing.

/// `Content-Range: bytes start-end/total` with an inclusive `end`.
/// `total` is `None` for `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// Key headers of a final response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadInfo {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Header lines of the most recent response seen by a curl header callback.
///
/// curl reports the headers of every response in a redirect chain (and of
/// `100 Continue`); a new status line discards what came before.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    pub status: Option<u32>,
    headers: Vec<(String, String)>,
    complete: bool,
}

impl ResponseHead {
    /// Feed one raw header line as delivered by `header_function`.
    pub fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if let Some(code) = parse_http_status(line) {
            self.status = Some(code);
            self.headers.clear();
            self.complete = false;
            return;
        }
        if line.is_empty() {
            self.complete = self.status.is_some();
            return;
        }
        if let Some((name, value)) = line.split_once(':') {
            self.headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    /// True once the header block of a final (non-1xx, non-redirect) response ended.
    pub fn is_final(&self) -> bool {
        self.complete && matches!(self.status, Some(code) if code >= 200 && !(300..400).contains(&code))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_range(&self) -> Option<ContentRange> {
        self.header("content-range").and_then(parse_content_range)
    }

    pub fn info(&self) -> HeadInfo {
        HeadInfo {
            content_length: self
                .header("content-length")
                .and_then(|v| v.parse::<u64>().ok()),
            accept_ranges: self
                .header("accept-ranges")
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
            etag: self.header("etag").map(|v| v.to_string()),
            last_modified: self.header("last-modified").map(|v| v.to_string()),
        }
    }
}

/// Parses `HTTP/1.1 206 Partial Content` (or `HTTP/2 200`) into its status code.
pub fn parse_http_status(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    let mut parts = rest.split_whitespace();
    parts.next()?;
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}

/// Parses a `Content-Range` value such as `bytes 0-99/1000` or `bytes 0-99/*`.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    if matches!(total, Some(t) if end >= t) {
        return None;
    }
    Some(ContentRange { start, end, total })
}
