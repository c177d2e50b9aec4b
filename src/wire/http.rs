//! HTTP request/response payloads exchanged with workers.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use super::{get_bytes, get_str, get_str_map, get_u64, put_bytes, put_str, put_str_map, put_u64};
use super::Message;
use crate::error::Result;

/// One uploaded file, passed to the worker by temp-file path rather than by
/// content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilePart {
    /// Name the client supplied for the file.
    pub filename: String,
    /// Path of the temporary copy on the supervisor's filesystem.
    pub tmp_path: String,
    /// File size in bytes.
    pub size: u64,
}

impl Message for FilePart {
    fn encode(&self, buf: &mut BytesMut) {
        put_str(buf, &self.filename);
        put_str(buf, &self.tmp_path);
        put_u64(buf, self.size);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            filename: get_str(buf)?,
            tmp_path: get_str(buf)?,
            size: get_u64(buf)?,
        })
    }
}

/// HTTP request forwarded to a worker.
///
/// Field order on the wire is exactly the declaration order below.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub files: HashMap<String, FilePart>,
    pub form: HashMap<String, String>,
}

impl Message for HttpRequest {
    fn encode(&self, buf: &mut BytesMut) {
        put_str(buf, &self.method);
        put_str(buf, &self.url);
        put_str_map(buf, &self.headers);
        put_bytes(buf, &self.body);
        put_file_map(buf, &self.files);
        put_str_map(buf, &self.form);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            method: get_str(buf)?,
            url: get_str(buf)?,
            headers: get_str_map(buf)?,
            body: get_bytes(buf)?,
            files: get_file_map(buf)?,
            form: get_str_map(buf)?,
        })
    }
}

/// HTTP response produced by a worker.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status_code: u64,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Message for HttpResponse {
    fn encode(&self, buf: &mut BytesMut) {
        put_u64(buf, self.status_code);
        put_str_map(buf, &self.headers);
        put_bytes(buf, &self.body);
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            status_code: get_u64(buf)?,
            headers: get_str_map(buf)?,
            body: get_bytes(buf)?,
        })
    }
}

fn put_file_map(buf: &mut BytesMut, map: &HashMap<String, FilePart>) {
    put_u64(buf, map.len() as u64);
    for (k, v) in map {
        put_str(buf, k);
        v.encode(buf);
    }
}

fn get_file_map(buf: &mut impl Buf) -> Result<HashMap<String, FilePart>> {
    let len = get_u64(buf)?;
    let mut map = HashMap::with_capacity(len.min(1024) as usize);
    for _ in 0..len {
        let k = get_str(buf)?;
        let v = FilePart::decode(buf)?;
        map.insert(k, v);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_headers() -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Authentication".to_string(), "Bearer TOKEN!".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }

    #[test]
    fn test_file_part_round_trip() {
        let want = FilePart {
            filename: "foobar.tmp".to_string(),
            tmp_path: "/tmp/foobar.tmp".to_string(),
            size: 123,
        };
        let got = FilePart::from_slice(&want.to_bytes()).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_file_map_round_trip() {
        let mut files = HashMap::new();
        files.insert(
            "foo".to_string(),
            FilePart {
                filename: "1".to_string(),
                tmp_path: "/tmp/1".to_string(),
                size: 1,
            },
        );
        files.insert(
            "bar".to_string(),
            FilePart {
                filename: "2".to_string(),
                tmp_path: "/tmp/2".to_string(),
                size: 2,
            },
        );
        let mut buf = BytesMut::new();
        put_file_map(&mut buf, &files);
        let got = get_file_map(&mut &buf[..]).unwrap();
        assert_eq!(got, files);
    }

    #[test]
    fn test_http_request_round_trip() {
        let mut files = HashMap::new();
        files.insert(
            "foo".to_string(),
            FilePart {
                filename: "1".to_string(),
                tmp_path: "/tmp/1".to_string(),
                size: 1,
            },
        );
        let mut form = HashMap::new();
        form.insert("form".to_string(), "value".to_string());
        let want = HttpRequest {
            method: "POST".to_string(),
            url: "https://test.example".to_string(),
            headers: sample_headers(),
            body: Bytes::from_static(b"test"),
            files,
            form,
        };
        let got = HttpRequest::from_slice(&want.to_bytes()).unwrap();
        assert_eq!(got.method, want.method);
        assert_eq!(got.url, want.url);
        assert_eq!(got.headers, want.headers);
        assert_eq!(got.body, want.body);
        assert_eq!(got.files, want.files);
        assert_eq!(got.form, want.form);
    }

    #[test]
    fn test_http_response_round_trip() {
        let want = HttpResponse {
            status_code: 200,
            headers: sample_headers(),
            body: Bytes::from_static(b"hello!"),
        };
        let got = HttpResponse::from_slice(&want.to_bytes()).unwrap();
        assert_eq!(got.status_code, want.status_code);
        assert_eq!(got.headers, want.headers);
        assert_eq!(got.body, want.body);
    }

    #[test]
    fn test_http_request_truncation_errors() {
        let want = HttpRequest {
            method: "GET".to_string(),
            url: "/".to_string(),
            ..Default::default()
        };
        let encoded = want.to_bytes();
        for cut in 0..encoded.len() {
            assert!(
                HttpRequest::from_slice(&encoded[..cut]).is_err(),
                "cut at {cut} should not parse"
            );
        }
    }
}
