//! Outbound HTTP requests from module code.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RuntimeError, StatusCode};

/// Timeout applied when the caller passes `None`.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Head,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "head" => Ok(HttpMethod::Head),
            other => Err(RuntimeError::invalid_argument(format!(
                "unsupported http method: {other}"
            ))),
        }
    }
}

/// Response of [`http_request`]. Non-2xx statuses are returned, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub code: u16,
    /// Lower-cased header names; repeated headers keep every value.
    pub headers: HashMap<String, Vec<String>>,
    pub body: String,
}

/// Perform one HTTP request.
///
/// # Errors
///
/// `InvalidArgument` for a malformed URL or header, `DeadlineExceeded` when
/// `timeout_ms` elapses, `Unavailable` for connection failures.
pub async fn http_request(
    url: &str,
    method: HttpMethod,
    headers: &HashMap<String, String>,
    body: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<HttpResponse, RuntimeError> {
    let url = reqwest::Url::parse(url)
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid url: {e}")))?;
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS));

    let mut header_map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RuntimeError::invalid_argument(format!("invalid header name: {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| RuntimeError::invalid_argument(format!("invalid header value: {e}")))?;
        header_map.append(name, value);
    }

    let mut request = reqwest::Client::new()
        .request(method.as_reqwest(), url)
        .headers(header_map)
        .timeout(timeout);
    if let Some(body) = body {
        request = request.body(body.to_string());
    }

    let response = request.send().await.map_err(transport_error)?;
    let code = response.status().as_u16();
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    let body = response.text().await.map_err(transport_error)?;

    Ok(HttpResponse {
        code,
        headers,
        body,
    })
}

fn transport_error(err: reqwest::Error) -> RuntimeError {
    if err.is_timeout() {
        RuntimeError::new(format!("http request timed out: {err}"), StatusCode::DeadlineExceeded)
    } else {
        RuntimeError::new(format!("http request failed: {err}"), StatusCode::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Accept one connection, capture the request head and answer with `reply`.
    async fn one_shot_server(reply: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{addr}/hook"), handle)
    }

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!("POST".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("head".parse::<HttpMethod>().unwrap(), HttpMethod::Head);
        assert!("delete".parse::<HttpMethod>().is_err());
    }

    #[tokio::test]
    async fn returns_status_headers_and_body() {
        let (url, server) = one_shot_server(
            "HTTP/1.1 201 Created\r\nContent-Length: 2\r\nX-Trace: abc\r\nConnection: close\r\n\r\nok",
        )
        .await;
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "k1".to_string());

        let resp = http_request(&url, HttpMethod::Post, &headers, Some("{}"), None)
            .await
            .unwrap();
        assert_eq!(resp.code, 201);
        assert_eq!(resp.body, "ok");
        assert_eq!(resp.headers.get("x-trace"), Some(&vec!["abc".to_string()]));

        let head = server.await.unwrap();
        assert!(head.starts_with("POST /hook HTTP/1.1"));
        assert!(head.contains("x-api-key: k1"));
    }

    #[tokio::test]
    async fn invalid_url_is_invalid_argument() {
        let err = http_request("not a url", HttpMethod::Get, &HashMap::new(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let err = http_request(&url, HttpMethod::Get, &HashMap::new(), None, Some(100))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::DeadlineExceeded);
    }
}
