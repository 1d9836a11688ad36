//! A minimal HTTP/1.1 server built on tokio that returns canned responses.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub(crate) struct MockServer {
    listener: TcpListener,
    pub(crate) base_url: String,
}

impl MockServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let port = listener.local_addr().unwrap().port();
        let base_url = format!("http://127.0.0.1:{port}");
        Self { listener, base_url }
    }

    /// Accept one connection, read the whole request, answer with `status`,
    /// the extra `headers` and `body`, then close. Returns the raw request.
    pub(crate) async fn respond_once(
        self,
        status: u16,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> String {
        let (mut stream, _) = self.listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;

        let mut head = format!(
            "HTTP/1.1 {status} Mock\r\nContent-Length: {}\r\nConnection: close\r\n",
            body.len()
        );
        for (name, value) in headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
        stream.shutdown().await.unwrap();

        String::from_utf8_lossy(&request).into_owned()
    }

    /// Answer `status` with the given headers, send `first` out of a declared
    /// `declared_len` body, then go silent until the client hangs up.
    pub(crate) async fn respond_partial(
        self,
        status: u16,
        headers: &[(&str, &str)],
        first: &[u8],
        declared_len: usize,
    ) {
        let (mut stream, _) = self.listener.accept().await.unwrap();
        read_request(&mut stream).await;

        let mut head = format!("HTTP/1.1 {status} Mock\r\nContent-Length: {declared_len}\r\n");
        for (name, value) in headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(first).await.unwrap();
        stream.flush().await.unwrap();

        drain_until_closed(&mut stream).await;
    }

    /// Accept one connection and read from it without ever answering.
    pub(crate) async fn stall(self) {
        let (mut stream, _) = self.listener.accept().await.unwrap();
        drain_until_closed(&mut stream).await;
    }
}

async fn drain_until_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    while !request_complete(&request) {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }
    request
}

fn request_complete(request: &[u8]) -> bool {
    let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
    let body = &request[head_end + 4..];

    if head.contains("transfer-encoding: chunked") {
        return body == b"0\r\n\r\n" || body.ends_with(b"\r\n0\r\n\r\n");
    }
    let declared = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    body.len() >= declared
}
