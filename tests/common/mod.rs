#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use horde::{Target, error::CallError, scenario::Step};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// In-process target that counts what it sees.
///
/// Users run their steps one after the other, so a user is "in flight" from the
/// start of its first step until the end of its last one.
#[derive(Default)]
pub struct FakeTarget {
    pub delay: Duration,
    /// The first `fail_first` calls to the first step fail.
    pub fail_first: usize,
    pub first_path: String,
    pub last_path: String,
    pub calls_started: AtomicUsize,
    pub calls_finished: AtomicUsize,
    first_step_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeTarget {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            first_path: "/json".into(),
            last_path: "/echo".into(),
            ..Default::default()
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Target for FakeTarget {
    async fn call(&self, step: &Step) -> Result<(), CallError> {
        let path = step.request.path();
        self.calls_started.fetch_add(1, Ordering::SeqCst);

        if path == self.first_path {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.first_step_calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.calls_finished.fetch_add(1, Ordering::SeqCst);
                return Err(CallError::Other("connection refused".into()));
            }
        }

        tokio::time::sleep(self.delay).await;

        if path == self.last_path {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.calls_finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A request as seen by [`spawn_server`].
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Minimal HTTP/1.1 server: `GET /json` returns a small document, `POST /echo` echoes
/// the body, everything else is a 404. One request per connection.
pub async fn spawn_server() -> (SocketAddr, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let server_log = Arc::clone(&log);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket, Arc::clone(&server_log)));
        }
    });

    (addr, log)
}

/// An address nothing listens on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn serve(mut socket: TcpStream, log: Arc<Mutex<Vec<Recorded>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body = buf[head_end..].to_vec();

    let mut request_line = head.split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let path = request_line.next().unwrap_or_default().to_owned();

    let (status, response) = match (method.as_str(), path.as_str()) {
        ("GET", "/json") => ("200 OK", br#"{"name":"Kalle","age":30}"#.to_vec()),
        ("POST", "/echo") => ("200 OK", body.clone()),
        (_, "/json" | "/echo") => ("405 Method Not Allowed", b"Invalid http method".to_vec()),
        _ => ("404 Not Found", b"Not Found".to_vec()),
    };

    log.lock().unwrap().push(Recorded { method, path, body });

    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.len()
    );
    let _ = socket.write_all(header.as_bytes()).await;
    let _ = socket.write_all(&response).await;
    let _ = socket.shutdown().await;
}
