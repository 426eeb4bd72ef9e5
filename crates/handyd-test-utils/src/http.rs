//! Minimal HTTP GET client for checking what hosted servers serve.

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

/// GET `path` from `127.0.0.1:port`, returning status code and body text.
pub async fn get(port: u16, path: &str) -> (u16, String) {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("failed to connect to file server");
    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream))
        .await
        .expect("HTTP handshake failed");
    tokio::spawn(conn);

    let req = hyper::Request::get(path)
        .header("host", "localhost")
        .body(Empty::new())
        .expect("invalid request");
    let resp = sender.send_request(req).await.expect("request failed");
    let status = resp.status().as_u16();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}
