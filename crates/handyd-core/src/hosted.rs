//! A file server bound to one TCP port, serving any number of mounts.
//!
//! Each mount exposes a root directory under the URL prefix `/<alias>/`.
//! The mount table is published through a [`watch`] channel: request
//! handlers read the current snapshot, so adding, retargeting, or removing
//! one alias never disturbs requests in flight for another.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Mounts of one server, ordered by alias.
pub type MountTable = BTreeMap<String, PathBuf>;

/// Errors from a hosted server's listener.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("cannot listen on port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
}

/// The accept loop of a listening server.
struct Listener {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// One HTTP file server on one port.
pub struct HostedServer {
    addr: SocketAddr,
    mounts: watch::Sender<MountTable>,
    listener: Option<Listener>,
}

impl HostedServer {
    /// Create a server for `addr`. Nothing is bound until [`ensure_listening`](Self::ensure_listening).
    pub fn new(addr: SocketAddr) -> Self {
        let (mounts, _) = watch::channel(MountTable::new());
        Self {
            addr,
            mounts,
            listener: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A copy of the current mount table.
    pub fn mounts(&self) -> MountTable {
        self.mounts.borrow().clone()
    }

    /// Serve `root` under `/<alias>/`, replacing whatever the alias served before.
    ///
    /// A root is mounted under at most one alias per server, so any other
    /// alias currently serving `root` is dropped. Returns the alias's
    /// previous root, if any.
    pub fn add_mount(&self, alias: &str, root: impl Into<PathBuf>) -> Option<PathBuf> {
        let root = root.into();
        let mut previous = None;
        self.mounts.send_modify(|table| {
            table.retain(|existing, dir| existing == alias || *dir != root);
            previous = table.insert(alias.to_string(), root.clone());
        });
        match &previous {
            Some(old) if *old != root => {
                info!(port = self.port(), alias, from = %old.display(), to = %root.display(), "Retargeted mount");
            }
            Some(_) => debug!(port = self.port(), alias, "Mount unchanged"),
            None => info!(port = self.port(), alias, root = %root.display(), "Added mount"),
        }
        previous
    }

    /// Stop serving `alias`. Absent aliases are ignored.
    pub fn remove_mount(&self, alias: &str) -> Option<PathBuf> {
        let mut removed = None;
        self.mounts.send_if_modified(|table| {
            removed = table.remove(alias);
            removed.is_some()
        });
        match &removed {
            Some(root) => {
                info!(port = self.port(), alias, root = %root.display(), "Removed mount");
            }
            None => debug!(port = self.port(), alias, "Remove of unknown alias ignored"),
        }
        removed
    }

    /// Whether the accept loop is running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.task.is_finished())
    }

    /// Bind the port and start accepting connections, unless already doing so.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn ensure_listening(&mut self) -> Result<(), HostError> {
        if self.is_listening() {
            return Ok(());
        }

        let port = self.port();
        let bind_err = |source| HostError::Bind { port, source };
        let std_listener = std::net::TcpListener::bind(self.addr).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)?;

        let app = mount_router(self.mounts.subscribe());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // A dropped sender stops the server too.
                    let _ = stop_rx.await;
                })
                .await;
            match served {
                Ok(()) => info!(port, "File server stopped"),
                Err(e) => warn!(port, error = %e, "File server failed"),
            }
        });

        info!(addr = %self.addr, "File server listening");
        self.listener = Some(Listener { stop_tx, task });
        Ok(())
    }

    /// Stop accepting connections and release the port.
    ///
    /// Returns the accept loop's task, which completes once in-flight
    /// requests have drained.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        let listener = self.listener.take()?;
        let _ = listener.stop_tx.send(());
        info!(port = self.port(), "Stopping file server");
        Some(listener.task)
    }
}

/// Where a request path leads within a mount table.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Serve {
        alias: String,
        root: PathBuf,
        suffix: String,
    },
    Redirect(String),
    NotFound,
}

/// Match `path` against the longest mounted alias prefix.
fn route(mounts: &MountTable, path: &str) -> Route {
    let Some(path) = path.strip_prefix('/') else {
        return Route::NotFound;
    };

    let best = mounts
        .iter()
        .filter(|(alias, _)| {
            path.strip_prefix(alias.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
        .max_by_key(|(alias, _)| alias.len());

    match best {
        None => Route::NotFound,
        Some((alias, root)) => {
            let suffix = &path[alias.len()..];
            if suffix.is_empty() {
                Route::Redirect(format!("/{alias}/"))
            } else {
                Route::Serve {
                    alias: alias.clone(),
                    root: root.clone(),
                    suffix: suffix.to_string(),
                }
            }
        }
    }
}

fn mount_router(mounts: watch::Receiver<MountTable>) -> Router {
    Router::new()
        .fallback(serve_mount)
        .layer(TraceLayer::new_for_http())
        .with_state(mounts)
}

async fn serve_mount(
    State(mounts): State<watch::Receiver<MountTable>>,
    mut req: Request,
) -> Response {
    let matched = route(&mounts.borrow(), req.uri().path());
    let (alias, root, suffix) = match matched {
        Route::Serve {
            alias,
            root,
            suffix,
        } => (alias, root, suffix),
        Route::Redirect(location) => return Redirect::permanent(&location).into_response(),
        Route::NotFound => return StatusCode::NOT_FOUND.into_response(),
    };

    // Directory redirects and listings must carry the alias prefix.
    if [Method::GET, Method::HEAD].contains(req.method()) {
        if let Some(dir) = directory_at(&root, &suffix).await {
            if !suffix.ends_with('/') {
                let location = match req.uri().query() {
                    Some(query) => format!("/{alias}{suffix}/?{query}"),
                    None => format!("/{alias}{suffix}/"),
                };
                return Redirect::permanent(&location).into_response();
            }
            if !tokio::fs::metadata(dir.join("index.html"))
                .await
                .is_ok_and(|meta| meta.is_file())
            {
                return directory_listing(&dir, &format!("/{alias}{suffix}")).await;
            }
        }
    }

    let target = match req.uri().query() {
        Some(query) => format!("{suffix}?{query}"),
        None => suffix,
    };
    match target.parse::<Uri>() {
        Ok(uri) => *req.uri_mut() = uri,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    }

    match ServeDir::new(root).oneshot(req).await {
        Ok(response) => response.map(axum::body::Body::new).into_response(),
        Err(never) => match never {},
    }
}

/// The directory `suffix` names under `root`, if it is one.
///
/// Paths with `..` segments are left to [`ServeDir`], which rejects them.
async fn directory_at(root: &Path, suffix: &str) -> Option<PathBuf> {
    let decoded = percent_decode(suffix);
    let mut path = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment if segment.contains('\\') => return None,
            segment => path.push(segment),
        }
    }
    let meta = tokio::fs::metadata(&path).await.ok()?;
    meta.is_dir().then_some(path)
}

/// Render an HTML index of `dir`, whose URL path is `url_path`.
async fn directory_listing(dir: &Path, url_path: &str) -> Response {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list directory");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.is_ok_and(|kind| kind.is_dir())
            || tokio::fs::metadata(entry.path())
                .await
                .is_ok_and(|meta| meta.is_dir());
        entries.push((name, is_dir));
    }
    entries.sort();

    Html(render_listing(url_path, &entries)).into_response()
}

fn render_listing(url_path: &str, entries: &[(String, bool)]) -> String {
    let title = html_escape(&percent_decode(url_path));
    let mut html = format!(
        "<!doctype html>\n<meta charset=\"utf-8\">\n<title>Index of {title}</title>\n<h1>Index of {title}</h1>\n<pre>\n"
    );
    for (name, is_dir) in entries {
        let slash = if *is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<a href=\"{}{slash}\">{}{slash}</a>\n",
            percent_encode_segment(name),
            html_escape(name)
        ));
    }
    html.push_str("</pre>\n");
    html
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-encode one path segment, keeping RFC 3986 unreserved bytes.
fn percent_encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::http::header::{CONTENT_TYPE, LOCATION};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn table(entries: &[(&str, &str)]) -> MountTable {
        entries
            .iter()
            .map(|(alias, root)| (alias.to_string(), PathBuf::from(root)))
            .collect()
    }

    #[test]
    fn test_add_mounts_accumulate_and_overwrite() {
        let server = HostedServer::new(local(1));
        assert_eq!(server.add_mount("a", "/srv/a"), None);
        assert_eq!(server.add_mount("b", "/srv/b"), None);
        assert_eq!(
            server.add_mount("a", "/srv/a2"),
            Some(PathBuf::from("/srv/a"))
        );
        assert_eq!(
            server.mounts(),
            table(&[("a", "/srv/a2"), ("b", "/srv/b")])
        );
    }

    #[test]
    fn test_root_mounted_under_one_alias_per_server() {
        let server = HostedServer::new(local(1));
        server.add_mount("old", "/srv/site");
        server.add_mount("new", "/srv/site");
        assert_eq!(server.mounts(), table(&[("new", "/srv/site")]));
    }

    #[test]
    fn test_remove_unknown_alias_is_noop() {
        let server = HostedServer::new(local(1));
        server.add_mount("a", "/srv/a");
        assert_eq!(server.remove_mount("missing"), None);
        assert_eq!(server.mounts(), table(&[("a", "/srv/a")]));
        assert_eq!(server.remove_mount("a"), Some(PathBuf::from("/srv/a")));
        assert!(server.mounts().is_empty());
    }

    #[test]
    fn test_route_longest_prefix() {
        let mounts = table(&[("docs", "/srv/docs"), ("docs/api", "/srv/api")]);
        assert_eq!(
            route(&mounts, "/docs/api/index.html"),
            Route::Serve {
                alias: "docs/api".to_string(),
                root: PathBuf::from("/srv/api"),
                suffix: "/index.html".to_string()
            }
        );
        assert_eq!(
            route(&mounts, "/docs/guide.html"),
            Route::Serve {
                alias: "docs".to_string(),
                root: PathBuf::from("/srv/docs"),
                suffix: "/guide.html".to_string()
            }
        );
        assert_eq!(
            route(&mounts, "/docs"),
            Route::Redirect("/docs/".to_string())
        );
        assert_eq!(route(&mounts, "/docsify/x"), Route::NotFound);
        assert_eq!(route(&mounts, "/"), Route::NotFound);
    }

    #[tokio::test]
    async fn test_router_serves_files_per_alias() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();

        let (tx, rx) = watch::channel(MountTable::new());
        tx.send_modify(|t| {
            t.insert("a".to_string(), dir.path().to_path_buf());
        });
        let app = mount_router(rx);

        let resp = app
            .clone()
            .oneshot(HttpRequest::get("/a/hello.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");

        let resp = app
            .clone()
            .oneshot(HttpRequest::get("/a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);

        let resp = app
            .clone()
            .oneshot(HttpRequest::get("/b/hello.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // Retargeting takes effect for the next request.
        tx.send_modify(|t| {
            t.remove("a");
        });
        let resp = app
            .oneshot(HttpRequest::get("/a/hello.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    fn router_for(alias: &str, root: &std::path::Path) -> Router {
        let (_, rx) = watch::channel(table(&[(alias, root.to_str().unwrap())]));
        mount_router(rx)
    }

    async fn fetch(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(HttpRequest::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_subdirectory_redirect_keeps_alias_prefix() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("index.html"), "nested").unwrap();
        let app = router_for("a", dir.path());

        let resp = fetch(&app, "/a/sub").await;
        assert_eq!(resp.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(resp.headers()[LOCATION], "/a/sub/");

        let resp = fetch(&app, "/a/sub?page=2").await;
        assert_eq!(resp.headers()[LOCATION], "/a/sub/?page=2");

        let resp = fetch(&app, "/a/sub/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "nested");
    }

    #[tokio::test]
    async fn test_directory_without_index_is_listed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "n").unwrap();
        std::fs::write(dir.path().join("a&b.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("my pics")).unwrap();
        std::fs::write(dir.path().join("my pics").join("cat.jpg"), "meow").unwrap();
        let app = router_for("a", dir.path());

        let resp = fetch(&app, "/a/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let body = body_text(resp).await;
        assert!(body.contains("<title>Index of /a/</title>"));
        assert!(body.contains(r#"<a href="notes.txt">notes.txt</a>"#));
        assert!(body.contains(r#"<a href="a%26b.txt">a&amp;b.txt</a>"#));
        assert!(body.contains(r#"<a href="my%20pics/">my pics/</a>"#));

        // Links resolve relative to the listed directory.
        let resp = fetch(&app, "/a/my%20pics/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("Index of /a/my pics/"));
        assert!(body.contains(r#"<a href="cat.jpg">cat.jpg</a>"#));

        let resp = fetch(&app, "/a/my%20pics/cat.jpg").await;
        assert_eq!(body_text(resp).await, "meow");

        let resp = fetch(&app, "/a/my%20pics/../").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_percent_coding() {
        assert_eq!(percent_decode("/my%20pics/a%26b"), "/my pics/a&b");
        assert_eq!(percent_decode("/100%"), "/100%");
        assert_eq!(percent_encode_segment("my pics&<x>"), "my%20pics%26%3Cx%3E");
        assert_eq!(html_escape("<a href=\"x\">&"), "&lt;a href=&quot;x&quot;&gt;&amp;");
    }

    #[tokio::test]
    async fn test_listen_is_idempotent_and_stop_releases_port() {
        let probe = std::net::TcpListener::bind(local(0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let mut server = HostedServer::new(local(port));
        assert!(!server.is_listening());
        server.ensure_listening().unwrap();
        server.ensure_listening().unwrap();
        assert!(server.is_listening());

        let task = server.stop().unwrap();
        task.await.unwrap();
        assert!(!server.is_listening());

        // The port can be bound again after stop.
        server.ensure_listening().unwrap();
        server.stop().unwrap().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind(local(0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut server = HostedServer::new(local(port));
        let err = server.ensure_listening().unwrap_err();
        assert!(matches!(err, HostError::Bind { port: p, .. } if p == port));
        assert!(!server.is_listening());
    }
}
