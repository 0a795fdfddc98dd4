use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::http::header;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::sync::oneshot;

use crate::error::{AuthError, Result};

/// Serves one HTML page from its own thread until dropped. Dropping stops
/// the server and joins the thread.
pub struct WidgetServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WidgetServer {
    pub fn start(port: u16, page: String) -> Result<Self> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", port))
            .and_then(|l| l.set_nonblocking(true).map(|_| l))
            .map_err(|e| AuthError::Config(format!("cannot listen on 127.0.0.1:{}: {}", port, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AuthError::Config(format!("widget listener has no address: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        let page: Arc<str> = page.into();
        let thread = thread::Builder::new()
            .name("duo-widget".to_string())
            .spawn(move || serve(listener, page, rx))
            .map_err(|e| AuthError::Config(format!("cannot start widget server: {}", e)))?;
        log::debug!("duo widget listening on {}", addr);

        Ok(Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

impl Drop for WidgetServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("duo widget server thread panicked");
            }
        }
        log::debug!("duo widget server on {} stopped", self.addr);
    }
}

fn serve(listener: std::net::TcpListener, page: Arc<str>, shutdown: oneshot::Receiver<()>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::warn!("unable to start widget runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                log::warn!("unable to register widget listener: {}", e);
                return;
            }
        };
        let app = Router::new().route(
            "/",
            get(move || {
                let page = page.clone();
                async move { ([(header::CONNECTION, "close")], Html(page.to_string())) }
            }),
        );

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown.await;
            })
            .await
        {
            log::warn!("duo widget server failed: {}", e);
        }
    });
}

/// Escape text for use inside an HTML attribute or element.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_page_until_dropped() {
        let server = WidgetServer::start(0, "<html>duo</html>".to_string()).unwrap();
        let url = server.url();

        let body = reqwest::blocking::get(&url).unwrap().text().unwrap();
        assert_eq!(body, "<html>duo</html>");

        drop(server);
        assert!(reqwest::blocking::get(&url).is_err());
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"a"b<c>&'"#), "a&quot;b&lt;c&gt;&amp;&#39;");
    }
}
