//! Threaded HTTP front end for the background removal pipeline
//!
//! `tiny_http` owns the sockets and request framing. Every request it hands
//! over is answered on its own thread; handler panics stay inside that thread
//! and are answered with a 500.

pub mod assets;
pub mod http;
pub mod routes;

pub use assets::{AssetRoute, StaticAssets};
pub use http::{HttpResponse, Reply};
pub use routes::{Router, UploadPayload};

use crate::config::ServerConfig;
use crate::error::{BgRemovalError, Result};
use crate::pipeline::BackgroundRemovalPipeline;
use log::{debug, error, info, warn};
use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tiny_http::Request;
use tracing::{span, Level};

/// Per-request limits copied out of the server configuration
#[derive(Debug, Clone, Copy)]
struct RequestLimits {
    max_body_bytes: usize,
    max_concurrent_requests: Option<usize>,
}

/// Counts requests currently being handled; decremented on drop
struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    /// Register a request, refusing it when `limit` is already reached
    fn acquire(counter: &Arc<AtomicUsize>, limit: Option<usize>) -> Option<Self> {
        let previous = counter.fetch_add(1, Ordering::AcqRel);
        let guard = Self {
            counter: Arc::clone(counter),
        };
        match limit {
            Some(limit) if previous >= limit => None,
            _ => Some(guard),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bound HTTP listener plus everything a request thread needs
pub struct Server {
    http: Arc<tiny_http::Server>,
    local_addr: SocketAddr,
    router: Arc<Router>,
    limits: RequestLimits,
    in_flight: Arc<AtomicUsize>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("router", &self.router)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Resolve the configured host and bind the listening socket
    ///
    /// # Errors
    /// - `BgRemovalError::InvalidConfig` for an invalid configuration or an unresolvable host
    /// - `BgRemovalError::Io` if the address cannot be bound
    pub fn bind(config: &ServerConfig, pipeline: BackgroundRemovalPipeline) -> Result<Self> {
        config.validate()?;

        let address = resolve(&config.bind_address())?;
        let listener = bind_listener(address, config.allow_reuse_address)?;
        let local_addr = listener.local_addr()?;
        let http = tiny_http::Server::from_listener(listener, None)
            .map_err(|e| BgRemovalError::Io(std::io::Error::new(ErrorKind::Other, e)))?;

        let assets = StaticAssets::new(
            config.static_dir.clone(),
            config.default_page.clone(),
            config.asset_cache_entries,
            config.asset_cache_bytes,
        );
        debug!(
            "Serving static files from {} (default page {})",
            config.static_dir.display(),
            config.default_page
        );

        Ok(Self {
            http: Arc::new(http),
            local_addr,
            router: Arc::new(Router::new(pipeline, assets)),
            limits: RequestLimits {
                max_body_bytes: config.max_body_bytes,
                max_concurrent_requests: config.max_concurrent_requests,
            },
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (useful with port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive requests until shut down, one thread per request
    ///
    /// # Errors
    /// Never fails once bound; per-request failures are logged
    pub fn serve(self) -> Result<()> {
        info!("Listening on {}", self.local_addr);

        for request in self.http.incoming_requests() {
            let router = Arc::clone(&self.router);
            let in_flight = Arc::clone(&self.in_flight);
            let limits = self.limits;
            // A request dropped unanswered gets a 500 from tiny_http
            let spawned = thread::Builder::new()
                .name("rmbg-request".to_string())
                .spawn(move || handle_request(request, &router, &in_flight, limits));
            if let Err(e) = spawned {
                error!("Failed to spawn request thread: {}", e);
            }
        }

        info!("Server on {} stopped", self.local_addr);
        Ok(())
    }

    /// Run [`Server::serve`] on a background thread
    ///
    /// # Errors
    /// Thread creation errors
    pub fn spawn(self) -> Result<ServerHandle> {
        let address = connectable_address(self.local_addr);
        let http = Arc::clone(&self.http);
        let thread = thread::Builder::new()
            .name("rmbg-accept".to_string())
            .spawn(move || self.serve())?;
        Ok(ServerHandle {
            address,
            http,
            thread,
        })
    }
}

/// Running server started with [`Server::spawn`]
pub struct ServerHandle {
    address: SocketAddr,
    http: Arc<tiny_http::Server>,
    thread: JoinHandle<Result<()>>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Connectable address of the server
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Stop receiving requests and wait for the receive loop to return
    ///
    /// Requests already being handled run to completion on their own threads.
    ///
    /// # Errors
    /// The receive loop's error, or `Internal` if it panicked
    pub fn shutdown(self) -> Result<()> {
        self.http.unblock();
        self.thread
            .join()
            .map_err(|_| BgRemovalError::internal("Accept thread panicked"))?
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|e| BgRemovalError::invalid_config(format!("Cannot resolve {address}: {e}")))?
        .next()
        .ok_or_else(|| BgRemovalError::invalid_config(format!("No address found for {address}")))
}

/// Bind through tokio's socket builder so `SO_REUSEADDR` can be set before `bind`
fn bind_listener(address: SocketAddr, reuse_address: bool) -> Result<TcpListener> {
    // Reuse the caller's runtime when there is one; dropping a runtime inside
    // another one's context panics
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(_) => None,
        Err(_) => Some(
            tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()?,
        ),
    };
    let _context = runtime.as_ref().map(tokio::runtime::Runtime::enter);

    let socket = if address.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(reuse_address)?;
    socket
        .bind(address)
        .map_err(|e| BgRemovalError::file_io_error("bind", address.to_string(), &e))?;

    let listener = socket.listen(1024)?.into_std()?;
    listener.set_nonblocking(false)?;
    Ok(listener)
}

fn connectable_address(local: SocketAddr) -> SocketAddr {
    match local {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from(([127, 0, 0, 1], v4.port()))
        },
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, v6.port()))
        },
        other => other,
    }
}

fn handle_request(
    mut request: Request,
    router: &Router,
    in_flight: &Arc<AtomicUsize>,
    limits: RequestLimits,
) {
    let peer = request
        .remote_addr()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);
    let method = request.method().clone();
    let url = request.url().to_string();
    let _span = span!(Level::DEBUG, "request", peer = %peer, method = method.as_str()).entered();
    let start = Instant::now();

    let Some(_guard) = InFlightGuard::acquire(in_flight, limits.max_concurrent_requests) else {
        warn!("Rejecting {} {} from {}: server busy", method.as_str(), url, peer);
        let discarded = http::discard_body(&mut request, limits.max_body_bytes);
        debug!("Discarded {} body bytes before replying 503", discarded);
        let reply = Reply::text(503, "Server busy, retry later")
            .with_header("Retry-After", "1".to_string());
        send(request, reply, &peer);
        return;
    };

    let body = match http::read_body(&mut request, limits.max_body_bytes) {
        Ok(body) => body,
        Err(BgRemovalError::Io(e)) => {
            debug!("Reading request from {} failed: {}", peer, e);
            return;
        },
        Err(e) => {
            warn!("Bad request from {}: {}", peer, e);
            send(request, Reply::from_error(&e), &peer);
            return;
        },
    };

    let reply = panic::catch_unwind(AssertUnwindSafe(|| router.handle(&method, &url, &body)))
        .unwrap_or_else(|_| {
            error!("Handler panicked on {} {}", method.as_str(), url);
            Reply::text(500, http::reason_phrase(500))
        });

    info!(
        "{} {} {} -> {} ({} bytes, {}ms)",
        peer,
        method.as_str(),
        url,
        reply.status,
        reply.body.len(),
        start.elapsed().as_millis()
    );
    send(request, reply, &peer);
}

fn send(request: Request, reply: Reply, peer: &str) {
    if let Err(e) = request.respond(reply.into_response()) {
        debug!("Failed to write response to {}: {}", peer, e);
    }
}
