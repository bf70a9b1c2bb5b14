use crate::marker::MarkerBoard;
use actix_web::dev::{Service, ServerHandle};
use actix_web::http::header;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, RwLock, Weak};
use std::thread;
use uuid::Uuid;

/// Handed out for every registered board. The url stays valid until the
/// token is dropped (or the board itself is gone).
pub struct Token {
    id: Uuid,
    url: String,
    registry: Weak<RwLock<HashMap<Uuid, Weak<Mutex<MarkerBoard>>>>>,
}

impl Token {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            debug!("dropping board {} from registry", self.id);
            if let Ok(mut items) = registry.write() {
                items.remove(&self.id);
            }
        }
    }
}

#[derive(Default, Clone)]
pub struct Registry {
    url_prefix: Arc<RwLock<String>>,
    items: Arc<RwLock<HashMap<Uuid, Weak<Mutex<MarkerBoard>>>>>,
}

impl Registry {
    pub fn new(url_prefix: &str) -> Self {
        Self {
            url_prefix: Arc::new(RwLock::new(url_prefix.to_string())),
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn set_url_prefix(&self, url_prefix: &str) {
        let mut prefix = self.url_prefix.write().unwrap();
        *prefix = url_prefix.to_string();
    }

    pub fn register(&self, board: Weak<Mutex<MarkerBoard>>) -> Token {
        let id = Uuid::new_v4();
        self.items.write().unwrap().insert(id, board);
        let url_prefix = self.url_prefix.read().unwrap();
        Token {
            id,
            url: format!("{}/boards/{}", *url_prefix, id),
            registry: Arc::downgrade(&self.items),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Mutex<MarkerBoard>>> {
        let items = self.items.read().unwrap();
        items.get(id).and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct AppState {
    registry: Registry,
}

async fn serve_board(
    id: web::Path<String>,
    req: HttpRequest,
    data: web::Data<AppState>,
) -> HttpResponse {
    let board = match Uuid::parse_str(&id)
        .ok()
        .and_then(|uuid| data.registry.get(&uuid))
    {
        Some(board) => board,
        None => return HttpResponse::NotFound().finish(),
    };
    let board = match board.lock() {
        Ok(board) => board,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };

    let client_version = req
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|h| h.to_str().ok())
        .and_then(MarkerBoard::parse_version_string);
    if client_version == Some(board.version()) {
        return HttpResponse::NotModified()
            .insert_header((header::ETAG, board.version_string()))
            .finish();
    }

    HttpResponse::Ok()
        .insert_header((header::ETAG, board.version_string()))
        .json(board.markers())
}

/// Routes of the marker server, mounted under `/{prefix}`.
pub fn routes(cfg: &mut web::ServiceConfig, registry: &Registry, prefix: &str) {
    cfg.app_data(web::Data::new(AppState {
        registry: registry.clone(),
    }))
    .route(
        &format!("/{}/boards/{{id}}", prefix),
        web::get().to(serve_board),
    );
}

/// Serves marker boards to a webview map on a local port.
pub struct MarkerServer {
    host: String,
    port: u16,
    prefix: String,
    handle: Option<thread::JoinHandle<()>>,
    server_handle: Option<ServerHandle>,
    registry: Registry,
}

impl MarkerServer {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            prefix: Uuid::new_v4().to_string(),
            handle: None,
            server_handle: None,
            registry: Registry::new(&format!("http://{}:{}", host, port)),
        }
    }

    pub fn register(&self, board: Weak<Mutex<MarkerBoard>>) -> Token {
        self.registry.register(board)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Starts the server on its own thread and returns once it is bound.
    pub fn start(&mut self) -> Result<()> {
        let host = self.host.clone();
        let port = self.port;
        let prefix = self.prefix.clone();
        let registry = self.registry.clone();

        let (tx, rx) = mpsc::channel::<std::io::Result<(ServerHandle, u16)>>();

        let handle = thread::spawn(move || {
            actix_web::rt::System::new().block_on(async move {
                info!("setting up marker server routes");
                let route_registry = registry.clone();
                let route_prefix = prefix.clone();
                let server = match HttpServer::new(move || {
                    let registry = route_registry.clone();
                    let prefix = route_prefix.clone();
                    App::new()
                        .wrap_fn(|req, srv| {
                            debug!("incoming request: {} {}", req.method(), req.uri());
                            srv.call(req)
                        })
                        .configure(|cfg| routes(cfg, &registry, &prefix))
                })
                .workers(1)
                .bind((host.as_str(), port))
                {
                    Ok(server) => server,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                // port 0 means the OS picked one
                let actual_port = server
                    .addrs()
                    .first()
                    .map(|addr| addr.port())
                    .unwrap_or(port);
                registry.set_url_prefix(&format!("http://{}:{}/{}", host, actual_port, prefix));

                let server = server.run();
                if tx.send(Ok((server.handle(), actual_port))).is_err() {
                    return;
                }
                info!("marker server bound to {}:{}", host, actual_port);
                if let Err(e) = server.await {
                    error!("marker server failed: {}", e);
                }
            });
        });

        let (server_handle, actual_port) = rx.recv()??;
        self.port = actual_port;
        self.server_handle = Some(server_handle);
        self.handle = Some(handle);
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(&mut self) {
        if let Some(server_handle) = self.server_handle.take() {
            pollster::block_on(server_handle.stop(false));
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("marker server thread panicked");
            }
        }
    }
}

impl Drop for MarkerServer {
    fn drop(&mut self) {
        self.stop();
    }
}
