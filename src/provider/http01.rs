use std::{
    collections::HashMap, convert::Infallible, future::ready, net::SocketAddr, net::TcpListener,
    sync::Arc,
};

use actix_http::{body::BoxBody, HttpService, Method, Request, Response, StatusCode};
use actix_server::{Server, ServerHandle};
use async_trait::async_trait;
use eyre::WrapErr as _;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;

use crate::acme::{ChallengeSolver, ChallengeType};

const CHALLENGE_PATH: &str = "/.well-known/acme-challenge/";

type Tokens = Arc<SyncMutex<HashMap<String, String>>>;

struct Running {
    handle: ServerHandle,
    addr: SocketAddr,
}

/// Built-in HTTP-01 responder.
///
/// Listens while at least one challenge is presented and stops once the last one is cleaned up.
/// Shared by every request using the `webserver` provider, so the listen address is bound once.
pub struct Http01Server {
    listen_address: String,
    tokens: Tokens,
    running: Mutex<Option<Running>>,
}

impl Http01Server {
    pub fn new(listen_address: &str) -> Self {
        Http01Server {
            listen_address: listen_address.to_owned(),
            tokens: Tokens::default(),
            running: Mutex::new(None),
        }
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|running| running.addr)
    }

    fn start(&self) -> eyre::Result<Running> {
        let lst = TcpListener::bind(&self.listen_address)
            .wrap_err_with(|| format!("failed to listen on {}", self.listen_address))?;
        let addr = lst.local_addr()?;

        let tokens = Arc::clone(&self.tokens);

        let server = Server::build()
            .listen("acme-http-01", lst, move || {
                let tokens = Arc::clone(&tokens);

                HttpService::build()
                    .finish(move |req| ready(Ok::<_, Infallible>(respond(&req, &tokens))))
                    .tcp()
            })?
            .workers(1)
            .disable_signals()
            .run();

        let handle = server.handle();
        tokio::spawn(server);

        log::info!("http-01 responder listening on {addr}");

        Ok(Running { handle, addr })
    }
}

fn respond(req: &Request, tokens: &Tokens) -> Response<BoxBody> {
    let key_auth = match (req.method(), req.path().strip_prefix(CHALLENGE_PATH)) {
        (&Method::GET, Some(token)) => tokens.lock().get(token).cloned(),
        _ => None,
    };

    match key_auth {
        Some(key_auth) => {
            log::debug!("answered http-01 path={}", req.path());
            Response::build(StatusCode::OK)
                .content_type("text/plain")
                .body(key_auth)
                .map_into_boxed_body()
        }

        None => Response::build(StatusCode::NOT_FOUND)
            .finish()
            .map_into_boxed_body(),
    }
}

#[async_trait]
impl ChallengeSolver for Http01Server {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Http01
    }

    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> eyre::Result<()> {
        self.tokens.lock().insert(token.to_owned(), key_auth.to_owned());

        let mut running = self.running.lock().await;

        if running.is_none() {
            match self.start() {
                Ok(started) => *running = Some(started),
                Err(err) => {
                    self.tokens.lock().remove(token);
                    return Err(err);
                }
            }
        }

        log::info!("presented http-01 domain={domain} via built-in responder");

        Ok(())
    }

    async fn clean_up(&self, domain: &str, token: &str, _key_auth: &str) -> eyre::Result<()> {
        self.tokens.lock().remove(token);

        let mut running = self.running.lock().await;

        if self.tokens.lock().is_empty() {
            if let Some(stopped) = running.take() {
                stopped.handle.stop(true).await;
                log::info!("http-01 responder on {} stopped", stopped.addr);
            }
        }

        log::debug!("cleaned up http-01 domain={domain}");

        Ok(())
    }
}
