use std::{
    cell::RefCell,
    io,
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use crate::{
    engine::{Engine, MemoryEngine},
    scheduler::{Handoff, Scheduler, SchedulerConfig, SchedulerError},
};

use super::{
    Acceptor, AsyncTransport, Connection, ErrorCode, Request, Response, WireError,
    server_handshake,
};

/// How often the admin loop checks for shutdown.
pub const ADMIN_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("acceptor failed: {0}")]
    AcceptorFailed(String),
}

/// Thread-safe switch that stops a running [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-session data kept in the serving task's locals.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    pub requests: u64,
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    address: SocketAddr,
    config: SchedulerConfig,
    shutdown: ShutdownHandle,
    max_values: Option<usize>,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: SchedulerConfig) -> Result<Self, ServerError> {
        Self::from_listener(TcpListener::bind(addr)?, config)
    }

    /// Serves connections accepted from an already bound `listener`.
    pub fn from_listener(listener: TcpListener, config: SchedulerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let address = listener.local_addr()?;

        Ok(Self {
            listener,
            address,
            config,
            shutdown: ShutdownHandle::default(),
            max_values: None,
        })
    }

    /// Caps the number of stored values. Puts of new keys beyond it fail
    /// with [`ErrorCode::Engine`].
    pub fn max_values(mut self, max_values: usize) -> Self {
        self.max_values = Some(max_values);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves connections on the calling thread until shut down.
    ///
    /// The listener is closed by the time this returns.
    ///
    /// # Errors
    /// [`ServerError::AcceptorFailed`] if the acceptor thread gave up.
    pub fn run(self) -> Result<(), ServerError> {
        info!("listening at {}", self.address);
        let scheduler = Scheduler::new(self.config)?;
        let engine = match self.max_values {
            Some(max_values) => MemoryEngine::with_capacity(max_values),
            None => MemoryEngine::new(),
        };
        let state = Rc::new(ServerState::new(engine));

        let handoffs = Rc::clone(&state);
        scheduler.on_handoff(move |sched, handoff| handoffs.on_handoff(sched, handoff));
        let acceptor = Acceptor::spawn(self.listener, scheduler.notifier())?;

        let result = scheduler.run(admin_loop(scheduler.clone(), Rc::clone(&state), self.shutdown));
        acceptor.stop();
        scheduler.shutdown();
        info!("stopped with {} stored value(s)", state.engine.borrow().len());
        result
    }
}

#[derive(Default)]
struct ServerState {
    engine: RefCell<MemoryEngine>,
    acceptor_failure: RefCell<Option<String>>,
}

impl ServerState {
    fn new(engine: MemoryEngine) -> Self {
        Self {
            engine: RefCell::new(engine),
            acceptor_failure: RefCell::default(),
        }
    }

    fn on_handoff(self: &Rc<Self>, sched: &Scheduler, handoff: Handoff) {
        match handoff {
            Handoff::Accepted { stream, peer } => {
                let transport = match AsyncTransport::new(sched, stream) {
                    Ok(transport) => transport,
                    Err(e) => {
                        warn!("failed to set up session with {peer}: {e}");
                        return;
                    }
                };

                let state = Rc::clone(self);
                match sched.spawn(move |s| serve_connection(s, state, transport)) {
                    Ok(id) => info!("{peer} connected, served by task {id}"),
                    Err(e) => error!("rejecting {peer}: {e}"),
                }
            }
            Handoff::AcceptorFailed(e) => {
                error!("acceptor stopped: {e}");
                self.acceptor_failure.replace(Some(e.to_string()));
            }
        }
    }
}

async fn admin_loop(
    scheduler: Scheduler,
    state: Rc<ServerState>,
    shutdown: ShutdownHandle,
) -> Result<(), ServerError> {
    loop {
        if shutdown.is_shutdown() {
            break;
        }
        if let Some(reason) = state.acceptor_failure.take() {
            return Err(ServerError::AcceptorFailed(reason));
        }
        scheduler.sleep_for(ADMIN_TICK).await;
    }

    info!("shutting down with {} live session(s)", scheduler.live_tasks());
    scheduler.for_each_task(|task, locals| {
        if let Some(session) = locals.get::<SessionInfo>() {
            debug!(
                "dropping {} ({}): {} request(s) from {}",
                task.name, task.state, session.requests, session.peer
            );
        }
    });
    Ok(())
}

async fn serve_connection(sched: Scheduler, state: Rc<ServerState>, transport: AsyncTransport) {
    let peer = transport.peer_addr();
    sched.locals(|locals| locals.insert(SessionInfo { peer, requests: 0 }));

    let mut conn = Connection::new(transport);
    match serve_requests(&sched, &state, &mut conn).await {
        Ok(()) => info!("{peer} closed the session"),
        Err(e) if e.is_lost_connection() => info!("{peer} disconnected"),
        Err(e) => warn!("session with {peer} failed: {e}"),
    }

    if let Err(e) = conn.close() {
        debug!("failed to close session with {peer}: {e}");
    }
}

async fn serve_requests(
    sched: &Scheduler,
    state: &ServerState,
    conn: &mut Connection<AsyncTransport>,
) -> Result<(), WireError> {
    server_handshake(conn).await?;

    loop {
        let request = conn.get::<Request>().await?;
        trace!("{} sent {request:?}", sched.current());
        sched.locals(|locals| {
            if let Some(session) = locals.get_mut::<SessionInfo>() {
                session.requests += 1;
            }
        });

        let closing = request == Request::Close;
        let response = respond(sched, state, request).await;
        conn.put(&response)?;
        conn.flush().await?;

        if closing {
            return Ok(());
        }
        sched.maybe_yield().await;
    }
}

async fn respond(sched: &Scheduler, state: &ServerState, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Echo(value) => Response::Echo(value),
        Request::Put { key, .. } if key.is_empty() => {
            Response::error(ErrorCode::Request, "key must not be empty")
        }
        Request::Put { key, value } => match state.engine.borrow_mut().put(key, value) {
            Ok(()) => Response::Stored,
            Err(e) => Response::error(ErrorCode::Engine, e.to_string()),
        },
        Request::Get { key } => match state.engine.borrow().get(&key) {
            Some(value) => Response::Found(value),
            None => Response::Missing,
        },
        Request::Sleep { millis } if millis < 0 => {
            Response::error(ErrorCode::Request, "sleep duration must not be negative")
        }
        Request::Sleep { millis } => {
            sched.sleep_for(Duration::from_millis(millis as u64)).await;
            Response::Slept
        }
        Request::Close => Response::Closed,
    }
}
