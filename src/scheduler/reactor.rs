//! Readiness polling and the cross-thread handoff queue.
//!
//! The reactor never calls into tasks. Polling only queues readiness events;
//! the scheduler's main loop later hands each event to the session that
//! registered the token and performs whatever `unblock` the session asks for.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    io,
    net::{SocketAddr, TcpStream},
    rc::Weak,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    time::Duration,
};

use log::warn;
use mio::{Events, Interest, Poll, Token, Waker, event::Source};

use super::{SchedulerError, TaskId};

const NOTIFY: Token = Token(0);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the socket reported an error.
    pub closed: bool,
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed() || event.is_error(),
        }
    }
}

/// Completion side of a registered I/O source.
pub(crate) trait IoHandler {
    /// Advances the source's outstanding operation. Returns the task to
    /// unblock once that operation is finished.
    fn on_ready(&self, readiness: Readiness) -> Option<TaskId>;
}

/// Messages posted to the scheduler thread from other OS threads.
#[derive(Debug)]
pub enum Handoff {
    Accepted { stream: TcpStream, peer: SocketAddr },
    AcceptorFailed(io::Error),
}

/// Thread-safe sending half of the scheduler's handoff queue.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<Handoff>,
    waker: Arc<Waker>,
}

impl Notifier {
    /// Queues `handoff` and wakes the scheduler if it is waiting for I/O.
    pub fn hand_off(&self, handoff: Handoff) -> Result<(), SchedulerError> {
        self.sender
            .send(handoff)
            .map_err(|_| SchedulerError::Disconnected)?;
        self.waker.wake()?;
        Ok(())
    }
}

pub(crate) struct Reactor {
    poll: RefCell<Poll>,
    events: RefCell<Events>,
    handlers: RefCell<HashMap<Token, Weak<dyn IoHandler>>>,
    next_token: Cell<usize>,
    ready: RefCell<VecDeque<(Token, Readiness)>>,
    notified: Cell<bool>,
    waker: Arc<Waker>,
    sender: Sender<Handoff>,
    receiver: Receiver<Handoff>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), NOTIFY)?);
        let (sender, receiver) = mpsc::channel();

        Ok(Self {
            poll: RefCell::new(poll),
            events: RefCell::new(Events::with_capacity(EVENT_CAPACITY)),
            handlers: RefCell::new(HashMap::new()),
            next_token: Cell::new(NOTIFY.0 + 1),
            ready: RefCell::new(VecDeque::new()),
            notified: Cell::new(false),
            waker,
            sender,
            receiver,
        })
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            sender: self.sender.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn register<S>(&self, source: &mut S, handler: Weak<dyn IoHandler>) -> io::Result<Token>
    where
        S: Source + ?Sized,
    {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0 + 1);

        self.poll
            .borrow()
            .registry()
            .register(source, token, Interest::READABLE | Interest::WRITABLE)?;
        self.handlers.borrow_mut().insert(token, handler);
        Ok(token)
    }

    pub fn deregister<S>(&self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.handlers.borrow_mut().remove(&token);
        self.ready.borrow_mut().retain(|(t, _)| *t != token);
        self.poll.borrow().registry().deregister(source)
    }

    /// Waits up to `timeout` for readiness and queues what arrives.
    pub fn poll(&self, timeout: Duration) -> io::Result<()> {
        let mut poll = self.poll.borrow_mut();
        let mut events = self.events.borrow_mut();

        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut ready = self.ready.borrow_mut();
        for event in events.iter() {
            if event.token() == NOTIFY {
                self.notified.set(true);
            } else {
                ready.push_back((event.token(), Readiness::from(event)));
            }
        }
        Ok(())
    }

    /// Whether a completion or handoff is waiting to be processed. Checks
    /// the OS without blocking if nothing is queued yet.
    pub fn has_pending(&self) -> bool {
        if self.ready.borrow().is_empty() && !self.notified.get() {
            if let Err(err) = self.poll(Duration::ZERO) {
                warn!("reactor poll failed: {err}");
            }
        }
        !self.ready.borrow().is_empty() || self.notified.get()
    }

    pub fn take_ready(&self) -> Vec<(Weak<dyn IoHandler>, Readiness)> {
        let handlers = self.handlers.borrow();
        self.ready
            .borrow_mut()
            .drain(..)
            .filter_map(|(token, readiness)| {
                handlers
                    .get(&token)
                    .map(|handler| (Weak::clone(handler), readiness))
            })
            .collect()
    }

    pub fn take_handoffs(&self) -> Vec<Handoff> {
        self.notified.set(false);
        self.receiver.try_iter().collect()
    }
}
