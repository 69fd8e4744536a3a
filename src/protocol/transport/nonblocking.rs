use std::{
    cell::RefCell,
    io::{self, IoSlice, Write},
    net::{Shutdown, SocketAddr},
    rc::{Rc, Weak},
};

use log::{debug, trace, warn};
use mio::{Token, net::TcpStream};

use crate::{
    Buffer,
    scheduler::{IoHandler, Readiness, Scheduler, TaskId},
};

use super::{DEFAULT_MAX_WRITE, READ_CHUNK, Transport, TransportError, check_write, drain_into, line_end};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Read { required: usize },
    Line { max: usize },
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Ready,
    Pending,
    Eof,
}

/// Socket state shared between the transport and its completion handler.
struct Session {
    stream: Option<TcpStream>,
    token: Option<Token>,
    rbuf: Buffer,
    wbuf: Buffer,
    eof: bool,
    op: Option<PendingOp>,
    waiter: Option<TaskId>,
    outcome: Option<Result<(), TransportError>>,
}

impl Session {
    fn new() -> Self {
        Self {
            stream: None,
            token: None,
            rbuf: Buffer::new(),
            wbuf: Buffer::new(),
            eof: false,
            op: None,
            waiter: None,
            outcome: None,
        }
    }

    /// Reads until `done` holds for the read buffer, the socket would block,
    /// or the peer closes.
    fn fill_until(&mut self, done: impl Fn(&Buffer) -> bool) -> Result<Progress, TransportError> {
        loop {
            if done(&self.rbuf) {
                return Ok(Progress::Ready);
            }
            if self.eof {
                return Ok(Progress::Eof);
            }

            let stream = self.stream.as_mut().ok_or(TransportError::LostConnection)?;
            self.rbuf.remove();
            match self.rbuf.read_from(stream, READ_CHUNK) {
                Ok(0) => self.eof = true,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::from_io(e)),
            }
        }
    }

    fn fill(&mut self, required: usize) -> Result<Progress, TransportError> {
        self.fill_until(|buf| buf.available() >= required)
    }

    fn fill_line(&mut self, max: usize) -> Result<Progress, TransportError> {
        self.fill_until(|buf| line_end(buf, max).is_some())
    }

    /// Sends staged output followed by `tail`. Whatever the socket does not
    /// take is staged for the completion handler.
    fn send_gathered(&mut self, tail: &[u8]) -> Result<Progress, TransportError> {
        let mut sent = 0;
        loop {
            if self.wbuf.is_empty() && sent == tail.len() {
                self.wbuf.clear();
                return Ok(Progress::Ready);
            }

            let stream = self.stream.as_mut().ok_or(TransportError::LostConnection)?;
            let slices = [IoSlice::new(self.wbuf.unread()), IoSlice::new(&tail[sent..])];
            match stream.write_vectored(&slices) {
                Ok(0) => return Err(TransportError::LostConnection),
                Ok(n) => {
                    let staged = n.min(self.wbuf.available());
                    self.wbuf.consume(staged);
                    sent += n - staged;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wbuf.remove();
                    self.wbuf.put(&tail[sent..]);
                    return Ok(Progress::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::from_io(e)),
            }
        }
    }

    /// Advances the outstanding operation after the reactor saw `readiness`.
    fn complete(&mut self, readiness: Readiness) -> Option<TaskId> {
        let op = self.op?;
        let result = match op {
            PendingOp::Read { .. } | PendingOp::Line { .. }
                if !readiness.readable && !readiness.closed =>
            {
                return None;
            }
            PendingOp::Write if !readiness.writable && !readiness.closed => return None,
            PendingOp::Read { required } => self.fill(required),
            PendingOp::Line { max } => self.fill_line(max),
            PendingOp::Write => self.send_gathered(&[]),
        };

        match result {
            Ok(Progress::Pending) => None,
            Ok(Progress::Ready | Progress::Eof) => self.finish(Ok(())),
            Err(e) => self.finish(Err(e)),
        }
    }

    fn finish(&mut self, outcome: Result<(), TransportError>) -> Option<TaskId> {
        self.op = None;
        self.outcome = Some(outcome);
        self.waiter.take()
    }
}

impl IoHandler for RefCell<Session> {
    fn on_ready(&self, readiness: Readiness) -> Option<TaskId> {
        // Busy only if the owning task is mid-call, in which case it will
        // observe the socket itself.
        let mut session = self.try_borrow_mut().ok()?;
        trace!("session readiness {readiness:?}");
        session.complete(readiness)
    }
}

fn close_session(session: &RefCell<Session>, scheduler: &Scheduler) {
    let waiter = {
        let mut session = session.borrow_mut();
        let Some(mut stream) = session.stream.take() else {
            return;
        };
        if let Some(token) = session.token.take() {
            if let Err(err) = scheduler.reactor().deregister(&mut stream, token) {
                warn!("failed to deregister session: {err}");
            }
        }
        let _ = stream.shutdown(Shutdown::Both);
        debug!("session closed");

        if session.op.is_some() {
            session.finish(Err(TransportError::LostConnection))
        } else {
            None
        }
    };

    if let Some(waiter) = waiter {
        scheduler.wake(waiter);
    }
}

/// Non-blocking socket transport driven by the scheduler's reactor.
///
/// Operations that cannot complete block the calling task, so the transport
/// must only be used from background tasks.
pub struct AsyncTransport {
    session: Rc<RefCell<Session>>,
    scheduler: Scheduler,
    peer: SocketAddr,
    max_write: usize,
}

impl AsyncTransport {
    /// Takes ownership of an accepted socket and registers it with the
    /// scheduler's reactor.
    pub fn new(scheduler: &Scheduler, stream: std::net::TcpStream) -> Result<Self, TransportError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let mut stream = TcpStream::from_std(stream);
        let session = Rc::new(RefCell::new(Session::new()));
        let handler: Rc<dyn IoHandler> = session.clone();
        let token = scheduler
            .reactor()
            .register(&mut stream, Rc::downgrade(&handler))?;

        {
            let mut state = session.borrow_mut();
            state.stream = Some(stream);
            state.token = Some(token);
        }
        debug!("session with {peer} registered as {token:?}");

        Ok(Self {
            session,
            scheduler: scheduler.clone(),
            peer,
            max_write: DEFAULT_MAX_WRITE,
        })
    }

    pub fn with_max_write(mut self, limit: usize) -> Self {
        self.max_write = limit;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.session.borrow().stream.is_none()
    }

    /// Handle other tasks can use to close this session.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            session: Rc::downgrade(&self.session),
            scheduler: self.scheduler.clone(),
        }
    }

    /// Records `op` and blocks the current task until the completion handler
    /// or a close finishes it.
    async fn wait(&self, op: PendingOp) -> Result<(), TransportError> {
        {
            let mut session = self.session.borrow_mut();
            if session.stream.is_none() {
                return Err(TransportError::LostConnection);
            }
            session.op = Some(op);
            session.waiter = Some(self.scheduler.current());
            session.outcome = None;
        }

        self.scheduler.block().await;

        let mut session = self.session.borrow_mut();
        session.op = None;
        session.waiter = None;
        session.outcome.take().unwrap_or(Ok(()))
    }
}

impl Transport for AsyncTransport {
    async fn read(
        &mut self,
        dst: &mut Buffer,
        required: usize,
        up_to: usize,
    ) -> Result<usize, TransportError> {
        loop {
            let progress = self.session.borrow_mut().fill(required)?;
            if progress != Progress::Pending {
                break;
            }
            self.wait(PendingOp::Read { required }).await?;
        }
        let mut session = self.session.borrow_mut();
        Ok(drain_into(&mut session.rbuf, dst, up_to.max(required)))
    }

    async fn read_line(&mut self, dst: &mut Buffer, max: usize) -> Result<usize, TransportError> {
        loop {
            let progress = self.session.borrow_mut().fill_line(max)?;
            if progress != Progress::Pending {
                break;
            }
            self.wait(PendingOp::Line { max }).await?;
        }
        let mut session = self.session.borrow_mut();
        let n = line_end(&session.rbuf, max).unwrap_or(max);
        Ok(drain_into(&mut session.rbuf, dst, n))
    }

    fn queue(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut session = self.session.borrow_mut();
        check_write(session.wbuf.available(), bytes.len(), self.max_write)?;
        session.wbuf.put(bytes);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut progress = {
            let mut session = self.session.borrow_mut();
            if let Err(e) = check_write(session.wbuf.available(), buf.len(), self.max_write) {
                session.wbuf.clear();
                return Err(e);
            }
            session.send_gathered(buf)?
        };

        while progress == Progress::Pending {
            self.wait(PendingOp::Write).await?;
            progress = self.session.borrow_mut().send_gathered(&[])?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        close_session(&self.session, &self.scheduler);
        Ok(())
    }
}

impl Drop for AsyncTransport {
    fn drop(&mut self) {
        close_session(&self.session, &self.scheduler);
    }
}

/// Closes a session from outside the task that owns it, failing any
/// outstanding operation with lost connection.
#[derive(Clone)]
pub struct SessionCloser {
    session: Weak<RefCell<Session>>,
    scheduler: Scheduler,
}

impl SessionCloser {
    pub fn close(&self) {
        if let Some(session) = self.session.upgrade() {
            close_session(&session, &self.scheduler);
        }
    }
}
