use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, warn};

use crate::scheduler::{Handoff, Notifier};

/// Consecutive `accept` failures tolerated before the acceptor gives up.
pub const MAX_ACCEPT_RETRIES: usize = 10;

const RETRY_BACKOFF: Duration = Duration::from_millis(10);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// OS thread that blocks in `accept` and hands every new socket to the
/// scheduler thread.
#[derive(Debug)]
pub struct Acceptor {
    thread: JoinHandle<()>,
    address: SocketAddr,
    stopping: Arc<AtomicBool>,
}

impl Acceptor {
    pub fn spawn(listener: TcpListener, notifier: Notifier) -> io::Result<Self> {
        let address = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopping);
        let thread = thread::Builder::new()
            .name("weft-acceptor".into())
            .spawn(move || accept_loop(listener, notifier, flag))?;
        Ok(Self {
            thread,
            address,
            stopping,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Ends the accept loop and joins the thread, which closes the listener.
    /// A blocked `accept` is woken with a throwaway connection.
    pub fn stop(self) {
        self.stopping.store(true, Ordering::SeqCst);

        if !self.thread.is_finished() {
            if let Err(e) = TcpStream::connect_timeout(&wake_address(self.address), WAKE_TIMEOUT) {
                warn!("could not wake the acceptor, leaving it behind: {e}");
                return;
            }
        }
        if self.thread.join().is_err() {
            error!("acceptor thread panicked");
        }
    }
}

/// Address that reaches a listener bound to `address`.
fn wake_address(mut address: SocketAddr) -> SocketAddr {
    if address.ip().is_unspecified() {
        match address {
            SocketAddr::V4(_) => address.set_ip(Ipv4Addr::LOCALHOST.into()),
            SocketAddr::V6(_) => address.set_ip(Ipv6Addr::LOCALHOST.into()),
        }
    }
    address
}

fn accept_loop(listener: TcpListener, notifier: Notifier, stopping: Arc<AtomicBool>) {
    let mut failures = 0;

    while !stopping.load(Ordering::SeqCst) {
        let handoff = match listener.accept() {
            Ok(_) if stopping.load(Ordering::SeqCst) => break,
            Ok((stream, peer)) => {
                failures = 0;
                debug!("accepted connection from {peer}");
                Handoff::Accepted { stream, peer }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                failures += 1;
                if failures <= MAX_ACCEPT_RETRIES {
                    warn!("accept failed ({failures}/{MAX_ACCEPT_RETRIES}): {e}");
                    thread::sleep(RETRY_BACKOFF);
                    continue;
                }
                error!("giving up on accept: {e}");
                Handoff::AcceptorFailed(e)
            }
        };

        let fatal = matches!(handoff, Handoff::AcceptorFailed(_));
        if let Err(e) = notifier.hand_off(handoff) {
            debug!("scheduler gone, acceptor exiting: {e}");
            return;
        }
        if fatal {
            return;
        }
    }
    debug!("acceptor stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::scheduler::Reactor;

    use super::*;

    fn wait_until_finished(acceptor: &Acceptor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !acceptor.is_finished() {
            assert!(Instant::now() < deadline, "acceptor still running");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn gives_up_after_repeated_failures() {
        let reactor = Reactor::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        // Every accept now fails with WouldBlock.
        listener.set_nonblocking(true).unwrap();

        let acceptor = Acceptor::spawn(listener, reactor.notifier()).unwrap();
        wait_until_finished(&acceptor);

        let handoffs = reactor.take_handoffs();
        assert_eq!(handoffs.len(), 1);
        assert!(matches!(handoffs[0], Handoff::AcceptorFailed(_)));
    }

    #[test]
    fn hands_off_accepted_sockets() {
        let reactor = Reactor::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let acceptor = Acceptor::spawn(listener, reactor.notifier()).unwrap();

        let client = TcpStream::connect(address).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let handoffs = loop {
            let handoffs = reactor.take_handoffs();
            if !handoffs.is_empty() {
                break handoffs;
            }
            assert!(Instant::now() < deadline, "no handoff arrived");
            thread::sleep(Duration::from_millis(5));
        };

        match &handoffs[0] {
            Handoff::Accepted { peer, .. } => assert_eq!(*peer, client.local_addr().unwrap()),
            other => panic!("unexpected handoff {other:?}"),
        }
        acceptor.stop();
    }

    #[test]
    fn stop_releases_the_listener() {
        let reactor = Reactor::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let acceptor = Acceptor::spawn(listener, reactor.notifier()).unwrap();
        acceptor.stop();

        assert!(reactor.take_handoffs().is_empty());
        assert!(TcpStream::connect(address).is_err());
    }

    #[test]
    fn wakes_unspecified_addresses_on_loopback() {
        let address: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(wake_address(address), "127.0.0.1:4000".parse().unwrap());

        let address: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        assert_eq!(wake_address(address), address);
    }
}
