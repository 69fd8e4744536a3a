use std::{
    cell::RefCell,
    future::Future,
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use weft::{
    Buffer, Scheduler, SchedulerConfig,
    protocol::{AsyncTransport, BlockingTransport, Connection, Transport, TransportError},
};

/// Runs `task` as a background task against a socket accepted from `peer`,
/// with the main task sleeping until it finishes.
fn serve_one<P, F, Fut, R>(peer: P, task: F) -> R
where
    P: FnOnce(SocketAddr) + Send + 'static,
    F: FnOnce(Scheduler, AsyncTransport) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || peer(addr));
    let (stream, _) = listener.accept().unwrap();

    let sched = Scheduler::new(SchedulerConfig::default()).unwrap();
    let transport = AsyncTransport::new(&sched, stream).unwrap();
    let result = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&result);
    sched
        .spawn(move |s| async move {
            let value = task(s, transport).await;
            *slot.borrow_mut() = Some(value);
        })
        .unwrap();

    let main = sched.clone();
    let done = Rc::clone(&result);
    sched.run(async move {
        let deadline = Instant::now() + Duration::from_secs(10);
        while done.borrow().is_none() {
            assert!(Instant::now() < deadline, "task did not finish");
            main.sleep_for(Duration::from_millis(1)).await;
        }
    });
    sched.shutdown();
    peer.join().unwrap();

    result.take().unwrap()
}

#[test]
fn need_spans_two_segments() {
    let bytes = serve_one(
        |addr| {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&[1; 40]).unwrap();
            thread::sleep(Duration::from_millis(50));
            stream.write_all(&[2; 60]).unwrap();
        },
        |_, transport| async move {
            let mut conn = Connection::new(transport);
            conn.need(100).await.unwrap();
            assert_eq!(conn.buffered(), 100);
            conn.read_exact(100).await.unwrap()
        },
    );

    assert_eq!(&bytes[..40], &[1; 40]);
    assert_eq!(&bytes[40..], &[2; 60]);
}

#[test]
fn read_line_keeps_the_excess() {
    let lines = serve_one(
        |addr| {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"hello\nwor").unwrap();
            thread::sleep(Duration::from_millis(20));
            stream.write_all(b"ld\n").unwrap();
        },
        |_, mut transport| async move {
            let mut first = Buffer::new();
            let mut second = Buffer::new();
            transport.read_line(&mut first, 64).await.unwrap();
            transport.read_line(&mut second, 64).await.unwrap();
            (first.unread().to_vec(), second.unread().to_vec())
        },
    );

    assert_eq!(lines.0, b"hello\n");
    assert_eq!(lines.1, b"world\n");
}

#[test]
fn peer_close_is_lost_connection() {
    let result = serve_one(
        |addr| {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"abc").unwrap();
        },
        |_, transport| async move {
            let mut conn = Connection::new(transport);
            conn.need(4).await
        },
    );

    assert!(matches!(result, Err(TransportError::LostConnection)));
}

#[test]
fn large_writes_complete_through_the_reactor() {
    const SIZE: usize = 4 * 1024 * 1024;

    let (tx, rx) = std::sync::mpsc::channel();
    serve_one(
        move |addr| {
            let mut stream = TcpStream::connect(addr).unwrap();
            let mut total = 0;
            let mut chunk = [0; 64 * 1024];
            loop {
                match stream.read(&mut chunk).unwrap() {
                    0 => break,
                    n => total += n,
                }
            }
            tx.send(total).unwrap();
        },
        |_, mut transport| async move {
            transport.queue(b"header").unwrap();
            transport.write(&vec![7; SIZE]).await.unwrap();
            transport.close().unwrap();
        },
    );

    assert_eq!(rx.recv().unwrap(), SIZE + 6);
}

#[test]
fn closer_unblocks_a_waiting_reader() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        // Holds the connection open until the server side closes it.
        let _ = stream.read(&mut [0; 1]);
    });
    let (stream, _) = listener.accept().unwrap();

    let sched = Scheduler::new(SchedulerConfig::default()).unwrap();
    let transport = AsyncTransport::new(&sched, stream).unwrap();
    let closer = transport.closer();
    let outcome = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&outcome);
    let reader = sched
        .spawn(move |_| async move {
            let mut conn = Connection::new(transport);
            *slot.borrow_mut() = Some(conn.need(1).await);
        })
        .unwrap();

    let main = sched.clone();
    let seen = Rc::clone(&outcome);
    sched.run(async move {
        main.yield_now().await;
        assert_eq!(main.state(reader), Some(weft::TaskState::Blocked));

        closer.close();
        while seen.borrow().is_none() {
            main.yield_now().await;
        }
    });
    sched.shutdown();
    peer.join().unwrap();

    assert!(matches!(
        outcome.take(),
        Some(Err(TransportError::LostConnection))
    ));
}

#[test]
fn blocking_read_times_out_with_a_short_result() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"abc").unwrap();
        thread::sleep(Duration::from_millis(500));
    });

    let mut transport = BlockingTransport::connect(addr, Duration::from_millis(100)).unwrap();
    let sched = Scheduler::new(SchedulerConfig::default()).unwrap();
    let mut dst = Buffer::new();

    let start = Instant::now();
    let got = sched.run(transport.read(&mut dst, 10, 64)).unwrap();

    assert_eq!(got, 3);
    assert_eq!(dst.unread(), b"abc");
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_millis(450));
    peer.join().unwrap();
}

#[test]
fn blocking_write_times_out_when_the_peer_stops_reading() {
    const SIZE: usize = 64 * 1024 * 1024;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (done, wait) = std::sync::mpsc::channel::<()>();
    let peer = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        // Never reads; keeps the socket open until the writer is finished.
        let _ = wait.recv();
    });

    let mut transport = BlockingTransport::connect(addr, Duration::from_millis(200))
        .unwrap()
        .with_max_write(SIZE);
    let sched = Scheduler::new(SchedulerConfig::default()).unwrap();

    let start = Instant::now();
    let result = sched.run(transport.write(&vec![0; SIZE]));

    assert!(matches!(result, Err(TransportError::TimedOut)));
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(5));
    done.send(()).unwrap();
    peer.join().unwrap();
}

#[test]
fn oversized_writes_are_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let _ = listener.accept().unwrap();
    });

    let mut transport = BlockingTransport::connect(addr, Duration::from_secs(1))
        .unwrap()
        .with_max_write(8);
    let sched = Scheduler::new(SchedulerConfig::default()).unwrap();

    transport.queue(b"12345").unwrap();
    let result = sched.run(transport.write(b"6789"));
    assert!(matches!(
        result,
        Err(TransportError::WriteTooLarge { size: 9, limit: 8 })
    ));
    peer.join().unwrap();
}
