//! End-to-end exchanges against a real server on 127.0.0.1.
#![cfg(unix)]

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lrpc::{
    ClientConfig, Error, Handle, HostError, NativeFormat, Namespace, Server, ServerConfig, Value,
};
use lrpc_proto::{Command, Status, Tag, WireFormat, codec};

fn namespace() -> Namespace {
    let mut ns = Namespace::new();
    ns.register("add", |args| {
        let sum = args.iter().filter_map(Value::as_f64).sum::<f64>();
        Ok(vec![Value::from(sum)])
    })
    .register("echo", |args| Ok(args))
    .register("fail", |_| Err(HostError::failed("deliberate")))
    .insert("a.b.x", 1);
    ns
}

fn config() -> ServerConfig {
    ServerConfig::default()
        .address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(0)
        .communication_timeout(Some(Duration::from_secs(5)))
}

struct Running {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<lrpc::Result<()>>,
}

impl Running {
    fn start(configure: impl FnOnce(&mut Server<Namespace>)) -> Self {
        Self::start_with(&config(), configure)
    }

    fn start_with(config: &ServerConfig, configure: impl FnOnce(&mut Server<Namespace>)) -> Self {
        let mut server = Server::bind(config, namespace()).unwrap();
        configure(&mut server);
        let addr = server.local_addr().unwrap();
        let stop = server.stop_flag();
        let thread = thread::spawn(move || server.run());
        Self { addr, stop, thread }
    }

    fn client(&self) -> Handle {
        Handle::connect(self.addr, ClientConfig::default()).unwrap()
    }

    /// Raw socket that has completed the handshake in the host format.
    fn raw(&self) -> TcpStream {
        let mut s = TcpStream::connect(self.addr).unwrap();
        s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        s.write_all(&[Command::Connect.as_u8()]).unwrap();
        s.write_all(&NativeFormat::host().header().encode()).unwrap();
        let mut reply = [0u8; 8];
        s.read_exact(&mut reply).unwrap();
        s
    }

    /// Stops the loop; a throwaway connection wakes the wait.
    fn stop(self) -> lrpc::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        let _ = TcpStream::connect(self.addr);
        self.thread.join().unwrap()
    }
}

#[test]
fn call_add() {
    let server = Running::start(|_| {});
    let h = server.client();
    let out = h
        .index("add")
        .unwrap()
        .call(&[Value::from(3), Value::from(4)])
        .unwrap();
    assert_eq!(out, vec![Value::from(7)]);
    let out = h
        .index("add")
        .unwrap()
        .call(&[Value::float(2.0), Value::float(3.0)])
        .unwrap();
    assert_eq!(out, vec![Value::float(5.0)]);

    let err = h.index("missing").unwrap().call(&[]).unwrap_err();
    assert_eq!(err.to_string(), "undefined function: missing");
    let err = h.index("fail").unwrap().call(&[]).unwrap_err();
    assert!(matches!(err, Error::Remote { code: 2, .. }));

    // Connection survives remote errors.
    let out = h.index("echo").unwrap().call(&[Value::from("hi")]).unwrap();
    assert_eq!(out, vec![Value::from("hi")]);
    server.stop().unwrap();
}

#[test]
fn unsupported_command_drops_worker() {
    let server = Running::start(|_| {});
    let mut raw = server.raw();
    raw.write_all(&[99]).unwrap();

    let mut status = [0u8; 1];
    raw.read_exact(&mut status).unwrap();
    assert_eq!(status[0], Status::UnsupportedCommand.as_u8());
    // The worker was removed and its socket closed.
    let mut rest = Vec::new();
    assert_eq!(raw.read_to_end(&mut rest).unwrap(), 0);

    // Others are unaffected.
    let h = server.client();
    assert_eq!(
        h.index("a").unwrap().index("b").unwrap().index("x").unwrap().get().unwrap(),
        Value::from(1)
    );
    server.stop().unwrap();
}

#[test]
fn set_then_get() {
    let server = Running::start(|_| {});
    let h = server.client();
    let ab = h.index("a").unwrap().index("b").unwrap();
    ab.set("c", 42).unwrap();
    assert_eq!(ab.index("c").unwrap().get().unwrap(), Value::from(42));
    assert_eq!(
        ab.index("c").unwrap().index("get").unwrap().call(&[]).unwrap(),
        vec![Value::from(42)]
    );

    h.set("greeting", "hello").unwrap();
    assert_eq!(h.index("greeting").unwrap().get().unwrap(), Value::from("hello"));
    assert_eq!(h.index("nothing").unwrap().get().unwrap(), Value::Nil);

    let err = h.index("nothing").unwrap().set("k", 1).unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));
    server.stop().unwrap();
}

#[test]
fn remote_references_resolve_on_server() {
    let server = Running::start(|_| {});
    let h = server.client();
    let x = h.index("a").unwrap().index("b").unwrap().index("x").unwrap();
    let out = h
        .index("add")
        .unwrap()
        .call(&[x.to_value(), Value::from(10)])
        .unwrap();
    assert_eq!(out, vec![Value::from(11)]);
    server.stop().unwrap();
}

#[test]
fn clients_interleave() {
    let server = Running::start(|_| {});
    let h1 = server.client();
    let h2 = server.client();
    for i in 0..5 {
        let a = h1.index("add").unwrap().call(&[Value::from(i), Value::from(1)]).unwrap();
        let b = h2.index("add").unwrap().call(&[Value::from(i), Value::from(2)]).unwrap();
        assert_eq!(a, vec![Value::from(i + 1)]);
        assert_eq!(b, vec![Value::from(i + 2)]);
    }
    h1.close();
    h1.close();
    assert!(h2.reconnect().is_ok());
    assert_eq!(h2.index("echo").unwrap().call(&[]).unwrap(), vec![]);
    server.stop().unwrap();
}

#[test]
fn server_rejects_other_versions() {
    let server = Running::start(|_| {});
    let mut s = TcpStream::connect(server.addr).unwrap();
    s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut header = NativeFormat::host().header().encode();
    header[4] = 2;
    s.write_all(&[Command::Connect.as_u8()]).unwrap();
    s.write_all(&header).unwrap();
    let mut rest = Vec::new();
    assert_eq!(s.read_to_end(&mut rest).unwrap(), 0);

    // The loop keeps accepting.
    let h = server.client();
    assert!(h.is_open());
    server.stop().unwrap();
}

#[test]
fn client_rejects_other_versions() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let fake = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        let mut req = [0u8; 9];
        s.read_exact(&mut req).unwrap();
        let mut reply = NativeFormat::host().header().encode();
        reply[4] = 9;
        s.write_all(&reply).unwrap();
    });

    let err = Handle::connect(addr, ClientConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Header(_)));
    assert!(err.is_fatal());
    fake.join().unwrap();
}

/// Sends a CALL whose single argument carries an unknown type tag.
fn poison(server: &Running) {
    let fmt = WireFormat::default();
    let mut raw = server.raw();
    raw.write_all(&[Command::Call.as_u8()]).unwrap();
    let mut ready = [0u8; 1];
    raw.read_exact(&mut ready).unwrap();
    assert_eq!(ready[0], Status::Ready.as_u8());

    let mut buf = Vec::new();
    codec::write_string(&mut buf, b"echo", fmt).unwrap();
    codec::write_u32(&mut buf, 1, fmt).unwrap();
    buf.push(Tag::BlobEnd.as_u8() + 100);
    raw.write_all(&buf).unwrap();
    let mut rest = Vec::new();
    let _ = raw.read_to_end(&mut rest);
}

#[test]
fn fatal_error_without_handler_stops_server() {
    let server = Running::start(|_| {});
    poison(&server);
    let err = server.thread.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::UnknownTag(107)));
}

#[test]
fn fatal_error_with_handler_keeps_serving() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let server = Running::start(move |s| s.on_error(move |e| sink.lock().unwrap().push(e.code())));
    poison(&server);

    let h = server.client();
    let out = h.index("add").unwrap().call(&[Value::from(1), Value::from(1)]).unwrap();
    assert_eq!(out, vec![Value::from(2)]);
    assert_eq!(*seen.lock().unwrap(), [i32::MAX - 102]);
    server.stop().unwrap();
}

/// Polls `peek` until it reports work or two seconds pass.
fn peek_soon(server: &mut Server<Namespace>) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if server.peek().unwrap() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn peek_tracks_pending_work() {
    let fmt = WireFormat::default();
    let mut server = Server::bind(&config(), namespace()).unwrap();
    let addr = server.local_addr().unwrap();
    assert!(!server.peek().unwrap());

    // Handshake bytes wait in the kernel until the cycle accepts.
    let mut raw = TcpStream::connect(addr).unwrap();
    raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    raw.write_all(&[Command::Connect.as_u8()]).unwrap();
    raw.write_all(&NativeFormat::host().header().encode()).unwrap();
    assert!(peek_soon(&mut server));
    server.run_once().unwrap();
    let mut reply = [0u8; 8];
    raw.read_exact(&mut reply).unwrap();
    assert_eq!(server.workers(), 1);
    assert!(!server.peek().unwrap());

    server.host_mut().insert("a.b.x", 2);
    let mut req = vec![Command::Get.as_u8()];
    codec::write_string(&mut req, b"a.b.x", fmt).unwrap();
    raw.write_all(&req).unwrap();
    assert!(peek_soon(&mut server));
    server.run_once().unwrap();

    let mut ready = [0u8; 1];
    raw.read_exact(&mut ready).unwrap();
    assert_eq!(ready[0], Status::Ready.as_u8());
    assert_eq!(codec::decode(&mut raw, fmt).unwrap(), Value::from(2));
    assert!(!server.peek().unwrap());

    server.close();
    assert!(matches!(server.peek(), Err(Error::Closed)));
}

#[test]
fn stalled_reply_times_out_and_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (done, release) = mpsc::channel::<()>();
    let fake = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        let mut req = [0u8; 9];
        s.read_exact(&mut req).unwrap();
        s.write_all(&NativeFormat::host().header().encode()).unwrap();
        let mut cmd = [0u8; 1];
        s.read_exact(&mut cmd).unwrap();
        assert_eq!(cmd[0], Command::Call.as_u8());
        s.write_all(&[Status::Ready.as_u8()]).unwrap();
        // Never answers; holds the socket until the client is done.
        let _ = release.recv();
    });

    let config = ClientConfig::default().wait_timeout(Some(Duration::from_millis(200)));
    let h = Handle::connect(addr, config).unwrap();
    let started = Instant::now();
    let err = h.index("add").unwrap().call(&[Value::from(1)]).unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert!(!err.is_fatal());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!h.is_open());
    assert!(matches!(h.index("add").unwrap().get(), Err(Error::Closed)));

    done.send(()).unwrap();
    fake.join().unwrap();
}

#[test]
fn stalled_worker_is_swept() {
    let config = config().communication_timeout(Some(Duration::from_millis(300)));
    let server = Running::start_with(&config, |_| {});
    let mut raw = server.raw();
    raw.write_all(&[Command::Call.as_u8()]).unwrap();
    let mut ready = [0u8; 1];
    raw.read_exact(&mut ready).unwrap();
    assert_eq!(ready[0], Status::Ready.as_u8());
    // Half of the path length, then silence.
    raw.write_all(&[0, 0]).unwrap();

    // The server gives up on the stalled worker and closes it.
    let mut rest = Vec::new();
    assert_eq!(raw.read_to_end(&mut rest).unwrap(), 0);

    let h = server.client();
    let out = h.index("add").unwrap().call(&[Value::from(2), Value::from(3)]).unwrap();
    assert_eq!(out, vec![Value::from(5)]);
    server.stop().unwrap();
}
