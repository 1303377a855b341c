#![allow(dead_code)]

use bytes::BytesMut;
use kvloop::*;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

/// In-process server on an ephemeral loopback port, stopped on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    join: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::with_config(Config {
            listen_addr: "127.0.0.1:0".into(),
            ..Config::default()
        })
    }

    pub fn with_config(config: Config) -> Self {
        let server = Server::bind(config).expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let shutdown = server.shutdown_handle();
        let join = std::thread::spawn(move || server.run());
        Self {
            addr,
            shutdown,
            join: Some(join),
        }
    }

    pub fn client(&self) -> Client {
        Client::connect(self.addr)
    }

    /// Signal shutdown and wait for `run` to return
    pub fn stop(mut self) -> anyhow::Result<()> {
        self.shutdown.shutdown();
        self.join.take().unwrap().join().expect("server thread panicked")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct Client {
    stream: TcpStream,
    reader: FrameReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("Failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .expect("Failed to set read timeout");
        let reader = FrameReader::new(stream.try_clone().unwrap());
        Self { stream, reader }
    }

    pub fn send(&mut self, args: &[&[u8]]) {
        let mut buf = BytesMut::new();
        write_command(args, &mut buf);
        self.send_raw(&buf);
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("Failed to write command");
    }

    /// Next reply; `None` once the server has closed the connection
    pub fn read(&mut self) -> Option<Frame> {
        self.reader.read_frame().expect("Failed to read reply")
    }

    pub fn call(&mut self, args: &[&[u8]]) -> Frame {
        self.send(args);
        self.read().expect("connection closed")
    }
}

pub fn ok() -> Frame {
    Frame::Simple("OK".into())
}

pub fn simple(s: &str) -> Frame {
    Frame::Simple(s.into())
}

/// Value bytes of a GET reply, whichever string framing was used
pub fn value_of(frame: Frame) -> Vec<u8> {
    match frame {
        Frame::Simple(s) => s.into_bytes(),
        Frame::Bulk(b) => b.to_vec(),
        other => panic!("unexpected reply {:?}", other),
    }
}
