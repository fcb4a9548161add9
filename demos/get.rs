//! Very simple CoAP GET client
//!
//! ```text
//! cargo run --example get -- 192.168.1.33:5683 /sensors/temp
//! ```

use std::io;
use std::net::UdpSocket;
use std::process;
use std::str;
use std::time::{Duration, Instant};

use clap::{App, Arg};
use rand::Rng;

use tinycoap::client::{Handle, Platform, Receiver, Request, Response, Transport};
use tinycoap::msg::{Method, OptionNumber, Type};
use tinycoap::opts::Opt;
use tinycoap::{AsMutSlice, AsSlice, Error, Signal, MAX_PDU_SIZE};

struct Chunk([u8; MAX_PDU_SIZE]);

impl AsSlice for Chunk {
    type Element = u8;

    fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl AsMutSlice for Chunk {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

struct Udp {
    sock: UdpSocket,
    mid: u16,
    token: u16,
}

impl Platform for Udp {
    type Chunk = Chunk;

    fn alloc_block(&mut self) -> Option<Chunk> {
        Some(Chunk([0; MAX_PDU_SIZE]))
    }

    fn free_block(&mut self, _chunk: Chunk) {}

    fn tx_data(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.sock.send(buf).map(drop).map_err(|_| Error::NoResp)
    }

    fn wait_event(&mut self, rx: &mut Receiver<'_>, timeout_ms: u32) -> Result<(), Error> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut buf = [0; 512];

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }

            self.sock
                .set_read_timeout(Some(deadline - now))
                .expect("setting the socket timeout");

            match self.sock.recv(&mut buf) {
                Ok(n) => {
                    rx.packet(self, &buf[..n])?;
                    return Ok(());
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock && e.kind() != io::ErrorKind::TimedOut
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    fn tx_signal(&mut self, signal: Signal) {
        if signal == Signal::TxRetransmit {
            eprintln!("! retransmitting");
        }
    }

    fn message_id(&mut self) -> u16 {
        self.mid = self.mid.wrapping_add(1);
        self.mid
    }

    fn fill_token(&mut self, token: &mut [u8]) {
        self.token = self.token.wrapping_add(1);
        let bytes = [(self.token >> 8) as u8, self.token as u8];
        for (dst, src) in token.iter_mut().zip(bytes.iter().cycle()) {
            *dst = *src;
        }
    }
}

fn main() {
    let matches = App::new("get")
        .arg(
            Arg::with_name("server")
                .help("server address, e.g. 192.168.1.33:5683")
                .required(true)
                .value_name("SERVER"),
        )
        .arg(
            Arg::with_name("path")
                .help("resource path, e.g. /sensors/temp")
                .required(true)
                .value_name("PATH"),
        )
        .get_matches();

    let server = matches.value_of("server").unwrap();
    let path = matches.value_of("path").unwrap();

    let sock = UdpSocket::bind("0.0.0.0:0").expect("binding a local port");
    sock.connect(server).expect("connecting the socket");

    let mut rng = rand::thread_rng();
    let mut p = Udp {
        sock,
        mid: rng.gen(),
        token: rng.gen(),
    };

    let options: Vec<Opt<'_>> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| Opt::new(OptionNumber::UriPath, segment.as_bytes()))
        .collect();

    let mut on_response = |resp: &Response<'_>| {
        eprintln!("<- {}", resp.code);
        if let Ok(s) = str::from_utf8(resp.payload) {
            println!("{}", s);
        } else {
            println!("{:x?}", resp.payload);
        }
    };

    let mut handle = Handle::new("coap", Transport::Udp);
    let mut req = Request {
        ty: Type::Confirmable,
        code: Method::Get.into(),
        tkl: 2,
        payload: &[],
        options: &options,
        callback: Some(&mut on_response),
    };

    if let Err(e) = handle.send(&mut p, &mut req) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
