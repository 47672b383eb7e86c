//! The HTTP inference server.
//!
//! Every connection is served on its own thread and carries exactly one request. All threads share
//! one [`Recognizer`]; the per-session frame windows it keeps are the only mutable state.

pub mod api;
pub mod http;

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;

use crate::recognizer::Recognizer;
use crate::timer::{RateCounter, Timer};
use http::{HttpError, Request, Response};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const BUSY_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connections served at once unless [`Server::with_max_connections`] says otherwise.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    slots: Arc<Slots>,
}

/// Counts the connections currently being served.
struct Slots {
    active: AtomicUsize,
    limit: usize,
}

struct SlotGuard(Arc<Slots>);

impl Slots {
    fn new(limit: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            limit,
        }
    }

    fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.limit).then_some(active + 1)
            })
            .ok()
            .map(|_| SlotGuard(self.clone()))
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Shared {
    recognizer: Recognizer,
    max_body_bytes: usize,
    requests: RateCounter,
    t_decode: Timer,
}

impl Server {
    /// Binds the listening socket.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        recognizer: Recognizer,
        max_body_bytes: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).context("failed to bind listening socket")?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                recognizer,
                max_body_bytes,
                requests: RateCounter::new("requests", Duration::from_secs(10)),
                t_decode: Timer::new("decode"),
            }),
            slots: Arc::new(Slots::new(DEFAULT_MAX_CONNECTIONS)),
        })
    }

    /// Limits the number of connections served at once. Connections beyond the limit are answered
    /// with 503 right away.
    pub fn with_max_connections(mut self, limit: usize) -> Self {
        self.slots = Arc::new(Slots::new(limit.max(1)));
        self
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until accepting fails.
    pub fn run(self) -> anyhow::Result<()> {
        log::info!("listening on http://{}", self.local_addr()?);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            let Some(slot) = self.slots.try_acquire() else {
                log::warn!(
                    "rejecting connection: {} connections already open",
                    self.slots.limit
                );
                reject_busy(&stream);
                continue;
            };
            let shared = self.shared.clone();
            thread::Builder::new()
                .name("handsign-conn".into())
                .spawn(move || {
                    shared.serve(stream);
                    drop(slot);
                })
                .context("failed to spawn connection thread")?;
        }
        Ok(())
    }
}

fn reject_busy(stream: &TcpStream) {
    let result = stream
        .set_write_timeout(Some(BUSY_WRITE_TIMEOUT))
        .and_then(|()| Response::error(503, "server busy").write_to(BufWriter::new(stream)));
    if let Err(e) = result {
        log::debug!("failed to send 503: {e}");
    }
}

impl Shared {
    fn serve(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string());
        if let Err(e) = self.serve_impl(stream) {
            log::debug!("connection from {peer}: {e:#}");
        }
    }

    fn serve_impl(&self, stream: TcpStream) -> anyhow::Result<()> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut reader = BufReader::new(stream.try_clone()?);

        let response = match Request::read(&mut reader, self.max_body_bytes) {
            Ok(request) => {
                log::debug!("{:?} {}", request.method, request.path);
                let response = api::handle(&self.recognizer, &self.t_decode, &request);
                let mut timers = vec![&self.t_decode];
                timers.extend(self.recognizer.timers());
                self.requests.tick_with(timers);
                response
            }
            Err(e) => match e.downcast::<HttpError>() {
                Ok(http) => Response::error(http.status, &http.message),
                Err(e) => return Err(e),
            },
        };

        log::trace!("responding with status {}", response.status);
        response.write_to(BufWriter::new(&stream))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_released_on_drop() {
        let slots = Arc::new(Slots::new(2));
        let a = slots.try_acquire().unwrap();
        let b = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());

        drop(a);
        let c = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());

        drop((b, c));
        assert_eq!(slots.active.load(Ordering::Acquire), 0);
    }
}
