use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    time::Duration,
};

use crate::{SensorSession, SessionContext};

#[derive(Error, Debug)]
pub enum AcceptorError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
}

// Back-off after a failed accept, e.g. when out of file descriptors
const ACCEPT_RETRY_MILLIS: u64 = 100;

/// Observable count of live sensor sessions
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions(Arc<AtomicUsize>);

impl ActiveSessions {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Decrements the session count when the session task finishes,
/// however it finishes
struct SessionSlot(ActiveSessions);

impl SessionSlot {
    fn claim(active: &ActiveSessions) -> Self {
        active.0.fetch_add(1, Ordering::AcqRel);
        Self(active.clone())
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// [`Acceptor`] listens for sensor connections and hands each one to its
/// own [`SensorSession`] task, returning straight away to accept the next.
///
/// Connections are not limited by default. If `max_sessions` is set,
/// connections arriving while that many sessions are live are dropped
pub struct Acceptor {
    listener: TcpListener,
    ctx: SessionContext,
    max_sessions: Option<usize>,
    active: ActiveSessions,
}

impl Acceptor {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        ctx: SessionContext,
        max_sessions: Option<usize>,
    ) -> Result<Self, AcceptorError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            log::error!("Unable to bind sensor listener {e:}");
            e
        })?;
        log::info!("Listening for sensors on {:?}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx,
            max_sessions,
            active: ActiveSessions::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AcceptorError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn active_sessions(&self) -> ActiveSessions {
        self.active.clone()
    }

    pub async fn run(self) -> Result<(), AcceptorError> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("Failure to accept sensor connection {e:}");
                    tokio::time::sleep(Duration::from_millis(ACCEPT_RETRY_MILLIS)).await;
                    continue;
                }
            };

            let live = self.active.get();
            if let Some(max) = self.max_sessions {
                if live >= max {
                    log::warn!("Rejecting sensor {peer:}: {live:} of {max:} sessions in use");
                    drop(stream);
                    continue;
                }
            }

            let slot = SessionSlot::claim(&self.active);
            log::debug!("Accepted sensor connection from {peer:}, {} live", live + 1);

            let session = SensorSession::new(peer.to_string(), self.ctx.clone());
            tokio::spawn(async move {
                let _slot = slot;
                if let Err(e) = session.run_tcp(stream).await {
                    log::warn!("Session for {peer:} ended with error: {e:}");
                }
            });
        }
    }
}
