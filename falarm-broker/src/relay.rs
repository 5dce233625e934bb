use actix::{Addr, MailboxError};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{channel, Receiver},
    time::{timeout, Duration},
};

use crate::{
    AlarmEvent, BrokerError, BrokerHandle, ClientSubscribe, ClientUnsubscribe, ReadingStore,
};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error")]
    Json(#[from] serde_json::Error),
    #[error("Broker Error")]
    Broker(#[from] BrokerError),
    #[error("Actix mailbox Error")]
    MailError(#[from] MailboxError),
    #[error("Write to monitor timed out")]
    WriteTimeout,
}

/// [`MonitorRelay`] is the TCP face of the broker for monitors. Each
/// connected monitor is subscribed through the [`BrokerHandle`], first
/// receives the current state of every connected sensor, then every
/// event as it is published, one JSON object per line.
///
/// A monitor that stops reading is cut off once a write stalls past the
/// write timeout; it never holds up other monitors or the sensor sessions
pub struct MonitorRelay {
    listener: TcpListener,
    broker: Addr<BrokerHandle>,
    store: Arc<ReadingStore>,
    write_timeout: Duration,
}

impl MonitorRelay {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        broker: Addr<BrokerHandle>,
        store: Arc<ReadingStore>,
        write_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            log::error!("Unable to bind monitor listener {e:}");
            e
        })?;
        log::info!("Listening for monitors on {:?}", listener.local_addr()?);

        Ok(Self {
            listener,
            broker,
            store,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), RelayError> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("Failure to accept monitor connection {e:}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            log::info!("Monitor connected from {peer:}");

            let broker = self.broker.clone();
            let store = Arc::clone(&self.store);
            let write_timeout = self.write_timeout;
            tokio::spawn(async move {
                match Self::serve_monitor(stream, broker, store, write_timeout).await {
                    Ok(()) => log::info!("Monitor {peer:} disconnected"),
                    Err(e) => log::warn!("Dropping monitor {peer:}: {e:}"),
                }
            });
        }
    }

    async fn serve_monitor(
        stream: TcpStream,
        broker: Addr<BrokerHandle>,
        store: Arc<ReadingStore>,
        write_timeout: Duration,
    ) -> Result<(), RelayError> {
        let (events, receiver) = channel(crate::SUBSCRIBER_QUEUE_DEPTH);
        let handle = broker.send(ClientSubscribe { events }).await??;

        let res = Self::stream_events(stream, receiver, &store, write_timeout).await;

        broker
            .send(ClientUnsubscribe { handle })
            .await
            .map_err(|e| {
                log::error!("Error sending monitor unsubscribe request {e:}");
            })
            .ok();
        res
    }

    async fn stream_events(
        stream: TcpStream,
        mut receiver: Receiver<AlarmEvent>,
        store: &ReadingStore,
        write_timeout: Duration,
    ) -> Result<(), RelayError> {
        let (mut read_half, mut write_half) = stream.into_split();

        // Subscribed before the snapshot is taken, so nothing in between
        // is missed
        for state in store.snapshot() {
            let event = AlarmEvent::ReadingUpdated {
                reading: state.reading,
            };
            write_event(&mut write_half, &event, write_timeout).await?;
        }

        let mut scratch = [0u8; 256];
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => write_event(&mut write_half, &event, write_timeout).await?,
                    None => return Ok(()),
                },
                read = read_half.read(&mut scratch) => match read {
                    Ok(0) => return Ok(()),
                    // monitors have nothing to say, ignore it
                    Ok(_) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }
}

async fn write_event<W: AsyncWrite + Unpin>(
    writer: &mut W,
    event: &AlarmEvent,
    write_timeout: Duration,
) -> Result<(), RelayError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    timeout(write_timeout, writer.write_all(&line))
        .await
        .map_err(|_| RelayError::WriteTimeout)??;
    Ok(())
}
