use std::borrow::Cow;

use futures::future::try_join_all;
use log::{debug, trace};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{COORDINATOR, Gathered, Part, ProcessGroup};
use crate::{
    CommsErr, OnoReceiver, OnoSender, Result,
    msg::{Command, Msg, Payload},
};

/// An owned copy of a received `Msg`.
pub(super) enum Incoming {
    Control(Command),
    Data { meta: Vec<u8>, floats: Vec<f64> },
    Err(String),
}

impl Incoming {
    pub(super) fn kind(&self) -> &'static str {
        match self {
            Incoming::Control(_) => "control",
            Incoming::Data { .. } => "data",
            Incoming::Err(_) => "err",
        }
    }
}

/// A bidirectional channel to one peer.
pub(super) struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(super) peer: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    buf: Vec<u64>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(super) fn new(peer: usize, rx: R, tx: W) -> Self {
        let (rx, tx) = crate::channel(rx, tx);

        Self {
            peer,
            rx,
            tx,
            buf: Vec::new(),
        }
    }

    pub(super) async fn send(&mut self, msg: &Msg<'_>) -> Result<()> {
        self.tx.send(msg).await?;
        Ok(())
    }

    pub(super) async fn recv(&mut self) -> Result<Incoming> {
        let Self { rx, buf, .. } = self;

        let incoming = match rx.recv_into(buf).await? {
            Msg::Control(cmd) => Incoming::Control(cmd),
            Msg::Data(Payload { meta, floats }) => Incoming::Data {
                meta: meta.to_vec(),
                floats: floats.to_vec(),
            },
            Msg::Err(detail) => Incoming::Err(detail.into_owned()),
        };

        Ok(incoming)
    }
}

/// A process group with a star topology: the coordinator holds one link per peer and every
/// other rank holds a single link to the coordinator.
pub struct StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    size: usize,
    links: Vec<Link<R, W>>,
}

impl<R, W> StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `StarGroup`.
    ///
    /// # Arguments
    /// * `rank` - This process' rank.
    /// * `size` - The amount of ranks in the group.
    /// * `links` - The coordinator's links sorted by peer rank, or the single link to the
    ///             coordinator.
    pub(super) fn new(rank: usize, size: usize, links: Vec<Link<R, W>>) -> Self {
        debug_assert!(rank < size);
        debug_assert!(if rank == COORDINATOR {
            links.len() == size - 1 && links.iter().enumerate().all(|(i, l)| l.peer == i + 1)
        } else {
            links.len() == 1 && links[0].peer == COORDINATOR
        });

        Self { rank, size, links }
    }

    fn coordinator_link(&mut self) -> &mut Link<R, W> {
        &mut self.links[0]
    }

    async fn send_all(&mut self, msg: &Msg<'_>) -> Result<()> {
        try_join_all(self.links.iter_mut().map(|link| link.send(msg))).await?;
        Ok(())
    }
}

impl<R, W> ProcessGroup for StarGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn broadcast<T>(&mut self, value: Option<&T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        if self.rank == COORDINATOR {
            let value = value.ok_or(CommsErr::MissingValue)?;
            let meta = serde_json::to_vec(value)?;

            let msg = Msg::Data(Payload {
                meta: &meta,
                floats: &[],
            });
            self.send_all(&msg).await?;
            trace!(bytes = meta.len(), peers = self.links.len(); "broadcast sent");

            return Ok(serde_json::from_slice(&meta)?);
        }

        match self.coordinator_link().recv().await? {
            Incoming::Data { meta, .. } => Ok(serde_json::from_slice(&meta)?),
            Incoming::Err(detail) => Err(CommsErr::Aborted {
                rank: COORDINATOR,
                detail,
            }),
            other => Err(CommsErr::UnexpectedMessage {
                expected: "data",
                got: other.kind(),
            }),
        }
    }

    async fn gather<'a, T>(
        &mut self,
        part: std::result::Result<Part<'a, T>, &'a str>,
    ) -> Result<Option<Vec<Gathered<T>>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        if self.rank != COORDINATOR {
            let rank = self.rank;
            let link = self.coordinator_link();

            match part {
                Ok(Part { meta, floats }) => {
                    let meta = serde_json::to_vec(meta)?;
                    let msg = Msg::Data(Payload {
                        meta: &meta,
                        floats,
                    });
                    link.send(&msg).await?;
                    trace!(rank = rank, bytes = meta.len(), floats = floats.len(); "part sent");
                }
                Err(detail) => {
                    debug!(rank = rank; "sending failed part: {detail}");
                    link.send(&Msg::Err(Cow::Borrowed(detail))).await?;
                }
            }

            return Ok(None);
        }

        let mut failure = None;
        let mut parts = Vec::with_capacity(self.size);

        match part {
            Ok(Part { meta, floats }) => {
                let meta = serde_json::from_slice(&serde_json::to_vec(meta)?)?;
                parts.push(Gathered {
                    meta,
                    floats: floats.to_vec(),
                });
            }
            Err(detail) => failure = Some((COORDINATOR, detail.to_string())),
        }

        let incoming = try_join_all(self.links.iter_mut().map(|link| async move {
            let peer = link.peer;
            let msg = link.recv().await?;
            Ok::<_, CommsErr>((peer, msg))
        }))
        .await?;

        for (peer, msg) in incoming {
            match msg {
                Incoming::Data { meta, floats } => match serde_json::from_slice(&meta) {
                    Ok(meta) => parts.push(Gathered { meta, floats }),
                    Err(e) => {
                        failure.get_or_insert((peer, format!("undecodable part: {e}")));
                    }
                },
                Incoming::Err(detail) => {
                    failure.get_or_insert((peer, detail));
                }
                other => {
                    failure.get_or_insert((peer, format!("sent {} during a gather", other.kind())));
                }
            }
        }

        if let Some((rank, detail)) = failure {
            return Err(CommsErr::Aborted { rank, detail });
        }

        Ok(Some(parts))
    }

    async fn abort(&mut self, detail: &str) -> Result<()> {
        debug!(rank = self.rank; "aborting collective: {detail}");
        let msg = Msg::Err(Cow::Borrowed(detail));

        if self.rank == COORDINATOR {
            self.send_all(&msg).await
        } else {
            self.coordinator_link().send(&msg).await
        }
    }
}
