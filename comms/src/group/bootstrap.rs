use std::time::Duration;

use log::{debug, info};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    net::{
        TcpListener, TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::{
    COORDINATOR, StarGroup,
    star::{Incoming, Link},
};
use crate::{
    CommsErr, Result,
    msg::{Command, Msg},
};

/// A group whose ranks live in the same process, linked by in-memory pipes.
pub type MemGroup = StarGroup<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// A group whose ranks are linked by TCP connections.
pub type TcpGroup = StarGroup<OwnedReadHalf, OwnedWriteHalf>;

const DUPLEX_CAPACITY: usize = 1 << 16;
const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Creates every rank of an in-memory group.
///
/// # Arguments
/// * `size` - The amount of ranks.
///
/// # Returns
/// The groups ordered by rank, the first one being the coordinator.
///
/// # Panics
/// If `size` is zero.
pub fn in_memory(size: usize) -> Vec<MemGroup> {
    assert!(size > 0, "a group needs at least one rank");

    let mut coordinator_links = Vec::with_capacity(size - 1);
    let mut peers = Vec::with_capacity(size - 1);

    for rank in 1..size {
        let (near, far) = io::duplex(DUPLEX_CAPACITY);
        let (near_rx, near_tx) = io::split(near);
        let (far_rx, far_tx) = io::split(far);

        coordinator_links.push(Link::new(rank, near_rx, near_tx));
        let link = Link::new(COORDINATOR, far_rx, far_tx);
        peers.push(StarGroup::new(rank, size, vec![link]));
    }

    let mut groups = vec![StarGroup::new(COORDINATOR, size, coordinator_links)];
    groups.extend(peers);
    groups
}

impl TcpGroup {
    /// Accepts every peer of the group as the coordinator.
    ///
    /// Each peer must introduce itself with a `Join` command carrying its rank and the group size.
    ///
    /// # Arguments
    /// * `listener` - A bound listener the peers connect to.
    /// * `size` - The amount of ranks, coordinator included.
    ///
    /// # Returns
    /// The coordinator's group or a `Handshake` error on inconsistent or duplicated ranks.
    pub async fn listen(listener: TcpListener, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(CommsErr::Handshake {
                detail: "a group needs at least one rank".into(),
            });
        }

        let mut slots: Vec<Option<Link<OwnedReadHalf, OwnedWriteHalf>>> =
            (1..size).map(|_| None).collect();

        for _ in 1..size {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let (rx, tx) = stream.into_split();
            let mut link = Link::new(usize::MAX, rx, tx);

            let (rank, peer_size) = match link.recv().await? {
                Incoming::Control(Command::Join { rank, size }) => (rank, size),
                other => {
                    return Err(CommsErr::UnexpectedMessage {
                        expected: "control",
                        got: other.kind(),
                    });
                }
            };

            if peer_size != size || rank == COORDINATOR || rank >= size {
                return Err(CommsErr::Handshake {
                    detail: format!("{addr} joined as rank {rank} of {peer_size}, expected a rank in 1..{size}"),
                });
            }

            let slot = &mut slots[rank - 1];
            if slot.is_some() {
                return Err(CommsErr::Handshake {
                    detail: format!("rank {rank} joined twice, last from {addr}"),
                });
            }

            info!("rank {rank} joined from {addr}");
            link.peer = rank;
            *slot = Some(link);
        }

        let links = slots.into_iter().flatten().collect();
        Ok(StarGroup::new(COORDINATOR, size, links))
    }

    /// Connects to the coordinator as a peer, retrying while it is not listening yet.
    ///
    /// # Arguments
    /// * `addr` - The coordinator's address.
    /// * `rank` - This process' rank, in `1..size`.
    /// * `size` - The amount of ranks, coordinator included.
    pub async fn connect<A>(addr: A, rank: usize, size: usize) -> Result<Self>
    where
        A: ToSocketAddrs + Copy,
    {
        if rank == COORDINATOR || rank >= size {
            return Err(CommsErr::Handshake {
                detail: format!("rank {rank} can't connect to a group of {size}"),
            });
        }

        let mut attempt = 1;
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    debug!(rank = rank, attempt = attempt; "coordinator not reachable yet: {e}");
                    attempt += 1;
                    time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let mut link = Link::new(COORDINATOR, rx, tx);
        link.send(&Msg::Control(Command::Join { rank, size })).await?;

        Ok(StarGroup::new(rank, size, vec![link]))
    }
}
