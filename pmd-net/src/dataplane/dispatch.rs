use std::sync::Arc;

use smoltcp::wire::EthernetFrame;

use crate::api::rte::eth::PortId;
use crate::api::rte::mbuf::Mbuf;

/// What the worker loop does with an mbuf after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Transmit on the port it arrived on.
    Forward,
    /// Return to the pool.
    Free,
}

/// Per-packet handler run by the worker loop.
///
/// Called on the lcore that received the burst, with exclusive access to the
/// mbuf. The loop keeps ownership: the handler may edit the frame in place but
/// cannot keep it.
pub trait PacketDispatch: Send + Sync {
    fn dispatch(&self, port_id: PortId, mbuf: &mut Mbuf) -> Verdict;
}

impl<D: PacketDispatch + ?Sized> PacketDispatch for Arc<D> {
    fn dispatch(&self, port_id: PortId, mbuf: &mut Mbuf) -> Verdict {
        (**self).dispatch(port_id, mbuf)
    }
}

/// Loopback dispatch: swap source and destination MAC and send the frame
/// back out of the port it came in on.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacSwap;

impl MacSwap {
    /// Swap the two addresses of an Ethernet frame in place.
    ///
    /// Returns `false`, leaving the buffer untouched, if it is shorter than an
    /// Ethernet header.
    pub fn swap(frame: &mut [u8]) -> bool {
        let Ok(mut eth) = EthernetFrame::new_checked(frame) else {
            return false;
        };
        let src = eth.src_addr();
        let dst = eth.dst_addr();
        eth.set_src_addr(dst);
        eth.set_dst_addr(src);
        true
    }
}

impl PacketDispatch for MacSwap {
    #[inline]
    fn dispatch(&self, _port_id: PortId, mbuf: &mut Mbuf) -> Verdict {
        if Self::swap(mbuf.data_mut()) {
            Verdict::Forward
        } else {
            Verdict::Free
        }
    }
}

/// The external packet-processing entry point.
///
/// `receive` is called synchronously from the worker loop with the frame
/// bytes (`packet.len()` is the frame length). The slice is only valid for
/// the duration of the call; the mbuf is freed right after it returns.
pub trait Pipeline: Send + Sync {
    fn receive(&self, port_id: PortId, packet: &[u8]);
}

impl<F> Pipeline for F
where
    F: Fn(PortId, &[u8]) + Send + Sync,
{
    fn receive(&self, port_id: PortId, packet: &[u8]) {
        self(port_id, packet)
    }
}

/// Dispatch that hands every frame to a [`Pipeline`] and frees it locally.
pub struct PipelineHandoff<P> {
    pipeline: P,
}

impl<P: Pipeline> PipelineHandoff<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }
}

impl<P: Pipeline> PacketDispatch for PipelineHandoff<P> {
    #[inline]
    fn dispatch(&self, port_id: PortId, mbuf: &mut Mbuf) -> Verdict {
        self.pipeline.receive(port_id, mbuf.data());
        Verdict::Free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: [u8; 6] = [0x02, 0, 0, 0, 0, 0xaa];
    const B: [u8; 6] = [0x02, 0, 0, 0, 0, 0xbb];

    fn frame() -> Vec<u8> {
        let mut f = Vec::new();
        f.extend_from_slice(&A);
        f.extend_from_slice(&B);
        f.extend_from_slice(&[0x08, 0x00]);
        f.extend_from_slice(&[0x45; 46]);
        f
    }

    #[test]
    fn test_mac_swap_exchanges_addresses_only() {
        let mut f = frame();
        assert!(MacSwap::swap(&mut f));
        assert_eq!(&f[..6], &B);
        assert_eq!(&f[6..12], &A);
        assert_eq!(&f[12..], &frame()[12..]);
    }

    #[test]
    fn test_mac_swap_twice_is_identity() {
        let original = frame();
        let mut f = original.clone();
        MacSwap::swap(&mut f);
        MacSwap::swap(&mut f);
        assert_eq!(f, original);
    }

    #[test]
    fn test_runt_is_left_untouched() {
        let mut f = frame()[..13].to_vec();
        assert!(!MacSwap::swap(&mut f));
        assert_eq!(f, frame()[..13].to_vec());
    }
}
