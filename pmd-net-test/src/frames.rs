//! Ethernet/IPv4/UDP test frames.

use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Address, Ipv4Packet,
    UdpPacket,
};

const ETH_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Shortest frame on the wire, without FCS.
pub const MIN_FRAME_LEN: usize = 60;

/// Builds UDP-over-IPv4 frames with fixed addressing.
#[derive(Debug, Clone, Copy)]
pub struct UdpFrameBuilder {
    pub src_mac: EthernetAddress,
    pub dst_mac: EthernetAddress,
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Default for UdpFrameBuilder {
    fn default() -> Self {
        Self {
            src_mac: EthernetAddress([0x00, 0x50, 0x56, 0xae, 0x76, 0xf5]),
            dst_mac: EthernetAddress([0x00, 0x0b, 0x86, 0x64, 0x8b, 0xa0]),
            src_ip: Ipv4Address::new(192, 168, 29, 58),
            dst_ip: Ipv4Address::new(192, 168, 29, 160),
            src_port: 60376,
            dst_port: 161,
        }
    }
}

impl UdpFrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_mac(mut self, mac: EthernetAddress) -> Self {
        self.src_mac = mac;
        self
    }

    pub fn dst_mac(mut self, mac: EthernetAddress) -> Self {
        self.dst_mac = mac;
        self
    }

    pub fn ports(mut self, src: u16, dst: u16) -> Self {
        self.src_port = src;
        self.dst_port = dst;
        self
    }

    /// Frame carrying `payload`, zero padded to the Ethernet minimum.
    pub fn build(&self, payload: &[u8]) -> Vec<u8> {
        let udp_len = UDP_HEADER_LEN + payload.len();
        let ip_len = IPV4_HEADER_LEN + udp_len;
        let mut buf = vec![0u8; (ETH_HEADER_LEN + ip_len).max(MIN_FRAME_LEN)];

        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        frame.set_src_addr(self.src_mac);
        frame.set_dst_addr(self.dst_mac);
        frame.set_ethertype(EthernetProtocol::Ipv4);

        let mut ipv4_pkt = Ipv4Packet::new_unchecked(frame.payload_mut());
        ipv4_pkt.set_version(4);
        ipv4_pkt.set_header_len(IPV4_HEADER_LEN as u8);
        ipv4_pkt.set_dscp(0);
        ipv4_pkt.set_ecn(0);
        ipv4_pkt.set_total_len(ip_len as u16);
        ipv4_pkt.set_ident(0x5c65);
        ipv4_pkt.clear_flags();
        ipv4_pkt.set_frag_offset(0);
        ipv4_pkt.set_hop_limit(64);
        ipv4_pkt.set_next_header(IpProtocol::Udp);
        ipv4_pkt.set_src_addr(self.src_ip);
        ipv4_pkt.set_dst_addr(self.dst_ip);
        ipv4_pkt.fill_checksum();

        let mut udp_pkt = UdpPacket::new_unchecked(ipv4_pkt.payload_mut());
        udp_pkt.set_src_port(self.src_port);
        udp_pkt.set_dst_port(self.dst_port);
        udp_pkt.set_len(udp_len as u16);
        // Zero means "no checksum" for UDP over IPv4.
        udp_pkt.set_checksum(0);
        udp_pkt.payload_mut()[..payload.len()].copy_from_slice(payload);

        buf
    }
}

/// Fields of a parsed UDP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub src_mac: EthernetAddress,
    pub dst_mac: EthernetAddress,
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

impl UdpDatagram<'_> {
    /// The frame a responder would send back: every address swapped, same payload.
    pub fn reply(&self) -> Vec<u8> {
        UdpFrameBuilder {
            src_mac: self.dst_mac,
            dst_mac: self.src_mac,
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
        .build(self.payload)
    }
}

/// Parse an Ethernet frame as UDP over IPv4. `None` for anything else.
pub fn parse_udp(frame: &[u8]) -> Option<UdpDatagram<'_>> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    if eth.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }
    let src_mac = eth.src_addr();
    let dst_mac = eth.dst_addr();

    let ipv4 = Ipv4Packet::new_checked(&frame[ETH_HEADER_LEN..]).ok()?;
    if ipv4.next_header() != IpProtocol::Udp {
        return None;
    }
    let src_ip = ipv4.src_addr();
    let dst_ip = ipv4.dst_addr();
    let header_len = usize::from(ipv4.header_len());
    let total_len = usize::from(ipv4.total_len());

    let ip_payload = frame.get(ETH_HEADER_LEN + header_len..ETH_HEADER_LEN + total_len)?;
    let udp = UdpPacket::new_checked(ip_payload).ok()?;
    let payload = ip_payload.get(UDP_HEADER_LEN..usize::from(udp.len()))?;
    Some(UdpDatagram {
        src_mac,
        dst_mac,
        src_ip,
        dst_ip,
        src_port: udp.src_port(),
        dst_port: udp.dst_port(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_then_parse() {
        let builder = UdpFrameBuilder::new().ports(1234, 5678);
        let frame = builder.build(b"hello");
        assert_eq!(frame.len(), MIN_FRAME_LEN);

        let dgram = parse_udp(&frame).expect("UDP frame");
        assert_eq!(dgram.src_mac, builder.src_mac);
        assert_eq!(dgram.dst_ip, builder.dst_ip);
        assert_eq!((dgram.src_port, dgram.dst_port), (1234, 5678));
        assert_eq!(dgram.payload, b"hello");
    }

    #[test]
    fn test_reply_swaps_addresses() {
        let frame = UdpFrameBuilder::new().build(&[7; 100]);
        let request = parse_udp(&frame).unwrap();
        let reply = request.reply();
        let reply = parse_udp(&reply).unwrap();
        assert_eq!(reply.src_mac, request.dst_mac);
        assert_eq!(reply.dst_ip, request.src_ip);
        assert_eq!(reply.dst_port, request.src_port);
        assert_eq!(reply.payload, request.payload);
    }

    #[test]
    fn test_non_udp_is_rejected() {
        let mut frame = UdpFrameBuilder::new().build(b"x");
        // Rewrite the IPv4 protocol field to TCP.
        frame[ETH_HEADER_LEN + 9] = 6;
        assert!(parse_udp(&frame).is_none());
        assert!(parse_udp(&frame[..10]).is_none());
    }
}
