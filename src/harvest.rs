use chrono::{DateTime, Utc};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Linux cooked capture (SLL) header length; the protocol field sits in its
/// last two bytes.
const SLL_HEADER_LEN: usize = 16;
/// DLT_NULL / DLT_LOOP address family header length.
const NULL_HEADER_LEN: usize = 4;
/// Smallest legal IPv4 IHL and TCP data offset, in 32-bit words.
const MIN_HEADER_WORDS: u8 = 5;
const UDP_HEADER_LEN: usize = 8;

/// キャプチャしたフレームのリンク層種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Bare IPv4/IPv6 without any link header.
    RawIp,
    LinuxSll,
    /// BSD loopback, family in host byte order.
    Null,
    /// OpenBSD loopback, family in network byte order.
    Loop,
    Unsupported(i32),
}

/// キャプチャされた1フレーム（所有データ）
#[derive(Debug, Clone)]
pub struct Frame {
    pub link: LinkLayer,
    pub timestamp: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

/// 通信の片側（ホスト:ポート）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SocketAddr::new(self.host, self.port).fmt(f)
    }
}

/// 1パケット分のアプリケーションペイロードと通信方向
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub payload: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// フレームからペイロードとフローキーを抽出する
///
/// TCP/UDP ヘッダより上にデータがなければ `None`（制御セグメント、IP以外、
/// IPv4 の後続フラグメント、壊れたヘッダ）。再構成はしない。
pub fn harvest(frame: &Frame) -> Option<FlowRecord> {
    let data = frame.data.as_slice();
    let (source, destination, payload) = match frame.link {
        LinkLayer::Ethernet => {
            let ethernet = EthernetPacket::new(data)?;
            network_layer(ethernet.get_ethertype(), ethernet.payload())?
        }
        LinkLayer::LinuxSll => {
            if data.len() < SLL_HEADER_LEN {
                return None;
            }
            let protocol = u16::from_be_bytes([data[14], data[15]]);
            network_layer(EtherType::new(protocol), &data[SLL_HEADER_LEN..])?
        }
        LinkLayer::RawIp => {
            let ethertype = match data.first()? >> 4 {
                4 => EtherTypes::Ipv4,
                6 => EtherTypes::Ipv6,
                _ => return None,
            };
            network_layer(ethertype, data)?
        }
        LinkLayer::Null | LinkLayer::Loop => {
            if data.len() < NULL_HEADER_LEN {
                return None;
            }
            let raw = [data[0], data[1], data[2], data[3]];
            let family = if frame.link == LinkLayer::Null {
                u32::from_ne_bytes(raw)
            } else {
                u32::from_be_bytes(raw)
            };
            network_layer(loopback_ethertype(family)?, &data[NULL_HEADER_LEN..])?
        }
        LinkLayer::Unsupported(_) => return None,
    };

    if payload.is_empty() {
        return None;
    }

    Some(FlowRecord {
        source,
        destination,
        payload,
        timestamp: frame.timestamp,
    })
}

/// Loopback family values: AF_INET is 2 everywhere, AF_INET6 differs per OS.
fn loopback_ethertype(family: u32) -> Option<EtherType> {
    match family {
        2 => Some(EtherTypes::Ipv4),
        10 | 24 | 28 | 30 => Some(EtherTypes::Ipv6),
        _ => None,
    }
}

fn network_layer(ethertype: EtherType, data: &[u8]) -> Option<(Endpoint, Endpoint, Vec<u8>)> {
    match ethertype {
        EtherTypes::Ipv4 => {
            let ipv4 = Ipv4Packet::new(data)?;
            // 先頭以外のフラグメントにはトランスポートヘッダがない
            if ipv4.get_header_length() < MIN_HEADER_WORDS || ipv4.get_fragment_offset() != 0 {
                return None;
            }
            transport_layer(
                ipv4.get_next_level_protocol(),
                IpAddr::V4(ipv4.get_source()),
                IpAddr::V4(ipv4.get_destination()),
                ipv4.payload(),
            )
        }
        EtherTypes::Ipv6 => {
            let ipv6 = Ipv6Packet::new(data)?;
            transport_layer(
                ipv6.get_next_header(),
                IpAddr::V6(ipv6.get_source()),
                IpAddr::V6(ipv6.get_destination()),
                ipv6.payload(),
            )
        }
        _ => None,
    }
}

fn transport_layer(
    protocol: IpNextHeaderProtocol,
    src_ip: IpAddr,
    dst_ip: IpAddr,
    data: &[u8],
) -> Option<(Endpoint, Endpoint, Vec<u8>)> {
    let (src_port, dst_port, payload) = match protocol {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(data)?;
            if tcp.get_data_offset() < MIN_HEADER_WORDS {
                return None;
            }
            (tcp.get_source(), tcp.get_destination(), tcp.payload().to_vec())
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(data)?;
            // UDP長より後ろのバイトはペイロードではない
            let declared = usize::from(udp.get_length()).saturating_sub(UDP_HEADER_LEN);
            let payload = udp.payload();
            let payload = &payload[..declared.min(payload.len())];
            (udp.get_source(), udp.get_destination(), payload.to_vec())
        }
        _ => return None,
    };

    Some((
        Endpoint {
            host: src_ip,
            port: src_port,
        },
        Endpoint {
            host: dst_ip,
            port: dst_port,
        },
        payload,
    ))
}
