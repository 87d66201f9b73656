use crate::error::{Result, SnifferError};
use crate::harvest::{Frame, LinkLayer};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use pcap::{
    Activated, Active, BreakLoop, Capture, Device, Linktype, Packet, PacketCodec, PacketIter,
};

/// 1フレームを切り詰めずに受け取れるスナップショット長
pub const DEFAULT_SNAPLEN: i32 = 65536;

/// キャプチャハンドルの設定
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub snaplen: i32,
    pub promiscuous: bool,
    /// バッファを溜めずに到着次第パケットを渡す
    pub immediate: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: false,
            immediate: true,
        }
    }
}

/// pcap のパケットを所有データの `Frame` に変換する
pub struct FrameCodec {
    link: LinkLayer,
}

impl PacketCodec for FrameCodec {
    type Item = Frame;

    fn decode(&mut self, packet: Packet<'_>) -> Self::Item {
        let ts = packet.header.ts;
        let timestamp = DateTime::<Utc>::from_timestamp(ts.tv_sec as i64, (ts.tv_usec as u32) * 1_000);
        Frame {
            link: self.link,
            timestamp,
            data: packet.data.to_vec(),
        }
    }
}

pub fn link_layer(linktype: Linktype) -> LinkLayer {
    match linktype {
        Linktype::ETHERNET => LinkLayer::Ethernet,
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => LinkLayer::RawIp,
        Linktype::LINUX_SLL => LinkLayer::LinuxSll,
        Linktype::NULL => LinkLayer::Null,
        Linktype::LOOP => LinkLayer::Loop,
        Linktype(other) => LinkLayer::Unsupported(other),
    }
}

/// pcap から見えるキャプチャデバイス名の一覧
pub fn capture_devices() -> Result<Vec<String>> {
    let devices = Device::list()
        .map_err(|e| SnifferError::InterfaceEnumerationFailed(e.to_string()))?;
    Ok(devices.into_iter().map(|device| device.name).collect())
}

/// 指定デバイスが列挙結果に含まれているか確認
pub fn ensure_device(devices: &[String], name: &str) -> Result<()> {
    if devices.iter().any(|device| device == name) {
        return Ok(());
    }

    warn!("Device '{}' not found. Available devices:", name);
    for device in devices {
        warn!("  {}", device);
    }
    Err(SnifferError::DeviceNotFound(name.to_string()))
}

/// 1つのインターフェースに紐づき、フィルタ適用済みの pcap ハンドル
///
/// イテレートすると到着順にフレームを返し、次のパケットが来るまでブロックする。
/// ループが中断されるかデバイスが消えると終了する。
pub struct CaptureSession<S: Activated + ?Sized = Active> {
    interface: String,
    filter: String,
    packets: PacketIter<S, FrameCodec>,
}

/// フィルタ式をコンパイルして構文を確認する
pub fn check_filter<T: Activated + ?Sized>(capture: &Capture<T>, filter: &str) -> Result<()> {
    match capture.compile(filter, true) {
        Ok(_) => Ok(()),
        Err(source) => Err(SnifferError::InvalidFilter {
            filter: filter.to_string(),
            source,
        }),
    }
}

impl CaptureSession {
    pub fn open(interface: &str, filter: &str, config: &CaptureConfig) -> Result<Self> {
        let devices = capture_devices()?;
        Self::open_on(&devices, interface, filter, config)
    }

    /// 列挙済みのデバイス一覧で確認してから `interface` を開く
    /// （デバイスがなければ何も開かず、フィルタもコンパイルしない）
    pub fn open_on(
        devices: &[String],
        interface: &str,
        filter: &str,
        config: &CaptureConfig,
    ) -> Result<Self> {
        ensure_device(devices, interface)?;

        info!(
            "Opening {} (snaplen {}, promiscuous {})",
            interface, config.snaplen, config.promiscuous
        );
        let mut capture = Capture::from_device(interface)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .immediate_mode(config.immediate)
            .timeout(0)
            .open()?;

        // 失敗時は capture がドロップされハンドルが解放される
        check_filter(&capture, filter)?;
        if let Err(source) = capture.filter(filter, true) {
            return Err(SnifferError::InvalidFilter {
                filter: filter.to_string(),
                source,
            });
        }
        info!("Filter applied on {}: {:?}", interface, filter);

        let link = link_layer(capture.get_datalink());
        debug!("Datalink of {}: {:?}", interface, link);

        Ok(Self {
            interface: interface.to_string(),
            filter: filter.to_string(),
            packets: capture.iter(FrameCodec { link }),
        })
    }
}

impl<S: Activated + ?Sized> CaptureSession<S> {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 適用したフィルタ式（`filter` は `Iterator` 側の名前と衝突する）
    pub fn filter_expression(&self) -> &str {
        &self.filter
    }

    /// 別スレッドからブロック中の読み込みを中断するハンドル
    pub fn breakloop_handle(&mut self) -> BreakLoop {
        self.packets.capture_mut().breakloop_handle()
    }

    /// 統計をログに出してハンドルを解放する
    pub fn close(mut self) {
        match self.packets.capture_mut().stats() {
            Ok(stat) => info!(
                "pcap statistics for {}: received {}, dropped {}, dropped by interface {}",
                self.interface, stat.received, stat.dropped, stat.if_dropped
            ),
            Err(e) => debug!("pcap statistics unavailable for {}: {}", self.interface, e),
        }
        info!("Capture session on {} closed", self.interface);
    }
}

impl<S: Activated + ?Sized> Iterator for CaptureSession<S> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.packets
            .next()
            .map(|frame| frame.map_err(SnifferError::CaptureError))
    }
}
