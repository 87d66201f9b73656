use crate::harvest::FlowRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// 宛先エンドポイント → (送信元エンドポイント → 出現回数)
pub type FlowSnapshot = BTreeMap<String, BTreeMap<String, u64>>;

/// 宛先・送信元ペアごとの出現回数を集計する構造体
///
/// カウントは増えるだけで、削除も重複排除もしない（同じレコードを2回観測すれば2回数える）
#[derive(Debug, Default)]
pub struct FlowAggregator {
    flows: FlowSnapshot,
}

impl FlowAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// (destination, source) のカウントを1増やし、新しい値を返す
    pub fn record(&mut self, destination: &str, source: &str) -> u64 {
        let count = self
            .flows
            .entry(destination.to_string())
            .or_default()
            .entry(source.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn observe(&mut self, record: &FlowRecord) -> u64 {
        self.record(
            &record.destination.to_string(),
            &record.source.to_string(),
        )
    }

    pub fn count(&self, destination: &str, source: &str) -> u64 {
        self.flows
            .get(destination)
            .and_then(|sources| sources.get(source))
            .copied()
            .unwrap_or(0)
    }

    /// 現在の集計のコピーを返す（ライブのカウントは変更しない）
    pub fn snapshot(&self) -> FlowSnapshot {
        self.flows.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

/// キャプチャループのカウンタ
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureCounters {
    /// 受信したフレーム数
    pub frames: u64,
    /// ペイロードを持っていたフレーム数
    pub harvested: u64,
    /// ペイロードなしで読み飛ばしたフレーム数
    pub skipped: u64,
    /// ペイロードの合計バイト数
    pub payload_bytes: u64,
}

impl CaptureCounters {
    pub fn frame(&mut self, record: Option<&FlowRecord>) {
        self.frames += 1;
        match record {
            Some(record) => {
                self.harvested += 1;
                self.payload_bytes += record.payload.len() as u64;
            }
            None => self.skipped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::harvest;
    use crate::harvest::testutil::tcp_frame;

    #[test]
    fn counts_pairs_per_destination() {
        let mut aggregator = FlowAggregator::new();
        let frames = [
            tcp_frame(("1.1.1.1", 4000), ("2.2.2.2", 21), b"USER ftp\r\n"),
            tcp_frame(("1.1.1.1", 4000), ("2.2.2.2", 21), b"PASS ftp\r\n"),
            tcp_frame(("3.3.3.3", 5000), ("2.2.2.2", 21), b"USER root\r\n"),
        ];
        let mut counts = Vec::new();
        for frame in &frames {
            let record = harvest(frame).expect("payload present");
            counts.push(aggregator.observe(&record));
        }
        assert_eq!(counts, vec![1, 2, 1]);

        let expected = FlowSnapshot::from([(
            "2.2.2.2:21".to_string(),
            BTreeMap::from([
                ("1.1.1.1:4000".to_string(), 2),
                ("3.3.3.3:5000".to_string(), 1),
            ]),
        )]);
        assert_eq!(aggregator.snapshot(), expected);
    }

    #[test]
    fn order_does_not_matter() {
        let pairs = [("d1", "s1"), ("d2", "s1"), ("d1", "s2"), ("d1", "s1")];

        let mut forward = FlowAggregator::new();
        let seen: Vec<u64> = pairs.iter().map(|(d, s)| forward.record(d, s)).collect();
        assert_eq!(seen, vec![1, 1, 1, 2]);
        let mut backward = FlowAggregator::new();
        for (d, s) in pairs.iter().rev() {
            assert!(backward.record(d, s) >= 1);
        }

        assert_eq!(forward.snapshot(), backward.snapshot());
        assert_eq!(forward.count("d1", "s1"), 2);
        assert_eq!(forward.count("d2", "s1"), 1);
        assert_eq!(forward.count("d2", "s2"), 0);
    }

    #[test]
    fn same_packet_twice_counts_twice() {
        let frame = tcp_frame(("1.1.1.1", 4000), ("2.2.2.2", 21), b"LIST\r\n");
        let mut aggregator = FlowAggregator::new();
        for expected in 1..=2 {
            let record = harvest(&frame).expect("payload present");
            assert_eq!(aggregator.observe(&record), expected);
        }
        assert_eq!(aggregator.count("2.2.2.2:21", "1.1.1.1:4000"), 2);
    }

    #[test]
    fn empty_payload_leaves_state_untouched() {
        let mut aggregator = FlowAggregator::new();
        assert_eq!(aggregator.record("2.2.2.2:21", "1.1.1.1:4000"), 1);
        let before = aggregator.snapshot();

        let ack = tcp_frame(("1.1.1.1", 4000), ("2.2.2.2", 21), b"");
        assert!(harvest(&ack).is_none());
        assert_eq!(aggregator.snapshot(), before);
    }

    #[test]
    fn snapshot_is_detached() {
        let mut aggregator = FlowAggregator::new();
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.record("d", "s"), 1);

        let mut snapshot = aggregator.snapshot();
        snapshot.clear();
        assert_eq!(aggregator.count("d", "s"), 1);
        assert_eq!(aggregator.record("d", "s"), 2);
    }

    #[test]
    fn counters_split_harvested_and_skipped() {
        let data = tcp_frame(("1.1.1.1", 1), ("2.2.2.2", 2), b"abc");
        let ack = tcp_frame(("1.1.1.1", 1), ("2.2.2.2", 2), b"");
        let mut counters = CaptureCounters::default();
        counters.frame(harvest(&data).as_ref());
        counters.frame(harvest(&ack).as_ref());
        assert_eq!(counters.frames, 2);
        assert_eq!(counters.harvested, 1);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.payload_bytes, 3);
    }
}
