use crate::error::{Result, SnifferError};
use crate::harvest::{harvest, Frame};
use crate::report::Reporter;
use crate::stats::{CaptureCounters, FlowAggregator};
use log::{debug, info};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// セッション全体の状態遷移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// インターフェース決定済み
    Resolved,
    /// セッションを開きループ実行中
    Capturing,
    /// ハンドル解放済み（終端）
    Closed,
}

impl SessionState {
    /// The only state reachable from `self`; `Closed` has none.
    pub fn successor(self) -> Option<SessionState> {
        match self {
            SessionState::Idle => Some(SessionState::Resolved),
            SessionState::Resolved => Some(SessionState::Capturing),
            SessionState::Capturing => Some(SessionState::Closed),
            SessionState::Closed => None,
        }
    }

    pub fn advance(&mut self) {
        if let Some(next) = self.successor() {
            info!("Session {:?} -> {:?}", self, next);
            *self = next;
        }
    }
}

/// Ctrl+C の押下を記録する
///
/// 1回目はループの停止を要求し、2回目で強制終了する
#[derive(Debug, Default)]
pub struct Interrupts {
    pressed: AtomicBool,
}

impl Interrupts {
    pub fn first_press(&self) -> bool {
        !self.pressed.swap(true, Ordering::SeqCst)
    }
}

/// キャプチャループの集計結果
#[derive(Debug, Default)]
pub struct Tally {
    pub aggregator: FlowAggregator,
    pub counters: CaptureCounters,
}

/// パケット処理ループ（メイン処理）
///
/// フレームを1つずつ取り出し、抽出・集計・表示を終えてから次を読むので出力は到着順になる。
/// ストリームの終端か最初の読み込みエラーで止まる（タイムアウトはエラーではない）。
pub fn sniff<I, W>(frames: I, reporter: &mut Reporter<W>) -> (Tally, Result<()>)
where
    I: IntoIterator<Item = Result<Frame>>,
    W: Write,
{
    let mut tally = Tally::default();
    let result = pull(frames, reporter, &mut tally);
    (tally, result)
}

fn pull<I, W>(frames: I, reporter: &mut Reporter<W>, state: &mut Tally) -> Result<()>
where
    I: IntoIterator<Item = Result<Frame>>,
    W: Write,
{
    for frame in frames {
        let frame = match frame {
            Ok(frame) => frame,
            // タイムアウトは正常、続行
            Err(SnifferError::CaptureError(pcap::Error::TimeoutExpired)) => continue,
            Err(e) => return Err(e),
        };
        let record = harvest(&frame);
        state.counters.frame(record.as_ref());

        let Some(record) = record else {
            continue;
        };
        let count = state.aggregator.observe(&record);
        debug!(
            "{} => {} seen {} time(s)",
            record.source, record.destination, count
        );

        reporter.record(&record)?;
        reporter.snapshot(&state.aggregator.snapshot())?;
    }
    Ok(())
}
