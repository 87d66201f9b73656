use crate::harvest::FlowRecord;
use crate::stats::{CaptureCounters, FlowSnapshot};
use std::io::{self, Write};

/// 収集結果をコンソールに書き出す
pub struct Reporter<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    pub fn listening(&mut self, interface: &str, filter: &str) -> io::Result<()> {
        writeln!(self.out, "LISTEN... on {} with filter {:?}", interface, filter)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    /// 送信元 => 宛先、ペイロード長、ペイロード本文
    pub fn record(&mut self, record: &FlowRecord) -> io::Result<()> {
        if let Some(ts) = record.timestamp {
            write!(self.out, "[{}] ", ts.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        }
        writeln!(self.out, "{} => {}", record.source, record.destination)?;
        writeln!(self.out, "Len: {}", record.payload.len())?;
        writeln!(self.out, "Body:")?;
        writeln!(self.out, "{}", String::from_utf8_lossy(&record.payload))?;
        writeln!(self.out)
    }

    pub fn snapshot(&mut self, snapshot: &FlowSnapshot) -> io::Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.out, snapshot)?;
            writeln!(self.out)?;
        } else {
            for (destination, sources) in snapshot {
                writeln!(self.out, "{}", destination)?;
                for (source, count) in sources {
                    writeln!(self.out, "  {} {}", source, count)?;
                }
            }
        }
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn summary(&mut self, counters: &CaptureCounters) -> io::Result<()> {
        writeln!(self.out, "Done...")?;
        writeln!(
            self.out,
            "{} frame(s), {} with payload, {} skipped, {} payload byte(s)",
            counters.frames, counters.harvested, counters.skipped, counters.payload_bytes
        )?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
