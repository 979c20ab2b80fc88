//! Per-cycle samples of the board's boundary signals.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::board::BoardVariant;
use crate::error::Result;
use crate::handshake::{ProducerOutputs, ProtocolViolation, RxLines, RxMonitor, TxLines, TxMonitor};
use crate::producer::PhyStatus;

/// Signal values during one sync cycle, or during one reference cycle in
/// which the domain saw no edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub reference_cycle: u64,
    /// `None` when the sync domain had no edge in this reference cycle.
    pub sync_cycle: Option<u64>,
    pub locked: bool,
    /// RX lines at the producer.
    pub rx: RxLines,
    /// TX lines at the producer.
    pub tx: TxLines,
    /// Producer lines as bound to the consumer's inputs.
    pub consumer_view: Option<ProducerOutputs>,
    pub status: Option<PhyStatus>,
    /// Indicator pins, as [`crate::board::Leds`] bits.
    pub indicators: u8,
}

impl Sample {
    /// Same observable signal values, ignoring cycle numbers.
    fn same_signals(&self, other: &Sample) -> bool {
        self.rx == other.rx
            && self.tx == other.tx
            && self.consumer_view == other.consumer_view
            && self.status == other.status
            && self.indicators == other.indicators
    }
}

/// A bounded record of samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub variant: BoardVariant,
    pub limit: usize,
    /// Samples not kept because the limit was reached.
    pub dropped: u64,
    pub samples: Vec<Sample>,
}

/// Counts from replaying a trace through the monitors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub cycles: u64,
    pub rx_frames: u64,
    pub tx_frames: u64,
}

impl Trace {
    pub fn new(variant: BoardVariant, limit: usize) -> Self {
        Self {
            variant,
            limit,
            dropped: 0,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() < self.limit {
            self.samples.push(sample);
        } else {
            self.dropped += 1;
        }
    }

    /// First sample whose signals differ from the initial sample.
    pub fn first_activity(&self) -> Option<&Sample> {
        let first = self.samples.first()?;
        self.samples.iter().find(|s| !s.same_signals(first))
    }

    /// Run the RX and TX monitors over the recorded sync cycles.
    pub fn replay(&self) -> std::result::Result<ReplaySummary, ProtocolViolation> {
        let mut rx = RxMonitor::new();
        let mut tx = TxMonitor::new();
        let mut cycles = 0;
        for sample in &self.samples {
            let Some(cycle) = sample.sync_cycle else {
                continue;
            };
            rx.check(cycle, sample.rx)?;
            tx.check(cycle, sample.tx)?;
            cycles += 1;
        }
        Ok(ReplaySummary {
            cycles,
            rx_frames: rx.frames_acked(),
            tx_frames: tx.frames_started(),
        })
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(reference_cycle: u64, sync_cycle: Option<u64>, rx: RxLines) -> Sample {
        Sample {
            reference_cycle,
            sync_cycle,
            locked: sync_cycle.is_some(),
            rx,
            tx: TxLines::default(),
            consumer_view: None,
            status: None,
            indicators: 0,
        }
    }

    #[test]
    fn test_limit() {
        let mut trace = Trace::new(BoardVariant::Switch, 2);
        for i in 0..5 {
            trace.push(sample(i, None, RxLines::default()));
        }
        assert_eq!(trace.samples.len(), 2);
        assert_eq!(trace.dropped, 3);
    }

    #[test]
    fn test_first_activity() {
        let mut trace = Trace::new(BoardVariant::Switch, 100);
        for i in 0..10 {
            trace.push(sample(i, None, RxLines::default()));
        }
        let offered = RxLines {
            valid: true,
            len: 9,
            ack: false,
        };
        trace.push(sample(10, Some(0), offered));
        assert_eq!(trace.first_activity().unwrap().reference_cycle, 10);
    }

    #[test]
    fn test_replay_catches_violation() {
        let mut trace = Trace::new(BoardVariant::Switch, 100);
        let spurious = RxLines {
            valid: false,
            len: 0,
            ack: true,
        };
        trace.push(sample(0, None, spurious));
        assert_eq!(trace.replay().unwrap().cycles, 0);
        trace.push(sample(1, Some(0), spurious));
        assert_eq!(
            trace.replay().unwrap_err(),
            ProtocolViolation::SpuriousAck { cycle: 0 }
        );
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let mut trace = Trace::new(BoardVariant::Sensor, 10);
        trace.push(sample(0, None, RxLines::default()));
        let path = std::env::temp_dir().join(format!("daqnet-trace-{}.json", std::process::id()));
        trace.write_json(&path).unwrap();
        let loaded = Trace::load_json(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.samples, trace.samples);
        assert_eq!(loaded.variant, BoardVariant::Sensor);
    }
}
