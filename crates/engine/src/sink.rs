//! NDJSON (newline-delimited JSON) sink for replay results.
//!
//! ```ignore
//! let mut sink = JsonStreamSink::stdout();
//! sink.write_summary(&summary)?;
//! sink.write_carrier_events(&events)?;
//! ```

use crate::replay::ReplayReport;
use rotation_provider::memory::{CarrierOp, CarrierOpKind};
use serde::Serialize;
use std::io::{self, BufWriter, Write};

// ---------------------------------------------------------------------------
// Serializable row types
// ---------------------------------------------------------------------------

/// One row per carrier call, in call order.
#[derive(Debug, Clone, Serialize)]
pub struct CarrierEventRow {
    pub row: &'static str,
    pub seq: usize,
    pub op: CarrierOpKind,
    pub mode: Option<String>,
    pub ok: bool,
    pub thread: Option<String>,
}

impl From<&CarrierOp> for CarrierEventRow {
    fn from(op: &CarrierOp) -> Self {
        Self {
            row: "carrier_event",
            seq: op.seq,
            op: op.kind,
            mode: op.mode.map(|m| m.to_string()),
            ok: op.ok,
            thread: op.thread.clone(),
        }
    }
}

/// One row per replay run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummaryRow {
    pub row: &'static str,
    pub notifications: u64,
    pub transitions: u64,
    pub carrier_updates: usize,
    pub final_mode: String,
    pub overlay_attached: bool,
    pub allow_list: Vec<String>,
}

impl ReplayReport {
    /// Flatten the report into sink-ready rows.
    pub fn to_rows(&self) -> (ReplaySummaryRow, Vec<CarrierEventRow>) {
        let summary = ReplaySummaryRow {
            row: "replay_summary",
            notifications: self.notifications,
            transitions: self.transitions,
            carrier_updates: self
                .carrier_ops
                .iter()
                .filter(|op| op.kind == CarrierOpKind::Update)
                .count(),
            final_mode: self.final_state.applied_mode.to_string(),
            overlay_attached: self.final_state.attached,
            allow_list: self
                .allow_list
                .sorted()
                .into_iter()
                .map(|p| p.to_string())
                .collect(),
        };
        let events = self.carrier_ops.iter().map(CarrierEventRow::from).collect();
        (summary, events)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Buffered NDJSON writer over any `Write` impl.
pub struct JsonStreamSink<W: Write> {
    writer: BufWriter<W>,
    rows_written: usize,
}

impl JsonStreamSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonStreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
            rows_written: 0,
        }
    }

    fn write_row<T: Serialize>(&mut self, row: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, row).map_err(io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn write_summary(&mut self, row: &ReplaySummaryRow) -> io::Result<()> {
        self.write_row(row)
    }

    pub fn write_carrier_events(&mut self, rows: &[CarrierEventRow]) -> io::Result<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    /// Flush and return how many rows were written.
    pub fn finish(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}
