//! Console rendering of statistics rounds.

use crate::{
    registry::SessionRegistry,
    session::StatisticsSnapshot,
};
use chrono::{
    DateTime,
    Local,
};
use comfy_table::{
    presets,
    Attribute,
    Cell,
    CellAlignment,
    Color,
    ContentArrangement,
    Table,
};
use std::{
    fmt,
    time::Duration,
};
use stream_tester_config::RunMode;

pub const LEGEND: &str = "\
Stream stats list:
  dev: device delivered / transmission error / transform underrun / underrun
  snk: sink delivered / underrun / ignored
  resend: packet resend requests, '-' when the transport has none";

const COLUMNS: [&str; 11] = [
    "device",
    "dev deliv",
    "dev err",
    "dev tr",
    "dev ur",
    "snk deliv",
    "snk ur",
    "snk ig",
    "fps",
    "resend",
    "Mbps",
];

const LOST: &str = "lost";

pub fn starting_streams(count: usize) -> String {
    format!("Starting streams for {count} cameras.")
}

/// Announces how long the streams will run once acquisition is started.
pub fn started_streams(mode: RunMode) -> String {
    match mode {
        RunMode::Continuous { .. } => "Started all camera streams. Looping endlessly.".to_string(),
        RunMode::Bounded { duration } => {
            format!("Started all camera streams. Streaming for {} seconds.", duration.as_secs())
        }
    }
}

pub const STOPPED_STREAMS: &str = "Stopped all camera streams.";

/// `HH:MM:SS`, with hours growing past two digits if needed.
pub fn format_offset(offset: Duration) -> String {
    let secs = offset.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// One line per session: its name and the stream it was set up with.
pub fn device_list(registry: &SessionRegistry) -> String {
    let mut out = String::from("Devices:");
    for session in registry {
        out.push_str(&format!("\n  {}: {}", session.name(), session.video_format_description()));
    }
    out
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub device: String,
    pub snapshot: StatisticsSnapshot,
}

/// One round of snapshots, ready to print.
#[derive(Debug, Clone)]
pub struct Report {
    taken_at: DateTime<Local>,
    offset: Duration,
    rows: Vec<ReportRow>,
    styled: bool,
}

impl Report {
    pub fn new(taken_at: DateTime<Local>, offset: Duration, snapshots: Vec<(String, StatisticsSnapshot)>) -> Self {
        let rows = snapshots
            .into_iter()
            .map(|(device, snapshot)| ReportRow { device, snapshot })
            .collect();
        Self {
            taken_at,
            offset,
            rows,
            styled: true,
        }
    }

    /// Disables colors and text attributes.
    pub fn plain(mut self) -> Self {
        self.styled = false;
        self
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Sum of Mbps over devices that are still present.
    pub fn total_mbps(&self) -> u64 {
        self.rows
            .iter()
            .filter(|row| !row.snapshot.device_lost)
            .map(|row| row.snapshot.mbps)
            .sum()
    }

    pub fn total_gbps(&self) -> f64 {
        self.total_mbps() as f64 / 1000.0
    }

    pub fn header_line(&self) -> String {
        format!(
            "[{}] Offset: {}",
            self.taken_at.format("%Y-%m-%d %H:%M:%S"),
            format_offset(self.offset)
        )
    }

    fn header_cell(&self, title: &str) -> Cell {
        let cell = Cell::new(title);
        if self.styled {
            cell.add_attribute(Attribute::Bold)
        } else {
            cell
        }
    }

    fn lost_cell(&self) -> Cell {
        let cell = Cell::new(LOST).set_alignment(CellAlignment::Right);
        if self.styled {
            cell.fg(Color::Red)
        } else {
            cell
        }
    }

    fn row_cells(&self, row: &ReportRow) -> Vec<Cell> {
        let snapshot = &row.snapshot;
        let stream = &snapshot.stream;
        let mut cells = vec![Cell::new(&row.device)];
        cells.extend(
            [
                stream.device_delivered,
                stream.device_transmission_error,
                stream.device_transform_underrun,
                stream.device_underrun,
                stream.sink_delivered,
                stream.sink_underrun,
                stream.sink_ignored,
            ]
            .into_iter()
            .map(number_cell),
        );

        let resend = snapshot
            .resend_requested
            .map(|resend| resend.to_string())
            .unwrap_or_else(|| "-".to_string());
        if snapshot.device_lost {
            cells.push(self.lost_cell());
            cells.push(number_cell(resend));
            cells.push(self.lost_cell());
        } else {
            cells.push(number_cell(format!("{:.2}", snapshot.fps)));
            cells.push(number_cell(resend));
            cells.push(number_cell(snapshot.mbps));
        }
        cells
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(COLUMNS.iter().map(|title| self.header_cell(title)));
        if !self.styled {
            table.force_no_tty();
        }

        for row in &self.rows {
            table.add_row(self.row_cells(row));
        }

        let mut total = vec![self.header_cell("total")];
        total.extend((1..COLUMNS.len() - 1).map(|_| Cell::new("")));
        total.push(number_cell(self.total_mbps()));
        table.add_row(total);
        table
    }
}

fn number_cell(value: impl ToString) -> Cell {
    Cell::new(value.to_string()).set_alignment(CellAlignment::Right)
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header_line())?;
        writeln!(f, "{}", self.table())?;
        write!(f, "Sum of Gbit per second: {:.3}", self.total_gbps())
    }
}
