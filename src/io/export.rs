//! CSV and JSON export of simulation results.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::sim::types::SlotSummary;
use crate::stats::device_statistics::DeviceSeries;

/// Column header for the per-slot summary CSV.
const SUMMARY_HEADER: &str = "time_slot,trade_count,traded_energy_kwh,average_rate,\
                              unmatched_loads,self_sufficiency_pct,self_consumption_pct";

/// Column header for the long-format device statistics CSV.
const STATS_HEADER: &str = "device_uuid,metric,time_slot,value";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Exports slot summaries to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(summaries: &[SlotSummary], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(summaries, io::BufWriter::new(file))
}

/// Writes slot summaries as CSV to any writer.
///
/// One header row followed by one row per slot. Identical inputs produce
/// identical output; an undefined average rate is left empty.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(summaries: &[SlotSummary], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(SUMMARY_HEADER.split(',').map(str::trim))?;

    for s in summaries {
        wtr.write_record(&[
            s.time_slot.format(TIME_FORMAT).to_string(),
            s.trade_count.to_string(),
            format!("{:.6}", s.traded_energy_kwh),
            s.average_rate.map(|r| format!("{r:.4}")).unwrap_or_default(),
            s.unmatched_loads.to_string(),
            format!("{:.4}", s.self_sufficiency_pct),
            format!("{:.4}", s.self_consumption_pct),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports device statistics to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_stats_csv<'a>(
    stats: impl IntoIterator<Item = (&'a String, &'a DeviceSeries)>,
    path: &Path,
) -> io::Result<()> {
    let file = File::create(path)?;
    write_stats_csv(stats, io::BufWriter::new(file))
}

/// Writes device statistics in long format, one row per device, metric, and slot.
///
/// Missing values are written as empty cells.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_stats_csv<'a>(
    stats: impl IntoIterator<Item = (&'a String, &'a DeviceSeries)>,
    writer: impl Write,
) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(STATS_HEADER.split(','))?;
    for (uuid, series) in stats {
        for (metric, values) in series {
            for (slot, value) in values {
                wtr.write_record(&[
                    uuid.clone(),
                    metric.clone(),
                    slot.format(TIME_FORMAT).to_string(),
                    value.map(|v| v.to_string()).unwrap_or_default(),
                ])?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Writes any serializable view as pretty-printed JSON to a file.
///
/// # Errors
///
/// Returns an `io::Error` if the file cannot be written or serialization fails.
pub fn export_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()
}
