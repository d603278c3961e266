//! Line-delimited JSON telemetry records, as accepted by `cps ingest`.
//!
//! One record per line:
//!
//! ```json
//! {"machine":"roller-7","x":1040,"y":2210,"time":"2024-05-01T07:30:00Z","height":112.4,"ccv":310}
//! ```
//!
//! Omitted measurements are stored as NULL.

use std::collections::BTreeMap;
use std::io::BufRead;

use chrono::{DateTime, Utc};
use cps_common::{check_pass_time, Error, Result};
use serde::{Deserialize, Serialize};

use crate::cell_pass::{CellPass, GpsMode, PassType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub machine: String,
    #[serde(default)]
    pub john_doe: bool,
    pub x: u32,
    pub y: u32,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub height: Option<f32>,
    #[serde(default)]
    pub ccv: Option<i16>,
    #[serde(default)]
    pub mdp: Option<i16>,
    #[serde(default)]
    pub rmv: Option<i16>,
    #[serde(default)]
    pub frequency: Option<i16>,
    #[serde(default)]
    pub amplitude: Option<i16>,
    #[serde(default)]
    pub material_temperature: Option<i16>,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub gps_mode: Option<GpsMode>,
    #[serde(default)]
    pub half_pass: bool,
    #[serde(default)]
    pub pass_type: Option<PassType>,
    #[serde(default)]
    pub radio_latency: Option<u8>,
}

impl TelemetryRecord {
    /// The cell pass this record describes, attributed to `machine_id`.
    ///
    /// Fails with [`Error::TimeOutOfRange`] when the record's time cannot
    /// be stored.
    pub fn to_pass(&self, machine_id: i32) -> Result<CellPass> {
        check_pass_time(self.time)?;
        let null = CellPass::null();
        Ok(CellPass {
            time: self.time,
            height: self.height.unwrap_or(null.height),
            ccv: self.ccv.unwrap_or(null.ccv),
            mdp: self.mdp.unwrap_or(null.mdp),
            rmv: self.rmv.unwrap_or(null.rmv),
            frequency: self.frequency.unwrap_or(null.frequency),
            amplitude: self.amplitude.unwrap_or(null.amplitude),
            material_temperature: self
                .material_temperature
                .unwrap_or(null.material_temperature),
            machine_id,
            machine_speed: self.speed.unwrap_or(null.machine_speed),
            gps_mode: self.gps_mode.unwrap_or(null.gps_mode),
            half_pass: self.half_pass,
            pass_type: self.pass_type.unwrap_or(null.pass_type),
            radio_latency: self.radio_latency.unwrap_or(null.radio_latency),
            site_model_machine_index: i16::try_from(machine_id)
                .unwrap_or(null.site_model_machine_index),
        })
    }
}

/// Parse every non-blank line. A malformed line, or one timed outside the
/// storable range, fails the whole read, naming the line.
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<TelemetryRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: TelemetryRecord = serde_json::from_str(trimmed)
            .map_err(|e| Error::decoding(format!("line {}: {e}", index + 1)))?;
        check_pass_time(record.time)
            .map_err(|e| Error::decoding(format!("line {}: {e}", index + 1)))?;
        records.push(record);
    }
    Ok(records)
}

/// Group records by cell, keeping file order within a cell.
pub fn group_by_cell(records: &[TelemetryRecord]) -> BTreeMap<(u32, u32), Vec<&TelemetryRecord>> {
    let mut cells: BTreeMap<(u32, u32), Vec<&TelemetryRecord>> = BTreeMap::new();
    for record in records {
        cells.entry((record.x, record.y)).or_default().push(record);
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cps_common::consts::{NULL_CCV, NULL_HEIGHT};

    #[test]
    fn missing_measurements_become_null() {
        let input = r#"{"machine":"m","x":1,"y":2,"time":"2020-01-01T00:00:00Z","height":3.5}"#;
        let records = read_records(input.as_bytes()).unwrap();
        let pass = records[0].to_pass(4).unwrap();
        assert_eq!(pass.height, 3.5);
        assert_eq!(pass.ccv, NULL_CCV);
        assert_eq!(pass.machine_id, 4);
        assert_eq!(pass.site_model_machine_index, 4);
        assert_eq!(pass.pass_type, PassType::Front);
    }

    #[test]
    fn blank_lines_are_skipped_and_bad_lines_named() {
        let good = "\n{\"machine\":\"m\",\"x\":0,\"y\":0,\"time\":\"2020-01-01T00:00:00Z\"}\n\n";
        let records = read_records(good.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].to_pass(0).unwrap().height, NULL_HEIGHT);

        let bad = format!("{good}{{\"machine\":1}}\n");
        let err = read_records(bad.as_bytes()).unwrap_err();
        assert!(err.is_decoding());
        assert!(err.to_string().contains("line 4"), "{err}");
    }

    #[test]
    fn out_of_range_times_are_rejected() {
        let before = r#"{"machine":"m","x":0,"y":0,"time":"0000-06-01T00:00:00Z"}"#;
        let err = read_records(before.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");

        let last = format!(
            "{}\n{}\n",
            r#"{"machine":"m","x":0,"y":0,"time":"2020-01-01T00:00:00Z"}"#,
            r#"{"machine":"m","x":0,"y":0,"time":"9999-12-31T23:59:59.9999999Z"}"#
        );
        let err = read_records(last.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");

        let record = TelemetryRecord {
            time: Utc.with_ymd_and_hms(0, 6, 1, 0, 0, 0).unwrap(),
            ..read_records(r#"{"machine":"m","x":0,"y":0,"time":"2020-01-01T00:00:00Z"}"#.as_bytes())
                .unwrap()
                .remove(0)
        };
        assert!(matches!(record.to_pass(0), Err(Error::TimeOutOfRange(_))));
    }

    #[test]
    fn grouping_keeps_order_within_cell() {
        let input = concat!(
            r#"{"machine":"a","x":1,"y":1,"time":"2020-01-02T00:00:00Z"}"#,
            "\n",
            r#"{"machine":"b","x":0,"y":0,"time":"2020-01-01T00:00:00Z"}"#,
            "\n",
            r#"{"machine":"c","x":1,"y":1,"time":"2020-01-01T00:00:00Z"}"#,
        );
        let records = read_records(input.as_bytes()).unwrap();
        let cells = group_by_cell(&records);
        assert_eq!(cells.len(), 2);
        let names: Vec<_> = cells[&(1, 1)].iter().map(|r| r.machine.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
