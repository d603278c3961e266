//! The cell pass record: one machine-sensor observation of one ground cell.
//!
//! Every field has a NULL sentinel (see [`cps_common::consts`]). A cleared
//! pass carries the sentinel in every field except `pass_type`, which stays
//! [`PassType::Front`]. That quirk is kept for compatibility with stored
//! data: `Front` is not a meaningful "no pass type" value, so code that
//! needs to know whether a pass is null must look at `time`, not
//! `pass_type`.
//!
//! ## Wire layout (38 bytes, little-endian)
//!
//! ```text
//! time:                    i64  [0..8]    ticks since 0001-01-01
//! height:                  f32  [8..12]
//! ccv:                     i16  [12..14]
//! mdp:                     i16  [14..16]
//! rmv:                     i16  [16..18]
//! frequency:               i16  [18..20]
//! amplitude:               i16  [20..22]
//! material_temperature:    i16  [22..24]
//! machine_id:              i32  [24..28]
//! machine_speed:           f32  [28..32]
//! gps_mode:                u8   [32]
//! half_pass:               u8   [33]      0 or 1
//! pass_type:               u8   [34]
//! radio_latency:           u8   [35]
//! site_model_machine_index i16  [36..38]
//! ```

use chrono::{DateTime, Utc};
use cps_common::consts::*;
use cps_common::{checked_ticks_from_datetime, datetime_from_ticks, min_time, Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::codec;

/// Wire size of one encoded cell pass, in bytes.
pub const CELL_PASS_WIRE_SIZE: usize = 38;

/// Positioning quality reported by the machine's GNSS receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsMode {
    Old,
    Fixed,
    Float,
    Dgps,
    Sbas,
    Autonomous,
    LocationRtk,
    /// NULL: no positioning information.
    NoGps,
}

impl GpsMode {
    pub fn as_u8(self) -> u8 {
        match self {
            GpsMode::Old => 0,
            GpsMode::Fixed => 1,
            GpsMode::Float => 2,
            GpsMode::Dgps => 3,
            GpsMode::Sbas => 4,
            GpsMode::Autonomous => 5,
            GpsMode::LocationRtk => 6,
            GpsMode::NoGps => NULL_GPS_MODE,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GpsMode::Old),
            1 => Some(GpsMode::Fixed),
            2 => Some(GpsMode::Float),
            3 => Some(GpsMode::Dgps),
            4 => Some(GpsMode::Sbas),
            5 => Some(GpsMode::Autonomous),
            6 => Some(GpsMode::LocationRtk),
            NULL_GPS_MODE => Some(GpsMode::NoGps),
            _ => None,
        }
    }
}

/// Which part of the machine produced the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassType {
    #[default]
    Front,
    Rear,
    Track,
    Wheel,
}

impl PassType {
    pub fn as_u8(self) -> u8 {
        match self {
            PassType::Front => 0,
            PassType::Rear => 1,
            PassType::Track => 2,
            PassType::Wheel => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PassType::Front),
            1 => Some(PassType::Rear),
            2 => Some(PassType::Track),
            3 => Some(PassType::Wheel),
            _ => None,
        }
    }
}

/// One machine pass over one cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellPass {
    pub time: DateTime<Utc>,
    pub height: f32,
    pub ccv: i16,
    pub mdp: i16,
    pub rmv: i16,
    pub frequency: i16,
    pub amplitude: i16,
    pub material_temperature: i16,
    /// Dense index into the dataset's machine table.
    pub machine_id: i32,
    pub machine_speed: f32,
    pub gps_mode: GpsMode,
    pub half_pass: bool,
    pub pass_type: PassType,
    pub radio_latency: u8,
    pub site_model_machine_index: i16,
}

impl CellPass {
    /// A pass with every field NULL (and `pass_type == Front`).
    pub fn null() -> Self {
        Self {
            time: min_time(),
            height: NULL_HEIGHT,
            ccv: NULL_CCV,
            mdp: NULL_MDP,
            rmv: NULL_RMV,
            frequency: NULL_FREQUENCY,
            amplitude: NULL_AMPLITUDE,
            material_temperature: NULL_MATERIAL_TEMPERATURE,
            machine_id: NULL_MACHINE_ID,
            machine_speed: NULL_MACHINE_SPEED,
            gps_mode: GpsMode::NoGps,
            half_pass: false,
            pass_type: PassType::Front,
            radio_latency: NULL_RADIO_LATENCY,
            site_model_machine_index: NULL_SITE_MODEL_MACHINE_INDEX,
        }
    }

    /// A NULL pass carrying only a machine and a time.
    pub fn at(machine_id: i32, time: DateTime<Utc>) -> Self {
        Self {
            machine_id,
            time,
            ..Self::null()
        }
    }

    /// Reset every field to its NULL sentinel.
    pub fn clear(&mut self) {
        *self = Self::null();
    }

    /// Copy every field from `other`.
    pub fn assign(&mut self, other: &CellPass) {
        *self = *other;
    }

    /// Key used to de-duplicate passes when integrating two histories.
    pub fn machine_id_and_time(&self) -> (i32, DateTime<Utc>) {
        (self.machine_id, self.time)
    }

    /// NULL out the vibratory compaction measurements, leaving everything
    /// else untouched. Used when the machine reports vibration off.
    pub fn set_fields_for_vibe_state_off(&mut self) {
        self.ccv = NULL_CCV;
        self.rmv = NULL_RMV;
        self.frequency = NULL_FREQUENCY;
        self.amplitude = NULL_AMPLITUDE;
    }

    pub fn is_null_time(&self) -> bool {
        self.time == min_time()
    }

    pub fn has_height(&self) -> bool {
        self.height.to_bits() != NULL_HEIGHT.to_bits()
    }

    pub fn has_ccv(&self) -> bool {
        self.ccv != NULL_CCV
    }

    pub fn has_mdp(&self) -> bool {
        self.mdp != NULL_MDP
    }

    pub fn has_machine_speed(&self) -> bool {
        self.machine_speed.to_bits() != NULL_MACHINE_SPEED.to_bits()
    }

    /// Serialize to [`CELL_PASS_WIRE_SIZE`] bytes, little-endian.
    ///
    /// Fails with [`Error::TimeOutOfRange`] when the time has no wire ticks.
    pub fn encode(&self, buf: &mut [u8; CELL_PASS_WIRE_SIZE]) -> Result<()> {
        let ticks = checked_ticks_from_datetime(self.time)
            .ok_or_else(|| Error::TimeOutOfRange(self.time.to_rfc3339()))?;
        buf[0..8].copy_from_slice(&ticks.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..14].copy_from_slice(&self.ccv.to_le_bytes());
        buf[14..16].copy_from_slice(&self.mdp.to_le_bytes());
        buf[16..18].copy_from_slice(&self.rmv.to_le_bytes());
        buf[18..20].copy_from_slice(&self.frequency.to_le_bytes());
        buf[20..22].copy_from_slice(&self.amplitude.to_le_bytes());
        buf[22..24].copy_from_slice(&self.material_temperature.to_le_bytes());
        buf[24..28].copy_from_slice(&self.machine_id.to_le_bytes());
        buf[28..32].copy_from_slice(&self.machine_speed.to_le_bytes());
        buf[32] = self.gps_mode.as_u8();
        buf[33] = u8::from(self.half_pass);
        buf[34] = self.pass_type.as_u8();
        buf[35] = self.radio_latency;
        buf[36..38].copy_from_slice(&self.site_model_machine_index.to_le_bytes());
        Ok(())
    }

    /// Deserialize from [`CELL_PASS_WIRE_SIZE`] bytes, little-endian.
    pub fn decode(buf: &[u8; CELL_PASS_WIRE_SIZE]) -> Result<Self> {
        let le_i16 = |at: usize| i16::from_le_bytes([buf[at], buf[at + 1]]);
        let le_4 = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];

        let mut ticks = [0u8; 8];
        ticks.copy_from_slice(&buf[0..8]);
        let ticks = i64::from_le_bytes(ticks);
        let time = datetime_from_ticks(ticks)
            .ok_or_else(|| Error::decoding(format!("pass time ticks {ticks} out of range")))?;

        let gps_mode = GpsMode::from_u8(buf[32])
            .ok_or_else(|| Error::decoding(format!("unknown gps mode {}", buf[32])))?;
        let half_pass = match buf[33] {
            0 => false,
            1 => true,
            other => return Err(Error::decoding(format!("half pass flag {other} is not 0/1"))),
        };
        let pass_type = PassType::from_u8(buf[34])
            .ok_or_else(|| Error::decoding(format!("unknown pass type {}", buf[34])))?;

        Ok(Self {
            time,
            height: f32::from_le_bytes(le_4(8)),
            ccv: le_i16(12),
            mdp: le_i16(14),
            rmv: le_i16(16),
            frequency: le_i16(18),
            amplitude: le_i16(20),
            material_temperature: le_i16(22),
            machine_id: i32::from_le_bytes(le_4(24)),
            machine_speed: f32::from_le_bytes(le_4(28)),
            gps_mode,
            half_pass,
            pass_type,
            radio_latency: buf[35],
            site_model_machine_index: le_i16(36),
        })
    }

    /// Write the fixed-width encoding to `writer`.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; CELL_PASS_WIRE_SIZE];
        self.encode(&mut buf)?;
        codec::write_all(writer, &buf)
    }

    /// Read one fixed-width encoding from `reader`.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; CELL_PASS_WIRE_SIZE];
        codec::read_exact(reader, &mut buf, "cell pass")?;
        Self::decode(&buf)
    }
}

impl Default for CellPass {
    fn default() -> Self {
        Self::null()
    }
}

/// Field-wise equality. Floats compare bitwise so NULL sentinels (and any
/// NaN that arrives from a device) are equal to themselves.
impl PartialEq for CellPass {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
            && self.height.to_bits() == other.height.to_bits()
            && self.ccv == other.ccv
            && self.mdp == other.mdp
            && self.rmv == other.rmv
            && self.frequency == other.frequency
            && self.amplitude == other.amplitude
            && self.material_temperature == other.material_temperature
            && self.machine_id == other.machine_id
            && self.machine_speed.to_bits() == other.machine_speed.to_bits()
            && self.gps_mode == other.gps_mode
            && self.half_pass == other.half_pass
            && self.pass_type == other.pass_type
            && self.radio_latency == other.radio_latency
            && self.site_model_machine_index == other.site_model_machine_index
    }
}

impl Eq for CellPass {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> CellPass {
        CellPass {
            time: Utc.with_ymd_and_hms(2020, 3, 14, 9, 26, 53).unwrap(),
            height: 101.25,
            ccv: 340,
            mdp: 120,
            rmv: 18,
            frequency: 2800,
            amplitude: 95,
            material_temperature: 142,
            machine_id: 3,
            machine_speed: 1.8,
            gps_mode: GpsMode::Fixed,
            half_pass: true,
            pass_type: PassType::Rear,
            radio_latency: 12,
            site_model_machine_index: 3,
        }
    }

    #[test]
    fn clear_sets_all_nulls_and_front() {
        let mut pass = sample();
        pass.clear();

        assert!(pass.is_null_time());
        assert!(!pass.has_height());
        assert!(!pass.has_ccv());
        assert!(!pass.has_mdp());
        assert!(!pass.has_machine_speed());
        assert_eq!(pass.rmv, NULL_RMV);
        assert_eq!(pass.frequency, NULL_FREQUENCY);
        assert_eq!(pass.amplitude, NULL_AMPLITUDE);
        assert_eq!(pass.material_temperature, NULL_MATERIAL_TEMPERATURE);
        assert_eq!(pass.machine_id, NULL_MACHINE_ID);
        assert_eq!(pass.gps_mode, GpsMode::NoGps);
        assert!(!pass.half_pass);
        assert_eq!(pass.radio_latency, NULL_RADIO_LATENCY);
        assert_eq!(pass.site_model_machine_index, i16::MAX);
        assert_eq!(pass.pass_type, PassType::Front);
        assert_eq!(pass, CellPass::null());
    }

    #[test]
    fn equality_is_reflexive_for_null_floats() {
        let pass = CellPass::null();
        assert_eq!(pass, pass);

        let mut nan = sample();
        nan.height = f32::NAN;
        assert_eq!(nan, nan);
    }

    #[test]
    fn equality_detects_single_field_change() {
        let a = sample();
        let mut b = a;
        b.radio_latency += 1;
        assert_ne!(a, b);
    }

    #[test]
    fn assign_copies_every_field() {
        let source = sample();
        let mut target = CellPass::null();
        target.assign(&source);
        assert_eq!(target, source);
    }

    #[test]
    fn machine_id_and_time_key() {
        let pass = sample();
        assert_eq!(pass.machine_id_and_time(), (3, pass.time));
    }

    #[test]
    fn vibe_state_off_nulls_only_vibration_fields() {
        let mut pass = sample();
        pass.set_fields_for_vibe_state_off();

        assert_eq!(pass.ccv, NULL_CCV);
        assert_eq!(pass.rmv, NULL_RMV);
        assert_eq!(pass.frequency, NULL_FREQUENCY);
        assert_eq!(pass.amplitude, NULL_AMPLITUDE);

        let original = sample();
        assert_eq!(pass.mdp, original.mdp);
        assert_eq!(pass.height, original.height);
        assert_eq!(pass.time, original.time);
        assert_eq!(pass.material_temperature, original.material_temperature);
    }

    #[test]
    fn write_read_roundtrip() {
        for pass in [sample(), CellPass::null()] {
            let mut bytes = Vec::new();
            pass.write(&mut bytes).expect("write");
            assert_eq!(bytes.len(), CELL_PASS_WIRE_SIZE);
            let back = CellPass::read(&mut bytes.as_slice()).expect("read");
            assert_eq!(back, pass);
        }
    }

    #[test]
    fn read_rejects_truncated_input() {
        let mut bytes = Vec::new();
        sample().write(&mut bytes).expect("write");
        bytes.truncate(CELL_PASS_WIRE_SIZE - 1);
        let err = CellPass::read(&mut bytes.as_slice()).unwrap_err();
        assert!(err.is_decoding());
    }

    #[test]
    fn decode_rejects_bad_discriminants() {
        let mut buf = [0u8; CELL_PASS_WIRE_SIZE];
        sample().encode(&mut buf).unwrap();

        let mut bad_gps = buf;
        bad_gps[32] = 9;
        assert!(CellPass::decode(&bad_gps).is_err());

        let mut bad_half = buf;
        bad_half[33] = 2;
        assert!(CellPass::decode(&bad_half).is_err());

        let mut bad_type = buf;
        bad_type[34] = 4;
        assert!(CellPass::decode(&bad_type).is_err());
    }

    #[test]
    fn write_rejects_time_without_wire_ticks() {
        let far = Utc.with_ymd_and_hms(100_000, 1, 1, 0, 0, 0).unwrap();
        let mut bytes = Vec::new();
        let err = CellPass::at(0, far).write(&mut bytes).unwrap_err();
        assert!(matches!(err, Error::TimeOutOfRange(_)), "{err}");
        assert!(bytes.is_empty());
    }

    #[test]
    fn decode_rejects_ticks_outside_range() {
        let mut buf = [0u8; CELL_PASS_WIRE_SIZE];
        sample().encode(&mut buf).unwrap();
        buf[0..8].copy_from_slice(&(-1i64).to_le_bytes());
        assert!(CellPass::decode(&buf).unwrap_err().is_decoding());
        buf[0..8].copy_from_slice(&(cps_common::MAX_TICKS + 1).to_le_bytes());
        assert!(CellPass::decode(&buf).unwrap_err().is_decoding());
    }

    #[test]
    fn encoded_field_positions() {
        let mut buf = [0u8; CELL_PASS_WIRE_SIZE];
        sample().encode(&mut buf).unwrap();
        assert_eq!(i16::from_le_bytes([buf[12], buf[13]]), 340);
        assert_eq!(i32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]), 3);
        assert_eq!(buf[32], 1);
        assert_eq!(buf[34], 1);
        assert_eq!(i16::from_le_bytes([buf[36], buf[37]]), 3);
    }
}
