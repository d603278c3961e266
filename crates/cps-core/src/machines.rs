//! The per-dataset machine table.
//!
//! Machines get dense ids in registration order; `CellPass::machine_id`
//! indexes this table.

use chrono::{DateTime, Utc};
use cps_common::{schema, Error, Result, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};

/// Name of the non-spatial stream holding the table.
pub const MACHINES_STREAM: &str = "machines";

/// One machine seen by a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: i32,
    pub name: String,
    /// Telemetry from an unidentified machine.
    pub is_john_doe: bool,
    pub last_known_time: Option<DateTime<Utc>>,
}

/// Append-only table of machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineTable {
    schema_version: String,
    machines: Vec<Machine>,
}

impl Default for MachineTable {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            machines: Vec::new(),
        }
    }
}

impl MachineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn get(&self, id: i32) -> Option<&Machine> {
        usize::try_from(id).ok().and_then(|i| self.machines.get(i))
    }

    pub fn find(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.machines.iter()
    }

    /// Id of the machine called `name`, registering it if new.
    pub fn register(&mut self, name: &str, is_john_doe: bool) -> Result<i32> {
        if let Some(existing) = self.find(name) {
            return Ok(existing.id);
        }
        let id = i32::try_from(self.machines.len())
            .map_err(|_| Error::Config("machine table is full".to_string()))?;
        self.machines.push(Machine {
            id,
            name: name.to_string(),
            is_john_doe,
            last_known_time: None,
        });
        Ok(id)
    }

    /// Advance a machine's last known time. Earlier times are ignored.
    /// Returns whether the table changed.
    pub fn observe(&mut self, id: i32, time: DateTime<Utc>) -> bool {
        let Some(machine) = usize::try_from(id).ok().and_then(|i| self.machines.get_mut(i)) else {
            return false;
        };
        if machine.last_known_time.is_some_and(|t| t >= time) {
            return false;
        }
        machine.last_known_time = Some(time);
        true
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let table: Self = serde_json::from_slice(bytes)?;
        if !schema::is_compatible(&table.schema_version) {
            return Err(Error::decoding(format!(
                "machine table schema {} is not compatible with {}",
                table.schema_version, SCHEMA_VERSION
            )));
        }
        let dense = table
            .machines
            .iter()
            .enumerate()
            .all(|(i, m)| usize::try_from(m.id).is_ok_and(|id| id == i));
        if !dense {
            return Err(Error::decoding("machine ids are not dense"));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn register_is_idempotent_by_name() {
        let mut table = MachineTable::new();
        assert_eq!(table.register("roller-1", false).unwrap(), 0);
        assert_eq!(table.register("roller-2", false).unwrap(), 1);
        assert_eq!(table.register("roller-1", true).unwrap(), 0);
        assert_eq!(table.len(), 2);
        assert!(!table.get(0).unwrap().is_john_doe);
    }

    #[test]
    fn observe_only_moves_forward() {
        let mut table = MachineTable::new();
        let id = table.register("dozer", false).unwrap();
        let t1 = Utc.with_ymd_and_hms(2020, 5, 1, 8, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2020, 5, 1, 7, 0, 0).unwrap();

        assert!(table.observe(id, t1));
        assert!(!table.observe(id, t0));
        assert!(!table.observe(7, t1));
        assert_eq!(table.get(id).unwrap().last_known_time, Some(t1));
    }

    #[test]
    fn json_round_trip_and_density_check() {
        let mut table = MachineTable::new();
        table.register("a", false).unwrap();
        table.register("b", true).unwrap();
        let restored = MachineTable::from_json(&table.to_json().unwrap()).unwrap();
        assert_eq!(restored, table);

        let holes = br#"{"schema_version":"1.0.0","machines":[{"id":3,"name":"x","is_john_doe":false,"last_known_time":null}]}"#;
        assert!(MachineTable::from_json(holes).unwrap_err().is_decoding());
    }
}
