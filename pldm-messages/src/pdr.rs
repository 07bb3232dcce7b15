// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed parsing of platform descriptor records (DSP0248).
//!
//! A reassembled record is a 10-byte common header followed by a
//! type-specific payload. [`parse_record`] yields one [`PdrRecord`] variant
//! per supported type; unsupported types are preserved as [`PdrRecord::Other`]
//! so the repository can still account for them.
//!
//! Numeric sensor/effecter records carry a long tail of range fields the
//! agent has no use for; parsing captures the identification prefix and
//! ignores the rest.

use crate::wire::Reader;
use crate::wire::Writer;
use crate::DecodeError;

pub const PDR_HEADER_LEN: usize = 10;

pub const PDR_TYPE_TERMINUS_LOCATOR: u8 = 1;
pub const PDR_TYPE_NUMERIC_SENSOR: u8 = 2;
pub const PDR_TYPE_STATE_SENSOR: u8 = 4;
pub const PDR_TYPE_SENSOR_AUX_NAMES: u8 = 6;
pub const PDR_TYPE_NUMERIC_EFFECTER: u8 = 9;
pub const PDR_TYPE_STATE_EFFECTER: u8 = 11;
pub const PDR_TYPE_EFFECTER_AUX_NAMES: u8 = 13;
pub const PDR_TYPE_ENTITY_ASSOCIATION: u8 = 15;
pub const PDR_TYPE_ENTITY_AUX_NAMES: u8 = 16;
pub const PDR_TYPE_FRU_RECORD_SET: u8 = 20;
pub const PDR_TYPE_OEM: u8 = 127;

pub const TERMINUS_LOCATOR_VALID: u8 = 0x01;

/// A (type, instance, containerId) triple identifying a component in the
/// device's logical hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub entity_type: u16,
    pub instance: u16,
    pub container_id: u16,
}

impl Entity {
    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let entity_type = r.get_u16()?;
        let instance = r.get_u16()?;
        let container_id = r.get_u16()?;
        Ok(Self { entity_type, instance, container_id })
    }

    fn write(&self, w: &mut Writer) {
        w.put_u16(self.entity_type);
        w.put_u16(self.instance);
        w.put_u16(self.container_id);
    }
}

/// The common header carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdrHeader {
    pub record_handle: u32,
    pub version: u8,
    pub pdr_type: u8,
    pub record_change_number: u16,
    pub data_length: u16,
}

impl PdrHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let record_handle = r.get_u32()?;
        let version = r.get_u8()?;
        let pdr_type = r.get_u8()?;
        let record_change_number = r.get_u16()?;
        let data_length = r.get_u16()?;
        Ok(Self {
            record_handle,
            version,
            pdr_type,
            record_change_number,
            data_length,
        })
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u32(self.record_handle);
        w.put_u8(self.version);
        w.put_u8(self.pdr_type);
        w.put_u16(self.record_change_number);
        w.put_u16(self.data_length);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminusLocatorPdr {
    pub terminus_handle: u16,
    pub valid: bool,
    pub tid: u8,
    pub container_id: u16,
    pub locator_type: u8,
    pub locator_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAssociationPdr {
    pub container_id: u16,
    pub association_type: u8,
    pub container: Entity,
    pub contained: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAuxNamesPdr {
    pub entity: Entity,
    pub shared_name_count: u8,
    /// The `en`-tagged name, raw (unsanitized). `None` when no English name
    /// was present.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorAuxNamesPdr {
    pub terminus_handle: u16,
    pub sensor_id: u16,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffecterAuxNamesPdr {
    pub terminus_handle: u16,
    pub effecter_id: u16,
    pub name: Option<String>,
}

/// Identification prefix of a numeric sensor record.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericSensorPdr {
    pub terminus_handle: u16,
    pub sensor_id: u16,
    pub entity: Entity,
    pub sensor_init: u8,
    pub has_aux_names: bool,
    pub base_unit: u8,
    pub unit_modifier: i8,
    pub data_size: u8,
    pub resolution: f32,
    pub offset: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSensorPdr {
    pub terminus_handle: u16,
    pub sensor_id: u16,
    pub entity: Entity,
    pub sensor_init: u8,
    pub has_aux_names: bool,
    pub composite_count: u8,
    pub state_set_id: u16,
    /// Bit positions set in the possible-states bitmap of the first state
    /// set. Composite sensors are not supported; extra sets are ignored.
    pub possible_states: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericEffecterPdr {
    pub terminus_handle: u16,
    pub effecter_id: u16,
    pub entity: Entity,
    pub semantic_id: u16,
    pub effecter_init: u8,
    pub has_aux_names: bool,
    pub base_unit: u8,
    pub unit_modifier: i8,
    pub data_size: u8,
    pub resolution: f32,
    pub offset: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEffecterPdr {
    pub terminus_handle: u16,
    pub effecter_id: u16,
    pub entity: Entity,
    pub semantic_id: u16,
    pub effecter_init: u8,
    pub has_description_pdr: bool,
    pub composite_count: u8,
    pub state_set_id: u16,
    pub possible_states: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FruRecordSetPdr {
    pub terminus_handle: u16,
    pub record_set_id: u16,
    pub entity: Entity,
}

/// One variant per supported record type; consumers pattern-match.
#[derive(Debug, Clone, PartialEq)]
pub enum PdrRecord {
    TerminusLocator(TerminusLocatorPdr),
    EntityAssociation(EntityAssociationPdr),
    EntityAuxNames(EntityAuxNamesPdr),
    SensorAuxNames(SensorAuxNamesPdr),
    EffecterAuxNames(EffecterAuxNamesPdr),
    NumericSensor(NumericSensorPdr),
    StateSensor(StateSensorPdr),
    NumericEffecter(NumericEffecterPdr),
    StateEffecter(StateEffecterPdr),
    FruRecordSet(FruRecordSetPdr),
    Other { pdr_type: u8, data: Vec<u8> },
}

/// Parse a reassembled record (header plus payload) into its typed form.
pub fn parse_record(record: &[u8]) -> Result<(PdrHeader, PdrRecord), DecodeError> {
    if record.len() < PDR_HEADER_LEN {
        return Err(DecodeError::TooShort(PDR_HEADER_LEN));
    }
    let header = PdrHeader::decode(record)?;
    let mut r = Reader::new(&record[PDR_HEADER_LEN..]);

    let parsed = match header.pdr_type {
        PDR_TYPE_TERMINUS_LOCATOR => {
            let terminus_handle = r.get_u16()?;
            let valid = r.get_u8()? == TERMINUS_LOCATOR_VALID;
            let tid = r.get_u8()?;
            let container_id = r.get_u16()?;
            let locator_type = r.get_u8()?;
            let value_size = usize::from(r.get_u8()?);
            let locator_value = r.get_bytes(value_size)?.to_vec();
            PdrRecord::TerminusLocator(TerminusLocatorPdr {
                terminus_handle,
                valid,
                tid,
                container_id,
                locator_type,
                locator_value,
            })
        }
        PDR_TYPE_ENTITY_ASSOCIATION => {
            let container_id = r.get_u16()?;
            let association_type = r.get_u8()?;
            let container = Entity::read(&mut r)?;
            let count = usize::from(r.get_u8()?);
            let mut contained = Vec::with_capacity(count);
            for _ in 0..count {
                contained.push(Entity::read(&mut r)?);
            }
            PdrRecord::EntityAssociation(EntityAssociationPdr {
                container_id,
                association_type,
                container,
                contained,
            })
        }
        PDR_TYPE_ENTITY_AUX_NAMES => {
            let entity = Entity::read(&mut r)?;
            let shared_name_count = r.get_u8()?;
            let name_string_count = r.get_u8()?;
            let name = english_aux_name(name_string_count, r.rest())?;
            PdrRecord::EntityAuxNames(EntityAuxNamesPdr {
                entity,
                shared_name_count,
                name,
            })
        }
        PDR_TYPE_SENSOR_AUX_NAMES => {
            let terminus_handle = r.get_u16()?;
            let sensor_id = r.get_u16()?;
            let _sensor_count = r.get_u8()?;
            let name_string_count = r.get_u8()?;
            let name = english_aux_name(name_string_count, r.rest())?;
            PdrRecord::SensorAuxNames(SensorAuxNamesPdr {
                terminus_handle,
                sensor_id,
                name,
            })
        }
        PDR_TYPE_EFFECTER_AUX_NAMES => {
            let terminus_handle = r.get_u16()?;
            let effecter_id = r.get_u16()?;
            let _effecter_count = r.get_u8()?;
            let name_string_count = r.get_u8()?;
            let name = english_aux_name(name_string_count, r.rest())?;
            PdrRecord::EffecterAuxNames(EffecterAuxNamesPdr {
                terminus_handle,
                effecter_id,
                name,
            })
        }
        PDR_TYPE_NUMERIC_SENSOR => {
            let terminus_handle = r.get_u16()?;
            let sensor_id = r.get_u16()?;
            let entity = Entity::read(&mut r)?;
            let sensor_init = r.get_u8()?;
            let has_aux_names = r.get_u8()? != 0;
            let base_unit = r.get_u8()?;
            let unit_modifier = r.get_i8()?;
            let _rate_unit = r.get_u8()?;
            let _base_oem_unit_handle = r.get_u8()?;
            let _aux_unit = r.get_u8()?;
            let _aux_unit_modifier = r.get_i8()?;
            let _aux_rate_unit = r.get_u8()?;
            let _rel = r.get_u8()?;
            let _aux_oem_unit_handle = r.get_u8()?;
            let _is_linear = r.get_u8()?;
            let data_size = r.get_u8()?;
            let resolution = r.get_f32()?;
            let offset = r.get_f32()?;
            PdrRecord::NumericSensor(NumericSensorPdr {
                terminus_handle,
                sensor_id,
                entity,
                sensor_init,
                has_aux_names,
                base_unit,
                unit_modifier,
                data_size,
                resolution,
                offset,
            })
        }
        PDR_TYPE_STATE_SENSOR => {
            let terminus_handle = r.get_u16()?;
            let sensor_id = r.get_u16()?;
            let entity = Entity::read(&mut r)?;
            let sensor_init = r.get_u8()?;
            let has_aux_names = r.get_u8()? != 0;
            let composite_count = r.get_u8()?;
            let (state_set_id, possible_states) = possible_state_set(&mut r)?;
            PdrRecord::StateSensor(StateSensorPdr {
                terminus_handle,
                sensor_id,
                entity,
                sensor_init,
                has_aux_names,
                composite_count,
                state_set_id,
                possible_states,
            })
        }
        PDR_TYPE_NUMERIC_EFFECTER => {
            let terminus_handle = r.get_u16()?;
            let effecter_id = r.get_u16()?;
            let entity = Entity::read(&mut r)?;
            let semantic_id = r.get_u16()?;
            let effecter_init = r.get_u8()?;
            let has_aux_names = r.get_u8()? != 0;
            let base_unit = r.get_u8()?;
            let unit_modifier = r.get_i8()?;
            let _rate_unit = r.get_u8()?;
            let _base_oem_unit_handle = r.get_u8()?;
            let _aux_unit = r.get_u8()?;
            let _aux_unit_modifier = r.get_i8()?;
            let _aux_rate_unit = r.get_u8()?;
            let _aux_oem_unit_handle = r.get_u8()?;
            let _is_linear = r.get_u8()?;
            let data_size = r.get_u8()?;
            let resolution = r.get_f32()?;
            let offset = r.get_f32()?;
            PdrRecord::NumericEffecter(NumericEffecterPdr {
                terminus_handle,
                effecter_id,
                entity,
                semantic_id,
                effecter_init,
                has_aux_names,
                base_unit,
                unit_modifier,
                data_size,
                resolution,
                offset,
            })
        }
        PDR_TYPE_STATE_EFFECTER => {
            let terminus_handle = r.get_u16()?;
            let effecter_id = r.get_u16()?;
            let entity = Entity::read(&mut r)?;
            let semantic_id = r.get_u16()?;
            let effecter_init = r.get_u8()?;
            let has_description_pdr = r.get_u8()? != 0;
            let composite_count = r.get_u8()?;
            let (state_set_id, possible_states) = possible_state_set(&mut r)?;
            PdrRecord::StateEffecter(StateEffecterPdr {
                terminus_handle,
                effecter_id,
                entity,
                semantic_id,
                effecter_init,
                has_description_pdr,
                composite_count,
                state_set_id,
                possible_states,
            })
        }
        PDR_TYPE_FRU_RECORD_SET => {
            let terminus_handle = r.get_u16()?;
            let record_set_id = r.get_u16()?;
            let entity = Entity::read(&mut r)?;
            PdrRecord::FruRecordSet(FruRecordSetPdr {
                terminus_handle,
                record_set_id,
                entity,
            })
        }
        pdr_type => PdrRecord::Other { pdr_type, data: r.rest().to_vec() },
    };
    Ok((header, parsed))
}

// Possible-states bitmap of the first state set. Bit N*8+M of byte N maps
// to state value N*8+M. Table 81 of DSP0248 caps the bitmap at 32 bytes.
fn possible_state_set(
    r: &mut Reader<'_>,
) -> Result<(u16, Vec<u16>), DecodeError> {
    const MAX_POSSIBLE_STATES_SIZE: usize = 0x20;

    let state_set_id = r.get_u16()?;
    let size = usize::from(r.get_u8()?).min(MAX_POSSIBLE_STATES_SIZE);
    let bytes = r.get_bytes(size)?;
    let mut states = Vec::new();
    for (index, byte) in bytes.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                states.push((index * 8 + bit) as u16);
            }
        }
    }
    Ok((state_set_id, states))
}

/// Walk the auxiliary-name list and return the first `en`-tagged entry.
///
/// Each entry is an ASCII nul-terminated language tag followed by a UTF-16BE
/// nul-terminated string. Unterminated strings beyond 64 code units mean the
/// record is corrupt and the whole list is abandoned.
fn english_aux_name(
    name_string_count: u8,
    buf: &[u8],
) -> Result<Option<String>, DecodeError> {
    const MAX_STR_LEN: usize = 64;
    const SUPPORTED_LANG_TAG: &str = "en";

    let mut rest = buf;
    for _ in 0..name_string_count {
        if rest.is_empty() {
            break;
        }
        // Language tag: ASCII up to nul.
        let tag_end = match rest.iter().take(MAX_STR_LEN + 1).position(|&b| b == 0) {
            Some(end) => end,
            None => return Ok(None),
        };
        let tag = String::from_utf8_lossy(&rest[..tag_end]).to_string();
        rest = &rest[tag_end + 1..];

        // Name: UTF-16BE code units up to a nul code unit.
        let mut units = Vec::new();
        loop {
            if units.len() > MAX_STR_LEN {
                return Ok(None);
            }
            if rest.len() < 2 {
                return Err(DecodeError::Truncated);
            }
            let unit = u16::from_be_bytes([rest[0], rest[1]]);
            rest = &rest[2..];
            if unit == 0 {
                break;
            }
            units.push(unit);
        }

        if tag == SUPPORTED_LANG_TAG {
            return Ok(Some(String::from_utf16_lossy(&units)));
        }
    }
    Ok(None)
}

/// CRC-8 (polynomial 0x07, init 0) over a byte slice; guards the multi-part
/// record transfer.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

// ---------------------------------------------------------------------------
// Record builders, used by the scripted device in tests and by callers that
// need to synthesize repositories.

fn build_record(
    record_handle: u32,
    pdr_type: u8,
    body: impl FnOnce(&mut Writer),
) -> Vec<u8> {
    let mut payload = Writer::new();
    body(&mut payload);
    let payload = payload.into_vec();

    let mut w = Writer::with_capacity(PDR_HEADER_LEN + payload.len());
    PdrHeader {
        record_handle,
        version: 1,
        pdr_type,
        record_change_number: 0,
        data_length: payload.len() as u16,
    }
    .encode(&mut w);
    w.put_bytes(&payload);
    w.into_vec()
}

pub fn build_terminus_locator(record_handle: u32, pdr: &TerminusLocatorPdr) -> Vec<u8> {
    build_record(record_handle, PDR_TYPE_TERMINUS_LOCATOR, |w| {
        w.put_u16(pdr.terminus_handle);
        w.put_u8(if pdr.valid { TERMINUS_LOCATOR_VALID } else { 0 });
        w.put_u8(pdr.tid);
        w.put_u16(pdr.container_id);
        w.put_u8(pdr.locator_type);
        w.put_u8(pdr.locator_value.len() as u8);
        w.put_bytes(&pdr.locator_value);
    })
}

pub fn build_entity_association(
    record_handle: u32,
    pdr: &EntityAssociationPdr,
) -> Vec<u8> {
    build_record(record_handle, PDR_TYPE_ENTITY_ASSOCIATION, |w| {
        w.put_u16(pdr.container_id);
        w.put_u8(pdr.association_type);
        pdr.container.write(w);
        w.put_u8(pdr.contained.len() as u8);
        for entity in &pdr.contained {
            entity.write(w);
        }
    })
}

pub fn build_entity_aux_names(
    record_handle: u32,
    entity: Entity,
    shared_name_count: u8,
    name: &str,
) -> Vec<u8> {
    build_record(record_handle, PDR_TYPE_ENTITY_AUX_NAMES, |w| {
        entity.write(w);
        w.put_u8(shared_name_count);
        w.put_u8(1);
        write_aux_name(w, "en", name);
    })
}

pub fn build_sensor_aux_names(
    record_handle: u32,
    sensor_id: u16,
    name: &str,
) -> Vec<u8> {
    build_record(record_handle, PDR_TYPE_SENSOR_AUX_NAMES, |w| {
        w.put_u16(1);
        w.put_u16(sensor_id);
        w.put_u8(1);
        w.put_u8(1);
        write_aux_name(w, "en", name);
    })
}

pub fn build_fru_record_set(
    record_handle: u32,
    record_set_id: u16,
    entity: Entity,
) -> Vec<u8> {
    build_record(record_handle, PDR_TYPE_FRU_RECORD_SET, |w| {
        w.put_u16(1);
        w.put_u16(record_set_id);
        entity.write(w);
    })
}

pub fn write_aux_name(w: &mut Writer, lang: &str, name: &str) {
    w.put_bytes(lang.as_bytes());
    w.put_u8(0);
    for unit in name.encode_utf16() {
        w.put_bytes(&unit.to_be_bytes());
    }
    w.put_bytes(&[0, 0]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc8_vectors() {
        assert_eq!(crc8(&[]), 0x00);
        // Known vector for poly 0x07: "123456789" -> 0xF4.
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn terminus_locator_round_trip() {
        let pdr = TerminusLocatorPdr {
            terminus_handle: 1,
            valid: true,
            tid: 0,
            container_id: 0x1234,
            locator_type: 0x01,
            locator_value: vec![0x08],
        };
        let record = build_terminus_locator(5, &pdr);
        let (header, parsed) = parse_record(&record).unwrap();
        assert_eq!(header.record_handle, 5);
        assert_eq!(header.pdr_type, PDR_TYPE_TERMINUS_LOCATOR);
        assert_eq!(parsed, PdrRecord::TerminusLocator(pdr));
    }

    #[test]
    fn entity_association_round_trip() {
        let pdr = EntityAssociationPdr {
            container_id: 2,
            association_type: 0,
            container: Entity { entity_type: 45, instance: 1, container_id: 2 },
            contained: vec![
                Entity { entity_type: 67, instance: 1, container_id: 3 },
                Entity { entity_type: 67, instance: 2, container_id: 3 },
            ],
        };
        let record = build_entity_association(9, &pdr);
        let (_, parsed) = parse_record(&record).unwrap();
        assert_eq!(parsed, PdrRecord::EntityAssociation(pdr));
    }

    #[test]
    fn english_name_is_selected() {
        let entity = Entity { entity_type: 45, instance: 1, container_id: 2 };
        let mut w = Writer::new();
        PdrHeader {
            record_handle: 1,
            version: 1,
            pdr_type: PDR_TYPE_ENTITY_AUX_NAMES,
            record_change_number: 0,
            data_length: 0,
        }
        .encode(&mut w);
        entity.write(&mut w);
        w.put_u8(0); // shared name count
        w.put_u8(2); // two names: de first, then en
        write_aux_name(&mut w, "de", "Hauptplatine");
        write_aux_name(&mut w, "en", "Main Board");

        let (_, parsed) = parse_record(&w.into_vec()).unwrap();
        match parsed {
            PdrRecord::EntityAuxNames(names) => {
                assert_eq!(names.name.as_deref(), Some("Main Board"));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn missing_english_name_is_none() {
        let record = {
            let mut w = Writer::new();
            PdrHeader {
                record_handle: 1,
                version: 1,
                pdr_type: PDR_TYPE_ENTITY_AUX_NAMES,
                record_change_number: 0,
                data_length: 0,
            }
            .encode(&mut w);
            Entity { entity_type: 1, instance: 1, container_id: 0 }
                .write(&mut w);
            w.put_u8(0);
            w.put_u8(1);
            write_aux_name(&mut w, "fr", "Carte");
            w.into_vec()
        };
        let (_, parsed) = parse_record(&record).unwrap();
        match parsed {
            PdrRecord::EntityAuxNames(names) => assert_eq!(names.name, None),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn state_sensor_possible_states() {
        let mut w = Writer::new();
        PdrHeader {
            record_handle: 3,
            version: 1,
            pdr_type: PDR_TYPE_STATE_SENSOR,
            record_change_number: 0,
            data_length: 0,
        }
        .encode(&mut w);
        w.put_u16(1); // terminus handle
        w.put_u16(0x10); // sensor id
        Entity { entity_type: 67, instance: 1, container_id: 3 }.write(&mut w);
        w.put_u8(0); // init
        w.put_u8(0); // no aux names
        w.put_u8(1); // one set
        w.put_u16(196); // state set id
        w.put_u8(2); // bitmap size
        w.put_bytes(&[0b0000_0110, 0b0000_0001]); // states 1, 2, 8

        let (_, parsed) = parse_record(&w.into_vec()).unwrap();
        match parsed {
            PdrRecord::StateSensor(sensor) => {
                assert_eq!(sensor.state_set_id, 196);
                assert_eq!(sensor.possible_states, vec![1, 2, 8]);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_preserved() {
        let mut w = Writer::new();
        PdrHeader {
            record_handle: 4,
            version: 1,
            pdr_type: 99,
            record_change_number: 0,
            data_length: 3,
        }
        .encode(&mut w);
        w.put_bytes(&[1, 2, 3]);
        let (_, parsed) = parse_record(&w.into_vec()).unwrap();
        assert_eq!(parsed, PdrRecord::Other { pdr_type: 99, data: vec![1, 2, 3] });
    }
}
