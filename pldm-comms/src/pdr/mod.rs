// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device descriptor-record manager.
//!
//! Retrieval first: the repository is fetched record by record over the
//! multi-part GetPDR transfer, CRC-checked, and counted against what the
//! device declared. Then a parse pass materializes the typed model: entity
//! auxiliary names, the entity-association tree and its object paths, the
//! device name, and the sensor/effecter/FRU descriptors that downstream
//! surfaces consume.

pub mod tree;

use fxhash::FxHashMap;
use pldm_messages::pdr;
use pldm_messages::pdr::Entity;
use pldm_messages::pdr::EntityAssociationPdr;
use pldm_messages::pdr::PdrHeader;
use pldm_messages::pdr::PdrRecord;
use pldm_messages::platform;
use pldm_messages::platform::GetPdrRequest;
use pldm_messages::platform::RepositoryInfo;
use pldm_messages::platform::RepositoryState;
use pldm_messages::completion;
use pldm_messages::Tid;
use pldm_messages::TransferFlag;
use pldm_messages::TransferOp;
use slog::info;
use slog::warn;
use slog::Logger;
use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::PdrError;
use crate::publish::EffecterDescriptor;
use crate::publish::EffecterKind;
use crate::publish::FruRecordSetDescriptor;
use crate::publish::Publisher;
use crate::publish::SensorDescriptor;
use crate::publish::SensorKind;
use crate::SharedLink;
use crate::COMMAND_RETRIES;
use crate::COMMAND_TIMEOUT;

use self::tree::EntityTree;

/// Attempts at fetching the whole repository before giving up.
const REPO_FETCH_TRIES: usize = 3;

/// Segments allowed for a single record before it is abandoned.
const MAX_RECORD_SEGMENTS: usize = 100;

/// Bytes of record data requested per GetPDR segment.
const SEGMENT_REQUEST_COUNT: u16 = 64;

#[derive(Debug, Clone)]
struct StoredRecord {
    header: PdrHeader,
    raw: Vec<u8>,
    parsed: PdrRecord,
}

pub struct PdrManager {
    tid: Tid,
    log: Logger,
    repo_info: RepositoryInfo,
    records: Vec<StoredRecord>,
    container_id: u16,
    device_name: String,
    entity_paths: FxHashMap<Entity, String>,
    tree: Option<EntityTree>,
    sensors: FxHashMap<u16, SensorDescriptor>,
    effecters: FxHashMap<u16, EffecterDescriptor>,
    fru_record_sets: FxHashMap<u16, FruRecordSetDescriptor>,
}

impl PdrManager {
    /// Fetch and materialize the repository of `tid`.
    pub async fn initialize(
        link: &SharedLink,
        tid: Tid,
        publisher: &Arc<dyn Publisher>,
        log: Logger,
    ) -> Result<Self, PdrError> {
        let repo_info = fetch_repository_info(link, tid).await?;
        if repo_info.state != RepositoryState::Available {
            warn!(log, "device PDR repository unavailable"; "tid" => tid);
            return Err(PdrError::RepoUnavailable);
        }
        if repo_info.record_count == 0 {
            warn!(log, "no PDR records to fetch"; "tid" => tid);
            return Err(PdrError::Empty);
        }

        let records = fetch_repository(link, tid, &repo_info, &log).await?;
        info!(
            log, "PDR repository constructed";
            "tid" => tid,
            "records" => records.len(),
        );

        let mut manager = Self {
            tid,
            log,
            repo_info,
            records,
            container_id: 0,
            device_name: String::new(),
            entity_paths: FxHashMap::default(),
            tree: None,
            sensors: FxHashMap::default(),
            effecters: FxHashMap::default(),
            fru_record_sets: FxHashMap::default(),
        };
        manager.bind_terminus_locator()?;
        manager.materialize(link, publisher);
        Ok(manager)
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn repository_info(&self) -> &RepositoryInfo {
        &self.repo_info
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn entity_path(&self, entity: Entity) -> Option<&str> {
        self.entity_paths.get(&entity).map(String::as_str)
    }

    pub fn sensor(&self, id: u16) -> Option<&SensorDescriptor> {
        self.sensors.get(&id)
    }

    pub fn effecter(&self, id: u16) -> Option<&EffecterDescriptor> {
        self.effecters.get(&id)
    }

    pub fn fru_record_set(&self, id: u16) -> Option<&FruRecordSetDescriptor> {
        self.fru_record_sets.get(&id)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors.values()
    }

    pub fn effecters(&self) -> impl Iterator<Item = &EffecterDescriptor> {
        self.effecters.values()
    }

    pub fn entity_tree(&self) -> Option<&EntityTree> {
        self.tree.as_ref()
    }

    /// Find the TID binding in the (single) valid terminus-locator record,
    /// stamp our TID into it, and remember the device container id.
    fn bind_terminus_locator(&mut self) -> Result<(), PdrError> {
        let mut found = false;
        for record in &mut self.records {
            if let PdrRecord::TerminusLocator(locator) = &mut record.parsed {
                if !locator.valid {
                    continue;
                }
                if found {
                    warn!(
                        self.log,
                        "multiple valid terminus locator records";
                        "tid" => self.tid,
                    );
                    return Err(PdrError::Inconsistent {
                        reason: "multiple valid terminus locator records",
                    });
                }
                locator.tid = self.tid;
                // Keep the raw bytes in step; the dump exposes them.
                // Locator layout: terminus handle (2), validity (1), TID.
                if let Some(byte) =
                    record.raw.get_mut(pdr::PDR_HEADER_LEN + 3)
                {
                    *byte = self.tid;
                }
                self.container_id = locator.container_id;
                found = true;
            }
        }
        if !found {
            warn!(self.log, "terminus locator record not found"; "tid" => self.tid);
        }
        Ok(())
    }

    fn materialize(&mut self, link: &SharedLink, publisher: &Arc<dyn Publisher>) {
        // Entity auxiliary names first; everything downstream names through
        // them.
        let mut entity_names: FxHashMap<Entity, String> = FxHashMap::default();
        let mut associations: Vec<EntityAssociationPdr> = Vec::new();
        for record in &self.records {
            match &record.parsed {
                PdrRecord::EntityAuxNames(names) => {
                    let Some(name) =
                        names.name.as_deref().and_then(sanitize_name)
                    else {
                        warn!(
                            self.log, "discarding invalid entity aux name";
                            "tid" => self.tid,
                        );
                        continue;
                    };
                    if names.shared_name_count == 0 {
                        entity_names.insert(names.entity, name);
                    } else {
                        // sharedNameCount + 1 entities share the name with
                        // an index suffix, starting at the record's
                        // instance number.
                        for n in 0..=u16::from(names.shared_name_count) {
                            let entity = Entity {
                                instance: names.entity.instance + n,
                                ..names.entity
                            };
                            entity_names.insert(entity, format!("{name}_{n}"));
                        }
                    }
                }
                PdrRecord::EntityAssociation(assoc) => {
                    associations.push(assoc.clone());
                }
                _ => {}
            }
        }

        self.tree = tree::build(associations, self.container_id, &self.log);
        if let Some(tree) = &self.tree {
            for chain in tree.paths() {
                let mut path = format!("/system/{}", self.tid);
                for entity in &chain {
                    let segment = entity_names
                        .get(entity)
                        .cloned()
                        .unwrap_or_else(|| synthetic_entity_name(*entity));
                    let _ = write!(path, "/{segment}");
                }
                let entity = *chain.last().unwrap();
                publisher.register_entity(self.tid, &path, entity);
                self.entity_paths.entry(entity).or_insert(path);
            }
        } else {
            warn!(self.log, "no entity association tree"; "tid" => self.tid);
        }

        self.device_name = self.derive_device_name(link, &entity_names);
        publisher.register_device(self.tid, &self.device_name);

        // Sensor/effecter auxiliary names, prefixed with the device name.
        let mut sensor_names: FxHashMap<u16, String> = FxHashMap::default();
        let mut effecter_names: FxHashMap<u16, String> = FxHashMap::default();
        for record in &self.records {
            match &record.parsed {
                PdrRecord::SensorAuxNames(names) => {
                    if let Some(name) =
                        names.name.as_deref().and_then(sanitize_name)
                    {
                        sensor_names.insert(
                            names.sensor_id,
                            format!("{}_{name}", self.device_name),
                        );
                    }
                }
                PdrRecord::EffecterAuxNames(names) => {
                    if let Some(name) =
                        names.name.as_deref().and_then(sanitize_name)
                    {
                        effecter_names.insert(
                            names.effecter_id,
                            format!("{}_{name}", self.device_name),
                        );
                    }
                }
                _ => {}
            }
        }

        for record in self.records.clone() {
            match record.parsed {
                PdrRecord::NumericSensor(sensor) => {
                    self.add_sensor(
                        publisher,
                        sensor.sensor_id,
                        sensor.entity,
                        sensor.has_aux_names,
                        &sensor_names,
                        SensorKind::Numeric {
                            base_unit: sensor.base_unit,
                            unit_modifier: sensor.unit_modifier,
                            resolution: sensor.resolution,
                            offset: sensor.offset,
                        },
                    );
                }
                PdrRecord::StateSensor(sensor) => {
                    self.add_sensor(
                        publisher,
                        sensor.sensor_id,
                        sensor.entity,
                        sensor.has_aux_names,
                        &sensor_names,
                        SensorKind::State {
                            state_set_id: sensor.state_set_id,
                            possible_states: sensor.possible_states,
                        },
                    );
                }
                PdrRecord::NumericEffecter(effecter) => {
                    self.add_effecter(
                        publisher,
                        effecter.effecter_id,
                        effecter.entity,
                        effecter.has_aux_names,
                        &effecter_names,
                        EffecterKind::Numeric {
                            base_unit: effecter.base_unit,
                            unit_modifier: effecter.unit_modifier,
                            resolution: effecter.resolution,
                            offset: effecter.offset,
                        },
                    );
                }
                PdrRecord::StateEffecter(effecter) => {
                    self.add_effecter(
                        publisher,
                        effecter.effecter_id,
                        effecter.entity,
                        effecter.has_description_pdr,
                        &effecter_names,
                        EffecterKind::State {
                            state_set_id: effecter.state_set_id,
                            possible_states: effecter.possible_states,
                        },
                    );
                }
                PdrRecord::FruRecordSet(fru) => {
                    let Some(path) = self.entity_paths.get(&fru.entity) else {
                        warn!(
                            self.log, "no entity for FRU record set";
                            "tid" => self.tid,
                            "rsi" => fru.record_set_id,
                        );
                        continue;
                    };
                    let descriptor = FruRecordSetDescriptor {
                        record_set_id: fru.record_set_id,
                        entity: fru.entity,
                        path: path.clone(),
                    };
                    publisher.register_fru_record_set(self.tid, &descriptor);
                    self.fru_record_sets
                        .entry(fru.record_set_id)
                        .or_insert(descriptor);
                }
                _ => {}
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_sensor(
        &mut self,
        publisher: &Arc<dyn Publisher>,
        id: u16,
        entity: Entity,
        has_aux_names: bool,
        aux_names: &FxHashMap<u16, String>,
        kind: SensorKind,
    ) {
        let name = has_aux_names
            .then(|| aux_names.get(&id).cloned())
            .flatten()
            .unwrap_or_else(|| format!("{}_Sensor_{id}", self.device_name));
        let Some(entity_path) = self.entity_paths.get(&entity) else {
            warn!(
                self.log, "no entity associated with sensor";
                "tid" => self.tid,
                "sensor_id" => id,
            );
            return;
        };
        if self.sensors.contains_key(&id) {
            warn!(self.log, "duplicate sensor id"; "tid" => self.tid, "sensor_id" => id);
            return;
        }
        let descriptor = SensorDescriptor {
            id,
            entity,
            path: format!("{entity_path}/{name}"),
            name,
            kind,
        };
        publisher.register_sensor(self.tid, &descriptor);
        self.sensors.insert(id, descriptor);
    }

    fn add_effecter(
        &mut self,
        publisher: &Arc<dyn Publisher>,
        id: u16,
        entity: Entity,
        has_aux_names: bool,
        aux_names: &FxHashMap<u16, String>,
        kind: EffecterKind,
    ) {
        let name = has_aux_names
            .then(|| aux_names.get(&id).cloned())
            .flatten()
            .unwrap_or_else(|| format!("{}_Effecter_{id}", self.device_name));
        let Some(entity_path) = self.entity_paths.get(&entity) else {
            warn!(
                self.log, "no entity associated with effecter";
                "tid" => self.tid,
                "effecter_id" => id,
            );
            return;
        };
        if self.effecters.contains_key(&id) {
            warn!(
                self.log, "duplicate effecter id";
                "tid" => self.tid,
                "effecter_id" => id,
            );
            return;
        }
        let descriptor = EffecterDescriptor {
            id,
            entity,
            path: format!("{entity_path}/{name}"),
            name,
            kind,
        };
        publisher.register_effecter(self.tid, &descriptor);
        self.effecters.insert(id, descriptor);
    }

    /// Device name priority: root-entity aux name, transport location
    /// string, synthetic fallback.
    fn derive_device_name(
        &self,
        link: &SharedLink,
        entity_names: &FxHashMap<Entity, String>,
    ) -> String {
        let root_name = self
            .tree
            .as_ref()
            .and_then(|tree| entity_names.get(&tree.root()).cloned());
        let location = link.device_location(self.tid);

        let candidate = match (location, root_name) {
            (Some(location), Some(name)) => format!("{location}_{name}"),
            (Some(location), None) => format!("{location}_PLDM_Device"),
            (None, Some(name)) => format!("{name}_{}", self.tid),
            (None, None) => format!("PLDM_Device_{}", self.tid),
        };
        sanitize_name(&candidate)
            .unwrap_or_else(|| format!("PLDM_Device_{}", self.tid))
    }

    /// Write the repository as text: one `PDR Type:`/`Length:`/`Data:`
    /// stanza per record, grouped by record type.
    pub fn dump(&self, path: &Path) -> io::Result<()> {
        let mut ordered: Vec<&StoredRecord> = self.records.iter().collect();
        ordered.sort_by_key(|record| record.header.pdr_type);

        let mut out = String::new();
        for record in ordered {
            let _ = writeln!(out, "PDR Type: {}", record.header.pdr_type);
            let _ = writeln!(out, "Length: {}", record.raw.len());
            out.push_str("Data:");
            for byte in &record.raw {
                let _ = write!(out, " 0x{byte:02x}");
            }
            out.push('\n');
        }
        std::fs::write(path, out)
    }

    /// Default dump location for this device.
    pub fn default_dump_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("/tmp/pldm_pdr_dump_{}.txt", self.tid))
    }
}

/// Replace every run of characters outside `[A-Za-z0-9_/]` with a single
/// underscore; a name with no surviving alphanumerics is discarded.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '/' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    if out.chars().all(|c| c == '_') {
        return None;
    }
    Some(out)
}

fn synthetic_entity_name(entity: Entity) -> String {
    format!("{}_{}_{}", entity.entity_type, entity.instance, entity.container_id)
}

async fn fetch_repository_info(
    link: &SharedLink,
    tid: Tid,
) -> Result<RepositoryInfo, PdrError> {
    let req = platform::encode_repository_info_req(link.next_instance_id(tid));
    let resp =
        link.send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES).await
            .map_err(PdrError::Communication)?;
    let (cc, info) = platform::decode_repository_info_resp(&resp)
        .map_err(|err| PdrError::Communication(err.into()))?;
    if cc != completion::SUCCESS {
        return Err(PdrError::RepoUnavailable);
    }
    info.ok_or(PdrError::RepoUnavailable)
}

enum RecordFetch {
    /// Reassembled record plus the next record handle.
    Complete { raw: Vec<u8>, next_record_handle: u32 },
    /// Record abandoned (CRC, oversize, segment ceiling) but the walk can
    /// continue.
    Dropped { next_record_handle: u32 },
}

async fn fetch_repository(
    link: &SharedLink,
    tid: Tid,
    repo_info: &RepositoryInfo,
    log: &Logger,
) -> Result<Vec<StoredRecord>, PdrError> {
    let mut last_err = PdrError::Empty;
    for attempt in 1..=REPO_FETCH_TRIES {
        match fetch_repository_once(link, tid, repo_info, log).await {
            Ok(records) => return Ok(records),
            Err(err) => {
                warn!(
                    log, "repository fetch attempt failed";
                    "tid" => tid,
                    "attempt" => attempt,
                    "err" => %err,
                );
                last_err = err;
            }
        }
    }
    Err(last_err)
}

async fn fetch_repository_once(
    link: &SharedLink,
    tid: Tid,
    repo_info: &RepositoryInfo,
    log: &Logger,
) -> Result<Vec<StoredRecord>, PdrError> {
    let mut records: FxHashMap<u32, StoredRecord> = FxHashMap::default();
    let mut dropped = 0u32;
    let mut record_handle = 0u32;
    let mut remaining = repo_info.record_count;

    loop {
        match fetch_record(link, tid, record_handle, repo_info).await? {
            RecordFetch::Complete { raw, next_record_handle } => {
                match pdr::parse_record(&raw) {
                    Ok((header, parsed)) => {
                        records.insert(
                            header.record_handle,
                            StoredRecord { header, raw, parsed },
                        );
                    }
                    Err(err) => {
                        warn!(
                            log, "discarding unparsable record";
                            "tid" => tid,
                            "record_handle" => record_handle,
                            "err" => %err,
                        );
                        dropped += 1;
                    }
                }
                record_handle = next_record_handle;
            }
            RecordFetch::Dropped { next_record_handle } => {
                warn!(
                    log, "record dropped during multipart transfer";
                    "tid" => tid,
                    "record_handle" => record_handle,
                );
                dropped += 1;
                record_handle = next_record_handle;
            }
        }
        remaining -= 1;
        if record_handle == 0 || remaining == 0 {
            break;
        }
    }

    if remaining > 0 {
        warn!(
            log,
            "repository ended early: next handle 0 with records pending";
            "tid" => tid,
            "pending" => remaining,
        );
    }

    // Dropped records are accounted for; anything else missing means the
    // walk and the declared count disagree.
    if records.len() as u32 + dropped != repo_info.record_count {
        return Err(PdrError::Inconsistent {
            reason: "fetched record count does not match declared count",
        });
    }
    let mut ordered: Vec<StoredRecord> = records.into_values().collect();
    ordered.sort_by_key(|record| record.header.record_handle);
    Ok(ordered)
}

async fn fetch_record(
    link: &SharedLink,
    tid: Tid,
    record_handle: u32,
    repo_info: &RepositoryInfo,
) -> Result<RecordFetch, PdrError> {
    let mut acc: Vec<u8> = Vec::new();
    let mut transfer_op = TransferOp::GetFirstPart;
    let mut data_transfer_handle = 0u32;
    let mut record_change_number = 0u16;
    let mut next_record_handle = 0u32;
    let mut segments = 0usize;

    loop {
        let req = platform::encode_get_pdr_req(
            link.next_instance_id(tid),
            &GetPdrRequest {
                record_handle,
                data_transfer_handle,
                transfer_op,
                request_count: SEGMENT_REQUEST_COUNT,
                record_change_number,
            },
        );
        let resp = link
            .send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES)
            .await
            .map_err(PdrError::Communication)?;
        let decoded = platform::decode_get_pdr_resp(&resp)
            .map_err(|err| PdrError::Communication(err.into()))?;
        if decoded.completion_code != completion::SUCCESS {
            return Err(PdrError::Communication(
                crate::error::CommunicationError::Malformed {
                    reason: "GetPDR refused",
                },
            ));
        }

        if acc.is_empty() {
            next_record_handle = decoded.next_record_handle;
        }
        acc.extend_from_slice(&decoded.record_data);

        if decoded.transfer_flag == TransferFlag::Start {
            // Segment requests after the first must name the same record
            // revision.
            if let Ok(header) = PdrHeader::decode(&acc) {
                record_change_number = header.record_change_number;
            }
        }

        if decoded.transfer_flag.is_final() {
            if decoded.transfer_flag == TransferFlag::End {
                let crc = pdr::crc8(&acc);
                if Some(crc) != decoded.transfer_crc {
                    return Ok(RecordFetch::Dropped { next_record_handle });
                }
            }
            return Ok(RecordFetch::Complete { raw: acc, next_record_handle });
        }

        segments += 1;
        if acc.len() > repo_info.largest_record_size as usize
            || segments >= MAX_RECORD_SEGMENTS
        {
            return Ok(RecordFetch::Dropped { next_record_handle });
        }
        transfer_op = TransferOp::GetNextPart;
        data_transfer_handle = decoded.next_data_transfer_handle;
    }
}

#[cfg(test)]
mod sanitize_tests {
    use super::sanitize_name;

    #[test]
    fn runs_collapse_to_single_underscore() {
        assert_eq!(sanitize_name("foo bar!/baz").as_deref(), Some("foo_bar_/baz"));
    }

    #[test]
    fn all_junk_is_dropped() {
        assert_eq!(sanitize_name("!!!"), None);
        assert_eq!(sanitize_name("___"), None);
        assert_eq!(sanitize_name(""), None);
    }

    #[test]
    fn clean_names_pass_through() {
        assert_eq!(sanitize_name("cpu0/core_1").as_deref(), Some("cpu0/core_1"));
    }
}
