// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware update packages.
//!
//! The orchestrator only sees the [`FirmwarePackage`] trait: device-id
//! records, component descriptors, and byte-range reads. [`PackageFile`] is
//! the concrete reader for the DSP0267 package layout; tests substitute
//! their own implementation.

use pldm_messages::fwup::Descriptor;
use pldm_messages::wire::Reader;
use pldm_messages::DecodeError;

use crate::error::UpdateError;

/// Package-header identifier for DSP0267 v1.0 packages.
pub const PACKAGE_IDENTIFIER_V1_0: [u8; 16] = [
    0xf0, 0x18, 0x87, 0x8c, 0xcb, 0x7d, 0x49, 0x43, //
    0x98, 0x00, 0xa0, 0x2f, 0x05, 0x9a, 0xca, 0x02,
];

/// One firmware-device-id record from the package header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub option_flags: u32,
    pub image_set_version_type: u8,
    pub image_set_version: String,
    /// 64-bit applicability bitfield: bit N set means component N applies.
    pub applicable_components: u64,
    pub descriptors: Vec<Descriptor>,
    pub package_data: Vec<u8>,
}

/// One component-image entry from the package header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageComponent {
    pub classification: u16,
    pub identifier: u16,
    pub comparison_stamp: u32,
    pub options: u16,
    pub activation_method: u16,
    pub offset: u32,
    pub size: u32,
    pub version_type: u8,
    pub version: String,
}

/// What the orchestrator needs from an update image.
pub trait FirmwarePackage: Send + Sync {
    fn package_version(&self) -> &str;
    fn device_records(&self) -> &[DeviceRecord];
    fn components(&self) -> &[PackageComponent];

    /// Read `length` bytes starting at `offset` of the raw package file.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, UpdateError>;

    /// Total bytes of component images, used to size the bandwidth
    /// reservation.
    fn updatable_image_size(&self) -> u64 {
        self.components().iter().map(|c| u64::from(c.size)).sum()
    }
}

/// In-memory reader for a DSP0267 package file.
#[derive(Debug)]
pub struct PackageFile {
    version: String,
    devices: Vec<DeviceRecord>,
    components: Vec<PackageComponent>,
    raw: Vec<u8>,
}

impl PackageFile {
    pub fn parse(raw: Vec<u8>) -> Result<Self, UpdateError> {
        let header = Self::parse_header(&raw)
            .map_err(|err| UpdateError::PackageRead(err.to_string()))?;
        Ok(Self {
            version: header.0,
            devices: header.1,
            components: header.2,
            raw,
        })
    }

    #[allow(clippy::type_complexity)]
    fn parse_header(
        raw: &[u8],
    ) -> Result<(String, Vec<DeviceRecord>, Vec<PackageComponent>), DecodeError>
    {
        let mut r = Reader::new(raw);
        let identifier = r.get_bytes(16)?;
        if identifier != PACKAGE_IDENTIFIER_V1_0 {
            return Err(DecodeError::InvalidField {
                field: "package_identifier",
                value: u32::from(identifier[0]),
            });
        }
        let _format_revision = r.get_u8()?;
        let _header_size = r.get_u16()?;
        let _release_date_time = r.get_bytes(13)?;
        let component_bitmap_bits = r.get_u16()?;
        let _version_type = r.get_u8()?;
        let version_len = usize::from(r.get_u8()?);
        let version =
            String::from_utf8_lossy(r.get_bytes(version_len)?).to_string();

        let device_count = usize::from(r.get_u8()?);
        let mut devices = Vec::with_capacity(device_count);
        for _ in 0..device_count {
            devices.push(Self::parse_device_record(&mut r, component_bitmap_bits)?);
        }

        let component_count = usize::from(r.get_u16()?);
        let mut components = Vec::with_capacity(component_count);
        for _ in 0..component_count {
            components.push(Self::parse_component(&mut r)?);
        }

        // The trailing header checksum is not verified here; the per-record
        // protocol exchanges carry their own integrity checks.
        Ok((version, devices, components))
    }

    fn parse_device_record(
        r: &mut Reader<'_>,
        component_bitmap_bits: u16,
    ) -> Result<DeviceRecord, DecodeError> {
        let record_length = usize::from(r.get_u16()?);
        let descriptor_count = usize::from(r.get_u8()?);
        let option_flags = r.get_u32()?;
        let image_set_version_type = r.get_u8()?;
        let version_len = usize::from(r.get_u8()?);
        let package_data_len = usize::from(r.get_u16()?);

        // Fixed prefix above is 11 bytes; the rest of the record follows.
        let body_len = record_length
            .checked_sub(11)
            .ok_or(DecodeError::InvalidField {
                field: "device_record_length",
                value: record_length as u32,
            })?;
        let mut body = Reader::new(r.get_bytes(body_len)?);

        let bitmap_bytes = usize::from(component_bitmap_bits.div_ceil(8));
        let bitmap = body.get_bytes(bitmap_bytes)?;
        let mut applicable_components = 0u64;
        for (index, &byte) in bitmap.iter().enumerate().take(8) {
            applicable_components |= u64::from(byte) << (8 * index);
        }

        let image_set_version =
            String::from_utf8_lossy(body.get_bytes(version_len)?).to_string();

        let mut descriptors = Vec::with_capacity(descriptor_count);
        for _ in 0..descriptor_count {
            let descriptor_type = body.get_u16()?;
            let len = usize::from(body.get_u16()?);
            let data = body.get_bytes(len)?.to_vec();
            descriptors.push(Descriptor { descriptor_type, data });
        }

        let package_data = body.get_bytes(package_data_len)?.to_vec();
        body.finish()?;

        Ok(DeviceRecord {
            option_flags,
            image_set_version_type,
            image_set_version,
            applicable_components,
            descriptors,
            package_data,
        })
    }

    fn parse_component(
        r: &mut Reader<'_>,
    ) -> Result<PackageComponent, DecodeError> {
        let classification = r.get_u16()?;
        let identifier = r.get_u16()?;
        let comparison_stamp = r.get_u32()?;
        let options = r.get_u16()?;
        let activation_method = r.get_u16()?;
        let offset = r.get_u32()?;
        let size = r.get_u32()?;
        let version_type = r.get_u8()?;
        let version_len = usize::from(r.get_u8()?);
        let version =
            String::from_utf8_lossy(r.get_bytes(version_len)?).to_string();
        Ok(PackageComponent {
            classification,
            identifier,
            comparison_stamp,
            options,
            activation_method,
            offset,
            size,
            version_type,
            version,
        })
    }
}

impl FirmwarePackage for PackageFile {
    fn package_version(&self) -> &str {
        &self.version
    }

    fn device_records(&self) -> &[DeviceRecord] {
        &self.devices
    }

    fn components(&self) -> &[PackageComponent] {
        &self.components
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, UpdateError> {
        let start = usize::try_from(offset)
            .map_err(|_| UpdateError::PackageRead("offset overflow".into()))?;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= self.raw.len())
            .ok_or_else(|| {
                UpdateError::PackageRead(format!(
                    "range {start}+{length} outside package of {} bytes",
                    self.raw.len()
                ))
            })?;
        Ok(self.raw[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pldm_messages::wire::Writer;

    /// Build a minimal one-device, one-component package. Returns the raw
    /// file and the offset of the component image.
    fn sample_package(image: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(&PACKAGE_IDENTIFIER_V1_0);
        w.put_u8(0x01); // format revision
        w.put_u16(0); // header size (unused by the parser)
        w.put_bytes(&[0u8; 13]); // release date time
        w.put_u16(8); // component bitmap bits
        w.put_u8(0x01); // version string type
        w.put_u8(4);
        w.put_bytes(b"pkg1");

        // One device record.
        w.put_u8(1);
        let descriptor_data = [0x57u8, 0x01];
        let set_version = b"set-v1";
        let package_data = [0xEEu8; 4];
        let body_len = 1 + set_version.len() + (4 + descriptor_data.len())
            + package_data.len();
        w.put_u16((11 + body_len) as u16); // record length
        w.put_u8(1); // descriptor count
        w.put_u32(0); // option flags
        w.put_u8(0x01); // set version type
        w.put_u8(set_version.len() as u8);
        w.put_u16(package_data.len() as u16);
        w.put_u8(0b0000_0001); // applicable components bitmap
        w.put_bytes(set_version);
        w.put_u16(0x0000); // descriptor type (PCI vendor id)
        w.put_u16(descriptor_data.len() as u16);
        w.put_bytes(&descriptor_data);
        w.put_bytes(&package_data);

        // One component.
        w.put_u16(1);
        let mut header = w.into_vec();
        let image_offset = header.len() + 22 + 5; // component entry + "c0-v1"
        let mut w = Writer::from_vec(Vec::new());
        w.put_u16(0x000A); // classification
        w.put_u16(0x0001); // identifier
        w.put_u32(7); // comparison stamp
        w.put_u16(0); // options
        w.put_u16(0); // activation method
        w.put_u32(image_offset as u32);
        w.put_u32(image.len() as u32);
        w.put_u8(0x01);
        w.put_u8(5);
        w.put_bytes(b"c0-v1");
        header.extend_from_slice(&w.into_vec());
        header.extend_from_slice(image);
        header
    }

    #[test]
    fn parses_sample_package() {
        let image = [0xA5u8; 64];
        let pkg = PackageFile::parse(sample_package(&image)).unwrap();

        assert_eq!(pkg.package_version(), "pkg1");
        assert_eq!(pkg.device_records().len(), 1);
        let device = &pkg.device_records()[0];
        assert_eq!(device.applicable_components, 0b1);
        assert_eq!(device.image_set_version, "set-v1");
        assert_eq!(device.package_data, vec![0xEE; 4]);
        assert_eq!(device.descriptors.len(), 1);

        assert_eq!(pkg.components().len(), 1);
        let component = &pkg.components()[0];
        assert_eq!(component.size, 64);
        assert_eq!(pkg.updatable_image_size(), 64);

        let data = pkg
            .read(u64::from(component.offset), component.size as usize)
            .unwrap();
        assert_eq!(data, image);
    }

    #[test]
    fn rejects_wrong_identifier() {
        let mut raw = sample_package(&[0u8; 4]);
        raw[0] ^= 0xFF;
        assert!(PackageFile::parse(raw).is_err());
    }

    #[test]
    fn read_outside_package_fails() {
        let pkg = PackageFile::parse(sample_package(&[0u8; 4])).unwrap();
        assert!(pkg.read(u64::MAX - 1, 16).is_err());
    }
}
