//! OTA image header decoding.
//!
//! The header is a fixed 56-byte little-endian prefix followed by optional fields
//! whose presence is declared by the `headerFieldControl` bitmask. Optional fields
//! are read in bit order (0, 1, 2), each advancing the cursor.

use crate::error::{OtaError, Result};
use serde::Serialize;

/// Upgrade file identifier as it appears on disk.
pub const UPGRADE_FILE_IDENTIFIER: [u8; 4] = [0x1e, 0xf1, 0xee, 0x0b];

/// Upgrade file identifier read as a little-endian u32.
pub const UPGRADE_FILE_MAGIC: u32 = 0x0BEE_F11E;

/// Size of the fixed header prefix, up to and including `totalImageSize`.
pub const FIXED_HEADER_LEN: usize = 56;

const HEADER_STRING_OFFSET: usize = 20;
const HEADER_STRING_LEN: usize = 32;

/// `headerFieldControl` bits.
pub mod field_control {
    pub const SECURITY_CREDENTIAL: u16 = 1 << 0;
    pub const UPGRADE_FILE_DESTINATION: u16 = 1 << 1;
    pub const HARDWARE_VERSIONS: u16 = 1 << 2;
}

/// Decoded OTA image header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageHeader {
    pub upgrade_file_identifier: [u8; 4],
    pub header_version: u16,
    /// Offset of the sub-element stream, relative to the identifier.
    pub header_length: u16,
    pub header_field_control: u16,
    pub manufacturer_code: u16,
    pub image_type: u16,
    /// Ordering key for upgrade/downgrade decisions.
    pub file_version: u32,
    pub stack_version: u16,
    /// 32-byte label, NUL padding retained.
    pub header_string: String,
    pub total_image_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_credential_version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_file_destination: Option<[u8; 8]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_hardware_version: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_hardware_version: Option<u16>,
}

/// Bounds-checked little-endian reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes: [u8; N] = self
            .buf
            .get(self.pos..end)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(OtaError::TooShort {
                needed: end,
                actual: self.buf.len(),
            })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }
}

type OptionalFieldDecoder = fn(&mut Cursor<'_>, &mut ImageHeader) -> Result<()>;

/// An optional header field guarded by one control bit.
struct OptionalField {
    bit: u16,
    size: usize,
    decode: OptionalFieldDecoder,
}

/// Optional fields in the order they appear on disk.
const OPTIONAL_FIELDS: [OptionalField; 3] = [
    OptionalField {
        bit: field_control::SECURITY_CREDENTIAL,
        size: 1,
        decode: decode_security_credential,
    },
    OptionalField {
        bit: field_control::UPGRADE_FILE_DESTINATION,
        size: 8,
        decode: decode_upgrade_file_destination,
    },
    OptionalField {
        bit: field_control::HARDWARE_VERSIONS,
        size: 4,
        decode: decode_hardware_versions,
    },
];

fn decode_security_credential(cursor: &mut Cursor<'_>, header: &mut ImageHeader) -> Result<()> {
    header.security_credential_version = Some(cursor.u8()?);
    Ok(())
}

fn decode_upgrade_file_destination(
    cursor: &mut Cursor<'_>,
    header: &mut ImageHeader,
) -> Result<()> {
    header.upgrade_file_destination = Some(cursor.take()?);
    Ok(())
}

fn decode_hardware_versions(cursor: &mut Cursor<'_>, header: &mut ImageHeader) -> Result<()> {
    header.minimum_hardware_version = Some(cursor.u16_le()?);
    header.maximum_hardware_version = Some(cursor.u16_le()?);
    Ok(())
}

/// Decode a header from a buffer whose first four bytes are the identifier.
///
/// Only the identifier is validated; `headerLength` and `totalImageSize` are
/// returned as declared.
pub fn decode_header(buffer: &[u8]) -> Result<ImageHeader> {
    if buffer.len() < FIXED_HEADER_LEN {
        return Err(OtaError::TooShort {
            needed: FIXED_HEADER_LEN,
            actual: buffer.len(),
        });
    }

    let mut cursor = Cursor::at(buffer, 0);
    let upgrade_file_identifier: [u8; 4] = cursor.take()?;
    if upgrade_file_identifier != UPGRADE_FILE_IDENTIFIER {
        return Err(OtaError::InvalidMagic);
    }

    let header_version = cursor.u16_le()?;
    let header_length = cursor.u16_le()?;
    let header_field_control = cursor.u16_le()?;
    let manufacturer_code = cursor.u16_le()?;
    let image_type = cursor.u16_le()?;
    let file_version = cursor.u32_le()?;
    let stack_version = cursor.u16_le()?;
    let label: [u8; HEADER_STRING_LEN] = cursor.take()?;
    let total_image_size = cursor.u32_le()?;

    let mut header = ImageHeader {
        upgrade_file_identifier,
        header_version,
        header_length,
        header_field_control,
        manufacturer_code,
        image_type,
        file_version,
        stack_version,
        header_string: String::from_utf8_lossy(&label).into_owned(),
        total_image_size,
        security_credential_version: None,
        upgrade_file_destination: None,
        minimum_hardware_version: None,
        maximum_hardware_version: None,
    };

    for field in OPTIONAL_FIELDS.iter() {
        if header_field_control & field.bit != 0 {
            (field.decode)(&mut cursor, &mut header)?;
        }
    }

    Ok(header)
}

/// Offset of the first upgrade file identifier in `buffer`.
///
/// Some vendors prepend their own data before the standard image.
pub fn find_magic(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(UPGRADE_FILE_IDENTIFIER.len())
        .position(|window| window == UPGRADE_FILE_IDENTIFIER)
}

/// Locate the identifier in `buffer` and decode from there.
///
/// Returns the identifier offset along with the header.
pub fn decode_at_magic(buffer: &[u8]) -> Result<(usize, ImageHeader)> {
    let offset = find_magic(buffer).ok_or(OtaError::InvalidMagic)?;
    let header = decode_header(&buffer[offset..])?;
    Ok((offset, header))
}

impl ImageHeader {
    /// Header for a plain image with no optional fields.
    pub fn new(manufacturer_code: u16, image_type: u16, file_version: u32, total_image_size: u32) -> Self {
        Self {
            upgrade_file_identifier: UPGRADE_FILE_IDENTIFIER,
            header_version: 0x0100,
            header_length: FIXED_HEADER_LEN as u16,
            header_field_control: 0,
            manufacturer_code,
            image_type,
            file_version,
            stack_version: 2,
            header_string: "\0".repeat(HEADER_STRING_LEN),
            total_image_size,
            security_credential_version: None,
            upgrade_file_destination: None,
            minimum_hardware_version: None,
            maximum_hardware_version: None,
        }
    }

    /// Replace the label, padding with NUL bytes to 32 bytes.
    pub fn with_header_string(mut self, label: &str) -> Self {
        let mut bytes = label.as_bytes().to_vec();
        bytes.resize(HEADER_STRING_LEN, 0);
        self.header_string = String::from_utf8_lossy(&bytes).into_owned();
        self
    }

    /// Set the hardware version range and its control bit.
    pub fn with_hardware_versions(mut self, min: u16, max: u16) -> Self {
        self.header_field_control |= field_control::HARDWARE_VERSIONS;
        self.minimum_hardware_version = Some(min);
        self.maximum_hardware_version = Some(max);
        self.header_length = self.computed_header_length();
        self
    }

    /// The label without its NUL padding.
    pub fn header_string_trimmed(&self) -> String {
        self.header_string.replace('\0', "")
    }

    pub fn has_field(&self, bit: u16) -> bool {
        self.header_field_control & bit != 0
    }

    /// Header length implied by the control bits: 56 plus each present optional field.
    pub fn computed_header_length(&self) -> u16 {
        let optional: usize = OPTIONAL_FIELDS
            .iter()
            .filter(|field| self.has_field(field.bit))
            .map(|field| field.size)
            .sum();
        (FIXED_HEADER_LEN + optional) as u16
    }

    /// Encode back to the on-disk layout (fixed prefix plus present optional fields).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(usize::from(self.computed_header_length()));
        out.extend_from_slice(&self.upgrade_file_identifier);
        out.extend_from_slice(&self.header_version.to_le_bytes());
        out.extend_from_slice(&self.header_length.to_le_bytes());
        out.extend_from_slice(&self.header_field_control.to_le_bytes());
        out.extend_from_slice(&self.manufacturer_code.to_le_bytes());
        out.extend_from_slice(&self.image_type.to_le_bytes());
        out.extend_from_slice(&self.file_version.to_le_bytes());
        out.extend_from_slice(&self.stack_version.to_le_bytes());

        let mut label = self.header_string.as_bytes().to_vec();
        label.resize(HEADER_STRING_LEN, 0);
        out.extend_from_slice(&label);
        debug_assert_eq!(out.len(), HEADER_STRING_OFFSET + HEADER_STRING_LEN);

        out.extend_from_slice(&self.total_image_size.to_le_bytes());

        if self.has_field(field_control::SECURITY_CREDENTIAL) {
            out.push(self.security_credential_version.unwrap_or_default());
        }
        if self.has_field(field_control::UPGRADE_FILE_DESTINATION) {
            out.extend_from_slice(&self.upgrade_file_destination.unwrap_or_default());
        }
        if self.has_field(field_control::HARDWARE_VERSIONS) {
            out.extend_from_slice(&self.minimum_hardware_version.unwrap_or_default().to_le_bytes());
            out.extend_from_slice(&self.maximum_hardware_version.unwrap_or_default().to_le_bytes());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ImageHeader {
        ImageHeader::new(4151, 1, 14, 249_694).with_header_string("OM15081-RTR-JN5189-0000000000000")
    }

    #[test]
    fn test_magic_constant_matches_bytes() {
        assert_eq!(u32::from_le_bytes(UPGRADE_FILE_IDENTIFIER), UPGRADE_FILE_MAGIC);
    }

    #[test]
    fn test_decode_fixed_prefix() {
        let bytes = sample_header().encode();
        assert_eq!(bytes.len(), FIXED_HEADER_LEN);

        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.header_version, 256);
        assert_eq!(header.header_length, 56);
        assert_eq!(header.header_field_control, 0);
        assert_eq!(header.manufacturer_code, 4151);
        assert_eq!(header.image_type, 1);
        assert_eq!(header.file_version, 14);
        assert_eq!(header.stack_version, 2);
        assert_eq!(header.header_string, "OM15081-RTR-JN5189-0000000000000");
        assert_eq!(header.total_image_size, 249_694);
        assert_eq!(header.security_credential_version, None);
        assert_eq!(header.minimum_hardware_version, None);
    }

    #[test]
    fn test_decode_keeps_nul_padding() {
        let bytes = ImageHeader::new(1, 2, 3, 56).with_header_string("short").encode();
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.header_string.len(), 32);
        assert!(header.header_string.starts_with("short\0"));
        assert_eq!(header.header_string_trimmed(), "short");
    }

    #[test]
    fn test_decode_optional_fields_in_bit_order() {
        let mut header = sample_header();
        header.header_field_control = field_control::SECURITY_CREDENTIAL
            | field_control::UPGRADE_FILE_DESTINATION
            | field_control::HARDWARE_VERSIONS;
        header.security_credential_version = Some(7);
        header.upgrade_file_destination = Some([1, 2, 3, 4, 5, 6, 7, 8]);
        header.minimum_hardware_version = Some(0x0102);
        header.maximum_hardware_version = Some(0x0304);
        header.header_length = header.computed_header_length();
        assert_eq!(header.header_length, 56 + 1 + 8 + 4);

        let bytes = header.encode();
        assert_eq!(bytes.len(), 69);
        let decoded = decode_header(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_decode_hardware_versions_only() {
        let header = sample_header().with_hardware_versions(3, 9);
        let decoded = decode_header(&header.encode()).unwrap();
        assert_eq!(decoded.security_credential_version, None);
        assert_eq!(decoded.upgrade_file_destination, None);
        assert_eq!(decoded.minimum_hardware_version, Some(3));
        assert_eq!(decoded.maximum_hardware_version, Some(9));
        assert_eq!(decoded.header_length, 60);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = sample_header().encode();
        bytes[0] = 0x00;
        assert!(matches!(decode_header(&bytes), Err(OtaError::InvalidMagic)));
    }

    #[test]
    fn test_decode_rejects_short_prefix() {
        let bytes = sample_header().encode();
        match decode_header(&bytes[..40]) {
            Err(OtaError::TooShort { needed, actual }) => {
                assert_eq!(needed, 56);
                assert_eq!(actual, 40);
            }
            other => panic!("expected TooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_missing_optional_bytes() {
        let header = sample_header().with_hardware_versions(1, 2);
        let bytes = header.encode();
        match decode_header(&bytes[..58]) {
            Err(OtaError::TooShort { needed, actual }) => {
                assert_eq!(needed, 60);
                assert_eq!(actual, 58);
            }
            other => panic!("expected TooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_at_magic_skips_vendor_prefix() {
        let mut bytes = b"VENDOR-PREAMBLE".to_vec();
        bytes.extend_from_slice(&sample_header().encode());

        let (offset, header) = decode_at_magic(&bytes).unwrap();
        assert_eq!(offset, 15);
        assert_eq!(header.file_version, 14);
    }

    #[test]
    fn test_decode_at_magic_without_identifier() {
        assert!(matches!(
            decode_at_magic(&[0u8; 128]),
            Err(OtaError::InvalidMagic)
        ));
        assert_eq!(find_magic(&[]), None);
    }
}
