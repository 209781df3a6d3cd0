//! Firmware stack identification from sub-element payloads.
//!
//! Looks for vendor-specific signatures at the start of each element, then falls
//! back to hints in the header label.

use super::elements::SubElement;
use super::header::ImageHeader;
use serde::Serialize;
use tracing::debug;

mod signature {
    /// Silicon Labs GBL header tag.
    pub const SI_GBL_HEADER_TAG: &[u8] = &[0xeb, 0x17, 0xa6, 0x03];
    pub const SI_EBL_TAG_HEADER: u16 = 0x0000;
    pub const SI_EBL_IMAGE_SIGNATURE: u16 = 0xe350;
    pub const SI_EBL_TAG_ENC_HEADER: u16 = 0xfb05;
    /// TI OAD image identifiers and the detail reported for each.
    pub const TI_OAD_IMAGE_IDS: &[(&[u8], &str)] = &[
        (b"CC26x2R1", "CC26x2R1"),
        (b"CC13x2R1", "CC13x2R1"),
        (b"CC13x4  ", "CC13x4"),
        (b"CC26x3  ", "CC26x3"),
        (b"CC26x4  ", "CC26x4"),
        (b"OAD IMG ", "OAD IMG"),
        (b"CC23x0R2", "CC23x0R2"),
    ];
    /// Telink start-up flag ("KNLT") read little-endian at offset 8.
    pub const TL_START_UP_FLAG_WHOLE: u32 = 0x544c_4e4b;
    pub const TL_SR_TAG: &[u8] = b"TLSR";
    pub const NORDIC_MARKERS: &[&[u8]] = &[b"nRF", b"nrf5", b"nrf_"];
}

/// Firmware stack family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StackKind {
    EmberZNet,
    #[serde(rename = "zStack")]
    ZStack,
    Telink,
    #[serde(rename = "ZBOSS")]
    Zboss,
    Unknown,
}

/// Protocol stack version declared in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StackVersion {
    Zigbee2006,
    Zigbee2007,
    Pro,
    Ip,
    Unknown(u16),
}

impl From<u16> for StackVersion {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => StackVersion::Zigbee2006,
            0x0001 => StackVersion::Zigbee2007,
            0x0002 => StackVersion::Pro,
            0x0003 => StackVersion::Ip,
            other => StackVersion::Unknown(other),
        }
    }
}

/// Result of stack identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackInfo {
    pub stack: StackKind,
    pub details: String,
    pub stack_version: StackVersion,
}

fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Identify a single element's stack, if it carries a known signature.
fn identify_element(data: &[u8]) -> Option<(StackKind, String)> {
    if data.starts_with(signature::SI_GBL_HEADER_TAG) {
        return Some((StackKind::EmberZNet, "GBL".to_string()));
    }

    if read_u16_be(data, 0) == Some(signature::SI_EBL_TAG_HEADER)
        && read_u16_be(data, 6) == Some(signature::SI_EBL_IMAGE_SIGNATURE)
    {
        return Some((StackKind::EmberZNet, "EBL".to_string()));
    }

    if read_u16_be(data, 0) == Some(signature::SI_EBL_TAG_ENC_HEADER) {
        return Some((StackKind::EmberZNet, "EBL ENC".to_string()));
    }

    for (image_id, details) in signature::TI_OAD_IMAGE_IDS {
        if data.starts_with(image_id) {
            return Some((StackKind::ZStack, details.to_string()));
        }
    }

    if read_u32_le(data, 8) == Some(signature::TL_START_UP_FLAG_WHOLE) {
        let details = find_bytes(data, signature::TL_SR_TAG)
            .and_then(|index| data.get(index..index + 8))
            .map(|chip| String::from_utf8_lossy(chip).into_owned())
            .unwrap_or_default();
        return Some((StackKind::Telink, details));
    }

    if signature::NORDIC_MARKERS
        .iter()
        .any(|marker| find_bytes(data, marker).is_some())
    {
        return Some((StackKind::Zboss, "Nordic (fuzzy matching)".to_string()));
    }

    None
}

/// Identify the firmware stack of an image from its elements and header.
pub fn identify_stack(header: &ImageHeader, elements: &[SubElement<'_>]) -> StackInfo {
    let stack_version = StackVersion::from(header.stack_version);

    for element in elements {
        if let Some((stack, details)) = identify_element(element.data) {
            return StackInfo {
                stack,
                details,
                stack_version,
            };
        }

        let preview = &element.data[..element.data.len().min(16)];
        debug!(
            "Unknown element tagId={} firstBytes={}",
            element.tag_id,
            hex::encode(preview)
        );
    }

    let label = &header.header_string;
    let (stack, details) = if label.contains("Telink") {
        (StackKind::Telink, "(fallback matching)")
    } else if label.contains("GBL") {
        (StackKind::EmberZNet, "GBL (fallback matching)")
    } else if label.contains("EBL") {
        (StackKind::EmberZNet, "EBL (fallback matching)")
    } else {
        (StackKind::Unknown, "")
    };

    StackInfo {
        stack,
        details: details.to_string(),
        stack_version,
    }
}
