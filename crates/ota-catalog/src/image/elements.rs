//! Sub-element stream that follows the header.
//!
//! Each element is `tag_id: u16`, `length: u32` (both little-endian) and `length`
//! bytes of data. The stream starts at `headerLength` and the whole image, header
//! included, spans `totalImageSize` bytes.

use super::header::ImageHeader;
use crate::error::{OtaError, Result};
use serde::Serialize;

/// Size of a sub-element's tag and length prefix.
pub const ELEMENT_PREFIX_LEN: usize = 6;

/// Well-known sub-element tags.
pub mod tag {
    pub const UPGRADE_IMAGE: u16 = 0x0000;
    pub const ECDSA_SIGNATURE_CRYPTO_SUITE_1: u16 = 0x0001;
    pub const ECDSA_SIGNING_CERTIFICATE_CRYPTO_SUITE_1: u16 = 0x0002;
    pub const IMAGE_INTEGRITY_CODE: u16 = 0x0003;
    pub const PICTURE_DATA: u16 = 0x0004;
    pub const ECDSA_SIGNATURE_CRYPTO_SUITE_2: u16 = 0x0005;
    pub const ECDSA_SIGNING_CERTIFICATE_CRYPTO_SUITE_2: u16 = 0x0006;
}

/// One sub-element, borrowing its data from the image buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubElement<'a> {
    pub tag_id: u16,
    pub length: u32,
    #[serde(skip)]
    pub data: &'a [u8],
}

/// Walk the sub-elements of `image` (a buffer starting at the identifier).
///
/// Stops at `totalImageSize` or at the first element whose prefix or data is
/// truncated; a damaged tail yields the elements read so far.
pub fn parse_sub_elements<'a>(image: &'a [u8], header: &ImageHeader) -> Vec<SubElement<'a>> {
    let end = image.len().min(header.total_image_size as usize);
    let mut position = usize::from(header.header_length);
    let mut elements = Vec::new();

    while position < end {
        let Some(prefix) = image.get(position..position + ELEMENT_PREFIX_LEN) else {
            break;
        };
        let tag_id = u16::from_le_bytes([prefix[0], prefix[1]]);
        let length = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]);
        position += ELEMENT_PREFIX_LEN;

        let data_end = position.saturating_add(length as usize);
        let Some(data) = image.get(position..data_end) else {
            break;
        };
        position = data_end;

        elements.push(SubElement {
            tag_id,
            length,
            data,
        });
    }

    elements
}

/// Check that `headerLength` plus every sub-element adds up to `totalImageSize`.
///
/// Elements are walked from the declared header length until the declared total
/// is reached or passed; a buffer shorter than the total also fails.
pub fn verify_image_size(image: &[u8], header: &ImageHeader) -> Result<()> {
    let declared = u64::from(header.total_image_size);
    let mut computed = u64::from(header.header_length);
    let mut position = usize::from(header.header_length);

    while computed < declared {
        let Some(prefix) = image.get(position..position + ELEMENT_PREFIX_LEN) else {
            break;
        };
        let length = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]);
        let element_len = ELEMENT_PREFIX_LEN as u64 + u64::from(length);
        computed += element_len;
        position = position.saturating_add(element_len as usize);
    }

    if computed != declared || (image.len() as u64) < declared {
        return Err(OtaError::SizeMismatch { declared, computed });
    }

    Ok(())
}
