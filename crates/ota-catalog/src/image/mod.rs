//! OTA image inspection: header decoding, sub-elements, stack identification and digests.
//!
//! ```text
//! raw bytes ──find_magic──▶ decode_header ──▶ ImageHeader
//!                                  │
//!                                  └──parse_sub_elements──▶ identify_stack
//! ```

mod elements;
mod hashing;
mod header;
mod stack;

pub use elements::{parse_sub_elements, tag, verify_image_size, SubElement, ELEMENT_PREFIX_LEN};
pub use hashing::{compute_file_sha512, compute_sha512, verify_sha512};
pub use header::{
    decode_at_magic, decode_header, field_control, find_magic, ImageHeader, FIXED_HEADER_LEN,
    UPGRADE_FILE_IDENTIFIER, UPGRADE_FILE_MAGIC,
};
pub use stack::{identify_stack, StackInfo, StackKind, StackVersion};
