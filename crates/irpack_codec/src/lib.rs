//! # irpack Codec
//!
//! The append-only IR encoding used by irpack streams.
//!
//! An IR stream is a preamble followed by events and ends with a single
//! end-of-stream byte:
//!
//! ```text
//! preamble: | magic "IRPK" (4) | version (2) | metadata len (4) | metadata (CBOR) |
//! event:    | 0x01 | timestamp delta i64 (8) | message len u32 (4) | message (N) |
//! end:      | 0x00 |
//! ```
//!
//! All integers are little-endian. Timestamp deltas are relative to the
//! previous event, or to the reference timestamp in the metadata for the
//! first one. Because every item is self-delimiting, a stream can be cut at
//! any item boundary and concatenated again, which is what lets irpack
//! stage part of a stream in a bin file and the rest in compressed frames.
//!
//! ## Usage
//!
//! ```
//! use irpack_codec::{IrReader, IrWriter, LogEvent};
//!
//! let mut writer = IrWriter::new("UTC", 4096).unwrap();
//! writer.write(&LogEvent::new(1_700_000_000_000, "hello")).unwrap();
//!
//! let mut stream = Vec::new();
//! writer.close_to(&mut stream).unwrap();
//!
//! let decoded = IrReader::decode_all(&stream).unwrap();
//! assert!(decoded.terminated);
//! assert_eq!(decoded.events.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod event;

pub use decoder::{valid_prefix_len, DecodedStream, IrReader};
pub use encoder::IrWriter;
pub use error::{CodecError, CodecResult};
pub use event::{validate_timezone, LogEvent, StreamMetadata};

/// Magic bytes opening every IR stream.
pub const MAGIC: [u8; 4] = *b"IRPK";

/// Current IR format version.
pub const FORMAT_VERSION: u16 = 1;

/// Tag byte of the end-of-stream marker.
pub const EOS_TAG: u8 = 0x00;

/// Tag byte of an event.
pub const EVENT_TAG: u8 = 0x01;

/// Longest message an event can carry.
pub const MAX_MESSAGE_LEN: usize = u32::MAX as usize;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_cut_keeps_whole_events(
            messages in prop::collection::vec("[a-z ]{0,40}", 1..20),
            cut in 0usize..2048,
        ) {
            let mut writer = IrWriter::with_reference("UTC", 1024, 0).unwrap();
            for (i, message) in messages.iter().enumerate() {
                writer.write(&LogEvent::new(i as i64 * 10, message.clone())).unwrap();
            }
            let mut data = Vec::new();
            writer.flush_to(&mut data).unwrap();

            let cut = cut.min(data.len());
            let keep = valid_prefix_len(&data[..cut], true);
            prop_assert!(keep <= cut);

            if keep > 0 {
                let decoded = IrReader::decode_all(&data[..keep]).unwrap();
                prop_assert!(decoded.events.len() <= messages.len());
                for (event, message) in decoded.events.iter().zip(&messages) {
                    prop_assert_eq!(&event.message, message);
                }
            }
        }
    }
}
