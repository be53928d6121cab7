//! Row encoding.
//!
//! Samples are imported as flat rows, one MessagePack map per sample, concatenated back to back:
//!
//! - `time`: the sample timestamp, in seconds since the Unix epoch
//! - `name`: the metric name
//! - `value`: the sample value, always encoded as a 64-bit float
//! - `label_<key>`: one column per label, except for the metric-name label
//!
//! Values are never coerced: NaN and both infinities are written as their IEEE 754 bit patterns.

use serde::{ser::SerializeMap as _, Serialize, Serializer};
use snafu::{ResultExt as _, Snafu};

use crate::Sample;

const LABEL_COLUMN_PREFIX: &str = "label_";

/// Error type for row encoding.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum EncodeError {
    /// A row could not be serialized.
    #[snafu(display("Failed to encode row {} as MessagePack.", index))]
    Row {
        /// Position of the sample in the batch.
        index: usize,

        /// Error source.
        source: rmp_serde::encode::Error,
    },
}

/// Encodes the given samples as rows, appending them to `buffer`.
///
/// Rows are written in the same order as the samples. On success, the number of rows written is returned.
///
/// # Errors
///
/// If any row fails to encode, an error is returned. The buffer may contain a partial payload in that case, and should
/// be discarded.
pub fn encode_rows(samples: &[Sample], buffer: &mut Vec<u8>) -> Result<usize, EncodeError> {
    for (index, sample) in samples.iter().enumerate() {
        rmp_serde::encode::write(buffer, &SampleRow(sample)).context(Row { index })?;
    }

    Ok(samples.len())
}

struct SampleRow<'a>(&'a Sample);

impl Serialize for SampleRow<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sample = self.0;
        let label_count = sample.row_labels().count();

        let mut map = serializer.serialize_map(Some(3 + label_count))?;
        map.serialize_entry("time", &sample.timestamp())?;
        map.serialize_entry("name", sample.name())?;
        map.serialize_entry("value", &sample.value())?;
        for (key, value) in sample.row_labels() {
            map.serialize_entry(&LabelColumn(key), value)?;
        }
        map.end()
    }
}

struct LabelColumn<'a>(&'a str);

impl Serialize for LabelColumn<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("{}{}", LABEL_COLUMN_PREFIX, self.0))
    }
}
