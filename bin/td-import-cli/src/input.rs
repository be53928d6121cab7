use std::{collections::BTreeMap, path::Path};

use anyhow::{anyhow, bail, Context as _};
use serde::Deserialize;
use td_import::Sample;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader, Lines};

/// A sample, as written in the input.
///
/// `value` is either a number or one of `NaN`, `Inf`, `+Inf`, and `-Inf`, since JSON has no way to write non-finite
/// numbers.
#[derive(Deserialize)]
struct SampleRecord {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    timestamp: i64,
    value: RecordValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordValue {
    Number(f64),
    Symbol(String),
}

impl RecordValue {
    fn to_f64(&self) -> anyhow::Result<f64> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Symbol(symbol) => match symbol.as_str() {
                "NaN" => Ok(f64::NAN),
                "Inf" | "+Inf" => Ok(f64::INFINITY),
                "-Inf" => Ok(f64::NEG_INFINITY),
                other => Err(anyhow!("invalid sample value '{}'", other)),
            },
        }
    }
}

fn parse_sample(line: &str) -> anyhow::Result<Sample> {
    let record: SampleRecord = serde_json::from_str(line)?;
    let value = record.value.to_f64()?;

    Ok(Sample::new(record.name, record.timestamp, value).with_labels(record.labels))
}

/// Opens the given input, where `-` is standard input.
pub async fn open_input(input: &str) -> anyhow::Result<Box<dyn AsyncBufRead + Send + Unpin>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let path = Path::new(input);
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open input file '{}'.", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Reads samples from newline-delimited JSON, in batches.
pub struct SampleReader<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R> SampleReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Reads up to `batch_size` samples.
    ///
    /// Blank lines are skipped. An empty batch means the input is exhausted.
    pub async fn next_batch(&mut self, batch_size: usize) -> anyhow::Result<Vec<Sample>> {
        if batch_size == 0 {
            bail!("batch size must be greater than zero");
        }

        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            let Some(line) = self.lines.next_line().await.context("Failed to read input.")? else {
                break;
            };
            self.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let sample = parse_sample(line).with_context(|| format!("Invalid sample on line {}.", self.line_number))?;
            batch.push(sample);
        }

        Ok(batch)
    }
}
