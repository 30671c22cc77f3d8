//! Touchstone `.s2p` output.
//!
//! Writes two-port data in Touchstone v1 format: `!` comment lines, a
//! `# GHZ S RI R 50` option line, then one row per frequency with the four
//! matrix entries as real/imaginary pairs in S11 S21 S12 S22 column order.
//! The acquisition settings and per-sweep timing go into the comment block
//! as pretty-printed JSON, one comment line per JSON line.

use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::VnaError;
use crate::sweep::{SweepSettings, SweepTiming};
use crate::twoport::TwoPort;

/// Two-port data ready to be written as a Touchstone file.
#[derive(Debug, Clone)]
pub struct TouchstoneFile {
    comments: Vec<String>,
    frequency_hz: Vec<f64>,
    data: Vec<TwoPort>,
}

impl TouchstoneFile {
    /// Pair a frequency axis with per-frequency matrices.
    pub fn new(frequency_hz: Vec<f64>, data: Vec<TwoPort>) -> Result<Self, VnaError> {
        if frequency_hz.len() != data.len() {
            return Err(VnaError::Data(format!(
                "{} frequency points but {} data points",
                frequency_hz.len(),
                data.len()
            )));
        }
        Ok(Self {
            comments: Vec::new(),
            frequency_hz,
            data,
        })
    }

    /// Comment lines for the file header, without the leading `!`.
    pub fn with_comments(mut self, comments: Vec<String>) -> Self {
        self.comments = comments;
        self
    }

    /// Write to a file at `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), VnaError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
    }

    /// Write to any writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VnaError> {
        for comment in &self.comments {
            writeln!(writer, "! {comment}")?;
        }

        writeln!(writer, "# GHZ S RI R 50")?;

        for (freq, matrix) in self.frequency_hz.iter().zip(&self.data) {
            write!(writer, "{:>15.9}", freq / 1e9)?;
            // Standard 2-port column order: S11, S21, S12, S22
            for (rx, tx) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let value = matrix.get(rx, tx);
                write!(writer, " {:>15.9} {:>15.9}", value.re, value.im)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }
}

/// Header comment block for one acquired file: parameter label, sweep
/// timing, and the as-applied settings summary as pretty-printed JSON.
pub fn sweep_comment_block(
    label: &str,
    timing: Option<&SweepTiming>,
    settings: &SweepSettings,
) -> Result<Vec<String>, VnaError> {
    let mut payload = serde_json::Map::new();
    payload.insert("Parameter type".to_string(), Value::from(label));
    if let Some(timing) = timing {
        if let Value::Object(map) = serde_json::to_value(timing)? {
            payload.extend(map);
        }
    }
    if let Value::Object(map) = serde_json::to_value(settings)? {
        payload.extend(map);
    }
    let text = serde_json::to_string_pretty(&Value::Object(payload))?;
    Ok(text.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn sample() -> TouchstoneFile {
        let m = |base: f64| {
            TwoPort::new([
                [
                    Complex64::new(base, 0.1),
                    Complex64::new(base + 0.01, -0.1),
                ],
                [
                    Complex64::new(base + 0.02, 0.2),
                    Complex64::new(base + 0.03, -0.2),
                ],
            ])
        };
        TouchstoneFile::new(vec![1.0e9, 2.0e9], vec![m(0.5), m(0.6)]).unwrap()
    }

    fn render(file: &TouchstoneFile) -> String {
        let mut buf = Vec::new();
        file.write_to(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn rejects_mismatched_lengths() {
        assert!(TouchstoneFile::new(vec![1.0e9], vec![]).is_err());
    }

    #[test]
    fn writes_option_line_and_rows() {
        let text = render(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# GHZ S RI R 50");
        assert_eq!(lines.len(), 3);

        let first: Vec<f64> = lines[1]
            .split_whitespace()
            .map(|v| v.parse().unwrap())
            .collect();
        assert_eq!(first.len(), 9);
        assert!((first[0] - 1.0).abs() < 1e-12); // GHz
        // S11 then S21: columns follow 2-port convention
        assert!((first[1] - 0.5).abs() < 1e-9);
        assert!((first[3] - 0.52).abs() < 1e-9);
        assert!((first[4] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn comments_precede_the_option_line() {
        let file = sample().with_comments(vec!["{".to_string(), "}".to_string()]);
        let text = render(&file);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "! {");
        assert_eq!(lines[1], "! }");
        assert_eq!(lines[2], "# GHZ S RI R 50");
    }
}
