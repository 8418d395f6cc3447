use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::format_mib;

/// How the decompressed size of an artifact is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMethod {
    /// Unpack into a scratch directory and sum the extracted files.
    #[default]
    Extract,
    /// Sum the uncompressed sizes recorded in the archive headers.
    Declared,
}

impl fmt::Display for SizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeMethod::Extract => f.write_str("extract"),
            SizeMethod::Declared => f.write_str("declared"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Both size dimensions of an artifact at one point in time, and the
/// verdict against the ceiling they were measured for.
#[derive(Debug, Clone, Serialize)]
pub struct SizeReport {
    artifact: PathBuf,
    compressed_bytes: u64,
    decompressed_bytes: u64,
    ceiling_bytes: u64,
    entries: u64,
    method: SizeMethod,
    verdict: Verdict,
    #[serde(with = "time::serde::timestamp")]
    measured_at: OffsetDateTime,
}

impl SizeReport {
    pub fn new(
        artifact: impl Into<PathBuf>,
        compressed_bytes: u64,
        decompressed_bytes: u64,
        ceiling_bytes: u64,
        entries: u64,
        method: SizeMethod,
    ) -> Self {
        let verdict = if decompressed_bytes < ceiling_bytes {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        Self {
            artifact: artifact.into(),
            compressed_bytes,
            decompressed_bytes,
            ceiling_bytes,
            entries,
            method,
            verdict,
            measured_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.compressed_bytes
    }

    pub fn decompressed_bytes(&self) -> u64 {
        self.decompressed_bytes
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn method(&self) -> SizeMethod {
        self.method
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// One-line operator message.
    pub fn summary(&self) -> String {
        match self.verdict {
            Verdict::Pass => format!(
                "{} is within the size ceiling: decompressed {} bytes ({}) < ceiling {} bytes ({}); compressed {} bytes ({})",
                self.artifact.display(),
                self.decompressed_bytes,
                format_mib(self.decompressed_bytes),
                self.ceiling_bytes,
                format_mib(self.ceiling_bytes),
                self.compressed_bytes,
                format_mib(self.compressed_bytes),
            ),
            Verdict::Fail => format!(
                "{} exceeds the size ceiling: decompressed {} bytes ({}) >= ceiling {} bytes ({}); compressed {} bytes ({}). Trim dependencies or split the layer.",
                self.artifact.display(),
                self.decompressed_bytes,
                format_mib(self.decompressed_bytes),
                self.ceiling_bytes,
                format_mib(self.ceiling_bytes),
                self.compressed_bytes,
                format_mib(self.compressed_bytes),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MIB;

    const CEILING: u64 = 250 * MIB;

    fn report(decompressed: u64) -> SizeReport {
        SizeReport::new("layer.zip", 1, decompressed, CEILING, 1, SizeMethod::Extract)
    }

    #[test]
    fn test_below_ceiling_passes() {
        assert!(report(CEILING - 1).passed());
        assert!(report(0).passed());
    }

    #[test]
    fn test_exactly_at_ceiling_fails() {
        let report = report(CEILING);
        assert_eq!(report.verdict(), Verdict::Fail);
        assert!(!report.passed());
    }

    #[test]
    fn test_260_mib_against_250_mib_ceiling_fails() {
        assert_eq!(CEILING, 262_144_000);
        let report = report(260 * MIB);
        assert!(!report.passed());
        assert!(report.summary().contains("exceeds the size ceiling"));
    }

    #[test]
    fn test_100_mib_against_250_mib_ceiling_passes() {
        let report = report(100 * MIB);
        assert!(report.passed());
        assert!(report.summary().contains("within the size ceiling"));
    }

    #[test]
    fn test_report_serializes_verdict() {
        let json = serde_json::to_value(report(CEILING + 1)).unwrap();
        assert_eq!(json["verdict"], "fail");
        assert_eq!(json["method"], "extract");
        assert_eq!(json["ceiling_bytes"], CEILING);
    }
}
