//! Trial report parsing
//!
//! A trial reports its result in the last lines of its combined output.
//! Two forms are accepted:
//!
//! ```text
//! running time: 5423.7
//! valid performance: 0.9312
//! ```
//!
//! or a single JSON record on the final line:
//!
//! ```text
//! {"running_time": 5423.7, "valid_performance": 0.9312}
//! ```

use serde::{Deserialize, Serialize};

use crate::{FarmError, FarmResult};

const RUNNING_TIME_PREFIX: &str = "running time:";
const PERFORMANCE_PREFIX: &str = "valid performance:";

/// The values a trial reports when it finishes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    /// Running time in seconds
    #[serde(rename = "running_time")]
    pub running_time_secs: f64,
    /// Validation metric
    #[serde(rename = "valid_performance")]
    pub metric: f64,
}

impl TrialReport {
    /// Parse the report out of a trial's combined output
    pub fn parse(output: &str) -> FarmResult<Self> {
        let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty()).rev();
        let last = lines
            .next()
            .ok_or_else(|| FarmError::Report("trial produced no output".to_string()))?;

        if last.starts_with('{') {
            return serde_json::from_str(last)
                .map_err(|e| FarmError::Report(format!("invalid report record: {}", e)));
        }

        let second_last = lines.next().unwrap_or_default();
        let running_time_secs = parse_field(second_last, RUNNING_TIME_PREFIX)?;
        let metric = parse_field(last, PERFORMANCE_PREFIX)?;

        Ok(Self {
            running_time_secs,
            metric,
        })
    }
}

fn parse_field(line: &str, prefix: &str) -> FarmResult<f64> {
    let value = line
        .strip_prefix(prefix)
        .ok_or_else(|| FarmError::Report(format!("expected '{}', got '{}'", prefix, line)))?;
    value
        .trim()
        .parse()
        .map_err(|_| FarmError::Report(format!("invalid number in '{}'", line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_report() {
        let output = "epoch 1 loss 2.3\nepoch 2 loss 1.1\nrunning time: 120.5\nvalid performance: 0.875\n";
        let report = TrialReport::parse(output).unwrap();
        assert_eq!(report.running_time_secs, 120.5);
        assert_eq!(report.metric, 0.875);
    }

    #[test]
    fn test_parse_skips_trailing_blank_lines() {
        let output = "running time: 60\r\nvalid performance: 0.5\r\n\n  \n";
        let report = TrialReport::parse(output).unwrap();
        assert_eq!(report.running_time_secs, 60.0);
        assert_eq!(report.metric, 0.5);
    }

    #[test]
    fn test_parse_json_report() {
        let output = "training...\n{\"running_time\": 30.0, \"valid_performance\": 0.7}\n";
        let report = TrialReport::parse(output).unwrap();
        assert_eq!(report.running_time_secs, 30.0);
        assert_eq!(report.metric, 0.7);
    }

    #[test]
    fn test_parse_missing_lines() {
        let output = "Traceback (most recent call last):\nRuntimeError: CUDA out of memory\n";
        assert!(matches!(
            TrialReport::parse(output),
            Err(FarmError::Report(_))
        ));
        assert!(TrialReport::parse("").is_err());
        assert!(TrialReport::parse("valid performance: 0.9").is_err());
    }

    #[test]
    fn test_parse_swapped_lines() {
        let output = "valid performance: 0.9\nrunning time: 12\n";
        assert!(TrialReport::parse(output).is_err());
    }

    #[test]
    fn test_parse_bad_number() {
        let output = "running time: soon\nvalid performance: 0.9\n";
        assert!(TrialReport::parse(output).is_err());
    }
}
