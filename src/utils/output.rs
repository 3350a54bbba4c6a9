/// Output Boundaries and Collector Robustness
/// Per-run buffer of captured console, table and error records, bounded by entry count.
/// Error records are always kept so a failed run can never lose its diagnosis.

use crate::config::settings::DEFAULT_MAX_OUTPUT_ENTRIES;
use crate::config::types::{CodeOutput, OutputIntegrity, OutputLevel, OutputType};
use log::debug;

/// Output limits configuration
#[derive(Debug, Clone)]
pub struct OutputLimits {
    /// Non-error entries kept per run
    pub max_entries: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            max_entries: DEFAULT_MAX_OUTPUT_ENTRIES,
        }
    }
}

/// Output collector with bounded collection
#[derive(Debug)]
pub struct OutputCollector {
    limits: OutputLimits,
    outputs: Vec<CodeOutput>,
    /// Non-error records currently in `outputs`
    kept: usize,
    dropped: usize,
}

impl OutputCollector {
    /// Create new output collector with limits
    pub fn new(limits: OutputLimits) -> Self {
        OutputCollector {
            limits,
            outputs: Vec::new(),
            kept: 0,
            dropped: 0,
        }
    }

    /// Append one record stamped with the current time.
    /// Returns false when the record was dropped by the entry limit.
    pub fn add_output(
        &mut self,
        output_type: OutputType,
        content: serde_json::Value,
        level: Option<OutputLevel>,
        line_number: Option<u32>,
    ) -> bool {
        let counted = output_type != OutputType::Error;
        if counted && self.kept >= self.limits.max_entries {
            self.dropped += 1;
            if self.dropped == 1 {
                debug!(
                    "Output limit of {} entries reached, dropping further records",
                    self.limits.max_entries
                );
            }
            return false;
        }

        self.outputs.push(CodeOutput {
            output_type,
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
            level,
            line_number,
        });
        if counted {
            self.kept += 1;
        }
        true
    }

    /// Append an error record; never dropped
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.add_output(
            OutputType::Error,
            serde_json::Value::String(message.into()),
            None,
            None,
        );
    }

    /// Empty the buffer (`console.clear`)
    pub fn clear(&mut self) {
        self.outputs.clear();
        self.kept = 0;
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.outputs
            .iter()
            .any(|o| o.output_type == OutputType::Error)
    }

    /// Copy of the current buffer
    pub fn snapshot(&self) -> Vec<CodeOutput> {
        self.outputs.clone()
    }

    /// Move the buffer out, leaving the collector empty
    pub fn take_outputs(&mut self) -> Vec<CodeOutput> {
        self.kept = 0;
        std::mem::take(&mut self.outputs)
    }

    pub fn into_outputs(self) -> Vec<CodeOutput> {
        self.outputs
    }

    /// Records rejected by the entry limit
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn integrity(&self) -> OutputIntegrity {
        if self.dropped > 0 {
            OutputIntegrity::TruncatedByLimit
        } else {
            OutputIntegrity::Complete
        }
    }
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self::new(OutputLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_limits_default() {
        let limits = OutputLimits::default();
        assert_eq!(limits.max_entries, 10_000);
    }

    #[test]
    fn test_records_keep_emission_order() {
        let mut collector = OutputCollector::default();
        collector.add_output(OutputType::Console, json!(["a"]), Some(OutputLevel::Log), Some(1));
        collector.add_output(OutputType::Table, json!([{"x": 1}]), None, None);
        collector.add_error("boom");

        let outputs = collector.snapshot();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].content, json!(["a"]));
        assert_eq!(outputs[0].line_number, Some(1));
        assert_eq!(outputs[1].output_type, OutputType::Table);
        assert_eq!(outputs[2].output_type, OutputType::Error);
        assert_eq!(outputs[2].content, json!("boom"));
        assert!(outputs[0].timestamp <= outputs[2].timestamp);
    }

    #[test]
    fn test_limit_drops_and_marks_truncated() {
        let mut collector = OutputCollector::new(OutputLimits { max_entries: 2 });
        assert!(collector.add_output(OutputType::Console, json!([1]), Some(OutputLevel::Log), None));
        assert!(collector.add_output(OutputType::Console, json!([2]), Some(OutputLevel::Log), None));
        assert!(!collector.add_output(OutputType::Console, json!([3]), Some(OutputLevel::Log), None));

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.dropped(), 1);
        assert_eq!(collector.integrity(), OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn test_errors_bypass_limit() {
        let mut collector = OutputCollector::new(OutputLimits { max_entries: 1 });
        collector.add_output(OutputType::Console, json!([1]), Some(OutputLevel::Log), None);
        collector.add_error("first");
        collector.add_error("second");

        assert_eq!(collector.len(), 3);
        assert!(collector.has_error());
        assert_eq!(collector.integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut collector = OutputCollector::default();
        collector.add_output(OutputType::Console, json!(["x"]), Some(OutputLevel::Info), None);
        collector.clear();
        assert!(collector.is_empty());

        collector.add_output(OutputType::Console, json!(["y"]), Some(OutputLevel::Info), None);
        assert_eq!(collector.take_outputs().len(), 1);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_clear_frees_room_under_limit() {
        let mut collector = OutputCollector::new(OutputLimits { max_entries: 2 });
        collector.add_output(OutputType::Console, json!([1]), Some(OutputLevel::Log), None);
        collector.add_error("kept");
        collector.add_output(OutputType::Console, json!([2]), Some(OutputLevel::Log), None);
        assert!(!collector.add_output(OutputType::Console, json!([3]), Some(OutputLevel::Log), None));

        collector.clear();
        assert!(collector.add_output(OutputType::Console, json!([4]), Some(OutputLevel::Log), None));
        assert!(collector.add_output(OutputType::Console, json!([5]), Some(OutputLevel::Log), None));
        assert!(!collector.add_output(OutputType::Console, json!([6]), Some(OutputLevel::Log), None));

        assert_eq!(collector.take_outputs().len(), 2);
        assert!(collector.add_output(OutputType::Console, json!([7]), Some(OutputLevel::Log), None));
    }

    #[test]
    fn test_output_integrity_display() {
        assert_eq!(OutputIntegrity::Complete.to_string(), "complete");
        assert_eq!(
            OutputIntegrity::TruncatedByLimit.to_string(),
            "truncated_by_limit"
        );
    }
}
