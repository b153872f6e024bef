//! Dispatcher command types and codec.
//!
//! Every message exchanged with the farm dispatcher is a JSON object of
//! the shape `{"commandType": "<TYPE>", "data": {...}}`. This module maps
//! them onto the strongly-typed [`RemoteCommand`] enum and back.

use serde::{Deserialize, Serialize};

/// All known dispatcher commands.
///
/// Adjacently tagged: the variant name lives in `"commandType"` and the
/// payload in `"data"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType", content = "data")]
pub enum RemoteCommand {
    /// Dispatcher asks the controller to render one shot.
    #[serde(rename = "START_TASK")]
    StartTask(StartTaskData),

    /// A log line forwarded to the dispatcher.
    #[serde(rename = "LOG_MESSAGE")]
    LogMessage(LogMessageData),

    /// Human-readable controller status ("Rendering", "Idle", ...).
    #[serde(rename = "SET_STATUS")]
    SetStatus(SetStatusData),

    /// Progress of the current shot, in percent.
    #[serde(rename = "SET_PROGRESS")]
    SetProgress(SetProgressData),

    /// A shot finished, successfully or not.
    #[serde(rename = "END_TASK")]
    EndTask(EndTaskData),

    /// Dispatcher asks the controller to abort the current shot.
    #[serde(rename = "STOP_TASK")]
    StopTask(StopTaskData),
}

/// Payload for `START_TASK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskData {
    /// Global shot index across the whole queue.
    pub shot_index: usize,
    /// Submission time shared by every task of the dispatcher job,
    /// e.g. `12/08/2020 13:10:55`.
    pub job_submit_time: String,
}

/// Payload for `LOG_MESSAGE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessageData {
    pub severity: Severity,
    pub message: String,
}

/// Severity attached to forwarded log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Log,
    Warning,
    Error,
}

/// Payload for `SET_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatusData {
    pub status: String,
}

/// Payload for `SET_PROGRESS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetProgressData {
    /// Completion percentage (0-100).
    pub progress: f64,
}

/// Payload for `END_TASK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndTaskData {
    pub shot_index: usize,
    pub success: bool,
}

/// Payload for `STOP_TASK`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTaskData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RemoteCommand {
    pub fn start_task(shot_index: usize, job_submit_time: impl Into<String>) -> Self {
        Self::StartTask(StartTaskData {
            shot_index,
            job_submit_time: job_submit_time.into(),
        })
    }

    pub fn log(severity: Severity, message: impl Into<String>) -> Self {
        Self::LogMessage(LogMessageData {
            severity,
            message: message.into(),
        })
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self::SetStatus(SetStatusData {
            status: status.into(),
        })
    }

    /// Build a `SET_PROGRESS` from a fraction in `[0, 1]`.
    ///
    /// The wire value is a percentage; out-of-range fractions are clamped.
    pub fn progress(fraction: f32) -> Self {
        let clamped = f64::from(fraction.clamp(0.0, 1.0));
        Self::SetProgress(SetProgressData {
            progress: clamped * 100.0,
        })
    }

    pub fn end_task(shot_index: usize, success: bool) -> Self {
        Self::EndTask(EndTaskData {
            shot_index,
            success,
        })
    }

    pub fn stop_task(reason: Option<String>) -> Self {
        Self::StopTask(StopTaskData { reason })
    }

    /// Wire name of the command type, for logging.
    pub fn command_type(&self) -> &'static str {
        match self {
            Self::StartTask(_) => "START_TASK",
            Self::LogMessage(_) => "LOG_MESSAGE",
            Self::SetStatus(_) => "SET_STATUS",
            Self::SetProgress(_) => "SET_PROGRESS",
            Self::EndTask(_) => "END_TASK",
            Self::StopTask(_) => "STOP_TASK",
        }
    }

    /// Whether this command flows from the dispatcher to the controller.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::StartTask(_) | Self::StopTask(_))
    }
}

/// Serialize a command to its single-line JSON wire form.
pub fn encode_command(command: &RemoteCommand) -> Result<String, serde_json::Error> {
    serde_json::to_string(command)
}

/// Parse one wire message into a typed command.
///
/// Returns `Err` for malformed JSON or unknown `commandType` values.
/// Callers should log the raw text and continue.
pub fn parse_command(text: &str) -> Result<RemoteCommand, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_task_message() {
        let json = concat!(
            r#"{"commandType":"START_TASK","#,
            r#""data":{"shotIndex":3,"jobSubmitTime":"12/08/2020 13:10:55"}}"#,
        );
        match parse_command(json).unwrap() {
            RemoteCommand::StartTask(data) => {
                assert_eq!(data.shot_index, 3);
                assert_eq!(data.job_submit_time, "12/08/2020 13:10:55");
            }
            other => panic!("Expected StartTask, got {other:?}"),
        }
    }

    #[test]
    fn parse_stop_task_without_reason() {
        let json = r#"{"commandType":"STOP_TASK","data":{}}"#;
        match parse_command(json).unwrap() {
            RemoteCommand::StopTask(data) => assert!(data.reason.is_none()),
            other => panic!("Expected StopTask, got {other:?}"),
        }
    }

    #[test]
    fn end_task_wire_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&encode_command(&RemoteCommand::end_task(3, true)).unwrap())
                .unwrap();
        assert_eq!(value["commandType"], "END_TASK");
        assert_eq!(value["data"]["shotIndex"], 3);
        assert_eq!(value["data"]["success"], true);
    }

    #[test]
    fn log_message_wire_shape() {
        let text = encode_command(&RemoteCommand::log(Severity::Log, "hello")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["commandType"], "LOG_MESSAGE");
        assert_eq!(value["data"]["severity"], "log");
        assert_eq!(value["data"]["message"], "hello");
    }

    #[test]
    fn progress_is_sent_as_percentage() {
        match RemoteCommand::progress(0.25) {
            RemoteCommand::SetProgress(data) => assert_eq!(data.progress, 25.0),
            other => panic!("Expected SetProgress, got {other:?}"),
        }
        match RemoteCommand::progress(1.5) {
            RemoteCommand::SetProgress(data) => assert_eq!(data.progress, 100.0),
            other => panic!("Expected SetProgress, got {other:?}"),
        }
    }

    #[test]
    fn every_command_round_trips() {
        let commands = vec![
            RemoteCommand::start_task(7, "01/02/2021 03:04:05"),
            RemoteCommand::log(Severity::Warning, "disk almost full"),
            RemoteCommand::log(Severity::Error, "boom"),
            RemoteCommand::status("Rendering"),
            RemoteCommand::progress(0.5),
            RemoteCommand::end_task(4, false),
            RemoteCommand::stop_task(Some("operator request".into())),
            RemoteCommand::stop_task(None),
        ];
        for command in commands {
            let text = encode_command(&command).unwrap();
            assert!(!text.contains('\n'), "wire form must be a single line");
            assert_eq!(parse_command(&text).unwrap(), command);
        }
    }

    #[test]
    fn direction_of_commands() {
        assert!(RemoteCommand::start_task(0, "x").is_inbound());
        assert!(RemoteCommand::stop_task(None).is_inbound());
        assert!(!RemoteCommand::end_task(0, true).is_inbound());
        assert_eq!(RemoteCommand::status("Idle").command_type(), "SET_STATUS");
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        let json = r#"{"commandType":"REBOOT","data":{}}"#;
        assert!(parse_command(json).is_err());
    }

    #[test]
    fn parse_missing_field_returns_error() {
        let json = r#"{"commandType":"START_TASK","data":{"shotIndex":1}}"#;
        assert!(parse_command(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_command("not json at all").is_err());
    }
}
