//! Tool names and the operation classes derived from them.
//!
//! Rate limiting, circuit breaking, and scheduling all key on the class, not
//! the tool, so adding a tool to an existing class inherits its policy.

use serde::{Deserialize, Serialize};

/// Stable tool names.
pub mod tools {
    pub const NEW_CONTEXT: &str = "browser.newContext";
    pub const CLOSE: &str = "browser.close";
    pub const GOTO: &str = "browser.goto";
    pub const CLICK: &str = "browser.click";
    pub const TYPE: &str = "browser.type";
    pub const SELECT: &str = "browser.select";
    pub const SCREENSHOT: &str = "browser.screenshot";
    pub const DOM_SNAPSHOT: &str = "browser.domSnapshot";
    pub const EVAL: &str = "browser.eval";
    pub const NETWORK_GET_RECENT: &str = "browser.network.getRecent";
    pub const CONSOLE_GET_RECENT: &str = "browser.console.getRecent";
    pub const TRACE_START: &str = "browser.trace.start";
    pub const TRACE_STOP: &str = "browser.trace.stop";
    pub const HAR_EXPORT: &str = "browser.harExport";
    pub const MACRO_START_RECORDING: &str = "browser.macro.startRecording";
    pub const MACRO_STOP_RECORDING: &str = "browser.macro.stopRecording";
    pub const MACRO_LIST: &str = "browser.macro.list";
    pub const MACRO_PLAY: &str = "browser.macro.play";
    pub const MACRO_DELETE: &str = "browser.macro.delete";
    pub const REPORT_GENERATE: &str = "browser.report.generate";
    pub const REPORT_TEMPLATES: &str = "browser.report.templates";
    pub const REPORT_CLEANUP: &str = "browser.report.cleanup";
    pub const STATUS: &str = "gateway.status";
}

/// Coarse class an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Navigation,
    Interaction,
    Capture,
    Evaluation,
    Inspection,
    Session,
}

impl OperationClass {
    /// Derive the class from a tool name. Unknown tools fall into
    /// [`OperationClass::Session`]; the dispatcher rejects them before any
    /// class-keyed policy fires.
    #[must_use]
    pub fn from_tool(tool: &str) -> Self {
        match tool {
            tools::GOTO => Self::Navigation,
            tools::CLICK | tools::TYPE | tools::SELECT => Self::Interaction,
            tools::SCREENSHOT | tools::DOM_SNAPSHOT => Self::Capture,
            tools::EVAL => Self::Evaluation,
            tools::NETWORK_GET_RECENT
            | tools::CONSOLE_GET_RECENT
            | tools::HAR_EXPORT
            | tools::REPORT_GENERATE
            | tools::REPORT_TEMPLATES
            | tools::REPORT_CLEANUP
            | tools::STATUS => Self::Inspection,
            _ => Self::Session,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Interaction => "interaction",
            Self::Capture => "capture",
            Self::Evaluation => "evaluation",
            Self::Inspection => "inspection",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
