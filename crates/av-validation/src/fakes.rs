//! In-memory fakes for the pipeline's external seams (testing only).
//!
//! `MemoryNotifier` records what was published and can inject transient
//! delivery failures. `ScriptedChecker` answers conformance checks from canned
//! reports instead of running the external tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::conformance::{ConformanceChecker, ConformanceReport};
use crate::error::ValidationError;
use crate::notify::{Notification, Notifier, NotifyError};
use crate::package::PayloadFile;

/// A report where every rule passes.
pub const PASSING_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaConch xmlns="https://mediaarea.net/mediaconch" version="0.3">
  <media ref="file">
    <policy name="fixture" type="and" outcome="pass">
      <rule name="General/Format" value="Format" tracktype="General" operator="=" outcome="pass" actual="ok">ok</rule>
    </policy>
  </media>
</MediaConch>"#;

/// A report with one failing rule.
pub const FAILING_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaConch xmlns="https://mediaarea.net/mediaconch" version="0.3">
  <media ref="file">
    <policy name="fixture" type="and" outcome="fail">
      <rule name="General/Format" value="Format" tracktype="General" operator="=" outcome="pass" actual="ok">ok</rule>
      <rule name="Audio/SamplingRate" value="SamplingRate" tracktype="Audio" operator="=" outcome="fail" actual="44100">96000</rule>
    </policy>
  </media>
</MediaConch>"#;

#[derive(Debug, Default)]
struct NotifierState {
    published: Vec<Notification>,
    attempts: Vec<Uuid>,
    transient_faults: usize,
    always_fail: bool,
}

#[derive(Debug, Default)]
pub struct MemoryNotifier {
    state: Mutex<NotifierState>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successfully delivered notifications, in order.
    pub fn published(&self) -> Vec<Notification> {
        self.state.lock().unwrap().published.clone()
    }

    /// Message id of every delivery attempt, including failed ones.
    pub fn attempted_ids(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// The next `count` publishes fail with a transient transport error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().transient_faults += count;
    }

    pub fn fail_always(&self) {
        self.state.lock().unwrap().always_fail = true;
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(notification.message_id);
        if state.always_fail {
            return Err(NotifyError::Transport("injected publish fault".to_string()));
        }
        if state.transient_faults > 0 {
            state.transient_faults -= 1;
            return Err(NotifyError::Transport(
                "injected transient publish fault".to_string(),
            ));
        }
        state.published.push(notification.clone());
        Ok(())
    }
}

/// Canned answer for a scripted conformance check.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Tool produced this report body.
    Report(String),
    /// Tool could not be run.
    ToolFailure(String),
}

/// Conformance checker answering from a per-file script.
#[derive(Debug)]
pub struct ScriptedChecker {
    default: Scripted,
    by_file: HashMap<String, Scripted>,
    calls: AtomicUsize,
    checked: Mutex<Vec<PathBuf>>,
}

impl ScriptedChecker {
    pub fn new(default: Scripted) -> Self {
        Self {
            default,
            by_file: HashMap::new(),
            calls: AtomicUsize::new(0),
            checked: Mutex::new(Vec::new()),
        }
    }

    /// Every file passes unless scripted otherwise.
    pub fn passing() -> Self {
        Self::new(Scripted::Report(PASSING_REPORT.to_string()))
    }

    /// Script the answer for one file name (without directories).
    pub fn respond(mut self, file_name: impl Into<String>, answer: Scripted) -> Self {
        self.by_file.insert(file_name.into(), answer);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Absolute paths passed to `check`, in call order.
    pub fn checked_files(&self) -> Vec<PathBuf> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConformanceChecker for ScriptedChecker {
    async fn check(
        &self,
        file: &PayloadFile,
        path: &Path,
    ) -> Result<ConformanceReport, ValidationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.checked.lock().unwrap().push(path.to_path_buf());

        let answer = self
            .by_file
            .get(&file.file_name())
            .unwrap_or(&self.default)
            .clone();
        match answer {
            Scripted::Report(xml) => ConformanceReport::from_xml(file, xml, Some(0)),
            Scripted::ToolFailure(reason) => Err(ValidationError::ToolInvocation {
                file: file.path.to_string_lossy().into_owned(),
                reason,
            }),
        }
    }
}
