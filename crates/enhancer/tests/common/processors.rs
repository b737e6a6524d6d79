//! Processors with scripted behaviour.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enhancer::error::ProcessorError;
use enhancer::job::{FailedFile, JobResults};
use enhancer::{BatchProcessor, BatchRequest, FileEvent, ProgressSink};

/// Holds a processor inside its first file until opened or cancelled.
#[derive(Default)]
pub struct Gate {
    entered: AtomicBool,
    open: AtomicBool,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }

    fn wait(&self, progress: &dyn ProgressSink) {
        self.entered.store(true, Ordering::Release);
        while !self.open.load(Ordering::Acquire) && !progress.is_cancelled() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

enum Mode {
    Normal,
    Error(String),
    Panic(String),
}

/// Processes every file successfully unless told otherwise. Each success
/// writes `<stem>_enhanced.wav` next to where the input sat.
pub struct ScriptedProcessor {
    failures: HashMap<String, String>,
    silent: Vec<String>,
    mode: Mode,
    gate: Option<Arc<Gate>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self {
            failures: HashMap::new(),
            silent: Vec::new(),
            mode: Mode::Normal,
            gate: None,
        }
    }

    /// `file` fails with `reason`.
    pub fn failing(mut self, file: &str, reason: &str) -> Self {
        self.failures.insert(file.to_string(), reason.to_string());
        self
    }

    /// `file` is processed without any progress reports.
    pub fn silent(mut self, file: &str) -> Self {
        self.silent.push(file.to_string());
        self
    }

    /// The whole batch fails with `message`.
    pub fn erroring(mut self, message: &str) -> Self {
        self.mode = Mode::Error(message.to_string());
        self
    }

    pub fn panicking(mut self, message: &str) -> Self {
        self.mode = Mode::Panic(message.to_string());
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn arc(self) -> Arc<dyn BatchProcessor> {
        Arc::new(self)
    }
}

fn output_name(input: &str) -> String {
    let path = Path::new(input);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => format!("{}/{}_enhanced.wav", parent.to_string_lossy(), stem),
        None => format!("{}_enhanced.wav", stem),
    }
}

impl BatchProcessor for ScriptedProcessor {
    fn process_all(
        &self,
        request: &BatchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<JobResults, ProcessorError> {
        match &self.mode {
            Mode::Error(message) => return Err(ProcessorError::Failed(message.clone())),
            Mode::Panic(message) => panic!("{}", message),
            Mode::Normal => {}
        }

        let mut results = JobResults::default();
        for (index, file) in request.files.iter().enumerate() {
            if progress.is_cancelled() {
                break;
            }

            let silent = self.silent.contains(file);
            if !silent {
                progress.report(FileEvent::Started {
                    filename: file.clone(),
                });
                progress.report(FileEvent::Progress {
                    filename: file.clone(),
                    percent: 50.0,
                    stage: "denoise".to_string(),
                });
            }

            if index == 0 {
                if let Some(gate) = &self.gate {
                    gate.wait(progress);
                    if progress.is_cancelled() {
                        break;
                    }
                }
            }

            if let Some(reason) = self.failures.get(file) {
                if !silent {
                    progress.report(FileEvent::failed(file.as_str(), reason.as_str()));
                }
                results.failed.push(FailedFile::new(file.as_str(), reason.as_str()));
                continue;
            }

            let output = output_name(file);
            let target = request.output_dir.join(&output);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ProcessorError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&target, b"enhanced").map_err(|source| ProcessorError::Io {
                path: target.clone(),
                source,
            })?;

            if !silent {
                progress.report(FileEvent::succeeded(file.as_str(), output.as_str()));
            }
            results.success.push(file.clone());
        }

        Ok(results)
    }
}
