//! Shared state of a single workflow run.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use crate::encoding::value::is_truthy;
use crate::services::{
    CardSession, CardTransport, InputProvider, ProcessRunner, Service, CARD_TRANSPORT,
    INPUT_PROVIDER, PROCESS_RUNNER,
};
use crate::Values;

/// Variable that switches interactive steps to headless resolution.
pub const HEADLESS_VAR: &str = "_headless";

/// Progress callback: message and percent, where `-1.0` is indeterminate.
pub type ProgressCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

/// Percent value for indeterminate progress.
pub const INDETERMINATE: f64 = -1.0;

/// Cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State shared by all steps of one execution attempt.
///
/// Holds plain variables, step results, registered services, a lazily
/// created scratch directory and an optional persistent card session.
/// [`WorkflowContext::cleanup`] releases the directory and session; it is
/// safe to call repeatedly.
pub struct WorkflowContext {
    variables: Values,
    step_results: Values,
    services: HashMap<String, Service>,
    temp_root: Option<PathBuf>,
    temp_dir: Option<TempDir>,
    card_session: Option<CardSession>,
    cancel: CancelHandle,
    progress: Option<ProgressCallback>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self {
            variables: Values::new(),
            step_results: Values::new(),
            services: HashMap::new(),
            temp_root: None,
            temp_dir: None,
            card_session: None,
            cancel: CancelHandle::new(),
            progress: None,
        }
    }

    /// Create a context seeded with initial values.
    pub fn with_values(values: Values) -> Self {
        let mut ctx = Self::new();
        ctx.variables = values;
        ctx
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    pub(crate) fn progress_callback(&self) -> Option<ProgressCallback> {
        self.progress.clone()
    }

    // Variables

    /// Look up a key. Step results shadow plain variables.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.step_results
            .get(key)
            .or_else(|| self.variables.get(key))
    }

    /// Look up a key, falling back to `default`.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).cloned().unwrap_or(default)
    }

    /// Look up a key as a string, if it is one.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Merge values into the plain variables, overwriting existing keys.
    pub fn merge(&mut self, values: Values) {
        self.variables.extend(values);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.step_results.contains_key(key) || self.variables.contains_key(key)
    }

    /// Store a step's result under its id and as `<id>_result`.
    pub fn set_step_result(&mut self, step_id: &str, result: Value) {
        self.variables
            .insert(format!("{}_result", step_id), result.clone());
        self.step_results.insert(step_id.to_string(), result);
    }

    pub fn get_step_result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    /// All variables and step results, results winning on collisions.
    pub fn get_all_variables(&self) -> Values {
        let mut all = self.variables.clone();
        all.extend(
            self.step_results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        all
    }

    pub fn step_results(&self) -> &Values {
        &self.step_results
    }

    /// True if interactive steps should resolve values without prompting.
    pub fn is_headless(&self) -> bool {
        self.get(HEADLESS_VAR).map(is_truthy).unwrap_or(false)
    }

    pub fn set_headless(&mut self, headless: bool) {
        self.set(HEADLESS_VAR, Value::Bool(headless));
    }

    // Scratch directory

    /// Scratch directory of this run, created on first access.
    pub fn temp_dir(&mut self) -> std::io::Result<PathBuf> {
        if let Some(dir) = &self.temp_dir {
            return Ok(dir.path().to_path_buf());
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("workflow_");
        let dir = match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created scratch directory");
        self.temp_dir = Some(dir);
        Ok(path)
    }

    /// Scratch directory path if it has been created.
    pub fn existing_temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(|d| d.path())
    }

    /// Write a file into the scratch directory. `name` must be a plain file name.
    pub fn create_temp_file(&mut self, name: &str, content: &[u8]) -> std::io::Result<PathBuf> {
        check_file_name(name)?;
        let path = self.temp_dir()?.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    // Progress and cancellation

    pub fn report_progress(&self, message: &str, percent: f64) {
        if let Some(callback) = &self.progress {
            callback(message, percent);
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle that can cancel this run from another task or thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    // Services

    pub fn register_service(&mut self, name: impl Into<String>, service: Service) {
        self.services.insert(name.into(), service);
    }

    pub fn get_service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn register_card_transport(&mut self, transport: Arc<dyn CardTransport>) {
        self.register_service(CARD_TRANSPORT, Service::Card(transport));
    }

    pub fn register_process_runner(&mut self, runner: Arc<dyn ProcessRunner>) {
        self.register_service(PROCESS_RUNNER, Service::Process(runner));
    }

    pub fn register_input_provider(&mut self, provider: Arc<dyn InputProvider>) {
        self.register_service(INPUT_PROVIDER, Service::Input(provider));
    }

    pub fn card_transport(&self) -> Option<Arc<dyn CardTransport>> {
        self.get_service(CARD_TRANSPORT).and_then(Service::as_card)
    }

    pub fn process_runner(&self) -> Option<Arc<dyn ProcessRunner>> {
        self.get_service(PROCESS_RUNNER).and_then(Service::as_process)
    }

    pub fn input_provider(&self) -> Option<Arc<dyn InputProvider>> {
        self.get_service(INPUT_PROVIDER).and_then(Service::as_input)
    }

    // Card session

    pub fn card_session(&self) -> Option<&CardSession> {
        self.card_session.as_ref().filter(|s| s.is_open())
    }

    pub fn card_session_mut(&mut self) -> Option<&mut CardSession> {
        self.card_session.as_mut().filter(|s| s.is_open())
    }

    /// Install a persistent session, closing any previous one.
    pub async fn set_card_session(&mut self, session: CardSession) {
        self.close_card_session().await;
        self.card_session = Some(session);
    }

    pub async fn close_card_session(&mut self) {
        if let Some(mut session) = self.card_session.take() {
            session.close().await;
        }
    }

    /// Release the card session and scratch directory. Idempotent.
    pub async fn cleanup(&mut self) {
        self.close_card_session().await;
        if let Some(dir) = self.temp_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
            } else {
                tracing::debug!(path = %path.display(), "Removed scratch directory");
            }
        }
    }
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("step_results", &self.step_results.keys().collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("temp_dir", &self.existing_temp_dir())
            .field("card_session", &self.card_session)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Reject names that would escape the scratch directory.
pub(crate) fn check_file_name(name: &str) -> std::io::Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid temp file name: {:?}", name),
        ));
    }
    Ok(())
}
