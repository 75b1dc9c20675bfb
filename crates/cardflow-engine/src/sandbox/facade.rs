//! The `context` object scripts see.
//!
//! Scripts run on a blocking thread, so the facade works on a snapshot of the
//! workflow context. Writes are recorded and applied back once the script
//! has finished.

use rhai::{Blob, Dynamic, Engine, EvalAltResult};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::convert::{dynamic_to_json, json_to_dynamic};
use crate::context::{check_file_name, ProgressCallback, WorkflowContext, INDETERMINATE};
use crate::Values;

struct FacadeState {
    values: Values,
    step_results: Values,
    writes: Vec<(String, Value)>,
    temp_dir: PathBuf,
    progress: Option<ProgressCallback>,
}

/// Restricted view of a [`WorkflowContext`].
#[derive(Clone)]
pub struct ContextFacade {
    state: Arc<Mutex<FacadeState>>,
}

impl ContextFacade {
    /// Snapshot a workflow context. Creates the scratch directory.
    pub fn from_context(ctx: &mut WorkflowContext) -> std::io::Result<Self> {
        let temp_dir = ctx.temp_dir()?;
        Ok(Self {
            state: Arc::new(Mutex::new(FacadeState {
                values: ctx.get_all_variables(),
                step_results: ctx.step_results().clone(),
                writes: Vec::new(),
                temp_dir,
                progress: ctx.progress_callback(),
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FacadeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current view of all variables, including writes made by the script.
    pub fn values(&self) -> Values {
        self.lock().values.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut state = self.lock();
        // Step results keep shadowing plain variables.
        if !state.step_results.contains_key(key) {
            state.values.insert(key.to_string(), value.clone());
        }
        state.writes.push((key.to_string(), value));
    }

    pub fn get_step_result(&self, step_id: &str) -> Option<Value> {
        self.lock().step_results.get(step_id).cloned()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.lock().temp_dir.clone()
    }

    pub fn report_progress(&self, message: &str) {
        let progress = self.lock().progress.clone();
        if let Some(callback) = progress {
            callback(message, INDETERMINATE);
        }
    }

    pub fn create_temp_file(&self, name: &str, content: &[u8]) -> std::io::Result<PathBuf> {
        check_file_name(name)?;
        let path = self.temp_dir().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Apply recorded writes to the workflow context.
    pub fn apply_to(&self, ctx: &mut WorkflowContext) {
        let writes = std::mem::take(&mut self.lock().writes);
        for (key, value) in writes {
            ctx.set(key, value);
        }
    }
}

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Register the facade type and its methods.
pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<ContextFacade>("Context");

    engine.register_fn("get", |ctx: &mut ContextFacade, key: &str| -> Dynamic {
        ctx.get(key).map(|v| json_to_dynamic(&v)).unwrap_or(Dynamic::UNIT)
    });
    engine.register_fn(
        "get",
        |ctx: &mut ContextFacade, key: &str, default: Dynamic| -> Dynamic {
            ctx.get(key).map(|v| json_to_dynamic(&v)).unwrap_or(default)
        },
    );
    engine.register_fn("set", |ctx: &mut ContextFacade, key: &str, value: Dynamic| {
        ctx.set(key, dynamic_to_json(&value));
    });
    engine.register_fn("report_progress", |ctx: &mut ContextFacade, message: &str| {
        ctx.report_progress(message);
    });
    engine.register_fn("get_temp_dir", |ctx: &mut ContextFacade| -> String {
        ctx.temp_dir().to_string_lossy().into_owned()
    });
    engine.register_fn(
        "get_step_result",
        |ctx: &mut ContextFacade, step_id: &str| -> Dynamic {
            ctx.get_step_result(step_id)
                .map(|v| json_to_dynamic(&v))
                .unwrap_or(Dynamic::UNIT)
        },
    );
    engine.register_fn(
        "create_temp_file",
        |ctx: &mut ContextFacade, name: &str, content: &str| -> FnResult<String> {
            ctx.create_temp_file(name, content.as_bytes())
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|e| e.to_string().into())
        },
    );
    engine.register_fn(
        "create_temp_file",
        |ctx: &mut ContextFacade, name: &str, content: Blob| -> FnResult<String> {
            ctx.create_temp_file(name, &content)
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|e| e.to_string().into())
        },
    );
}
