//! Sandboxed Rhai execution for script steps and custom parameter builders.
//!
//! The engine has no filesystem, network or process primitives. What scripts
//! can reach is registered explicitly: the `context` facade, the helper
//! modules, and a few hex helpers. Sources are pre-scanned for blocked names
//! and imports before they are compiled, and execution is bounded by
//! operation and size limits.

pub mod convert;
pub mod facade;
pub mod modules;
pub mod scan;

use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::error::EncodingError;
use crate::Values;

pub use convert::{dynamic_to_json, json_to_dynamic};
pub use facade::ContextFacade;

/// Keywords disabled on the engine itself, in addition to the pre-scan.
const DISABLED_SYMBOLS: &[&str] = &["eval", "Fn", "call", "curry", "is_def_var", "is_def_fn"];

/// Errors from checking or running a script.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Blocked function: {0}")]
    Blocked(String),

    #[error("Import not allowed: {0}")]
    ImportNotAllowed(String),

    #[error("{0}")]
    Runtime(String),
}

impl ScriptError {
    /// True for errors found before the script ran.
    pub fn is_validation(&self) -> bool {
        !matches!(self, ScriptError::Runtime(_))
    }
}

/// Resource limits for a single script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_expr_depth: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SandboxLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_operations: config.script_max_operations,
            max_call_levels: 32,
            max_string_size: config.script_max_string_size,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_expr_depth: 64,
        }
    }
}

/// Restricted script runner.
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    limits: SandboxLimits,
}

impl ScriptSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(SandboxLimits::from_config(config))
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Create an engine with the sanctioned surface registered.
    pub fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        for symbol in DISABLED_SYMBOLS {
            engine.disable_symbol(*symbol);
        }

        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_array_size);
        engine.set_max_map_size(self.limits.max_map_size);
        engine.set_max_expr_depths(self.limits.max_expr_depth, self.limits.max_expr_depth);

        engine.on_print(|msg| {
            tracing::info!(target: "script", "{}", msg);
        });
        engine.on_debug(|msg, _source, pos| {
            tracing::debug!(target: "script", position = %pos, "{}", msg);
        });

        modules::register(&mut engine);
        facade::register(&mut engine);

        engine
    }

    /// Pre-scan and compile a script without running it.
    pub fn check(&self, source: &str) -> Result<(), ScriptError> {
        self.compile(&self.create_engine(), source).map(|_| ())
    }

    fn compile(&self, engine: &Engine, source: &str) -> Result<AST, ScriptError> {
        scan::scan(source)?;
        engine
            .compile(source)
            .map_err(|e| ScriptError::Syntax(e.to_string()))
    }

    fn run(&self, source: &str, mut scope: Scope<'static>) -> Result<Dynamic, ScriptError> {
        let engine = self.create_engine();
        let ast = self.compile(&engine, source)?;

        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        Ok(scope.get_value::<Dynamic>("result").unwrap_or(Dynamic::UNIT))
    }

    /// Run a script step. The script sees `context`, `field_values` and
    /// `result`; the final value of `result` is returned.
    pub fn run_script(&self, source: &str, context: ContextFacade) -> Result<Value, ScriptError> {
        let mut scope = Scope::new();
        scope.push_dynamic("field_values", values_to_dynamic(&context.values()));
        scope.push("context", context);
        scope.push_dynamic("result", Dynamic::UNIT);

        let result = self.run(source, scope)?;
        Ok(dynamic_to_json(&result))
    }

    /// Run a custom parameter builder, which must leave a string in `result`.
    pub fn run_builder(&self, source: &str, values: &Values) -> Result<String, EncodingError> {
        let mut scope = Scope::new();
        scope.push_dynamic("field_values", values_to_dynamic(values));
        scope.push("result", String::new());

        let result = self.run(source, scope).map_err(|e| match e {
            ScriptError::Runtime(msg) => EncodingError::CustomBuilder(msg),
            other => EncodingError::Sandbox(other.to_string()),
        })?;

        if result.is_unit() {
            return Ok(String::new());
        }
        if result.is_string() {
            return Ok(result.to_string());
        }
        Err(EncodingError::CustomBuilder(format!(
            "result must be a string, got {}",
            result.type_name()
        )))
    }
}

fn values_to_dynamic(values: &Values) -> Dynamic {
    let object = Value::Object(
        values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    json_to_dynamic(&object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_builder_assigns_result() {
        let sandbox = ScriptSandbox::default();
        let v = values(&[("aid", json!("A000000151")), ("priv", json!(4))]);
        let out = sandbox
            .run_builder(
                r#"result = "C9" + pack::u8(hex_len(field_values.aid)) + field_values.aid;"#,
                &v,
            )
            .unwrap();
        assert_eq!(out, "C905A000000151");
    }

    #[test]
    fn test_builder_result_defaults_to_empty() {
        let sandbox = ScriptSandbox::default();
        assert_eq!(sandbox.run_builder("let x = 1;", &Values::new()).unwrap(), "");
    }

    #[test]
    fn test_builder_non_string_result() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox.run_builder("result = 42;", &Values::new()).unwrap_err();
        assert!(matches!(err, EncodingError::CustomBuilder(_)));
    }

    #[test]
    fn test_builder_blocked_name() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox
            .run_builder(r#"result = eval("1");"#, &Values::new())
            .unwrap_err();
        assert!(matches!(err, EncodingError::Sandbox(_)));
        assert!(err.to_string().contains("eval"));
    }

    #[test]
    fn test_builder_runtime_error() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox
            .run_builder(r#"throw "bad input";"#, &Values::new())
            .unwrap_err();
        assert!(matches!(err, EncodingError::CustomBuilder(_)));
    }

    #[test]
    fn test_syntax_error() {
        let sandbox = ScriptSandbox::default();
        let err = sandbox.check("let x = ;").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
        assert!(err.to_string().starts_with("Syntax error:"));
    }

    #[test]
    fn test_operation_limit() {
        let sandbox = ScriptSandbox::new(SandboxLimits {
            max_operations: 1_000,
            ..SandboxLimits::default()
        });
        let err = sandbox
            .run_builder("let i = 0; loop { i += 1; }", &Values::new())
            .unwrap_err();
        assert!(matches!(err, EncodingError::CustomBuilder(_)));
    }

    #[tokio::test]
    async fn test_run_script_with_context() {
        let mut ctx = WorkflowContext::new();
        ctx.set("pin", json!("1234"));
        ctx.set_step_result("select", json!({"sw": "9000"}));

        let facade = ContextFacade::from_context(&mut ctx).unwrap();
        let sandbox = ScriptSandbox::default();
        let out = sandbox
            .run_script(
                r#"
                let sw = context.get_step_result("select").sw;
                context.set("pin_hex", ascii_hex(context.get("pin")));
                context.report_progress("halfway");
                let note = context.create_temp_file("note.txt", "hi");
                result = #{ sw: sw, pin: field_values.pin, missing: context.get("nope", "dflt") };
                "#,
                facade.clone(),
            )
            .unwrap();

        assert_eq!(out, json!({"sw": "9000", "pin": "1234", "missing": "dflt"}));
        facade.apply_to(&mut ctx);
        assert_eq!(ctx.get("pin_hex"), Some(&json!("31323334")));
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_script_cannot_import_outside_allow_list() {
        let mut ctx = WorkflowContext::new();
        let facade = ContextFacade::from_context(&mut ctx).unwrap();
        let err = ScriptSandbox::default()
            .run_script(r#"import "os" as os;"#, facade)
            .unwrap_err();
        assert_eq!(err, ScriptError::ImportNotAllowed("os".to_string()));
        ctx.cleanup().await;
    }
}
