//! APDU exchange step.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Step, StepMeta};
use crate::config::{default_failure_status_words, EngineConfig};
use crate::context::{WorkflowContext, INDETERMINATE};
use crate::encoding::value::strip_non_hex;
use crate::encoding::TemplateProcessor;
use crate::error::StepError;
use crate::result::StepResult;
use crate::services::{ApduResponse, CardSession, CARD_TRANSPORT};

/// Context variable holding the default reader name.
pub const READER_VAR: &str = "reader";

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// One status word, or a list of which the first is used.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExpectedSw {
    One(String),
    Many(Vec<String>),
}

impl ExpectedSw {
    fn first(&self) -> Option<&str> {
        match self {
            ExpectedSw::One(sw) => Some(sw),
            ExpectedSw::Many(list) => list.first().map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApduConfig {
    #[serde(default)]
    pub apdu: String,

    #[serde(default)]
    pub expected_sw: Option<ExpectedSw>,

    /// Reader to connect to; falls back to the `reader` variable.
    #[serde(default)]
    pub target: Option<String>,

    /// Application to select before the first exchange (hex template).
    #[serde(default)]
    pub select_aid: Option<String>,

    /// Overrides the engine's failure status words.
    #[serde(default)]
    pub failure_status_words: Option<Vec<String>>,
}

/// Sends one APDU over the workflow's card session.
#[derive(Debug, Clone)]
pub struct ApduStep {
    meta: StepMeta,
    apdu: String,
    expected_sw: Option<String>,
    target: Option<String>,
    select_aid: Option<String>,
    failure_status_words: Vec<String>,
}

fn is_well_formed(hex: &str) -> bool {
    hex.len() % 2 == 0 && hex.len() >= 8
}

impl ApduStep {
    pub fn new(meta: StepMeta, apdu: impl Into<String>) -> Self {
        Self {
            meta,
            apdu: apdu.into(),
            expected_sw: None,
            target: None,
            select_aid: None,
            failure_status_words: default_failure_status_words(),
        }
    }

    pub fn from_config(meta: StepMeta, config: ApduConfig, engine: &EngineConfig) -> Self {
        Self {
            meta,
            apdu: config.apdu,
            expected_sw: config
                .expected_sw
                .as_ref()
                .and_then(ExpectedSw::first)
                .map(str::to_string),
            target: config.target,
            select_aid: config.select_aid,
            failure_status_words: config
                .failure_status_words
                .unwrap_or_else(|| engine.apdu_failure_status_words.clone()),
        }
    }

    pub fn expect_sw(mut self, sw: impl Into<String>) -> Self {
        self.expected_sw = Some(sw.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_select_aid(mut self, aid: impl Into<String>) -> Self {
        self.select_aid = Some(aid.into());
        self
    }

    pub fn with_failure_status_words(mut self, words: Vec<String>) -> Self {
        self.failure_status_words = words;
        self
    }

    /// Classify a status word. Returns the failure message, if any.
    fn check_sw(&self, sw: &str) -> Option<String> {
        match &self.expected_sw {
            Some(expected) if sw != expected.to_uppercase() => Some(format!(
                "Unexpected status word: {} (expected {})",
                sw, expected
            )),
            Some(_) => None,
            None => self
                .failure_status_words
                .iter()
                .map(|w| strip_non_hex(w))
                .find(|w| !w.is_empty() && sw.starts_with(w.as_str()))
                .map(|_| format!("APDU failed with status word: {}", sw)),
        }
    }

    /// Make sure an open session exists with the wanted application selected.
    async fn ensure_session(
        &self,
        ctx: &mut WorkflowContext,
        aid: Option<Vec<u8>>,
    ) -> Result<(), StepError> {
        if let Some(session) = ctx.card_session_mut() {
            if let Some(aid) = aid {
                if session.selected_aid() != Some(aid.as_slice()) {
                    session.select(&aid).await?;
                }
            }
            return Ok(());
        }

        let transport = ctx
            .card_transport()
            .ok_or_else(|| StepError::MissingService(CARD_TRANSPORT.to_string()))?;
        let target = self
            .target
            .clone()
            .or_else(|| ctx.get_str(READER_VAR).map(str::to_string))
            .unwrap_or_default();

        let session = CardSession::open(transport, &target, aid).await?;
        ctx.set_card_session(session).await;
        Ok(())
    }

    async fn exchange(ctx: &WorkflowContext, apdu: &[u8]) -> Result<Option<Vec<u8>>, StepError> {
        let session = ctx
            .card_session()
            .ok_or_else(|| StepError::Transport("No open card session".to_string()))?;

        if let Some(response) = session.transmit(apdu).await {
            return Ok(Some(response));
        }
        tracing::warn!("No response from card, retrying once");
        tokio::time::sleep(RETRY_DELAY).await;
        Ok(session.transmit(apdu).await)
    }
}

#[async_trait]
impl Step for ApduStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }

    fn step_type(&self) -> &str {
        "apdu"
    }

    fn required_services(&self) -> Vec<&'static str> {
        vec![CARD_TRANSPORT]
    }

    fn validate(&self, _ctx: &WorkflowContext) -> Option<String> {
        if self.apdu.trim().is_empty() {
            return Some("No APDU specified".to_string());
        }
        if !TemplateProcessor::is_template(&self.apdu) {
            let cleaned = strip_non_hex(&self.apdu);
            if !cleaned.is_empty() && !is_well_formed(&cleaned) {
                return Some("APDU appears to be malformed".to_string());
            }
        }
        None
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, StepError> {
        ctx.report_progress(
            &self.meta.message_or(|name| format!("Sending APDU for {}...", name)),
            INDETERMINATE,
        );

        let values = ctx.get_all_variables();
        let cleaned = strip_non_hex(&TemplateProcessor::process(&self.apdu, &values));
        if !is_well_formed(&cleaned) {
            return Ok(StepResult::error(format!("Invalid APDU format: {}", cleaned)));
        }
        let command = hex::decode(&cleaned)
            .map_err(|e| StepError::Configuration(format!("Invalid APDU hex: {}", e)))?;

        let select = match &self.select_aid {
            Some(template) => {
                let aid = strip_non_hex(&TemplateProcessor::process(template, &values));
                Some(hex::decode(&aid).map_err(|e| {
                    StepError::Configuration(format!("Invalid AID to select '{}': {}", aid, e))
                })?)
            }
            None => None,
        };

        self.ensure_session(ctx, select).await?;

        let raw = match Self::exchange(ctx, &command).await? {
            Some(raw) => raw,
            None => return Ok(StepResult::error("No response from card")),
        };
        let response = match ApduResponse::parse(&raw) {
            Some(response) => response,
            None => return Ok(StepResult::error("Invalid response (too short)")),
        };

        let sw = response.sw();
        tracing::debug!(step_id = %self.meta.id, apdu = %cleaned, sw = %sw, "APDU exchanged");

        if let Some(message) = self.check_sw(&sw) {
            return Ok(StepResult::error(message));
        }

        let data = response.data_hex();
        let result = json!({
            "sw": sw,
            "data": data,
            "raw": hex::encode_upper(&raw),
        });

        let id = &self.meta.id;
        ctx.set(format!("{}_sw", id), Value::String(sw));
        ctx.set(format!("{}_data", id), Value::String(data));
        ctx.set(format!("{}_response", id), result.clone());

        Ok(StepResult::success(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::card::testing::FakeTransport;
    use std::sync::Arc;

    fn context_with(transport: Arc<FakeTransport>) -> WorkflowContext {
        let mut ctx = WorkflowContext::new();
        ctx.register_card_transport(transport);
        ctx.set(READER_VAR, json!("Reader 0"));
        ctx
    }

    #[tokio::test]
    async fn test_templated_apdu_and_stored_response() {
        let transport = Arc::new(FakeTransport::new().respond("CAFE9000"));
        let mut ctx = context_with(transport.clone());
        ctx.set("p1", json!("00"));

        let step = ApduStep::new(StepMeta::new("get_data"), "80 CA {p1} 66 00").expect_sw("9000");
        let result = step.execute(&mut ctx).await.unwrap();

        assert!(result.is_success());
        assert_eq!(
            result.data,
            Some(json!({"sw": "9000", "data": "CAFE", "raw": "CAFE9000"}))
        );
        assert_eq!(transport.sent_hex(), vec!["80CA006600"]);
        assert_eq!(ctx.get("get_data_sw"), Some(&json!("9000")));
        assert_eq!(ctx.get("get_data_data"), Some(&json!("CAFE")));
        assert_eq!(ctx.get("get_data_response"), Some(&json!({"sw": "9000", "data": "CAFE", "raw": "CAFE9000"})));
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let transport = Arc::new(FakeTransport::new());
        let mut ctx = context_with(transport.clone());

        let first = ApduStep::new(StepMeta::new("one"), "80CA9F7F00");
        let second = ApduStep::new(StepMeta::new("two"), "80CA006600");
        assert!(first.execute(&mut ctx).await.unwrap().is_success());
        assert!(second.execute(&mut ctx).await.unwrap().is_success());

        assert_eq!(transport.connects.lock().unwrap().len(), 1);
        assert_eq!(
            transport.connects.lock().unwrap()[0],
            ("Reader 0".to_string(), None)
        );

        ctx.cleanup().await;
        ctx.cleanup().await;
        assert_eq!(*transport.disconnects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_select_on_connect_and_reselect() {
        let transport = Arc::new(FakeTransport::new());
        let mut ctx = context_with(transport.clone());
        ctx.set("aid", json!("A000000151000000"));

        let first = ApduStep::new(StepMeta::new("one"), "80CA9F7F00").with_select_aid("{aid}");
        assert!(first.execute(&mut ctx).await.unwrap().is_success());
        assert_eq!(
            transport.connects.lock().unwrap()[0].1,
            Some(hex::decode("A000000151000000").unwrap())
        );
        assert_eq!(transport.sent_hex(), vec!["80CA9F7F00"]);

        // Same application: no second SELECT.
        let again = ApduStep::new(StepMeta::new("two"), "80CA006600").with_select_aid("{aid}");
        assert!(again.execute(&mut ctx).await.unwrap().is_success());
        assert_eq!(transport.sent_hex().len(), 2);

        let other = ApduStep::new(StepMeta::new("three"), "80CA006600").with_select_aid("A0000000030000");
        assert!(other.execute(&mut ctx).await.unwrap().is_success());
        assert_eq!(transport.sent_hex()[2], "00A4040007A0000000030000");
        assert_eq!(transport.connects.lock().unwrap().len(), 1);
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_unexpected_status_word() {
        let transport = Arc::new(FakeTransport::new().respond("6A88"));
        let mut ctx = context_with(transport);

        let step = ApduStep::new(StepMeta::new("x"), "00A4040000").expect_sw("9000");
        let result = step.execute(&mut ctx).await.unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("Unexpected status word: 6A88 (expected 9000)")
        );
        assert!(ctx.get("x_sw").is_none());
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_default_failure_heuristic() {
        let transport = Arc::new(FakeTransport::new().respond("6A82").respond("6A88").respond("6983"));
        let mut ctx = context_with(transport);

        let step = ApduStep::new(StepMeta::new("x"), "00A4040000");
        assert!(!step.execute(&mut ctx).await.unwrap().is_success());
        // Not in the list: accepted.
        assert!(step.execute(&mut ctx).await.unwrap().is_success());

        let prefixed = ApduStep::new(StepMeta::new("y"), "00A4040000")
            .with_failure_status_words(vec!["69".to_string()]);
        let result = prefixed.execute(&mut ctx).await.unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("APDU failed with status word: 6983")
        );
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_malformed_apdu_and_short_response() {
        let transport = Arc::new(FakeTransport::new().respond("90"));
        let mut ctx = context_with(transport.clone());

        let short = ApduStep::new(StepMeta::new("short"), "00A404");
        assert_eq!(
            short.execute(&mut ctx).await.unwrap().error.as_deref(),
            Some("Invalid APDU format: 00A404")
        );
        assert!(transport.sent_hex().is_empty());

        let step = ApduStep::new(StepMeta::new("x"), "00A4040000");
        assert_eq!(
            step.execute(&mut ctx).await.unwrap().error.as_deref(),
            Some("Invalid response (too short)")
        );
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_missing_response_is_retried_once() {
        let transport = Arc::new(FakeTransport::new().silent().respond("9000").silent().silent());
        let mut ctx = context_with(transport.clone());
        let step = ApduStep::new(StepMeta::new("x"), "00A4040000");

        assert!(step.execute(&mut ctx).await.unwrap().is_success());
        assert_eq!(
            step.execute(&mut ctx).await.unwrap().error.as_deref(),
            Some("No response from card")
        );
        assert_eq!(transport.sent_hex().len(), 4);
        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let transport = Arc::new(FakeTransport {
            connect_ok: false,
            ..FakeTransport::default()
        });
        let mut ctx = context_with(transport);
        let step = ApduStep::new(StepMeta::new("x"), "00A4040000");
        let err = step.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Transport(_)));
        ctx.cleanup().await;
    }

    #[test]
    fn test_validate() {
        let ctx = WorkflowContext::new();
        assert_eq!(
            ApduStep::new(StepMeta::new("x"), "").validate(&ctx).as_deref(),
            Some("No APDU specified")
        );
        assert_eq!(
            ApduStep::new(StepMeta::new("x"), "00A40").validate(&ctx).as_deref(),
            Some("APDU appears to be malformed")
        );
        assert!(ApduStep::new(StepMeta::new("x"), "00A40400{lc}{aid}")
            .validate(&ctx)
            .is_none());
    }

    #[test]
    fn test_config_takes_first_expected_sw() {
        let config: ApduConfig = serde_json::from_value(json!({
            "apdu": "00A4040000",
            "expected_sw": ["9000", "6310"],
        }))
        .unwrap();
        let step = ApduStep::from_config(StepMeta::new("x"), config, &EngineConfig::default());
        assert_eq!(step.expected_sw.as_deref(), Some("9000"));
        assert_eq!(step.failure_status_words, default_failure_status_words());
    }
}
