//! Card transport and the persistent card session.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::StepError;

/// Minimal surface of a card reader driver.
#[async_trait]
pub trait CardTransport: Send + Sync {
    /// Connect to `target`. A transport that selects applications natively
    /// selects `aid` as part of connecting.
    async fn connect(&self, target: &str, aid: Option<&[u8]>) -> bool;

    /// Exchange one APDU. `None` means no response was received.
    async fn transmit(&self, apdu: &[u8]) -> Option<Vec<u8>>;

    async fn disconnect(&self);
}

/// A response APDU split into payload and status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response. Returns `None` for responses shorter than 2 bytes.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Some(Self {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    /// Status word as four uppercase hex digits.
    pub fn sw(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }

    pub fn data_hex(&self) -> String {
        hex::encode_upper(&self.data)
    }

    /// 9000, or 61xx (more data available).
    pub fn is_success(&self) -> bool {
        (self.sw1 == 0x90 && self.sw2 == 0x00) || self.sw1 == 0x61
    }
}

/// SELECT-by-name command for an application identifier.
///
/// Lc is a single byte, so the AID must fit in 255 bytes.
pub fn select_command(aid: &[u8]) -> Result<Vec<u8>, StepError> {
    let lc = u8::try_from(aid.len()).map_err(|_| {
        StepError::Configuration(format!("AID too long for SELECT: {} bytes", aid.len()))
    })?;
    let mut apdu = vec![0x00, 0xA4, 0x04, 0x00, lc];
    apdu.extend_from_slice(aid);
    Ok(apdu)
}

/// A connection that stays open for the rest of a run, so security state
/// established by earlier commands is kept.
pub struct CardSession {
    transport: Arc<dyn CardTransport>,
    target: String,
    selected: Option<Vec<u8>>,
    open: bool,
}

impl CardSession {
    /// Connect to `target`, optionally selecting an application.
    pub async fn open(
        transport: Arc<dyn CardTransport>,
        target: &str,
        aid: Option<Vec<u8>>,
    ) -> Result<Self, StepError> {
        tracing::debug!(reader = %target, aid = ?aid.as_ref().map(hex::encode_upper), "Opening card session");

        if !transport.connect(target, aid.as_deref()).await {
            return Err(StepError::Transport(format!(
                "Failed to connect to card on '{}'",
                target
            )));
        }

        Ok(Self {
            transport,
            target: target.to_string(),
            selected: aid,
            open: true,
        })
    }

    /// Select an application on the open connection.
    pub async fn select(&mut self, aid: &[u8]) -> Result<(), StepError> {
        let command = select_command(aid)?;
        let raw = self
            .transmit(&command)
            .await
            .ok_or_else(|| StepError::Transport("No response to SELECT".to_string()))?;
        let response = ApduResponse::parse(&raw)
            .ok_or_else(|| StepError::Transport("Invalid response to SELECT".to_string()))?;

        if !response.is_success() {
            return Err(StepError::Transport(format!(
                "SELECT {} failed with status {}",
                hex::encode_upper(aid),
                response.sw()
            )));
        }
        self.selected = Some(aid.to_vec());
        Ok(())
    }

    /// Exchange one APDU over the session.
    pub async fn transmit(&self, apdu: &[u8]) -> Option<Vec<u8>> {
        if !self.open {
            return None;
        }
        self.transport.transmit(apdu).await
    }

    /// Disconnect. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.selected = None;
            self.transport.disconnect().await;
            tracing::debug!(reader = %self.target, "Card session closed");
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn selected_aid(&self) -> Option<&[u8]> {
        self.selected.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl fmt::Debug for CardSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardSession")
            .field("target", &self.target)
            .field("selected", &self.selected.as_ref().map(hex::encode_upper))
            .field("open", &self.open)
            .finish()
    }
}
