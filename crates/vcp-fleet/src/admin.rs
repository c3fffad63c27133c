//! Views handed to the admin boundary (the external HTTP layer).
//!
//! The fleet manager's methods are the command API; these are the
//! serializable shapes its queries return.

use serde::Serialize;
use vcp_cp::ConnectorSnapshot;
use vcp_types::ChargerConfig;

/// One managed charger as the admin surface sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ChargerSummary {
    #[serde(rename = "cpId")]
    pub cp_id: String,
    pub config: ChargerConfig,
    pub connected: bool,
    pub connectors: Vec<ConnectorSnapshot>,
    #[serde(rename = "messagesSent")]
    pub messages_sent: u64,
    #[serde(rename = "messagesReceived")]
    pub messages_received: u64,
}

/// Aggregate result of a best-effort bulk operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub success: u32,
    pub failed: u32,
}

impl BulkOutcome {
    pub fn record(&mut self, ok: bool) {
        if ok {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }
}
