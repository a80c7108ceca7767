//! Handler that logs each processed result. Useful for demos and as a
//! template for real handlers.

use async_trait::async_trait;
use tracing::info;

use crate::check::{Check, CheckResult, Handler, Incident};
use crate::error::Result;

pub struct DummyHandler;

#[async_trait]
impl Handler for DummyHandler {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn process(
        &self,
        check: &Check,
        result: &CheckResult,
        new_incident: Option<&Incident>,
    ) -> Result<()> {
        info!(
            check_id = %check.id(),
            state = %result.state,
            reason = %result.reason_code,
            metrics = result.metrics.len(),
            new_incident = new_incident.is_some(),
            "processed check result"
        );
        Ok(())
    }
}
