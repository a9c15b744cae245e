//! Parsing of worker replies into [`DispatchOutcome`].

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::core::types::DispatchOutcome;

const CONTINUATION_TAG: &str = "CONTINUATION";
const RESULT_TAG: &str = "RESULT";

/// A worker reply whose `type` tag is neither `CONTINUATION` nor `RESULT`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown outcome type: {kind:?}")]
pub struct UnknownOutcomeType {
    pub kind: String,
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

/// Parse a worker's JSON reply.
///
/// An unrecognised `type` yields an [`UnknownOutcomeType`] error that callers
/// can recover with `downcast_ref`.
pub fn parse_outcome(raw: &[u8]) -> Result<DispatchOutcome> {
    let tag: TypeTag = serde_json::from_slice(raw).context("parse worker reply type")?;
    match tag.kind.as_str() {
        CONTINUATION_TAG | RESULT_TAG => {
            serde_json::from_slice(raw).with_context(|| format!("parse {} reply", tag.kind))
        }
        _ => Err(UnknownOutcomeType { kind: tag.kind }.into()),
    }
}
