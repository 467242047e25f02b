//! Drift detection and refresh

use super::Engine;
use crate::error::{Error, Result};
use crate::state::{ResourceRecord, StackState};
use crate::types::ResourceStatus;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;

/// One attribute whose live value differs from the recorded one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDrift {
    pub attribute: String,
    pub expected: Value,
    /// `None` when the provider no longer reports the attribute
    pub actual: Option<Value>,
}

/// How a resource compares with what was recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DriftStatus {
    InSync,
    Modified(Vec<AttributeDrift>),
    /// The physical resource no longer exists
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDrift {
    pub logical_name: String,
    pub resource_type: String,
    pub external_id: String,
    pub status: DriftStatus,
}

impl ResourceDrift {
    pub fn is_drifted(&self) -> bool {
        self.status != DriftStatus::InSync
    }
}

/// Read every recorded resource, `jobs` at a time
pub(super) fn detect(engine: &Engine<'_>, state: &StackState) -> Result<Vec<ResourceDrift>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(engine.options.jobs.max(1))
        .build()
        .map_err(|e| Error::State(format!("failed to create worker pool: {e}")))?;

    let records: Vec<&ResourceRecord> = state.resources.values().collect();
    pool.install(|| {
        records
            .par_iter()
            .map(|record| check(engine, record))
            .collect::<Result<Vec<_>>>()
    })
}

fn check(engine: &Engine<'_>, record: &ResourceRecord) -> Result<ResourceDrift> {
    let invoker = engine.invoker(&record.logical_name, &record.resource_type, true)?;
    let status = match invoker.read(&record.external_id)? {
        None => DriftStatus::Deleted,
        Some(live) => {
            let changed: Vec<AttributeDrift> = record
                .attributes
                .iter()
                .filter(|(key, expected)| live.get(key.as_str()) != Some(*expected))
                .map(|(key, expected)| AttributeDrift {
                    attribute: key.clone(),
                    expected: expected.clone(),
                    actual: live.get(key).cloned(),
                })
                .collect();
            if changed.is_empty() {
                DriftStatus::InSync
            } else {
                DriftStatus::Modified(changed)
            }
        }
    };
    if status != DriftStatus::InSync {
        log::info!("{} has drifted: {:?}", record.logical_name, status);
    }
    Ok(ResourceDrift {
        logical_name: record.logical_name.clone(),
        resource_type: record.resource_type.clone(),
        external_id: record.external_id.clone(),
        status,
    })
}

pub(super) fn refresh(engine: &Engine<'_>, state: &mut StackState) -> Result<Vec<String>> {
    let gone: Vec<(String, String)> = detect(engine, state)?
        .into_iter()
        .filter(|d| d.status == DriftStatus::Deleted)
        .map(|d| (d.logical_name, d.resource_type))
        .collect();

    for (name, resource_type) in &gone {
        state.forget(name);
        engine.emit_resource(
            name,
            resource_type,
            ResourceStatus::Deleted,
            Some("no longer exists".to_string()),
        );
    }
    if !gone.is_empty() {
        engine.save(state)?;
    }
    Ok(gone.into_iter().map(|(name, _)| name).collect())
}
