//! Operational statistics over both incident stores.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Incident, IncidentStatus};
use crate::anomaly::mean;
use crate::types::Priority;

/// How well responses are working, measured over archived incidents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEffectiveness {
    /// Mean minutes from creation to first response, over incidents with a response.
    pub mean_minutes_to_first_response: f64,
    /// Archived incidents that were resolved, as a fraction of all archived incidents.
    pub resolution_rate: f64,
    /// Archived incidents whose last response priority is more severe than the first.
    pub escalation_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentStatistics {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    /// Every priority is present, zero when unused.
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_type: BTreeMap<String, usize>,
    /// Mean hours from creation to resolution record, over archived incidents.
    pub average_resolution_hours: f64,
    pub response_effectiveness: ResponseEffectiveness,
}

pub(crate) fn compute<'a>(
    active: impl Iterator<Item = &'a Incident>,
    archived: &[Incident],
) -> IncidentStatistics {
    let mut by_priority: BTreeMap<Priority, usize> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();

    let active: Vec<&Incident> = active.collect();
    let active_count = active.len();
    for incident in active.into_iter().chain(archived) {
        *by_priority.entry(incident.priority).or_insert(0) += 1;
        *by_type.entry(incident.kind.clone()).or_insert(0) += 1;
    }

    let resolution_hours: Vec<f64> = archived
        .iter()
        .filter_map(|i| {
            let resolution = i.resolution.as_ref()?;
            Some((resolution.timestamp - i.created_at).num_milliseconds() as f64 / 3_600_000.0)
        })
        .collect();

    IncidentStatistics {
        total: active_count + archived.len(),
        active: active_count,
        archived: archived.len(),
        by_priority,
        by_type,
        average_resolution_hours: mean(&resolution_hours),
        response_effectiveness: effectiveness(archived),
    }
}

fn effectiveness(archived: &[Incident]) -> ResponseEffectiveness {
    if archived.is_empty() {
        return ResponseEffectiveness::default();
    }
    let total = archived.len() as f64;
    let first_response_minutes: Vec<f64> = archived
        .iter()
        .filter_map(|i| {
            let first = i.responses.first()?;
            Some((first.timestamp - i.created_at).num_milliseconds() as f64 / 60_000.0)
        })
        .collect();
    let resolved = archived
        .iter()
        .filter(|i| i.status == IncidentStatus::Resolved)
        .count();
    let escalated = archived.iter().filter(|i| i.escalated()).count();

    ResponseEffectiveness {
        mean_minutes_to_first_response: mean(&first_response_minutes),
        resolution_rate: resolved as f64 / total,
        escalation_rate: escalated as f64 / total,
    }
}
