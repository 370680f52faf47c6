//! Per-type response templates, gated by threat level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Priority;

/// A step of a response template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStep {
    /// Action name.
    pub action: String,
    pub priority: Priority,
    /// The step applies once the incident's threat level reaches this value.
    pub min_threat_level: f64,
    /// Roles expected to carry out the step.
    #[serde(default)]
    pub responders: Vec<String>,
    #[serde(default)]
    pub instructions: String,
}

impl ResponseStep {
    pub fn applies_to(&self, threat_level: f64) -> bool {
        self.min_threat_level <= threat_level
    }
}

fn step(
    action: &str,
    priority: Priority,
    min_threat_level: f64,
    responders: &[&str],
    instructions: &str,
) -> ResponseStep {
    ResponseStep {
        action: action.into(),
        priority,
        min_threat_level,
        responders: responders.iter().map(|r| r.to_string()).collect(),
        instructions: instructions.into(),
    }
}

/// Built-in templates, each ordered most severe first.
pub fn default_templates() -> BTreeMap<String, Vec<ResponseStep>> {
    let mut templates = BTreeMap::new();
    templates.insert(
        "weapon".to_string(),
        vec![
            step(
                "Immediate lockdown",
                Priority::Critical,
                0.8,
                &["security", "law_enforcement"],
                "Initiate facility lockdown and contact law enforcement",
            ),
            step(
                "Evacuate area",
                Priority::High,
                0.6,
                &["security"],
                "Clear immediate area and establish security perimeter",
            ),
        ],
    );
    templates.insert(
        "fire".to_string(),
        vec![
            step(
                "Fire response",
                Priority::Critical,
                0.7,
                &["fire_department", "security"],
                "Activate fire alarm and contact fire department",
            ),
            step(
                "Evacuation",
                Priority::High,
                0.5,
                &["security"],
                "Begin evacuation procedures",
            ),
        ],
    );
    templates.insert(
        "accident".to_string(),
        vec![step(
            "Emergency response",
            Priority::High,
            0.6,
            &["medical", "security"],
            "Contact emergency services and secure area",
        )],
    );
    templates
}

/// Steps of `template` whose gate is satisfied by `threat_level`, in template order.
pub fn plan_for(template: &[ResponseStep], threat_level: f64) -> Vec<ResponseStep> {
    template
        .iter()
        .filter(|s| s.applies_to(threat_level))
        .cloned()
        .collect()
}
