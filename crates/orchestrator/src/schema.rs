//! Strict parsing of provider output.
//!
//! Single-shot phases either parse completely or fail the phase. Batch items
//! are parsed one at a time so a malformed item only costs that item.

use std::collections::{BTreeMap, HashSet};

use hookline_core::{AngleType, MarketingAngle, Phase};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::state_machine::PhaseOutput;

/// Ids and numbers arrive as either JSON strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnglesPayload {
    positive_angles: Vec<AnglePayload>,
    negative_angles: Vec<AnglePayload>,
}

#[derive(Debug, Deserialize)]
struct AnglePayload {
    number: Scalar,
    category: String,
    concept: String,
}

#[derive(Debug, Deserialize)]
struct HookSetPayload {
    #[serde(default)]
    angle_id: Option<String>,
    hooks_by_category: BTreeMap<String, Vec<HookPayload>>,
}

#[derive(Debug, Deserialize)]
struct HookPayload {
    hook_id: Scalar,
    hook_text: String,
}

#[derive(Debug, Deserialize)]
struct ScriptSetPayload {
    #[serde(default)]
    angle_id: Option<String>,
    hooks: Vec<HookScriptsPayload>,
}

#[derive(Debug, Deserialize)]
struct HookScriptsPayload {
    hook_id: Scalar,
    scripts: Vec<ScriptPayload>,
}

#[derive(Debug, Deserialize)]
struct ScriptPayload {
    script_id: Scalar,
    content: String,
    cta: String,
}

/// One hook as produced for an angle, before ids are made canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHook {
    pub raw_id: String,
    pub category: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScript {
    pub raw_id: String,
    pub content: String,
    pub cta: String,
}

/// Scripts for the hooks named in one result item, keyed by raw hook id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawScriptSet {
    pub angle_id: Option<String>,
    pub hooks: Vec<(String, Vec<RawScript>)>,
}

fn decode<T: serde::de::DeserializeOwned>(phase: &str, value: Value) -> Result<T> {
    if let Value::String(text) = &value {
        let preview: String = text.chars().take(80).collect();
        return Err(OrchestratorError::schema(
            phase,
            format!("response was not JSON: {:?}", preview),
        ));
    }
    serde_json::from_value(value).map_err(|e| OrchestratorError::schema(phase, e.to_string()))
}

fn non_empty(phase: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(OrchestratorError::schema(phase, format!("{} is empty", field)))
    } else {
        Ok(())
    }
}

/// Parse the output of a single-shot phase.
pub fn parse_phase_output(phase: Phase, value: Value) -> Result<PhaseOutput> {
    match phase {
        Phase::Avatar => Ok(PhaseOutput::Avatar(require_object(phase, value)?)),
        Phase::Journey => Ok(PhaseOutput::Journey(require_object(phase, value)?)),
        Phase::Objections => {
            let value = require_object(phase, value)?;
            let has_objections = value
                .get("objections")
                .and_then(Value::as_array)
                .is_some_and(|list| !list.is_empty());
            if !has_objections {
                return Err(OrchestratorError::schema(
                    phase,
                    "expected a non-empty `objections` array",
                ));
            }
            Ok(PhaseOutput::Objections(value))
        }
        Phase::Angles => parse_angles(value).map(PhaseOutput::Angles),
        Phase::Hooks | Phase::Scripts => Err(OrchestratorError::Validation(format!(
            "{} output arrives through a batch",
            phase
        ))),
    }
}

fn require_object(phase: Phase, value: Value) -> Result<Value> {
    match &value {
        Value::Object(map) if !map.is_empty() => Ok(value),
        Value::String(_) => decode::<Value>(phase.as_str(), value),
        _ => Err(OrchestratorError::schema(
            phase,
            "expected a non-empty JSON object",
        )),
    }
}

pub fn parse_angles(value: Value) -> Result<Vec<MarketingAngle>> {
    let phase = Phase::Angles.as_str();
    let payload: AnglesPayload = decode(phase, value)?;

    let mut angles = Vec::new();
    let groups = [
        (AngleType::Positive, payload.positive_angles),
        (AngleType::Negative, payload.negative_angles),
    ];
    for (angle_type, items) in groups {
        let mut seen = HashSet::new();
        for item in items {
            let raw = item.number.into_string();
            let number: u32 = raw.parse().map_err(|_| {
                OrchestratorError::schema(phase, format!("angle number {:?} is not a positive integer", raw))
            })?;
            non_empty(phase, "angle category", &item.category)?;
            non_empty(phase, "angle concept", &item.concept)?;
            if !seen.insert(number) {
                return Err(OrchestratorError::schema(
                    phase,
                    format!("duplicate {} angle number {}", angle_type.as_str(), number),
                ));
            }
            angles.push(MarketingAngle::new(
                angle_type,
                number,
                item.category.trim(),
                item.concept.trim(),
            ));
        }
    }

    if angles.is_empty() {
        return Err(OrchestratorError::schema(phase, "no angles produced"));
    }
    Ok(angles)
}

/// Parse one hooks result item for `angle_id`.
pub fn parse_hook_set(angle_id: &str, value: Value) -> Result<Vec<RawHook>> {
    let phase = Phase::Hooks.as_str();
    let payload: HookSetPayload = decode(phase, value)?;

    if let Some(claimed) = payload.angle_id.as_deref() {
        if claimed != angle_id {
            return Err(OrchestratorError::schema(
                phase,
                format!("result for {} names angle {}", angle_id, claimed),
            ));
        }
    }

    let mut hooks = Vec::new();
    for (category, items) in payload.hooks_by_category {
        non_empty(phase, "hook category", &category)?;
        for item in items {
            let raw_id = item.hook_id.into_string();
            non_empty(phase, "hook_id", &raw_id)?;
            non_empty(phase, "hook_text", &item.hook_text)?;
            hooks.push(RawHook {
                raw_id,
                category: category.trim().to_string(),
                text: item.hook_text.trim().to_string(),
            });
        }
    }

    if hooks.is_empty() {
        return Err(OrchestratorError::schema(phase, "no hooks produced"));
    }
    Ok(hooks)
}

/// Parse one scripts result item.
pub fn parse_script_set(value: Value) -> Result<RawScriptSet> {
    let phase = Phase::Scripts.as_str();
    let payload: ScriptSetPayload = decode(phase, value)?;

    let mut hooks = Vec::new();
    for entry in payload.hooks {
        let hook_id = entry.hook_id.into_string();
        non_empty(phase, "hook_id", &hook_id)?;

        let mut scripts = Vec::new();
        for item in entry.scripts {
            let raw_id = item.script_id.into_string();
            non_empty(phase, "script_id", &raw_id)?;
            non_empty(phase, "script content", &item.content)?;
            non_empty(phase, "cta", &item.cta)?;
            scripts.push(RawScript {
                raw_id,
                content: item.content.trim().to_string(),
                cta: item.cta.trim().to_string(),
            });
        }
        hooks.push((hook_id, scripts));
    }

    Ok(RawScriptSet {
        angle_id: payload.angle_id,
        hooks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_angles_parse_with_numeric_strings() {
        let angles = parse_angles(json!({
            "positive_angles": [{"number": "1", "category": "Speed", "concept": "Fast"}],
            "negative_angles": [{"number": 1, "category": "Waste", "concept": "Slow"}]
        }))
        .unwrap();

        assert_eq!(angles.len(), 2);
        assert_eq!(angles[0].id, "pos-1");
        assert_eq!(angles[1].id, "neg-1");
    }

    #[test]
    fn test_angles_reject_duplicates_and_gaps() {
        let dup = parse_angles(json!({
            "positive_angles": [
                {"number": 1, "category": "A", "concept": "x"},
                {"number": 1, "category": "B", "concept": "y"}
            ],
            "negative_angles": []
        }));
        assert!(matches!(dup, Err(OrchestratorError::Schema { .. })));

        let missing = parse_angles(json!({"positive_angles": []}));
        assert!(matches!(missing, Err(OrchestratorError::Schema { .. })));
    }

    #[test]
    fn test_plain_text_response_fails_closed() {
        let err = parse_phase_output(Phase::Avatar, Value::String("I cannot".into())).unwrap_err();
        assert!(err.to_string().contains("not JSON"));
    }

    #[test]
    fn test_objections_need_items() {
        assert!(parse_phase_output(Phase::Objections, json!({"objections": []})).is_err());
        assert!(parse_phase_output(Phase::Objections, json!({"objections": ["price"]})).is_ok());
    }

    #[test]
    fn test_hook_set_parses_categories() {
        let hooks = parse_hook_set(
            "pos-1",
            json!({
                "angle_id": "pos-1",
                "hooks_by_category": {
                    "Curiosity": [{"hook_id": "h1", "hook_text": "Ever wondered?"}],
                    "Urgency": [{"hook_id": 2, "hook_text": "Only today"}]
                }
            }),
        )
        .unwrap();

        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[1].raw_id, "2");
        assert_eq!(hooks[1].category, "Urgency");
    }

    #[test]
    fn test_hook_set_rejects_foreign_angle() {
        let err = parse_hook_set(
            "pos-1",
            json!({"angle_id": "neg-3", "hooks_by_category": {"A": [{"hook_id": "h1", "hook_text": "t"}]}}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("neg-3"));
    }

    #[test]
    fn test_script_set_requires_cta() {
        let err = parse_script_set(json!({
            "angle_id": "pos-1",
            "hooks": [{"hook_id": "h1", "scripts": [{"script_id": "s1", "content": "Body", "cta": " "}]}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("cta"));
    }
}
