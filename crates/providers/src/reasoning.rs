//! Reasoning Control Mapper.
//!
//! Translates an abstract reasoning request into a typed patch against the
//! wire request: a dot-path, a value, and optional base parameters that must
//! be deep-merged to switch the feature on.

use chatforge_config::{BudgetControl, ChoiceControl, ReasoningCapability};
use chatforge_core::{ChatError, ReasoningEffort, ReasoningMode, ReasoningRequest};
use serde_json::{Map, Value};

const DEFAULT_ADAPTIVE_PATH: &str = "thinking.type";
const DEFAULT_EFFORT_PATH: &str = "reasoning.effort";
const DEFAULT_BUDGET_PATH: &str = "thinking.budget_tokens";

/// A parsed dot-notation path into a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, ChatError> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ChatError::invalid_request(format!(
                "invalid reasoning field path '{path}'"
            )));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Set `value` at this path, creating intermediate objects.
    ///
    /// Fails rather than clobbering when an intermediate segment already
    /// holds a non-object value.
    pub fn set(&self, target: &mut Value, value: Value) -> Result<(), ChatError> {
        let Some((last, parents)) = self.0.split_last() else {
            return Ok(());
        };

        let mut cursor = target;
        for segment in parents {
            let object = cursor.as_object_mut().ok_or_else(|| self.conflict(segment))?;
            cursor = object
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !cursor.is_object() {
                return Err(self.conflict(segment));
            }
        }

        let object = cursor.as_object_mut().ok_or_else(|| self.conflict(last))?;
        object.insert(last.clone(), value);
        Ok(())
    }

    fn conflict(&self, segment: &str) -> ChatError {
        ChatError::invalid_request(format!(
            "cannot set '{}': '{segment}' is not an object",
            self.0.join(".")
        ))
    }
}

/// Recursively merge `patch` into `target`. Objects merge key by key; any
/// other value overwrites.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(key) {
                        deep_merge(existing, value);
                    }
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// The resolved reasoning parameters for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningPatch {
    pub mode: ReasoningMode,
    pub path: FieldPath,
    pub value: Value,
    pub base_params: Option<Value>,
}

impl ReasoningPatch {
    /// Merge the base parameters, then set the control value.
    pub fn apply(&self, body: &mut Value) -> Result<(), ChatError> {
        if let Some(base) = &self.base_params {
            deep_merge(body, base);
        }
        self.path.set(body, self.value.clone())
    }
}

/// Pick the mode to use. Never returns a mode the model does not declare;
/// `None` only when the model declares none at all.
pub fn resolve_mode(
    capability: &ReasoningCapability,
    preferred: Option<ReasoningMode>,
) -> Option<ReasoningMode> {
    match preferred {
        Some(mode) if capability.supported_modes.contains(&mode) => Some(mode),
        _ => capability.supported_modes.first().copied(),
    }
}

fn preferred_mode(request: &ReasoningRequest) -> Option<ReasoningMode> {
    request.mode.or(match request.effort {
        Some(ReasoningEffort::Budget(_)) => Some(ReasoningMode::Budget),
        Some(ReasoningEffort::Level(_)) => Some(ReasoningMode::Effort),
        None => None,
    })
}

fn choice_value(control: &ChoiceControl, effort: Option<&ReasoningEffort>) -> Value {
    match effort {
        Some(ReasoningEffort::Level(level)) if control.options.iter().any(|o| o == level) => {
            Value::String(level.clone())
        }
        _ => Value::String(control.default.clone()),
    }
}

fn budget_value(control: &BudgetControl, effort: Option<&ReasoningEffort>) -> Value {
    let requested = match effort {
        Some(ReasoningEffort::Budget(n)) => *n,
        _ => control.default,
    };
    let mut budget = requested.max(control.min);
    if let Some(max) = control.max {
        budget = budget.min(max);
    }
    if let Some(step) = control.step.filter(|s| *s > 0) {
        budget = control.min + (budget.saturating_sub(control.min) / step) * step;
    }
    Value::from(budget)
}

fn patch(
    mode: ReasoningMode,
    mapping: Option<&str>,
    default_path: &str,
    value: Value,
    base_params: Option<Value>,
) -> Result<Option<ReasoningPatch>, ChatError> {
    Ok(Some(ReasoningPatch {
        mode,
        path: FieldPath::parse(mapping.unwrap_or(default_path))?,
        value,
        base_params,
    }))
}

/// Map a reasoning request onto a model's declared capability.
///
/// Returns `None` when reasoning is disabled, the model declares no modes, or
/// the resolved mode has no control block. The body is then left untouched.
pub fn map_reasoning(
    capability: &ReasoningCapability,
    request: &ReasoningRequest,
) -> Result<Option<ReasoningPatch>, ChatError> {
    if !request.enabled {
        return Ok(None);
    }
    let Some(mode) = resolve_mode(capability, preferred_mode(request)) else {
        return Ok(None);
    };
    let effort = request.effort.as_ref();

    match mode {
        ReasoningMode::Adaptive => match &capability.adaptive {
            Some(c) => patch(
                mode,
                c.mapping.as_deref(),
                DEFAULT_ADAPTIVE_PATH,
                choice_value(c, effort),
                c.base_params.clone(),
            ),
            None => Ok(None),
        },
        ReasoningMode::Effort => match &capability.effort {
            Some(c) => patch(
                mode,
                c.mapping.as_deref(),
                DEFAULT_EFFORT_PATH,
                choice_value(c, effort),
                c.base_params.clone(),
            ),
            None => Ok(None),
        },
        ReasoningMode::Budget => match &capability.budget {
            Some(c) => patch(
                mode,
                c.mapping.as_deref(),
                DEFAULT_BUDGET_PATH,
                budget_value(c, effort),
                c.base_params.clone(),
            ),
            None => Ok(None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capability(modes: Vec<ReasoningMode>) -> ReasoningCapability {
        ReasoningCapability {
            supported_modes: modes,
            adaptive: None,
            effort: Some(ChoiceControl {
                mapping: Some("reasoning_effort".into()),
                options: vec!["low".into(), "medium".into(), "high".into()],
                default: "medium".into(),
                base_params: None,
            }),
            budget: Some(BudgetControl {
                mapping: None,
                min: 1024,
                max: Some(8192),
                step: Some(512),
                default: 2048,
                base_params: Some(json!({"thinking": {"type": "enabled"}})),
            }),
        }
    }

    #[test]
    fn unsupported_mode_falls_back_to_first_declared() {
        let cap = capability(vec![ReasoningMode::Budget, ReasoningMode::Effort]);
        assert_eq!(
            resolve_mode(&cap, Some(ReasoningMode::Adaptive)),
            Some(ReasoningMode::Budget)
        );
        assert_eq!(
            resolve_mode(&cap, Some(ReasoningMode::Effort)),
            Some(ReasoningMode::Effort)
        );
        assert_eq!(resolve_mode(&cap, None), Some(ReasoningMode::Budget));
    }

    #[test]
    fn resolution_never_leaves_declared_set() {
        let all = [
            ReasoningMode::Adaptive,
            ReasoningMode::Effort,
            ReasoningMode::Budget,
        ];
        for declared in all {
            let cap = capability(vec![declared]);
            for requested in all {
                assert_eq!(resolve_mode(&cap, Some(requested)), Some(declared));
            }
        }
    }

    #[test]
    fn budget_patch_merges_base_params_and_clamps() {
        let cap = capability(vec![ReasoningMode::Budget]);
        let request = ReasoningRequest {
            enabled: true,
            effort: Some(ReasoningEffort::Budget(50_000)),
            mode: None,
        };
        let patch = map_reasoning(&cap, &request).unwrap().unwrap();
        let mut body = json!({"model": "claude", "thinking": {"extra": 1}});
        patch.apply(&mut body).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "claude",
                "thinking": {"extra": 1, "type": "enabled", "budget_tokens": 8192}
            })
        );
    }

    #[test]
    fn effort_uses_mapping_and_rejects_unknown_level() {
        let cap = capability(vec![ReasoningMode::Effort]);
        let request = ReasoningRequest {
            enabled: true,
            effort: Some(ReasoningEffort::Level("extreme".into())),
            mode: None,
        };
        let patch = map_reasoning(&cap, &request).unwrap().unwrap();
        let mut body = json!({});
        patch.apply(&mut body).unwrap();
        assert_eq!(body, json!({"reasoning_effort": "medium"}));
    }

    #[test]
    fn disabled_request_yields_no_patch() {
        let cap = capability(vec![ReasoningMode::Effort]);
        assert!(map_reasoning(&cap, &ReasoningRequest::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn set_path_refuses_to_clobber_scalars() {
        let path = FieldPath::parse("thinking.type").unwrap();
        let mut body = json!({"thinking": true});
        assert!(path.set(&mut body, json!("enabled")).is_err());
        assert!(FieldPath::parse("a..b").is_err());
    }

    #[test]
    fn deep_merge_overwrites_non_objects() {
        let mut target = json!({"a": {"b": 1, "c": [1]}, "d": 1});
        deep_merge(&mut target, &json!({"a": {"c": [2], "e": 3}, "d": {"x": 1}}));
        assert_eq!(target, json!({"a": {"b": 1, "c": [2], "e": 3}, "d": {"x": 1}}));
    }

    #[test]
    fn mode_without_control_leaves_body_untouched() {
        let mut cap = capability(vec![ReasoningMode::Adaptive, ReasoningMode::Budget]);
        cap.budget = None;
        let request = ReasoningRequest {
            enabled: true,
            effort: Some(ReasoningEffort::Budget(4096)),
            mode: None,
        };
        // Budget is declared but has no control block; adaptive has none either
        assert!(map_reasoning(&cap, &request).unwrap().is_none());
        let request = ReasoningRequest {
            mode: Some(ReasoningMode::Adaptive),
            ..request
        };
        assert!(map_reasoning(&cap, &request).unwrap().is_none());
    }

    #[test]
    fn inverted_budget_bounds_do_not_underflow() {
        let control = BudgetControl {
            mapping: None,
            min: 4096,
            max: Some(1024),
            step: Some(512),
            default: 2048,
            base_params: None,
        };
        let value = budget_value(&control, Some(&ReasoningEffort::Budget(3000)));
        assert_eq!(value, json!(4096));
    }
}
