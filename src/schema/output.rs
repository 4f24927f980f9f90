//! Structured-output schemas sent to the generator
//!
//! The generator is asked for strict JSON: every property is required and no
//! extra properties are allowed, so optional values are expressed as
//! nullable types. The action enum only lists actions the addressed
//! archetypes can perform. Schemas are named after a blake3 fingerprint of
//! their content so a changed schema is never mistaken for an old one.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::fmt;

use super::action::{ActionKind, Archetype};

/// Which response shape the generator is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// Several archetypes addressed; every entry names its `unit_id`.
    Group,
    /// One archetype addressed; entries apply to every selected unit.
    Individual,
}

impl SchemaVariant {
    /// `Group` when `archetypes` spans more than one archetype.
    pub fn for_archetypes(archetypes: &[Archetype]) -> Self {
        let distinct: BTreeSet<_> = archetypes.iter().collect();
        if distinct.len() > 1 {
            SchemaVariant::Group
        } else {
            SchemaVariant::Individual
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            SchemaVariant::Group => "group",
            SchemaVariant::Individual => "individual",
        }
    }
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A generated schema together with its stable name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    /// `orderly_<variant>_<fingerprint>`.
    pub name: String,
    /// Response shape.
    pub variant: SchemaVariant,
    /// Actions offered in the enum, sorted.
    pub actions: Vec<ActionKind>,
    /// JSON Schema document.
    pub schema: Value,
}

impl OutputSchema {
    /// Build the schema for `variant`, offering every action at least one
    /// of `archetypes` may perform.
    pub fn build(variant: SchemaVariant, archetypes: &[Archetype]) -> Self {
        let actions: BTreeSet<ActionKind> = archetypes
            .iter()
            .flat_map(|archetype| archetype.allowed_actions())
            .collect();
        let actions: Vec<ActionKind> = actions.into_iter().collect();
        let schema = root_schema(variant, &actions);
        let name = format!("orderly_{}_{}", variant.name(), fingerprint(&schema));

        Self {
            name,
            variant,
            actions,
            schema,
        }
    }
}

/// First 12 hex digits of the blake3 hash of the canonical schema JSON.
fn fingerprint(schema: &Value) -> String {
    let mut hasher = Hasher::new();
    hasher.update(schema.to_string().as_bytes());
    hasher.finalize().to_hex()[..12].to_string()
}

fn root_schema(variant: SchemaVariant, actions: &[ActionKind]) -> Value {
    let action_enum: Vec<&str> = actions.iter().map(|kind| kind.name()).collect();
    let group = variant == SchemaVariant::Group;

    let command = strict_object(
        group,
        [
            ("action", json!({"type": "string", "enum": action_enum})),
            ("params", params_schema()),
            ("speech", json!({"type": "string"})),
        ],
    );
    let step = strict_object(
        false,
        [
            ("action", json!({"type": "string", "enum": action_enum})),
            ("params", params_schema()),
            ("trigger", json!({
                "type": "string",
                "description": "Empty, or clauses `var op number` joined by AND/OR, evaluated \
                                left to right. Variables: health_pct, enemy_dist, ally_dist, time, \
                                enemy_count, ally_count."
            })),
            ("speech", json!({"type": "string"})),
            ("duration_ms", json!({"type": "integer", "minimum": 0})),
        ],
    );
    let plan = strict_object(group, [("steps", json!({"type": "array", "items": step}))]);

    json!({
        "type": "object",
        "properties": {
            "commands": {"type": ["array", "null"], "items": command},
            "plans": {"type": ["array", "null"], "items": plan},
            "message": {"type": "string"},
            "error": {"type": ["string", "null"]}
        },
        "required": ["commands", "plans", "message", "error"],
        "additionalProperties": false
    })
}

fn params_schema() -> Value {
    let point = json!({
        "type": "object",
        "properties": {"x": {"type": "number"}, "y": {"type": "number"}},
        "required": ["x", "y"],
        "additionalProperties": false
    });
    let mut nullable_point = point.clone();
    nullable_point["type"] = json!(["object", "null"]);

    json!({
        "type": "object",
        "properties": {
            "position": nullable_point,
            "target_id": {"type": ["integer", "null"]},
            "waypoints": {"type": ["array", "null"], "items": point},
            "stance": {"type": ["string", "null"]},
            "ability": {"type": ["string", "null"]}
        },
        "required": ["position", "target_id", "waypoints", "stance", "ability"],
        "additionalProperties": false
    })
}

/// Object schema requiring every listed property, plus `unit_id` when
/// `with_unit` is set.
fn strict_object<const N: usize>(with_unit: bool, fields: [(&str, Value); N]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    if with_unit {
        properties.insert("unit_id".into(), json!({"type": "integer"}));
        required.push("unit_id".to_string());
    }
    for (name, schema) in fields {
        properties.insert(name.to_string(), schema);
        required.push(name.to_string());
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_follows_archetype_mix() {
        assert_eq!(
            SchemaVariant::for_archetypes(&[Archetype::Tank, Archetype::Tank]),
            SchemaVariant::Individual
        );
        assert_eq!(
            SchemaVariant::for_archetypes(&[Archetype::Tank, Archetype::Medic]),
            SchemaVariant::Group
        );
    }

    #[test]
    fn enum_lists_only_legal_actions() {
        let schema = OutputSchema::build(SchemaVariant::Individual, &[Archetype::Medic]);
        assert!(schema.actions.contains(&ActionKind::Heal));
        assert!(!schema.actions.contains(&ActionKind::Stealth));
        let steps = &schema.schema["properties"]["plans"]["items"]["properties"]["steps"];
        let step_enum = &steps["items"]["properties"]["action"]["enum"];
        assert!(step_enum.as_array().unwrap().contains(&json!("heal")));
    }

    #[test]
    fn every_property_is_required() {
        let schema =
            OutputSchema::build(SchemaVariant::Group, &[Archetype::Scout, Archetype::Tank]);
        let plan = &schema.schema["properties"]["plans"]["items"];
        let required = plan["required"].as_array().unwrap();
        assert!(required.contains(&json!("unit_id")));
        assert_eq!(required.len(), plan["properties"].as_object().unwrap().len());
    }

    #[test]
    fn names_are_stable_and_content_addressed() {
        let a = OutputSchema::build(SchemaVariant::Individual, &[Archetype::Scout]);
        let b = OutputSchema::build(SchemaVariant::Individual, &[Archetype::Scout]);
        let c = OutputSchema::build(SchemaVariant::Individual, &[Archetype::Sniper]);
        assert_eq!(a.name, b.name);
        assert_ne!(a.name, c.name);
        assert!(a.name.starts_with("orderly_individual_"));
    }
}
