use std::fmt::Write as _;

use super::generator::GeneratorRequest;
use crate::schema::{ActionKind, Archetype, OutputSchema, SchemaVariant};
use crate::trigger::Variable;
use crate::world::{UnitId, UnitSnapshot, WorldSnapshot};

const ROLE: &str = "You are the tactical command interpreter for a squad of units in a \
                    real-time game. Turn the player's order into actions for the selected units \
                    and reply with JSON only.";

/// Build the generator request for `text` addressed to `selected`.
pub fn build_request(
    text: &str,
    selected: &[UnitSnapshot],
    snapshot: &WorldSnapshot,
    schema: &OutputSchema,
    max_steps: usize,
) -> GeneratorRequest {
    GeneratorRequest {
        system_prompt: system_prompt(selected, schema, max_steps),
        user_prompt: user_prompt(text, selected, snapshot),
        schema_name: schema.name.clone(),
        json_schema: schema.schema.clone(),
    }
}

fn system_prompt(selected: &[UnitSnapshot], schema: &OutputSchema, max_steps: usize) -> String {
    let mut prompt = String::from(ROLE);
    prompt.push_str("\n\nReply shapes:\n");
    prompt.push_str(
        "- \"commands\": one immediate action per entry, when the order needs no conditions or \
         sequencing.\n",
    );
    let _ = writeln!(
        prompt,
        "- \"plans\": ordered steps (at most {max_steps}), each gated by a trigger, when the \
         order is conditional or has several phases."
    );
    prompt.push_str("- \"error\": a short reason when the order cannot be carried out.\n");
    prompt.push_str(
        "Set unused reply fields to null and always include a short \"message\" for the player.\n",
    );

    match schema.variant {
        SchemaVariant::Group => prompt.push_str(
            "\nSeveral unit types are selected. Every command and plan must name its unit_id, \
             and each unit may only use actions allowed for its type.\n",
        ),
        SchemaVariant::Individual => prompt.push_str(
            "\nThe selected units share one type. Commands and the single plan apply to every \
             selected unit.\n",
        ),
    }

    prompt.push_str("\nActions:\n");
    for kind in &schema.actions {
        let _ = writeln!(prompt, "- {}: {}", kind.name(), kind.description());
    }

    prompt.push_str("\nAllowed actions by unit type:\n");
    let mut archetypes: Vec<Archetype> = selected.iter().map(|unit| unit.archetype).collect();
    archetypes.sort();
    archetypes.dedup();
    for archetype in archetypes {
        let names: Vec<&str> = archetype
            .allowed_actions()
            .into_iter()
            .map(ActionKind::name)
            .collect();
        let _ = writeln!(prompt, "- {archetype}: {}", names.join(", "));
    }

    let vars: Vec<&str> = Variable::ALL.iter().map(|var| var.name()).collect();
    let _ = write!(
        prompt,
        "\nTriggers: leave empty to run a step as soon as the previous one finishes. Otherwise \
         write clauses `variable operator number` joined by AND or OR, evaluated strictly left \
         to right. Operators: < > <= >= == !=. Variables: {}. health_pct is 0-100, distances \
         are in world units, time is seconds since the plan started.\n",
        vars.join(", ")
    );
    prompt.push_str(
        "duration_ms is how long a step keeps the unit busy; use 0 for instantaneous actions.\n",
    );
    prompt
}

fn user_prompt(text: &str, selected: &[UnitSnapshot], snapshot: &WorldSnapshot) -> String {
    let mut prompt = format!("Order: {}\n\nSelected units:\n", text.trim());
    for unit in selected {
        describe(&mut prompt, unit);
    }

    let selected_ids: Vec<UnitId> = selected.iter().map(|unit| unit.id).collect();
    let teams: Vec<_> = selected.iter().map(|unit| unit.team).collect();
    let (friendly, hostile): (Vec<&UnitSnapshot>, Vec<&UnitSnapshot>) = snapshot
        .units
        .iter()
        .filter(|unit| !selected_ids.contains(&unit.id))
        .partition(|unit| teams.contains(&unit.team));

    if !friendly.is_empty() {
        prompt.push_str("\nOther friendly units:\n");
        for unit in friendly {
            describe(&mut prompt, unit);
        }
    }
    if !hostile.is_empty() {
        prompt.push_str("\nEnemy units:\n");
        for unit in hostile {
            describe(&mut prompt, unit);
        }
    }
    prompt
}

fn describe(prompt: &mut String, unit: &UnitSnapshot) {
    let _ = writeln!(
        prompt,
        "- unit {} ({}): health {:.0}%, position {}",
        unit.id, unit.archetype, unit.health_pct, unit.position
    );
}
