use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::trigger::Trigger;

/// Unit archetypes. Each archetype has its own allow-list of actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    /// Fast, fragile reconnaissance unit.
    Scout,
    /// Armoured front-line unit.
    Tank,
    /// Long-range marksman.
    Sniper,
    /// Support unit that heals.
    Medic,
    /// Support unit that repairs.
    Engineer,
}

impl Archetype {
    /// Every archetype.
    pub const ALL: [Archetype; 5] = [
        Archetype::Scout,
        Archetype::Tank,
        Archetype::Sniper,
        Archetype::Medic,
        Archetype::Engineer,
    ];

    /// Name used in prompts and configuration.
    pub fn name(self) -> &'static str {
        match self {
            Archetype::Scout => "scout",
            Archetype::Tank => "tank",
            Archetype::Sniper => "sniper",
            Archetype::Medic => "medic",
            Archetype::Engineer => "engineer",
        }
    }

    /// Whether units of this archetype may perform `kind`.
    pub fn allows(self, kind: ActionKind) -> bool {
        kind.exclusive_to().is_none_or(|owner| owner == self)
    }

    /// Allow-list for this archetype, in declaration order.
    pub fn allowed_actions(self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|kind| self.allows(*kind))
            .collect()
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Archetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Archetype::ALL
            .into_iter()
            .find(|archetype| archetype.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown archetype: {s}"))
    }
}

/// Every action a unit can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Move to `position`.
    MoveTo,
    /// Attack `target_id`.
    Attack,
    /// Fall back to `position`, or away from the nearest enemy.
    Retreat,
    /// Patrol through `waypoints`.
    Patrol,
    /// Switch to `stance`.
    SetStance,
    /// Activate the named `ability`.
    UseAbility,
    /// Move to the unit `target_id`.
    Follow,
    /// Stop and hold the current position.
    HoldPosition,
    /// Scout only: turn invisible.
    Stealth,
    /// Tank only: raise the shield.
    ActivateShield,
    /// Sniper only: cover an area.
    Overwatch,
    /// Medic only: heal.
    Heal,
    /// Engineer only: repair.
    Repair,
}

impl ActionKind {
    /// Every action kind, in declaration order.
    pub const ALL: [ActionKind; 13] = [
        ActionKind::MoveTo,
        ActionKind::Attack,
        ActionKind::Retreat,
        ActionKind::Patrol,
        ActionKind::SetStance,
        ActionKind::UseAbility,
        ActionKind::Follow,
        ActionKind::HoldPosition,
        ActionKind::Stealth,
        ActionKind::ActivateShield,
        ActionKind::Overwatch,
        ActionKind::Heal,
        ActionKind::Repair,
    ];

    /// Wire name of the action.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::MoveTo => "move_to",
            ActionKind::Attack => "attack",
            ActionKind::Retreat => "retreat",
            ActionKind::Patrol => "patrol",
            ActionKind::SetStance => "set_stance",
            ActionKind::UseAbility => "use_ability",
            ActionKind::Follow => "follow",
            ActionKind::HoldPosition => "hold_position",
            ActionKind::Stealth => "stealth",
            ActionKind::ActivateShield => "activate_shield",
            ActionKind::Overwatch => "overwatch",
            ActionKind::Heal => "heal",
            ActionKind::Repair => "repair",
        }
    }

    /// The only archetype allowed to use this action, if it is restricted.
    pub fn exclusive_to(self) -> Option<Archetype> {
        match self {
            ActionKind::Stealth => Some(Archetype::Scout),
            ActionKind::ActivateShield => Some(Archetype::Tank),
            ActionKind::Overwatch => Some(Archetype::Sniper),
            ActionKind::Heal => Some(Archetype::Medic),
            ActionKind::Repair => Some(Archetype::Engineer),
            ActionKind::MoveTo
            | ActionKind::Attack
            | ActionKind::Retreat
            | ActionKind::Patrol
            | ActionKind::SetStance
            | ActionKind::UseAbility
            | ActionKind::Follow
            | ActionKind::HoldPosition => None,
        }
    }

    /// One-line description used in the generator prompt.
    pub fn description(self) -> &'static str {
        match self {
            ActionKind::MoveTo => "move to params.position",
            ActionKind::Attack => "attack the unit params.target_id",
            ActionKind::Retreat => {
                "fall back to params.position, or away from the nearest enemy when null"
            }
            ActionKind::Patrol => "patrol through params.waypoints",
            ActionKind::SetStance => "set params.stance (aggressive, defensive, hold_fire, hold)",
            ActionKind::UseAbility => "use the ability named params.ability",
            ActionKind::Follow => "move to the unit params.target_id",
            ActionKind::HoldPosition => "stop and hold the current position",
            ActionKind::Stealth => "become invisible for a short time",
            ActionKind::ActivateShield => "raise a damage-absorbing shield",
            ActionKind::Overwatch => "cover the area ahead and fire on anything entering it",
            ActionKind::Heal => "restore health",
            ActionKind::Repair => "repair armour",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or(())
    }
}

/// One validated unit of work: a plan step or a direct command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Action to perform.
    #[serde(rename = "action")]
    pub kind: ActionKind,
    /// Action parameters, interpreted by the dispatch handler.
    pub params: Map<String, Value>,
    /// Gate for plan steps; always-true for direct commands.
    pub trigger: Trigger,
    /// Line the unit says when the action starts; may be empty.
    pub speech: String,
    /// How long the step keeps the unit busy; 0 completes on the next tick.
    pub duration_ms: u64,
}

impl ActionDescriptor {
    /// Unconditional, instantaneous descriptor with no speech.
    pub fn new(kind: ActionKind, params: Map<String, Value>) -> Self {
        Self {
            kind,
            params,
            trigger: Trigger::always(),
            speech: String::new(),
            duration_ms: 0,
        }
    }
}
