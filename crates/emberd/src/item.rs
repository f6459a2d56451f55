//! Items: area-owned prototypes and live instances.
//!
//! A prototype is the authored template; `ItemProto::load()` stamps out a
//! live instance owned by whatever holds it (a room, an inventory, or a
//! container item). Behavior hangs off optional facets on the instance:
//! an item can simultaneously be equippable, food, a container, furniture,
//! and a portal. Facets are plain optional fields queried explicitly, not
//! attribute probing.

use serde::{Deserialize, Serialize};

use crate::area::{ProtoRef, RoomRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Wield,
    Shield,
    Head,
    Body,
    Arms,
    Hands,
    Legs,
    Feet,
}

impl Slot {
    pub fn all() -> &'static [Slot] {
        &[
            Slot::Wield,
            Slot::Shield,
            Slot::Head,
            Slot::Body,
            Slot::Arms,
            Slot::Hands,
            Slot::Legs,
            Slot::Feet,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Wield => "wield",
            Slot::Shield => "shield",
            Slot::Head => "head",
            Slot::Body => "body",
            Slot::Arms => "arms",
            Slot::Hands => "hands",
            Slot::Legs => "legs",
            Slot::Feet => "feet",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "wield" | "weapon" | "mainhand" => Some(Slot::Wield),
            "shield" | "offhand" => Some(Slot::Shield),
            "head" | "helm" | "helmet" => Some(Slot::Head),
            "body" | "torso" | "chest" => Some(Slot::Body),
            "arms" | "sleeves" => Some(Slot::Arms),
            "hands" | "gloves" | "gauntlets" => Some(Slot::Hands),
            "legs" | "pants" => Some(Slot::Legs),
            "feet" | "boots" | "shoes" => Some(Slot::Feet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Frost,
    Venom,
}

impl DamageType {
    pub fn as_str(self) -> &'static str {
        match self {
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Frost => "frost",
            DamageType::Venom => "venom",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "slashing" | "slash" => Some(DamageType::Slashing),
            "piercing" | "pierce" => Some(DamageType::Piercing),
            "bludgeoning" | "blunt" => Some(DamageType::Bludgeoning),
            "fire" => Some(DamageType::Fire),
            "frost" | "cold" => Some(DamageType::Frost),
            "venom" | "poison" => Some(DamageType::Venom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DamageEntry {
    pub kind: DamageType,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Absorb {
    pub kind: DamageType,
    pub amount: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equippable {
    pub slot: Slot,
    #[serde(default)]
    pub hit: i32,
    #[serde(default)]
    pub evade: i32,
    #[serde(default)]
    pub damage: Vec<DamageEntry>,
    #[serde(default)]
    pub absorb: Vec<Absorb>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Food {
    pub heal: i32,
    #[serde(default)]
    pub mana: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Container {
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Furniture {
    pub seats: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portal {
    pub to: RoomRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equippable: Option<Equippable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food: Option<Food>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub furniture: Option<Furniture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal: Option<Portal>,
}

impl Facets {
    pub fn labels(&self) -> Vec<&'static str> {
        let mut v = Vec::new();
        if self.equippable.is_some() {
            v.push("equippable");
        }
        if self.food.is_some() {
            v.push("food");
        }
        if self.container.is_some() {
            v.push("container");
        }
        if self.furniture.is_some() {
            v.push("furniture");
        }
        if self.portal.is_some() {
            v.push("portal");
        }
        v
    }
}

/// Authored template, owned by an area's catalog.
#[derive(Debug, Clone)]
pub struct ItemProto {
    pub id: u32,
    pub area: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub desc: String,
    pub facets: Facets,
}

impl ItemProto {
    pub fn proto_ref(&self) -> ProtoRef {
        ProtoRef {
            area: self.area.clone(),
            id: self.id,
        }
    }

    /// Stamp out a live copy.
    pub fn load(&self) -> ItemInst {
        ItemInst {
            proto: self.proto_ref(),
            name: self.name.clone(),
            keywords: self.keywords.clone(),
            desc: self.desc.clone(),
            facets: self.facets.clone(),
            contents: Vec::new(),
        }
    }
}

/// A live, mutable copy placed in the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInst {
    pub proto: ProtoRef,
    pub name: String,
    pub keywords: Vec<String>,
    pub desc: String,
    pub facets: Facets,
    /// Only meaningful when the container facet is present.
    #[serde(default)]
    pub contents: Vec<ItemInst>,
}

impl ItemInst {
    pub fn matches_token(&self, token: &str) -> bool {
        matches_token(&self.name, &self.keywords, token)
    }

    /// Instances of `proto` here, including inside nested containers.
    pub fn count_proto(&self, proto: &ProtoRef) -> usize {
        let own = usize::from(&self.proto == proto);
        own + self
            .contents
            .iter()
            .map(|c| c.count_proto(proto))
            .sum::<usize>()
    }
}

pub fn matches_token(name: &str, keywords: &[String], token: &str) -> bool {
    let t = token.trim().to_ascii_lowercase();
    if t.is_empty() {
        return false;
    }
    if keywords.iter().any(|k| k.eq_ignore_ascii_case(&t)) {
        return true;
    }
    let name_lc = name.to_ascii_lowercase();
    name_lc == t || name_lc.split_whitespace().any(|w| w.starts_with(&t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sword_proto() -> ItemProto {
        ItemProto {
            id: 1,
            area: "haven".to_string(),
            name: "a rusty sword".to_string(),
            keywords: vec!["sword".to_string(), "rusty".to_string()],
            desc: "Pitted but serviceable.".to_string(),
            facets: Facets {
                equippable: Some(Equippable {
                    slot: Slot::Wield,
                    hit: 1,
                    evade: 0,
                    damage: vec![DamageEntry {
                        kind: DamageType::Slashing,
                        min: 3,
                        max: 5,
                    }],
                    absorb: Vec::new(),
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn load_copies_the_template() {
        let proto = sword_proto();
        let inst = proto.load();
        assert_eq!(inst.proto, proto.proto_ref());
        assert_eq!(inst.name, proto.name);
        assert!(inst.facets.equippable.is_some());
        assert!(inst.contents.is_empty());
    }

    #[test]
    fn token_matching_uses_keywords_and_name_words() {
        let inst = sword_proto().load();
        assert!(inst.matches_token("sword"));
        assert!(inst.matches_token("RUSTY"));
        assert!(inst.matches_token("rus"));
        assert!(!inst.matches_token("axe"));
        assert!(!inst.matches_token(""));
    }

    #[test]
    fn count_proto_sees_into_containers() {
        let proto = sword_proto();
        let mut sack = ItemInst {
            proto: ProtoRef {
                area: "haven".to_string(),
                id: 9,
            },
            name: "a sack".to_string(),
            keywords: vec!["sack".to_string()],
            desc: String::new(),
            facets: Facets {
                container: Some(Container { capacity: 10 }),
                ..Default::default()
            },
            contents: Vec::new(),
        };
        sack.contents.push(proto.load());
        assert_eq!(sack.count_proto(&proto.proto_ref()), 1);
        assert_eq!(
            sack.count_proto(&ProtoRef {
                area: "haven".to_string(),
                id: 9
            }),
            1
        );
    }
}
