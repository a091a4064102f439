//! Picks the most specific handle subtype for a live object.
//!
//! Rules are an explicit ordered table, grouped in tiers from most to least
//! specific. Within a tier the first declared rule wins. Classification is
//! total: anything no rule claims becomes a generic `Element`.

use std::fmt;

use serde::Deserialize;
use tracing::trace;

use crate::error::Error;
use crate::handle::ReferenceHandle;
use crate::host::{Feature, LiveObject};
use crate::link::LiveBinding;

/// Subtype name of the fallback.
const GENERIC: &str = "Element";

/// Name of the specialized handle kind that should represent an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleSubtype(
    /// Subtype name, e.g. `Wall` or `Element`.
    String,
);

impl HandleSubtype {
    /// Subtype with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        return Self(name.into());
    }

    /// The fallback subtype.
    pub fn generic() -> Self {
        return Self(GENERIC.to_string());
    }

    /// Whether this is the fallback subtype.
    pub fn is_generic(&self) -> bool {
        return self.0 == GENERIC;
    }

    /// Subtype name.
    pub fn name(&self) -> &str {
        return &self.0;
    }
}

impl Default for HandleSubtype {
    fn default() -> Self {
        return Self::generic();
    }
}

impl fmt::Display for HandleSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

/// What a rule looks at. Variant order is tier order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    /// Runtime type plus a host tag.
    Refined {
        /// Type name that must appear in the type chain.
        runtime_type: String,
        /// Tag the object must carry.
        tag: String,
    },
    /// A type name in the type chain.
    RuntimeType(String),
    /// The category tag.
    Category(String),
    /// A capability flag.
    Feature(Feature),
}

impl Predicate {
    /// Which tier the predicate belongs to, most specific first.
    const fn tier(&self) -> u8 {
        return match self {
            Self::Refined { .. } => 0,
            Self::RuntimeType(_) => 1,
            Self::Category(_) => 2,
            Self::Feature(_) => 3,
        };
    }
}

/// One `(predicate, subtype)` row of the table.
#[derive(Debug, Clone)]
pub struct SubtypeRule {
    /// What the rule matches.
    predicate: Predicate,
    /// What it produces.
    subtype: HandleSubtype,
}

impl SubtypeRule {
    /// Match an exact runtime type anywhere in the type chain.
    pub fn runtime_type(runtime_type: &str, subtype: &str) -> Self {
        return Self {
            predicate: Predicate::RuntimeType(runtime_type.to_string()),
            subtype: HandleSubtype::new(subtype),
        };
    }

    /// Match a runtime type that also carries `tag`.
    pub fn refined(runtime_type: &str, tag: &str, subtype: &str) -> Self {
        return Self {
            predicate: Predicate::Refined {
                runtime_type: runtime_type.to_string(),
                tag: tag.to_string(),
            },
            subtype: HandleSubtype::new(subtype),
        };
    }

    /// Match a category tag.
    pub fn category(category: &str, subtype: &str) -> Self {
        return Self {
            predicate: Predicate::Category(category.to_string()),
            subtype: HandleSubtype::new(subtype),
        };
    }

    /// Match a capability.
    pub fn feature(feature: Feature, subtype: &str) -> Self {
        return Self {
            predicate: Predicate::Feature(feature),
            subtype: HandleSubtype::new(subtype),
        };
    }

    /// Build a rule from its config form.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSubtypeRule` unless exactly one of `runtime_type`
    /// and `category` is set, if `tag` is set without `runtime_type`, or if
    /// the subtype name is empty.
    pub fn from_spec(spec: &RuleSpec) -> Result<Self, Error> {
        let reject = |reason: &str| {
            return Error::UnknownSubtypeRule {
                reason: reason.to_string(),
                subtype: spec.subtype.clone(),
            };
        };
        if spec.subtype.trim().is_empty() {
            return Err(reject("empty subtype name"));
        }
        return match (&spec.runtime_type, &spec.category, &spec.tag) {
            (Some(runtime_type), None, Some(tag)) => Ok(Self::refined(runtime_type, tag, &spec.subtype)),
            (Some(runtime_type), None, None) => Ok(Self::runtime_type(runtime_type, &spec.subtype)),
            (None, Some(category), None) => Ok(Self::category(category, &spec.subtype)),
            (None, Some(_), Some(_)) => Err(reject("`tag` needs `runtime_type`, not `category`")),
            (Some(_), Some(_), _) => Err(reject("set `runtime_type` or `category`, not both")),
            (None, None, _) => Err(reject("set one of `runtime_type` or `category`")),
        };
    }

    /// Whether the object satisfies the predicate, ignoring type-chain depth.
    fn matches(&self, object: &dyn LiveObject) -> bool {
        return match &self.predicate {
            Predicate::Refined { runtime_type, tag } => {
                object.type_chain().iter().any(|t| return t == runtime_type) && object.has_tag(tag)
            },
            Predicate::RuntimeType(runtime_type) => object.type_chain().iter().any(|t| return t == runtime_type),
            Predicate::Category(category) => object.category() == Some(category.as_str()),
            Predicate::Feature(feature) => object.has_feature(*feature),
        };
    }

    /// The subtype this rule produces.
    pub const fn subtype(&self) -> &HandleSubtype {
        return &self.subtype;
    }
}

/// Config form of a rule (`[[rules]]` in `.lazyref.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    /// Category tag to match.
    #[serde(default)]
    pub category: Option<String>,
    /// Runtime type to match.
    #[serde(default)]
    pub runtime_type: Option<String>,
    /// Subtype produced.
    pub subtype: String,
    /// Extra host tag; turns a runtime-type rule into a refined one.
    #[serde(default)]
    pub tag: Option<String>,
}

/// Ordered classification table.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    /// Rules in declaration order.
    rules: Vec<SubtypeRule>,
}

impl TypeRegistry {
    /// Empty table; everything classifies as generic.
    pub fn new() -> Self {
        return Self::default();
    }

    /// The built-in table.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for rule in [
            SubtypeRule::refined("FamilyInstance", "structural=beam", "Beam"),
            SubtypeRule::refined("FamilyInstance", "structural=column", "Column"),
            SubtypeRule::runtime_type("Wall", "Wall"),
            SubtypeRule::runtime_type("Floor", "Floor"),
            SubtypeRule::runtime_type("LinkInstance", "LinkInstance"),
            SubtypeRule::runtime_type("View", "View"),
            SubtypeRule::runtime_type("Level", "Level"),
            SubtypeRule::runtime_type("Grid", "Grid"),
            SubtypeRule::runtime_type("FamilyInstance", "FamilyInstance"),
            SubtypeRule::runtime_type("HostObject", "HostObject"),
            SubtypeRule::category("Rooms", "Room"),
            SubtypeRule::category("Doors", "Door"),
            SubtypeRule::category("Windows", "Window"),
            SubtypeRule::feature(Feature::Instance, "InstanceElement"),
            SubtypeRule::feature(Feature::Geometric, "GeometricElement"),
            SubtypeRule::feature(Feature::Graphical, "GraphicalElement"),
        ] {
            registry.push_rule(rule);
        }
        return registry;
    }

    /// Append a rule; it loses ties to every rule already in its tier.
    pub fn push_rule(&mut self, rule: SubtypeRule) {
        self.rules.push(rule);
    }

    /// Append configured rules.
    ///
    /// # Errors
    ///
    /// Returns the first `Error::UnknownSubtypeRule` encountered; no rule is
    /// added in that case.
    pub fn extend_from_specs(&mut self, specs: &[RuleSpec]) -> Result<(), Error> {
        let rules = specs.iter().map(SubtypeRule::from_spec).collect::<Result<Vec<_>, _>>()?;
        self.rules.extend(rules);
        return Ok(());
    }

    /// Number of rules, fallback excluded.
    pub fn len(&self) -> usize {
        return self.rules.len();
    }

    /// Whether only the fallback exists.
    pub fn is_empty(&self) -> bool {
        return self.rules.is_empty();
    }

    /// Rules of one tier, in declaration order.
    fn tier(&self, tier: u8) -> impl Iterator<Item = &SubtypeRule> {
        return self.rules.iter().filter(move |r| return r.predicate.tier() == tier);
    }

    /// Most specific subtype for `object`. Never fails.
    pub fn classify(&self, object: &dyn LiveObject) -> HandleSubtype {
        if let Some(rule) = self.tier(0).find(|r| return r.matches(object)) {
            return self.hit(object, rule);
        }
        // Most derived type first; a rule on `Wall` beats one on `HostObject`
        // whatever their declaration order.
        for runtime_type in object.type_chain() {
            let hit = self.tier(1).find(|r| return matches!(&r.predicate, Predicate::RuntimeType(t) if t == runtime_type));
            if let Some(rule) = hit {
                return self.hit(object, rule);
            }
        }
        for tier in [2, 3] {
            if let Some(rule) = self.tier(tier).find(|r| return r.matches(object)) {
                return self.hit(object, rule);
            }
        }
        return HandleSubtype::generic();
    }

    /// Log and return a rule's subtype.
    fn hit(&self, object: &dyn LiveObject, rule: &SubtypeRule) -> HandleSubtype {
        trace!(
            target: "lazyref::classify",
            id = %object.persistent_id(),
            subtype = %rule.subtype,
            rules = self.rules.len(),
            "classified"
        );
        return rule.subtype.clone();
    }

    /// Classify the bound object and build its resolved handle.
    pub fn wrap(&self, binding: LiveBinding) -> ReferenceHandle {
        let subtype = self.classify(binding.object.as_ref());
        return ReferenceHandle::from_binding(binding, subtype);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryHost, ObjectSpec};

    const FP: &str = "3fa1c2d4-5b6e-4f70-8a9b-0c1d2e3f4a5b";

    fn strings(items: &[&str]) -> Vec<String> {
        return items.iter().map(ToString::to_string).collect();
    }

    fn live(spec: ObjectSpec) -> crate::host::LiveRef {
        let host = MemoryHost::new();
        let doc = host.open_document(FP, "Tower", None).unwrap();
        return host.insert_object(doc.key(), &spec, None).unwrap();
    }

    fn spec(types: &[&str]) -> ObjectSpec {
        return ObjectSpec {
            id: "E1".to_string(),
            types: strings(types),
            ..ObjectSpec::default()
        };
    }

    #[test]
    fn runtime_type_beats_category() {
        let registry = TypeRegistry::with_defaults();
        let wall = live(ObjectSpec {
            category: Some("Doors".to_string()),
            ..spec(&["Wall", "HostObject", "Element"])
        });
        assert_eq!(registry.classify(wall.as_ref()).name(), "Wall");
    }

    #[test]
    fn most_derived_type_wins_over_declaration_order() {
        let mut registry = TypeRegistry::new();
        registry.push_rule(SubtypeRule::runtime_type("HostObject", "HostObject"));
        registry.push_rule(SubtypeRule::runtime_type("Wall", "Wall"));
        let wall = live(spec(&["Wall", "HostObject", "Element"]));
        assert_eq!(registry.classify(wall.as_ref()).name(), "Wall");
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let mut registry = TypeRegistry::new();
        registry.push_rule(SubtypeRule::category("Walls", "First"));
        registry.push_rule(SubtypeRule::category("Walls", "Second"));
        let object = live(ObjectSpec {
            category: Some("Walls".to_string()),
            ..spec(&["Element"])
        });
        for _ in 0..8 {
            assert_eq!(registry.classify(object.as_ref()).name(), "First");
        }
    }

    #[test]
    fn refined_rule_needs_its_tag() {
        let registry = TypeRegistry::with_defaults();
        let beam = live(ObjectSpec {
            tags: strings(&["structural=beam"]),
            ..spec(&["FamilyInstance", "Instance", "Element"])
        });
        let chair = live(spec(&["FamilyInstance", "Instance", "Element"]));
        assert_eq!(registry.classify(beam.as_ref()).name(), "Beam");
        assert_eq!(registry.classify(chair.as_ref()).name(), "FamilyInstance");
    }

    #[test]
    fn features_rank_below_categories() {
        let registry = TypeRegistry::with_defaults();
        let door = live(ObjectSpec {
            category: Some("Doors".to_string()),
            features: vec![Feature::Instance],
            ..spec(&["Element"])
        });
        let thing = live(ObjectSpec {
            features: vec![Feature::Graphical],
            ..spec(&["Element"])
        });
        assert_eq!(registry.classify(door.as_ref()).name(), "Door");
        assert_eq!(registry.classify(thing.as_ref()).name(), "GraphicalElement");
    }

    #[test]
    fn classification_is_total() {
        let registry = TypeRegistry::new();
        let bare = live(spec(&[]));
        assert!(registry.classify(bare.as_ref()).is_generic(), "unclassified object not generic");
    }

    #[test]
    fn config_rules_validate() {
        let both = RuleSpec {
            category: Some("Walls".to_string()),
            runtime_type: Some("Wall".to_string()),
            subtype: "Wall".to_string(),
            tag: None,
        };
        assert!(matches!(SubtypeRule::from_spec(&both), Err(Error::UnknownSubtypeRule { .. })), "ambiguous rule accepted");

        let neither = RuleSpec {
            category: None,
            runtime_type: None,
            subtype: "Wall".to_string(),
            tag: None,
        };
        let mut registry = TypeRegistry::new();
        assert!(registry.extend_from_specs(&[neither]).is_err(), "empty rule accepted");
        assert!(registry.is_empty(), "rule added despite error");
    }

    #[test]
    fn config_rules_append_after_defaults() {
        let mut registry = TypeRegistry::with_defaults();
        let railing = RuleSpec {
            category: None,
            runtime_type: Some("Railing".to_string()),
            subtype: "Railing".to_string(),
            tag: None,
        };
        let before = registry.len();
        registry.extend_from_specs(&[railing]).unwrap();
        assert_eq!(registry.len(), before + 1);
        let object = live(spec(&["Railing", "Element"]));
        assert_eq!(registry.classify(object.as_ref()).name(), "Railing");
    }
}
