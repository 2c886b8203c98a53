//! Room bindings: which rooms receive events for which resources.
//!
//! A pattern is an exact `owner/name`, `owner/*` for every resource of one
//! owner, or `*` for everything.

use std::collections::BTreeMap;

/// A resource pattern parsed from a room binding key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePattern {
    Exact(String),
    Owner(String),
    Any,
}

impl ResourcePattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return ResourcePattern::Any;
        }
        match pattern.strip_suffix("/*") {
            Some(owner) if !owner.is_empty() && !owner.contains('/') => {
                ResourcePattern::Owner(owner.to_string())
            }
            _ => ResourcePattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, resource: &str) -> bool {
        match self {
            ResourcePattern::Exact(name) => name == resource,
            ResourcePattern::Owner(owner) => resource
                .split_once('/')
                .map_or(false, |(o, name)| o == owner && !name.is_empty()),
            ResourcePattern::Any => true,
        }
    }

    /// Higher is more specific.
    pub fn specificity(&self) -> u8 {
        match self {
            ResourcePattern::Exact(_) => 2,
            ResourcePattern::Owner(_) => 1,
            ResourcePattern::Any => 0,
        }
    }
}

/// Per-room resource bindings, each carrying a service-specific value
/// (e.g. a message template).
pub type RoomBindings<T> = BTreeMap<String, BTreeMap<String, T>>;

/// A room selected for a resource, with the most specific binding that
/// matched in that room.
#[derive(Debug, PartialEq)]
pub struct RoomMatch<'a, T> {
    pub room_id: &'a str,
    pub pattern: &'a str,
    pub value: &'a T,
}

/// Rooms interested in `resource`, in room ID order. Each room appears at most
/// once, with its most specific matching binding.
pub fn matching_rooms<'a, T>(bindings: &'a RoomBindings<T>, resource: &str) -> Vec<RoomMatch<'a, T>> {
    let mut out = Vec::new();
    for (room_id, patterns) in bindings {
        let best = patterns
            .iter()
            .map(|(key, value)| (ResourcePattern::parse(key), key, value))
            .filter(|(pattern, _, _)| pattern.matches(resource))
            .max_by_key(|(pattern, _, _)| pattern.specificity());

        if let Some((_, key, value)) = best {
            out.push(RoomMatch {
                room_id,
                pattern: key,
                value,
            });
        }
    }
    out
}

/// True if no room has any binding.
pub fn is_empty<T>(bindings: &RoomBindings<T>) -> bool {
    bindings.values().all(|patterns| patterns.is_empty())
}
