//! Legend domain model: the bundled default list, payload validation,
//! and squad sampling.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Legend role class. Unknown class strings fail deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegendClass {
  Assault,
  Skirmisher,
  Recon,
  Support,
  Controller,
}

impl LegendClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      LegendClass::Assault => "Assault",
      LegendClass::Skirmisher => "Skirmisher",
      LegendClass::Recon => "Recon",
      LegendClass::Support => "Support",
      LegendClass::Controller => "Controller",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "Assault" => Some(LegendClass::Assault),
      "Skirmisher" => Some(LegendClass::Skirmisher),
      "Recon" => Some(LegendClass::Recon),
      "Support" => Some(LegendClass::Support),
      "Controller" => Some(LegendClass::Controller),
      _ => None,
    }
  }
}

/// A single pickable legend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legend {
  pub name: String,
  pub class: LegendClass,
}

impl Legend {
  fn new(name: &str, class: LegendClass) -> Self {
    Self {
      name: name.to_string(),
      class,
    }
  }
}

/// Bundled fallback roster, shown until a cached or remote list arrives.
pub fn default_legends() -> Vec<Legend> {
  use LegendClass::*;
  vec![
    Legend::new("Ash", Assault),
    Legend::new("Bangalore", Assault),
    Legend::new("Fuse", Assault),
    Legend::new("Mad Maggie", Assault),
    Legend::new("Ballistic", Assault),
    Legend::new("Revenant", Skirmisher),
    Legend::new("Wraith", Skirmisher),
    Legend::new("Octane", Skirmisher),
    Legend::new("Mirage", Skirmisher),
    Legend::new("Pathfinder", Skirmisher),
    Legend::new("Horizon", Skirmisher),
    Legend::new("Alter", Skirmisher),
    Legend::new("Bloodhound", Recon),
    Legend::new("Crypto", Recon),
    Legend::new("Seer", Recon),
    Legend::new("Vantage", Recon),
    Legend::new("Sparrow", Recon),
    Legend::new("Valkyrie", Recon),
    Legend::new("Gibraltar", Support),
    Legend::new("Lifeline", Support),
    Legend::new("Loba", Support),
    Legend::new("Newcastle", Support),
    Legend::new("Conduit", Support),
    Legend::new("Caustic", Controller),
    Legend::new("Wattson", Controller),
    Legend::new("Rampart", Controller),
    Legend::new("Catalyst", Controller),
  ]
}

/// Validate an untrusted JSON payload into a legend list.
///
/// Non-array input is rejected outright. Entries that are not objects,
/// lack a string `name`, or carry an unknown `class` are dropped. Returns
/// `None` when no valid entries remain, so callers treat malformed data
/// exactly like a failed fetch and keep whatever they already have.
pub fn coerce_legend_list(value: &Value) -> Option<Vec<Legend>> {
  let entries = value.as_array()?;

  let mut sanitized = Vec::new();
  for entry in entries {
    let Some(obj) = entry.as_object() else {
      continue;
    };
    let Some(name) = obj.get("name").and_then(Value::as_str) else {
      continue;
    };
    let Some(class) = obj
      .get("class")
      .and_then(Value::as_str)
      .and_then(LegendClass::parse)
    else {
      continue;
    };
    sanitized.push(Legend {
      name: name.to_string(),
      class,
    });
  }

  if sanitized.is_empty() {
    None
  } else {
    Some(sanitized)
  }
}

/// Draw `n` distinct entries by shuffling a copy and truncating.
pub fn sample_without_replacement<T: Clone>(items: &[T], n: usize) -> Vec<T> {
  let mut copy = items.to_vec();
  copy.shuffle(&mut rand::rng());
  copy.truncate(n);
  copy
}

/// Lowercase a legend name and strip whitespace, matching the portrait
/// asset naming (`Mad Maggie` -> `madmaggie`).
pub fn slugify(name: &str) -> String {
  name
    .chars()
    .filter(|c| !c.is_whitespace())
    .collect::<String>()
    .to_lowercase()
}
