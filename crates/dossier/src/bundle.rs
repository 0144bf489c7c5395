//! Bundles and research directions.
//!
//! A [`Bundle`] is one guest (the anchor entity) plus the businesses,
//! products, compounds and platforms connected to them, each candidate
//! carrying the source URLs that tied it to the bundle. Bundles are produced
//! upstream and consumed read-only.
//!
//! Every non-empty entity category yields one [`DirectionType`]. The queue
//! order is fixed by [`DirectionType::ALL`], so the same bundle always
//! produces the same queue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One category-specific research focus within a bundle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectionType {
    Guest,
    Business,
    Product,
    Compound,
    Platform,
}

impl DirectionType {
    /// Queue priority order.
    pub const ALL: [DirectionType; 5] = [
        DirectionType::Guest,
        DirectionType::Business,
        DirectionType::Product,
        DirectionType::Compound,
        DirectionType::Platform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionType::Guest => "GUEST",
            DirectionType::Business => "BUSINESS",
            DirectionType::Product => "PRODUCT",
            DirectionType::Compound => "COMPOUND",
            DirectionType::Platform => "PLATFORM",
        }
    }

    /// Human-readable noun used in prompts.
    pub fn noun(&self) -> &'static str {
        match self {
            DirectionType::Guest => "person",
            DirectionType::Business => "business",
            DirectionType::Product => "product",
            DirectionType::Compound => "compound",
            DirectionType::Platform => "platform",
        }
    }
}

impl fmt::Display for DirectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DirectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DirectionType::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown direction type '{s}'"))
    }
}

/// A single entity in a bundle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    /// Source URLs that connected this candidate to the bundle.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Candidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urls: Vec::new(),
            notes: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }
}

/// One anchor entity plus its related candidates.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub bundle_id: String,
    #[serde(default)]
    pub guest: Option<Candidate>,
    #[serde(default)]
    pub businesses: Vec<Candidate>,
    #[serde(default)]
    pub products: Vec<Candidate>,
    #[serde(default)]
    pub compounds: Vec<Candidate>,
    #[serde(default)]
    pub platforms: Vec<Candidate>,
}

impl Bundle {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            ..Default::default()
        }
    }

    pub fn with_guest(mut self, guest: Candidate) -> Self {
        self.guest = Some(guest);
        self
    }

    pub fn with_candidate(mut self, direction: DirectionType, candidate: Candidate) -> Self {
        match direction {
            DirectionType::Guest => self.guest = Some(candidate),
            DirectionType::Business => self.businesses.push(candidate),
            DirectionType::Product => self.products.push(candidate),
            DirectionType::Compound => self.compounds.push(candidate),
            DirectionType::Platform => self.platforms.push(candidate),
        }
        self
    }

    /// Candidates belonging to one direction's category.
    pub fn candidates(&self, direction: DirectionType) -> Vec<&Candidate> {
        match direction {
            DirectionType::Guest => self.guest.iter().collect(),
            DirectionType::Business => self.businesses.iter().collect(),
            DirectionType::Product => self.products.iter().collect(),
            DirectionType::Compound => self.compounds.iter().collect(),
            DirectionType::Platform => self.platforms.iter().collect(),
        }
    }

    /// The direction queue: one entry per non-empty category, in priority order.
    pub fn directions(&self) -> Vec<DirectionType> {
        DirectionType::ALL
            .into_iter()
            .filter(|d| !self.candidates(*d).is_empty())
            .collect()
    }

    /// Deduplicated evidence URLs for a direction, in first-seen order.
    pub fn evidence_urls(&self, direction: DirectionType) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.candidates(direction)
            .into_iter()
            .flat_map(|c| c.urls.iter())
            .map(String::as_str)
            .filter(|u| seen.insert(*u))
            .collect()
    }

    /// The guest's name, when the bundle has one.
    pub fn anchor_name(&self) -> Option<&str> {
        self.guest.as_ref().map(|g| g.name.as_str())
    }
}
