//! Direction plans: the deterministic list of fields a direction must fill.
//!
//! Plans are compiled from a static rule table keyed by direction type and
//! [`PlanFlags`]. The same inputs always produce the same field list, in the
//! same order, which is what lets a resumed run re-derive the plan it started
//! with.
//!
//! | Direction | Base fields | `high_risk` adds | `commercial` adds |
//! |-----------|-------------|------------------|-------------------|
//! | GUEST | identity and credentials | controversies, retractions | business ties, sponsorships |
//! | BUSINESS | registration and leadership | regulatory actions, litigation | revenue model, funding |
//! | PRODUCT | maker, price, ingredients, claims | safety warnings, recalls | affiliate links, discount codes |
//! | COMPOUND | class, mechanism, evidence | adverse effects, interactions | suppliers |
//! | PLATFORM | owner, audience, focus | moderation issues | sponsorship disclosures |

use crate::bundle::{Bundle, DirectionType};
use crate::error::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Risk and objective flags that widen a plan.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanFlags {
    /// Health or legal claims are involved; research the downside.
    #[serde(default)]
    pub high_risk: bool,
    /// Money changes hands between bundle entities; follow it.
    #[serde(default)]
    pub commercial: bool,
}

/// The compiled, read-only plan for one direction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DirectionPlan {
    pub direction: DirectionType,
    pub required_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
}

impl DirectionPlan {
    /// Build a plan, dropping duplicate and blank field names while keeping
    /// first-seen order.
    pub fn new<I, S>(direction: DirectionType, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut required_fields: Vec<String> = Vec::new();
        for field in fields {
            let field: String = field.into();
            let field = field.trim();
            if !field.is_empty() && !required_fields.iter().any(|f| f == field) {
                required_fields.push(field.to_string());
            }
        }
        Self {
            direction,
            required_fields,
            objective: None,
        }
    }

    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = Some(objective.into());
        self
    }

    /// A plan without required fields cannot terminate meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.required_fields.is_empty() {
            return Err(ResearchError::EmptyPlan {
                direction: self.direction,
            });
        }
        Ok(())
    }
}

fn base_fields(direction: DirectionType) -> &'static [&'static str] {
    match direction {
        DirectionType::Guest => &[
            "full_name",
            "current_role",
            "affiliations",
            "credentials",
            "notable_claims",
        ],
        DirectionType::Business => &[
            "legal_name",
            "founded",
            "headquarters",
            "leadership",
            "products_offered",
        ],
        DirectionType::Product => &[
            "manufacturer",
            "price",
            "ingredients",
            "marketing_claims",
            "availability",
        ],
        DirectionType::Compound => &[
            "chemical_class",
            "mechanism",
            "evidence_quality",
            "typical_dosage",
            "regulatory_status",
        ],
        DirectionType::Platform => &["owner", "audience_size", "content_focus", "monetization"],
    }
}

fn high_risk_fields(direction: DirectionType) -> &'static [&'static str] {
    match direction {
        DirectionType::Guest => &["controversies", "retractions"],
        DirectionType::Business => &["regulatory_actions", "litigation"],
        DirectionType::Product => &["safety_warnings", "recalls"],
        DirectionType::Compound => &["adverse_effects", "interactions"],
        DirectionType::Platform => &["moderation_issues"],
    }
}

fn commercial_fields(direction: DirectionType) -> &'static [&'static str] {
    match direction {
        DirectionType::Guest => &["business_ties", "sponsorships"],
        DirectionType::Business => &["revenue_model", "funding"],
        DirectionType::Product => &["affiliate_links", "discount_codes"],
        DirectionType::Compound => &["suppliers"],
        DirectionType::Platform => &["sponsorship_disclosures"],
    }
}

/// Compile the plan for one direction from the static rule table.
pub fn compile_plan(direction: DirectionType, flags: &PlanFlags) -> DirectionPlan {
    let mut fields: Vec<&str> = base_fields(direction).to_vec();
    if flags.high_risk {
        fields.extend_from_slice(high_risk_fields(direction));
    }
    if flags.commercial {
        fields.extend_from_slice(commercial_fields(direction));
    }
    DirectionPlan::new(direction, fields)
}

/// Supplies the plan for each direction of a bundle.
///
/// Implementations must be read-only for the duration of a bundle's run.
pub trait PlanSource: Send + Sync {
    fn plan_for(&self, bundle: &Bundle, direction: DirectionType) -> Result<DirectionPlan>;

    /// Plans for every direction in the bundle's queue, in queue order.
    fn plans(&self, bundle: &Bundle) -> Result<Vec<(DirectionType, DirectionPlan)>> {
        bundle
            .directions()
            .into_iter()
            .map(|d| self.plan_for(bundle, d).map(|p| (d, p)))
            .collect()
    }
}

/// Derives plans from the rule table, with an objective naming the
/// direction's candidates.
#[derive(Debug, Clone, Default)]
pub struct RulePlanSource {
    pub flags: PlanFlags,
}

impl RulePlanSource {
    pub fn new(flags: PlanFlags) -> Self {
        Self { flags }
    }
}

impl PlanSource for RulePlanSource {
    fn plan_for(&self, bundle: &Bundle, direction: DirectionType) -> Result<DirectionPlan> {
        let names: Vec<&str> = bundle
            .candidates(direction)
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let mut plan = compile_plan(direction, &self.flags);
        if !names.is_empty() {
            let objective = match bundle.anchor_name() {
                Some(guest) if direction != DirectionType::Guest => format!(
                    "Research the {} {} connected to {guest}.",
                    direction.noun(),
                    names.join(", ")
                ),
                _ => format!("Research the {} {}.", direction.noun(), names.join(", ")),
            };
            plan = plan.with_objective(objective);
        }
        plan.validate()?;
        Ok(plan)
    }
}

/// Serves precompiled plans, typically loaded from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticPlanSource {
    plans: HashMap<DirectionType, DirectionPlan>,
}

impl StaticPlanSource {
    pub fn new(plans: impl IntoIterator<Item = DirectionPlan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.direction, p)).collect(),
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to parse plans: {e}"))
    }
}

impl PlanSource for StaticPlanSource {
    fn plan_for(&self, bundle: &Bundle, direction: DirectionType) -> Result<DirectionPlan> {
        let plan = self
            .plans
            .get(&direction)
            .cloned()
            .ok_or_else(|| ResearchError::MissingPlan {
                bundle_id: bundle.bundle_id.clone(),
                direction,
            })?;
        // Re-run normalization in case the JSON carried duplicates.
        let objective = plan.objective.clone();
        let mut plan = DirectionPlan::new(plan.direction, plan.required_fields);
        plan.objective = objective;
        plan.validate()?;
        Ok(plan)
    }
}
