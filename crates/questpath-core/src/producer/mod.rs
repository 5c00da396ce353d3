//! Generative plan producer seam and the validation applied to whatever it
//! returns.

pub mod openai;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use questpath_db::models::{Difficulty, Topic};

pub use openai::{OpenAiProducer, ProducerConfig};

/// Classified producer failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    /// The producer answered, but not with a usable plan.
    #[error("malformed producer output: {0}")]
    MalformedOutput(String),

    /// The producer could not be reached or is overloaded. Safe to retry.
    #[error("producer unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("producer failed: {0}")]
    Unknown(String),
}

/// A plan as the producer returns it, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPlan {
    pub title: String,
    pub category: String,
    pub difficulty: String,
    pub roadmap: GeneratedRoadmap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRoadmap {
    pub name: String,
    pub levels: Vec<GeneratedLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedLevel {
    pub order: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topics: Vec<GeneratedTopic>,
    pub xp_reward: i64,
}

/// Producers emit topics either as bare names or as objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedTopic {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        explanation: String,
    },
}

impl GeneratedTopic {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    /// Convert to the stored form. Every topic starts incomplete.
    fn into_topic(self) -> Topic {
        let (name, explanation) = match self {
            Self::Name(name) => (name, String::new()),
            Self::Detailed { name, explanation } => (name, explanation),
        };
        Topic {
            name: name.trim().to_owned(),
            completed: false,
            explanation,
        }
    }
}

/// A validated plan, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    pub title: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub roadmap_name: String,
    /// Sorted by ascending order.
    pub stages: Vec<StageDraft>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDraft {
    pub order: i32,
    pub title: String,
    pub description: String,
    pub topics: Vec<Topic>,
    pub xp_reward: i32,
}

/// Source of generated plans.
#[async_trait]
pub trait PlanProducer: Send + Sync {
    /// Generate a plan for a free-text goal description.
    async fn generate(&self, description: &str) -> Result<GeneratedPlan, ProducerError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanProducer) {}
};

/// Decode producer text into a [`GeneratedPlan`].
pub fn parse_generated_plan(content: &str) -> Result<GeneratedPlan, ProducerError> {
    serde_json::from_str(content.trim())
        .map_err(|e| ProducerError::MalformedOutput(format!("plan is not valid JSON: {e}")))
}

fn non_blank(value: &str, field: &str) -> Result<String, ProducerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProducerError::MalformedOutput(format!("{field} is empty")));
    }
    Ok(trimmed.to_owned())
}

/// Check structural rules and convert to a [`PlanDraft`].
///
/// Rules: non-blank title, category and roadmap name; a known difficulty;
/// at least one level; positive, unique orders including 1; non-negative
/// XP; non-blank topic names.
pub fn validate_generated_plan(plan: GeneratedPlan) -> Result<PlanDraft, ProducerError> {
    let title = non_blank(&plan.title, "title")?;
    let category = non_blank(&plan.category, "category")?;
    let roadmap_name = non_blank(&plan.roadmap.name, "roadmap name")?;
    let difficulty: Difficulty = plan
        .difficulty
        .parse()
        .map_err(|e| ProducerError::MalformedOutput(format!("{e}")))?;

    if plan.roadmap.levels.is_empty() {
        return Err(ProducerError::MalformedOutput("roadmap has no levels".into()));
    }

    let mut seen = HashSet::new();
    let mut stages = Vec::with_capacity(plan.roadmap.levels.len());
    for level in plan.roadmap.levels {
        let order = i32::try_from(level.order)
            .ok()
            .filter(|o| *o > 0)
            .ok_or_else(|| {
                ProducerError::MalformedOutput(format!("level order {} is not positive", level.order))
            })?;
        if !seen.insert(order) {
            return Err(ProducerError::MalformedOutput(format!("duplicate level order {order}")));
        }
        let xp_reward = i32::try_from(level.xp_reward)
            .ok()
            .filter(|xp| *xp >= 0)
            .ok_or_else(|| {
                ProducerError::MalformedOutput(format!(
                    "level {order} has invalid xp_reward {}",
                    level.xp_reward
                ))
            })?;
        let title = non_blank(&level.title, &format!("level {order} title"))?;
        if let Some(i) = level.topics.iter().position(|t| t.name().trim().is_empty()) {
            return Err(ProducerError::MalformedOutput(format!(
                "level {order} topic {i} has an empty name"
            )));
        }

        stages.push(StageDraft {
            order,
            title,
            description: level.description.trim().to_owned(),
            topics: level.topics.into_iter().map(GeneratedTopic::into_topic).collect(),
            xp_reward,
        });
    }

    if !seen.contains(&1) {
        return Err(ProducerError::MalformedOutput("no level has order 1".into()));
    }
    stages.sort_by_key(|s| s.order);

    Ok(PlanDraft {
        title,
        category,
        difficulty,
        roadmap_name,
        stages,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> serde_json::Value {
        json!({
            "title": "Learn Rust",
            "category": "Programming",
            "difficulty": "Intermediate",
            "roadmap": {
                "name": "Rust in 8 weeks",
                "levels": [
                    {"order": 2, "title": "Ownership", "description": "Borrowing",
                     "topics": [{"name": "Moves", "explanation": "Values move"}], "xp_reward": 150},
                    {"order": 1, "title": "Basics", "description": "Syntax",
                     "topics": ["Variables", "Functions"], "xp_reward": 100}
                ]
            }
        })
    }

    fn validate(value: serde_json::Value) -> Result<PlanDraft, ProducerError> {
        validate_generated_plan(parse_generated_plan(&value.to_string())?)
    }

    fn assert_malformed(value: serde_json::Value) {
        assert!(matches!(validate(value), Err(ProducerError::MalformedOutput(_))));
    }

    #[test]
    fn accepts_mixed_topic_shapes_and_sorts_stages() {
        let draft = validate(sample()).unwrap();
        assert_eq!(draft.difficulty, Difficulty::Intermediate);
        assert_eq!(draft.roadmap_name, "Rust in 8 weeks");
        let orders: Vec<i32> = draft.stages.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);

        let basics = &draft.stages[0];
        assert_eq!(basics.topics.len(), 2);
        assert_eq!(basics.topics[0].name, "Variables");
        assert!(basics.topics.iter().all(|t| !t.completed));
        assert_eq!(draft.stages[1].topics[0].explanation, "Values move");
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_generated_plan("Sure! Here is your plan:"),
            Err(ProducerError::MalformedOutput(_))
        ));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut v = sample();
        v.as_object_mut().unwrap().remove("roadmap");
        assert_malformed(v);
    }

    #[test]
    fn rejects_blank_title() {
        let mut v = sample();
        v["title"] = json!("  ");
        assert_malformed(v);
    }

    #[test]
    fn rejects_unknown_difficulty() {
        let mut v = sample();
        v["difficulty"] = json!("legendary");
        assert_malformed(v);
    }

    #[test]
    fn rejects_empty_levels() {
        let mut v = sample();
        v["roadmap"]["levels"] = json!([]);
        assert_malformed(v);
    }

    #[test]
    fn rejects_duplicate_orders() {
        let mut v = sample();
        v["roadmap"]["levels"][0]["order"] = json!(1);
        assert_malformed(v);
    }

    #[test]
    fn rejects_plan_without_first_level() {
        let mut v = sample();
        v["roadmap"]["levels"][1]["order"] = json!(3);
        assert_malformed(v);
    }

    #[test]
    fn rejects_non_positive_order() {
        let mut v = sample();
        v["roadmap"]["levels"][0]["order"] = json!(0);
        assert_malformed(v);
    }

    #[test]
    fn rejects_negative_xp() {
        let mut v = sample();
        v["roadmap"]["levels"][0]["xp_reward"] = json!(-5);
        assert_malformed(v);
    }

    #[test]
    fn rejects_blank_topic_name() {
        let mut v = sample();
        v["roadmap"]["levels"][1]["topics"] = json!(["Variables", ""]);
        assert_malformed(v);
    }
}
