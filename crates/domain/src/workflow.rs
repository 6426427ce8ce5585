use capstan_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Execution kind of one workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Step invokes a job bundle through the external runtime.
    Job,
    /// Step calls a long-lived service endpoint.
    Service,
    /// Step fans out over a collection produced by an upstream step.
    Fanout,
}

impl StepKind {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Service => "service",
            Self::Fanout => "fanout",
        }
    }
}

/// Granularity of a time-window partitioned asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindowGranularity {
    /// One partition per minute.
    Minute,
    /// One partition per hour.
    Hour,
    /// One partition per day.
    Day,
}

impl TimeWindowGranularity {
    /// Returns the chrono format string used when a declaration omits one.
    #[must_use]
    pub fn default_format(&self) -> &'static str {
        match self {
            Self::Minute => "%Y-%m-%dT%H:%M",
            Self::Hour => "%Y-%m-%dT%H:00",
            Self::Day => "%Y-%m-%d",
        }
    }
}

/// Partitioning declared on a produced or consumed asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetPartitioning {
    /// Fixed set of named partitions managed by the producer.
    Static,
    /// One partition per aligned time window.
    TimeWindow {
        /// Window width.
        granularity: TimeWindowGranularity,
        /// Optional chrono format for rendering partition keys in UTC.
        format: Option<String>,
    },
}

/// One asset produced or consumed by a workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDeclaration {
    /// Stable asset identifier.
    pub asset_id: String,
    /// Optional partitioning scheme; unpartitioned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<AssetPartitioning>,
}

/// One step declaration inside a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDeclaration {
    /// Step identifier, unique within the definition.
    pub id: String,
    /// Execution kind.
    pub kind: StepKind,
    /// Ids of steps that must complete before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Assets this step produces.
    #[serde(default)]
    pub produces: Vec<AssetDeclaration>,
    /// Assets this step consumes.
    #[serde(default)]
    pub consumes: Vec<AssetDeclaration>,
}

/// Validated workflow definition with derived execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    id: Uuid,
    slug: NonEmptyString,
    version: i32,
    steps: Vec<StepDeclaration>,
    default_parameters: Value,
    roots: Vec<String>,
    topological_order: Vec<String>,
}

/// Input payload used to construct a validated workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinitionInput {
    /// Definition identifier.
    pub id: Uuid,
    /// Stable workflow slug.
    pub slug: String,
    /// Definition version.
    pub version: i32,
    /// Ordered step declarations.
    pub steps: Vec<StepDeclaration>,
    /// Default run parameters merged under any trigger overlay.
    pub default_parameters: Value,
}

impl WorkflowDefinition {
    /// Creates a validated workflow definition.
    ///
    /// Roots and topological order are recomputed deterministically from the
    /// declared step order, so repeated construction from the same input
    /// always yields the same derived ordering.
    pub fn new(input: WorkflowDefinitionInput) -> AppResult<Self> {
        let WorkflowDefinitionInput {
            id,
            slug,
            version,
            steps,
            default_parameters,
        } = input;

        if version < 1 {
            return Err(AppError::Validation(
                "workflow version must be greater than zero".to_owned(),
            ));
        }

        if !default_parameters.is_object() && !default_parameters.is_null() {
            return Err(AppError::Validation(
                "workflow default_parameters must be a JSON object".to_owned(),
            ));
        }

        validate_steps(&steps)?;
        let roots = compute_roots(&steps);
        let topological_order = compute_topological_order(&steps)?;

        Ok(Self {
            id,
            slug: NonEmptyString::new(slug)?,
            version,
            steps,
            default_parameters,
            roots,
            topological_order,
        })
    }

    /// Returns the definition identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the workflow slug.
    #[must_use]
    pub fn slug(&self) -> &NonEmptyString {
        &self.slug
    }

    /// Returns the definition version.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the ordered step declarations.
    #[must_use]
    pub fn steps(&self) -> &[StepDeclaration] {
        &self.steps
    }

    /// Returns default run parameters.
    #[must_use]
    pub fn default_parameters(&self) -> &Value {
        &self.default_parameters
    }

    /// Returns ids of steps with no dependencies, in declaration order.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Returns step ids in a deterministic topological order.
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }
}

fn validate_steps(steps: &[StepDeclaration]) -> AppResult<()> {
    if steps.is_empty() {
        return Err(AppError::Validation(
            "workflow must declare at least one step".to_owned(),
        ));
    }

    let mut seen = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(AppError::Validation(
                "workflow step id must not be empty".to_owned(),
            ));
        }

        if !seen.insert(step.id.as_str()) {
            return Err(AppError::Validation(format!(
                "workflow step id '{}' is declared more than once",
                step.id
            )));
        }
    }

    for step in steps {
        for dependency in &step.depends_on {
            if !seen.contains(dependency.as_str()) {
                return Err(AppError::Validation(format!(
                    "workflow step '{}' depends on unknown step '{dependency}'",
                    step.id
                )));
            }

            if dependency == &step.id {
                return Err(AppError::Validation(format!(
                    "workflow step '{}' must not depend on itself",
                    step.id
                )));
            }
        }
    }

    Ok(())
}

fn compute_roots(steps: &[StepDeclaration]) -> Vec<String> {
    steps
        .iter()
        .filter(|step| step.depends_on.is_empty())
        .map(|step| step.id.clone())
        .collect()
}

/// Kahn's algorithm, breaking ties by declaration order so the result is
/// stable across rebuilds of the same definition.
fn compute_topological_order(steps: &[StepDeclaration]) -> AppResult<Vec<String>> {
    let mut indegree: HashMap<&str, usize> = steps
        .iter()
        .map(|step| (step.id.as_str(), step.depends_on.len()))
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    let mut emitted: HashSet<&str> = HashSet::new();

    while order.len() < steps.len() {
        let next = steps.iter().find(|step| {
            !emitted.contains(step.id.as_str())
                && indegree.get(step.id.as_str()).copied().unwrap_or(0) == 0
        });

        let Some(next) = next else {
            return Err(AppError::Validation(
                "workflow step dependencies must form a directed acyclic graph".to_owned(),
            ));
        };

        emitted.insert(next.id.as_str());
        order.push(next.id.clone());

        for step in steps {
            if step.depends_on.iter().any(|dep| dep == &next.id)
                && let Some(count) = indegree.get_mut(step.id.as_str())
            {
                *count = count.saturating_sub(1);
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::{
        AssetDeclaration, AssetPartitioning, StepDeclaration, StepKind, TimeWindowGranularity,
        WorkflowDefinition, WorkflowDefinitionInput,
    };
    use serde_json::json;
    use uuid::Uuid;

    fn step(id: &str, depends_on: &[&str]) -> StepDeclaration {
        StepDeclaration {
            id: id.to_owned(),
            kind: StepKind::Job,
            depends_on: depends_on.iter().map(|dep| (*dep).to_owned()).collect(),
            produces: Vec::new(),
            consumes: Vec::new(),
        }
    }

    fn definition(steps: Vec<StepDeclaration>) -> Result<WorkflowDefinition, capstan_core::AppError>
    {
        WorkflowDefinition::new(WorkflowDefinitionInput {
            id: Uuid::new_v4(),
            slug: "observatory-load".to_owned(),
            version: 1,
            steps,
            default_parameters: json!({}),
        })
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let result = definition(vec![step("load", &[]), step("load", &[])]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let result = definition(vec![step("publish", &["load"])]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_dependency_cycles() {
        let result = definition(vec![
            step("load", &["publish"]),
            step("publish", &["load"]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn computes_roots_and_stable_topological_order() {
        let result = definition(vec![
            step("publish", &["transform"]),
            step("load", &[]),
            step("transform", &["load"]),
            step("notify", &[]),
        ]);
        assert!(result.is_ok());
        let definition = result.unwrap_or_else(|_| unreachable!());

        assert_eq!(definition.roots(), ["load", "notify"]);
        assert_eq!(
            definition.topological_order(),
            ["load", "notify", "transform", "publish"]
        );
    }

    #[test]
    fn step_declarations_round_trip_through_json() {
        let declared = StepDeclaration {
            id: "load".to_owned(),
            kind: StepKind::Service,
            depends_on: Vec::new(),
            produces: vec![AssetDeclaration {
                asset_id: "observatory.minute".to_owned(),
                partitioning: Some(AssetPartitioning::TimeWindow {
                    granularity: TimeWindowGranularity::Minute,
                    format: None,
                }),
            }],
            consumes: Vec::new(),
        };

        let encoded = serde_json::to_value(&declared);
        assert!(encoded.is_ok());
        let decoded: Result<StepDeclaration, _> =
            serde_json::from_value(encoded.unwrap_or_default());
        assert!(decoded.is_ok());
        assert_eq!(decoded.unwrap_or_else(|_| unreachable!()), declared);
    }
}
