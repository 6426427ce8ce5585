//! Partition key derivation for time-window partitioned workflows.

use crate::workflow::{AssetPartitioning, WorkflowDefinition};
use chrono::{DateTime, Utc};

/// Derives the partition key for one schedule occurrence.
///
/// Returns `Some(key)` when any step's produced asset declares time-window
/// partitioning; the key is the occurrence formatted in UTC using the
/// declaration's format (or the granularity default). Workflows without such
/// a declaration return `None` and must not be materialized for the
/// occurrence.
#[must_use]
pub fn time_window_partition_key(
    definition: &WorkflowDefinition,
    occurrence: DateTime<Utc>,
) -> Option<String> {
    definition
        .steps()
        .iter()
        .flat_map(|step| step.produces.iter())
        .find_map(|asset| match &asset.partitioning {
            Some(AssetPartitioning::TimeWindow {
                granularity,
                format,
            }) => {
                let format = format
                    .as_deref()
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| granularity.default_format());
                Some(occurrence.format(format).to_string())
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::time_window_partition_key;
    use crate::workflow::{
        AssetDeclaration, AssetPartitioning, StepDeclaration, StepKind, TimeWindowGranularity,
        WorkflowDefinition, WorkflowDefinitionInput,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn definition_with(partitioning: Option<AssetPartitioning>) -> WorkflowDefinition {
        let result = WorkflowDefinition::new(WorkflowDefinitionInput {
            id: Uuid::new_v4(),
            slug: "observatory-load".to_owned(),
            version: 1,
            steps: vec![StepDeclaration {
                id: "load".to_owned(),
                kind: StepKind::Job,
                depends_on: Vec::new(),
                produces: vec![AssetDeclaration {
                    asset_id: "observatory.minute".to_owned(),
                    partitioning,
                }],
                consumes: Vec::new(),
            }],
            default_parameters: json!({}),
        });
        assert!(result.is_ok());
        result.unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn formats_occurrence_with_declared_format() {
        let definition = definition_with(Some(AssetPartitioning::TimeWindow {
            granularity: TimeWindowGranularity::Hour,
            format: Some("%Y-%m-%dT%H".to_owned()),
        }));
        let occurrence = Utc
            .with_ymd_and_hms(2024, 1, 1, 13, 0, 0)
            .single()
            .unwrap_or_default();

        assert_eq!(
            time_window_partition_key(&definition, occurrence),
            Some("2024-01-01T13".to_owned())
        );
    }

    #[test]
    fn falls_back_to_granularity_default_format() {
        let definition = definition_with(Some(AssetPartitioning::TimeWindow {
            granularity: TimeWindowGranularity::Minute,
            format: None,
        }));
        let occurrence = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 4, 30)
            .single()
            .unwrap_or_default();

        assert_eq!(
            time_window_partition_key(&definition, occurrence),
            Some("2024-01-01T00:04".to_owned())
        );
    }

    #[test]
    fn static_partitioning_yields_no_key() {
        let definition = definition_with(Some(AssetPartitioning::Static));
        let occurrence = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();

        assert_eq!(time_window_partition_key(&definition, occurrence), None);
    }

    #[test]
    fn unpartitioned_assets_yield_no_key() {
        let definition = definition_with(None);
        let occurrence = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();

        assert_eq!(time_window_partition_key(&definition, occurrence), None);
    }
}
