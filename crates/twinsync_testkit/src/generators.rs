//! Property-based test generators using proptest.
//!
//! Provides strategies for generating plants whose references
//! point in arbitrary directions relative to export order.

use crate::fixtures::{insert_category, insert_physical_partition, insert_pump, set_property, update_element};
use crate::fixtures::scenarios::plant_schema;
use proptest::prelude::*;
use twinsync_core::{Id64, InMemoryRepository, PropertyValue, Repository};

/// Strategy for generating valid user element ids.
pub fn element_id_strategy() -> impl Strategy<Value = Id64> {
    (Id64::FIRST_USER_ID..0x1_0000u64).prop_map(Id64::new)
}

/// Strategy for generating user labels.
pub fn label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating scalar property values.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        Just(PropertyValue::Null),
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i64>().prop_map(PropertyValue::Integer),
        label_strategy().prop_map(PropertyValue::Text),
    ]
}

/// Shape of a generated plant.
///
/// Pump `i` lives in model `models[i]`. `feeds[i]` names a pump inserted
/// after it, so the graph never has a cycle but every reference points
/// forward in insertion order.
#[derive(Debug, Clone)]
pub struct PlantGraph {
    /// Number of physical models.
    pub model_count: usize,
    /// Model index of each pump.
    pub models: Vec<usize>,
    /// Pump fed by each pump, if any.
    pub feeds: Vec<Option<usize>>,
}

/// Ids created by [`PlantGraph::populate`].
#[derive(Debug, Clone)]
pub struct PopulatedPlant {
    /// Physical models in creation order.
    pub models: Vec<Id64>,
    /// Pumps in insertion order.
    pub pumps: Vec<Id64>,
}

impl PlantGraph {
    /// Number of pumps.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if the plant has no pumps.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Writes the plant into `repo` and saves it.
    pub fn populate(&self, repo: &InMemoryRepository) -> PopulatedPlant {
        repo.import_schemas(&[plant_schema()])
            .expect("Failed to import plant schema");
        let category = insert_category(repo, "Equipment");
        let models: Vec<Id64> = (0..self.model_count)
            .map(|m| insert_physical_partition(repo, Id64::ROOT_SUBJECT, &format!("Area-{m}")))
            .collect();

        let pumps: Vec<Id64> = self
            .models
            .iter()
            .enumerate()
            .map(|(i, m)| insert_pump(repo, models[*m], category, &format!("P-{i}"), i as i64))
            .collect();
        for (i, feeds) in self.feeds.iter().enumerate() {
            if let Some(j) = feeds {
                set_property(repo, pumps[i], "feeds", pumps[*j]);
            }
        }

        repo.save_changes("seed generated plant")
            .expect("Failed to save plant");
        PopulatedPlant { models, pumps }
    }
}

/// Strategy for generating a plant with up to `max_pumps` pumps spread
/// over up to three models.
pub fn plant_graph_strategy(max_pumps: usize) -> impl Strategy<Value = PlantGraph> {
    (1..=3usize, 1..=max_pumps.max(1))
        .prop_flat_map(|(model_count, pumps)| {
            let models = prop::collection::vec(0..model_count, pumps);
            let feeds = prop::collection::vec(prop::option::of(any::<prop::sample::Index>()), pumps);
            (Just(model_count), models, feeds)
        })
        .prop_map(|(model_count, models, picks)| {
            let n = models.len();
            let feeds = picks
                .into_iter()
                .enumerate()
                .map(|(i, pick)| {
                    let later = n - i - 1;
                    match pick {
                        Some(index) if later > 0 => Some(i + 1 + index.index(later)),
                        _ => None,
                    }
                })
                .collect();
            PlantGraph {
                model_count,
                models,
                feeds,
            }
        })
}

/// An edit applied to a populated plant between synchronizations.
#[derive(Debug, Clone)]
pub enum PlantEdit {
    /// Change the flow of a pump.
    SetFlow {
        /// Pump index.
        pump: prop::sample::Index,
        /// New flow.
        flow: i64,
    },
    /// Change the label of a pump.
    Relabel {
        /// Pump index.
        pump: prop::sample::Index,
        /// New label.
        label: String,
    },
}

impl PlantEdit {
    /// Applies the edit to `repo`.
    pub fn apply(&self, repo: &InMemoryRepository, plant: &PopulatedPlant) {
        match self {
            PlantEdit::SetFlow { pump, flow } => {
                set_property(repo, *pump.get(&plant.pumps), "flow", *flow);
            }
            PlantEdit::Relabel { pump, label } => {
                let label = label.clone();
                update_element(repo, *pump.get(&plant.pumps), |element| {
                    element.user_label = Some(label);
                });
            }
        }
    }
}

/// Strategy for generating plant edits.
pub fn plant_edit_strategy() -> impl Strategy<Value = PlantEdit> {
    prop_oneof![
        2 => (any::<prop::sample::Index>(), any::<i64>())
            .prop_map(|(pump, flow)| PlantEdit::SetFlow { pump, flow }),
        1 => (any::<prop::sample::Index>(), label_strategy())
            .prop_map(|(pump, label)| PlantEdit::Relabel { pump, label }),
    ]
}

/// Strategy for generating a sequence of edits.
pub fn plant_edits_strategy(min_edits: usize, max_edits: usize) -> impl Strategy<Value = Vec<PlantEdit>> {
    prop::collection::vec(plant_edit_strategy(), min_edits..max_edits)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn element_id_is_user_id(id in element_id_strategy()) {
            prop_assert!(id.is_valid());
            prop_assert!(id.value() >= Id64::FIRST_USER_ID);
        }

        #[test]
        fn label_starts_with_letter(label in label_strategy()) {
            let first = label.chars().next();
            prop_assert!(first.map_or(false, |c| c.is_ascii_uppercase()));
        }

        #[test]
        fn plant_feeds_point_forward(graph in plant_graph_strategy(12)) {
            prop_assert_eq!(graph.models.len(), graph.feeds.len());
            for (i, feeds) in graph.feeds.iter().enumerate() {
                if let Some(j) = feeds {
                    prop_assert!(*j > i && *j < graph.len());
                }
            }
            prop_assert!(graph.models.iter().all(|m| *m < graph.model_count));
        }
    }

    #[test]
    fn populate_writes_every_pump() {
        let graph = PlantGraph {
            model_count: 2,
            models: vec![1, 0, 1],
            feeds: vec![Some(2), Some(2), None],
        };
        let repo = InMemoryRepository::new();
        let plant = graph.populate(&repo);

        assert_eq!(plant.models.len(), 2);
        assert_eq!(plant.pumps.len(), 3);
        let first = repo.element(plant.pumps[0]).unwrap().unwrap();
        assert_eq!(first.model, plant.models[1]);
        assert_eq!(first.property("feeds"), Some(&PropertyValue::Id(plant.pumps[2])));
        assert!(!repo.has_unsaved_changes());
    }
}
