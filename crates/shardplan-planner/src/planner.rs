//! Planner entry points: input validation, then enumerate, estimate, rank,
//! search, and assemble the final `ShardingPlan`.

use std::collections::{BTreeMap, BTreeSet};

use shardplan_core::config::PlannerConfig;
use shardplan_core::constraints::ConstraintMap;
use shardplan_core::error::{Error, Result};
use shardplan_core::option::ShardingOption;
use shardplan_core::plan::{ParameterSharding, ShardMetadata, ShardingPlan};
use shardplan_core::table::EmbeddingTable;
use shardplan_core::topology::Topology;

use crate::enumerator::EmbeddingEnumerator;
use crate::estimators::{EmbeddingPerfEstimator, EmbeddingStorageEstimator, ShardEstimator};
use crate::partitioner::GreedyPartitioner;
use crate::proposer::{GreedyProposer, SearchStats, Termination};
use crate::ranker::FlatRanker;
use crate::scaleup::CacheScaleup;
use crate::sharders::Sharder;
use crate::stats::PlanStats;
use crate::utils::placement;

/// Plan plus what it took to find it.
#[derive(Debug, Clone)]
pub struct PlanningResult {
    pub plan: ShardingPlan,
    pub stats: PlanStats,
    pub search: SearchStats,
}

/// Plans every table onto one homogeneous topology.
#[derive(Debug, Clone)]
pub struct EmbeddingShardingPlanner {
    topology: Topology,
    config: PlannerConfig,
    constraints: ConstraintMap,
}

impl EmbeddingShardingPlanner {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            config: PlannerConfig::default(),
            constraints: ConstraintMap::new(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_constraints(mut self, constraints: ConstraintMap) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(&self, tables: &[EmbeddingTable], sharders: &[&dyn Sharder]) -> Result<ShardingPlan> {
        Ok(self.plan_detailed(tables, sharders)?.plan)
    }

    pub fn plan_detailed(
        &self,
        tables: &[EmbeddingTable],
        sharders: &[&dyn Sharder],
    ) -> Result<PlanningResult> {
        self.config.validate()?;
        self.topology.validate()?;
        let modules = validate_inputs(tables, sharders, &self.constraints)?;
        self.plan_validated(tables, sharders, &modules)
    }

    fn plan_validated(
        &self,
        tables: &[EmbeddingTable],
        sharders: &[&dyn Sharder],
        modules: &BTreeMap<String, String>,
    ) -> Result<PlanningResult> {
        let topology = &self.topology;
        let config = &self.config;

        let mut options = EmbeddingEnumerator::new(topology, config, &self.constraints)
            .enumerate(tables, sharders)?;
        let storage = EmbeddingStorageEstimator::new(topology, config);
        let perf = EmbeddingPerfEstimator::new(topology, config);
        for table_options in &mut options {
            storage.estimate(table_options)?;
            perf.estimate(table_options)?;
        }
        tracing::debug!(
            tables = tables.len(),
            options = options.iter().map(Vec::len).sum::<usize>(),
            "estimated"
        );

        let ranked = FlatRanker.rank(options);
        let outcome =
            GreedyProposer::new(GreedyPartitioner::new(topology), config).search(ranked)?;
        if outcome.stats.termination == Termination::Budget && outcome.stats.best_history.len() <= 1 {
            tracing::warn!(
                proposals = outcome.stats.proposals_evaluated,
                "search budget spent without improving on the first feasible plan"
            );
        }

        let mut best = outcome.best;
        if config.cache_scaleup {
            best = CacheScaleup::new(topology, config).run(best)?;
        }

        let plan = to_sharding_plan(&best, modules, topology)?;
        let stats = PlanStats::from_options(&best, topology);
        if !plan.is_empty() {
            stats.log();
            let fingerprint = plan.fingerprint()?;
            tracing::info!(
                fingerprint = %fingerprint.short(),
                parameters = plan.num_parameters(),
                "sharding plan ready"
            );
        }
        Ok(PlanningResult {
            plan,
            stats,
            search: outcome.stats,
        })
    }
}

/// Plans tables across several named topologies, e.g. a CPU pool and a GPU
/// pool. A table goes to its constraint's `device_group`, else the default.
#[derive(Debug, Clone)]
pub struct HeteroEmbeddingShardingPlanner {
    groups: BTreeMap<String, Topology>,
    default_group: String,
    config: PlannerConfig,
    constraints: ConstraintMap,
}

/// Merged plan plus each group's own result.
#[derive(Debug, Clone)]
pub struct HeteroPlanningResult {
    pub plan: ShardingPlan,
    pub groups: BTreeMap<String, PlanningResult>,
}

impl HeteroEmbeddingShardingPlanner {
    pub fn new<S: Into<String>>(
        groups: impl IntoIterator<Item = (S, Topology)>,
        default_group: impl Into<String>,
    ) -> Result<Self> {
        let groups: BTreeMap<String, Topology> =
            groups.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let default_group = default_group.into();
        if !groups.contains_key(&default_group) {
            return Err(Error::Config(format!(
                "default device group '{default_group}' is not one of the topologies"
            )));
        }
        for topology in groups.values() {
            topology.validate()?;
        }
        Ok(Self {
            groups,
            default_group,
            config: PlannerConfig::default(),
            constraints: ConstraintMap::new(),
        })
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_constraints(mut self, constraints: ConstraintMap) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn plan(&self, tables: &[EmbeddingTable], sharders: &[&dyn Sharder]) -> Result<ShardingPlan> {
        Ok(self.plan_detailed(tables, sharders)?.plan)
    }

    pub fn plan_detailed(
        &self,
        tables: &[EmbeddingTable],
        sharders: &[&dyn Sharder],
    ) -> Result<HeteroPlanningResult> {
        self.config.validate()?;
        let modules = validate_inputs(tables, sharders, &self.constraints)?;

        let mut assigned: BTreeMap<&str, Vec<EmbeddingTable>> = BTreeMap::new();
        for table in tables {
            let group = self
                .constraints
                .get(&table.name)
                .and_then(|c| c.device_group.as_deref())
                .unwrap_or(self.default_group.as_str());
            let (name, _) = self.groups.get_key_value(group).ok_or_else(|| {
                Error::Config(format!(
                    "table '{}' is pinned to unknown device group '{group}'",
                    table.name
                ))
            })?;
            assigned.entry(name.as_str()).or_default().push(table.clone());
        }

        let mut merged = ShardingPlan::new();
        let mut results = BTreeMap::new();
        for (group, group_tables) in assigned {
            let constraints: ConstraintMap = self
                .constraints
                .iter()
                .filter(|(name, _)| group_tables.iter().any(|t| &t.name == *name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let planner = EmbeddingShardingPlanner {
                topology: self.groups[group].clone(),
                config: self.config.clone(),
                constraints,
            };
            tracing::debug!(group, tables = group_tables.len(), "planning device group");
            let result = planner.plan_validated(&group_tables, sharders, &modules)?;
            merged.merge(result.plan.clone())?;
            results.insert(group.to_string(), result);
        }
        Ok(HeteroPlanningResult {
            plan: merged,
            groups: results,
        })
    }
}

/// Checks every input once and maps each table to the module path of the
/// first sharder that claims it.
fn validate_inputs(
    tables: &[EmbeddingTable],
    sharders: &[&dyn Sharder],
    constraints: &ConstraintMap,
) -> Result<BTreeMap<String, String>> {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for table in tables {
        table.validate()?;
        if !names.insert(table.name.as_str()) {
            return Err(Error::DuplicateTable(table.name.clone()));
        }
    }

    for (name, c) in constraints {
        let table = tables
            .iter()
            .find(|t| &t.name == name)
            .ok_or_else(|| Error::UnknownConstraintTable(name.clone()))?;
        c.validate(name, table.num_features())?;
    }

    let mut modules: BTreeMap<String, String> = BTreeMap::new();
    for sharder in sharders {
        for parameter in sharder.shardable_parameters(tables) {
            if !names.contains(parameter.as_str()) {
                return Err(Error::UnknownShardableParameter {
                    sharder: sharder.name().to_string(),
                    parameter,
                });
            }
            modules
                .entry(parameter)
                .or_insert_with(|| sharder.module_path().to_string());
        }
    }

    if let Some(unclaimed) = tables.iter().find(|t| !modules.contains_key(&t.name)) {
        return Err(Error::UnclaimedTable(unclaimed.name.clone()));
    }
    Ok(modules)
}

fn to_sharding_plan(
    options: &[ShardingOption],
    modules: &BTreeMap<String, String>,
    topology: &Topology,
) -> Result<ShardingPlan> {
    let device = topology.compute_device();
    let local = topology.local_world_size();
    let mut plan = ShardingPlan::new();
    for option in options {
        let mut ranks = Vec::with_capacity(option.shards.len());
        let mut spec = Vec::with_capacity(option.shards.len());
        for shard in &option.shards {
            let rank = shard.rank.ok_or_else(|| {
                Error::Invariant(format!("unplaced shard in plan for '{}'", option.name))
            })?;
            ranks.push(rank);
            spec.push(ShardMetadata {
                shard_offsets: shard.offsets,
                shard_sizes: shard.sizes,
                placement: placement(device, rank, local),
            });
        }
        let sharding = ParameterSharding {
            sharding_type: option.sharding_type,
            compute_kernel: option.compute_kernel,
            ranks,
            sharding_spec: spec,
        };
        if option.sharding_type.is_partitioned() && !sharding.tiles(option.tensor_shape) {
            return Err(Error::Invariant(format!(
                "shards of '{}' do not tile the table",
                option.name
            )));
        }
        let module = modules.get(&option.name).map_or("", String::as_str);
        plan.insert(module, &option.name, sharding)?;
    }
    Ok(plan)
}
