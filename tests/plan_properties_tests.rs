//! Structural guarantees every returned plan must satisfy

use shardplan::prelude::*;

fn workload() -> Vec<EmbeddingTable> {
    vec![
        EmbeddingTable::new("user_id", 50_000, 128, ["user_id"]),
        EmbeddingTable::new("item_id", 20_000, 64, ["item_id", "item_id_hist"]),
        EmbeddingTable::new("category", 500, 16, ["category"]),
        EmbeddingTable::new("country", 250, 8, ["country"]),
        EmbeddingTable::new("query", 8_000, 96, ["query"]).with_pooling(PoolingType::Mean),
        EmbeddingTable::new("session", 3_000, 32, ["session"]).weighted(),
    ]
}

fn multi_host() -> Topology {
    Topology::new(4, ComputeDevice::Cuda)
        .unwrap()
        .with_local_world_size(2)
        .unwrap()
}

fn shape_of(tables: &[EmbeddingTable], name: &str) -> [u64; 2] {
    let t = tables.iter().find(|t| t.name == name).unwrap();
    [t.num_embeddings, t.embedding_dim]
}

#[test]
fn test_every_table_planned_exactly_once() {
    let tables = workload();
    let sharder = EmbeddingBagCollectionSharder::new();
    let plan = EmbeddingShardingPlanner::new(multi_host())
        .plan(&tables, &[&sharder])
        .unwrap();

    assert_eq!(plan.num_parameters(), tables.len());
    for (_, name, ps) in plan.iter_parameters() {
        let shape = shape_of(&tables, name);
        assert_eq!(ps.ranks.len(), ps.sharding_spec.len(), "{name}");
        assert!(ps.ranks.iter().all(|r| *r < 4), "{name}");
        if ps.sharding_type == ShardingType::DataParallel {
            assert_eq!(ps.ranks, vec![0, 1, 2, 3]);
            assert!(ps.sharding_spec.iter().all(|m| m.shard_sizes == shape));
        } else {
            assert!(ps.tiles(shape), "{name} does not tile {shape:?}");
        }
    }
}

#[test]
fn test_capacity_never_exceeded_under_pressure() {
    // 2000 x 64 fp32 = 512_000 bytes per table; six replicas cannot share one rank.
    let tables: Vec<EmbeddingTable> = (0..6)
        .map(|i| EmbeddingTable::new(format!("t{i}"), 2_000, 64, [format!("f{i}")]))
        .collect();
    let topology = Topology::new(4, ComputeDevice::Cuda)
        .unwrap()
        .with_hbm_cap(1_500_000);
    let sharder = EmbeddingBagCollectionSharder::new();
    let result = EmbeddingShardingPlanner::new(topology)
        .plan_detailed(&tables, &[&sharder])
        .unwrap();

    for rank in &result.stats.ranks {
        assert!(
            rank.used.fits_in(&rank.capacity),
            "rank {} uses {} of {}",
            rank.rank,
            rank.used,
            rank.capacity
        );
    }
    assert_eq!(result.plan.num_parameters(), 6);
    let replicated = result
        .plan
        .iter_parameters()
        .filter(|(_, _, ps)| ps.sharding_type == ShardingType::DataParallel)
        .count();
    assert!(replicated < 6);
}

#[test]
fn test_planning_is_deterministic() {
    let tables = workload();
    let sharder = EmbeddingBagCollectionSharder::new();
    let planner = EmbeddingShardingPlanner::new(multi_host());

    let a = planner.plan(&tables, &[&sharder]).unwrap();
    let b = planner.plan(&tables, &[&sharder]).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_best_history_never_regresses() {
    let tables = workload();
    let sharder = EmbeddingBagCollectionSharder::new();
    let result = EmbeddingShardingPlanner::new(multi_host())
        .plan_detailed(&tables, &[&sharder])
        .unwrap();

    let history = &result.search.best_history;
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[1] < w[0]), "{history:?}");
    assert!(result.search.feasible_proposals <= result.search.proposals_evaluated);
    let last = history[history.len() - 1];
    assert!((last - result.stats.max_perf).abs() <= 1e-9 * last.max(1.0));
}

#[test]
fn test_plan_survives_json_round_trip() {
    let tables = workload();
    let sharder = EmbeddingBagCollectionSharder::for_module("sparse.ebc");
    let plan = EmbeddingShardingPlanner::new(multi_host())
        .plan(&tables, &[&sharder])
        .unwrap();

    let json = serde_json::to_string_pretty(&plan).unwrap();
    let back: ShardingPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(back.fingerprint().unwrap(), plan.fingerprint().unwrap());
    assert!(back.get_plan_for_module("sparse.ebc").is_some());
}

#[test]
fn test_table_row_wise_stays_on_one_host() {
    let tables = vec![EmbeddingTable::new("t", 10_000, 64, ["f"])];
    let mut constraints = ConstraintMap::new();
    constraints.insert(
        "t".into(),
        ParameterConstraints::default().with_sharding_types([ShardingType::TableRowWise]),
    );
    let sharder = EmbeddingBagCollectionSharder::new();
    let plan = EmbeddingShardingPlanner::new(multi_host())
        .with_constraints(constraints)
        .plan(&tables, &[&sharder])
        .unwrap();

    let ps = plan.parameter("", "t").unwrap();
    assert_eq!(ps.sharding_type, ShardingType::TableRowWise);
    assert!(ps.tiles([10_000, 64]));
    let hosts: Vec<usize> = ps.ranks.iter().map(|r| r / 2).collect();
    assert!(hosts.iter().all(|h| *h == hosts[0]), "{:?}", ps.ranks);
}

#[test]
fn test_stats_summarize_the_plan() {
    let tables = workload();
    let sharder = EmbeddingBagCollectionSharder::new();
    let result = EmbeddingShardingPlanner::new(multi_host())
        .plan_detailed(&tables, &[&sharder])
        .unwrap();

    let stats = &result.stats;
    assert_eq!(stats.ranks.len(), 4);
    assert!(stats.max_perf >= stats.mean_perf);
    assert!(stats.balance() >= 1.0);
    let rendered = stats.to_string();
    assert!(rendered.contains("rank"), "{rendered}");
}
