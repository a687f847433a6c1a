//! Heterogeneous device groups and hand-written plans

use std::collections::BTreeMap;

use shardplan::prelude::*;

fn groups() -> Vec<(&'static str, Topology)> {
    vec![
        ("cpu", Topology::new(2, ComputeDevice::Cpu).unwrap()),
        ("cuda", Topology::new(2, ComputeDevice::Cuda).unwrap()),
    ]
}

#[test]
fn test_hetero_plans_each_group_on_its_own_devices() {
    let tables = vec![
        EmbeddingTable::new("on_cpu", 1_000, 16, ["a"]),
        EmbeddingTable::new("on_gpu", 1_000, 16, ["b"]),
    ];
    let mut constraints = ConstraintMap::new();
    constraints.insert("on_cpu".into(), ParameterConstraints::default().pinned_to("cpu"));

    let sharder = EmbeddingBagCollectionSharder::new();
    let result = HeteroEmbeddingShardingPlanner::new(groups(), "cuda")
        .unwrap()
        .with_constraints(constraints)
        .plan_detailed(&tables, &[&sharder])
        .unwrap();

    assert_eq!(result.plan.num_parameters(), 2);
    assert_eq!(result.groups.len(), 2);

    let cpu = result.plan.parameter("", "on_cpu").unwrap();
    assert!(cpu.sharding_spec.iter().all(|m| m.placement.ends_with("/cpu")));
    let gpu = result.plan.parameter("", "on_gpu").unwrap();
    assert!(gpu.sharding_spec.iter().all(|m| m.placement.contains("/cuda:")));
    assert_eq!(result.groups["cpu"].plan.num_parameters(), 1);
}

#[test]
fn test_hetero_rejects_unknown_groups() {
    assert!(matches!(
        HeteroEmbeddingShardingPlanner::new(groups(), "tpu"),
        Err(Error::Config(_))
    ));

    let tables = vec![EmbeddingTable::new("t", 10, 4, ["f"])];
    let mut constraints = ConstraintMap::new();
    constraints.insert("t".into(), ParameterConstraints::default().pinned_to("tpu"));
    let sharder = EmbeddingBagCollectionSharder::new();
    let err = HeteroEmbeddingShardingPlanner::new(groups(), "cuda")
        .unwrap()
        .with_constraints(constraints)
        .plan(&tables, &[&sharder])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_manual_plan_layouts() {
    let topology = Topology::new(4, ComputeDevice::Cuda)
        .unwrap()
        .with_local_world_size(2)
        .unwrap();
    let tables = vec![
        EmbeddingTable::new("tw", 100, 16, ["a"]),
        EmbeddingTable::new("rw", 17, 16, ["b"]),
        EmbeddingTable::new("cw", 100, 64, ["c"]),
        EmbeddingTable::new("dp", 10, 8, ["d"]),
        EmbeddingTable::new("skipped", 10, 8, ["e"]),
    ];
    let mut per_param = BTreeMap::new();
    per_param.insert("tw".to_string(), ManualSharding::table_wise(3));
    per_param.insert("rw".to_string(), ManualSharding::row_wise(None));
    per_param.insert("cw".to_string(), ManualSharding::column_wise(vec![0, 1]));
    per_param.insert(
        "dp".to_string(),
        ManualSharding::data_parallel().with_compute_kernel(EmbeddingComputeKernel::Dense),
    );

    let plan = construct_module_sharding_plan(&tables, &per_param, &topology).unwrap();
    assert_eq!(plan.len(), 4);
    assert!(!plan.contains_key("skipped"));

    assert_eq!(plan["tw"].ranks, vec![3]);
    assert_eq!(plan["tw"].sharding_spec[0].placement, "rank:3/cuda:1");
    assert!(plan["rw"].tiles([17, 16]));
    assert_eq!(plan["rw"].sharding_spec[0].shard_sizes, [5, 16]);
    assert!(plan["cw"].tiles([100, 64]));
    assert_eq!(plan["cw"].ranks, vec![0, 1]);
    assert_eq!(plan["dp"].ranks, vec![0, 1, 2, 3]);
    assert_eq!(plan["dp"].compute_kernel, EmbeddingComputeKernel::Dense);
}

#[test]
fn test_manual_plan_rejects_undeclared_tables() {
    let topology = Topology::new(2, ComputeDevice::Cuda).unwrap();
    let tables = vec![EmbeddingTable::new("t", 10, 4, ["f"])];
    let mut per_param = BTreeMap::new();
    per_param.insert("ghost".to_string(), ManualSharding::table_wise(0));
    let err = construct_module_sharding_plan(&tables, &per_param, &topology).unwrap_err();
    assert!(matches!(err, Error::UnknownConstraintTable(name) if name == "ghost"));
}

#[test]
fn test_yaml_config_bounds_the_search() {
    let config = PlannerConfig::from_yaml_str("max_proposals: 3\nis_inference: true\n").unwrap();
    let tables: Vec<EmbeddingTable> = (0..4)
        .map(|i| EmbeddingTable::new(format!("t{i}"), 5_000, 32, [format!("f{i}")]))
        .collect();
    let sharder = EmbeddingBagCollectionSharder::new();
    let result = EmbeddingShardingPlanner::new(Topology::new(2, ComputeDevice::Cuda).unwrap())
        .with_config(config)
        .plan_detailed(&tables, &[&sharder])
        .unwrap();
    assert!(result.search.proposals_evaluated <= 3);
    assert_eq!(result.plan.num_parameters(), 4);
}

#[test]
fn test_variable_config_drives_the_planner() {
    let vars: BTreeMap<&str, &str> = [("SHARDPLAN_MAX_PROPOSALS", "2"), ("SHARDPLAN_INFERENCE", "1")]
        .into_iter()
        .collect();
    let config = PlannerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
    assert_eq!(config.max_proposals, 2);
    assert!(config.is_inference);

    let tables = vec![EmbeddingTable::new("t", 5_000, 32, ["f"])];
    let sharder = EmbeddingBagCollectionSharder::new();
    let result = EmbeddingShardingPlanner::new(Topology::new(2, ComputeDevice::Cuda).unwrap())
        .with_config(config)
        .plan_detailed(&tables, &[&sharder])
        .unwrap();
    assert!(result.search.proposals_evaluated <= 2);
}

#[test]
fn test_cache_scaleup_keeps_plan_feasible() {
    let tables = vec![EmbeddingTable::new("t", 100_000, 64, ["f"])];
    let mut constraints = ConstraintMap::new();
    constraints.insert(
        "t".into(),
        ParameterConstraints::default()
            .with_sharding_types([ShardingType::TableWise])
            .with_compute_kernels([EmbeddingComputeKernel::BatchedFusedUvmCaching]),
    );
    let config = PlannerConfig {
        cache_scaleup: true,
        ..PlannerConfig::default()
    };
    let topology = Topology::new(2, ComputeDevice::Cuda)
        .unwrap()
        .with_hbm_cap(20_000_000);
    let sharder = EmbeddingBagCollectionSharder::new();
    let result = EmbeddingShardingPlanner::new(topology)
        .with_config(config)
        .with_constraints(constraints)
        .plan_detailed(&tables, &[&sharder])
        .unwrap();

    let ps = result.plan.parameter("", "t").unwrap();
    assert_eq!(ps.compute_kernel, EmbeddingComputeKernel::BatchedFusedUvmCaching);
    for rank in &result.stats.ranks {
        assert!(rank.used.fits_in(&rank.capacity));
    }
    // The default 20% cache would use 10_240_000 bytes of HBM.
    assert!(result.stats.total_used().hbm > 10_240_000);
}
