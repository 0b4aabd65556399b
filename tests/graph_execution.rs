mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use common::*;
use graphflow::core::{EventEmitter, GraphEngine, GraphRuntimeState, VariablePool};
use graphflow::graph::state_manager::{EdgeState, NodeState};
use graphflow::{
    EngineConfig, Graph, GraphEngineEvent, GraphRunOutcome, NodeFactory, NodeServices,
    WorkflowEntry, WorkflowError, WorkflowExecutionStatus,
};

fn branch_graph() -> Value {
    json!({
        "nodes": [
            {"id": "start", "data": {"type": "start", "variables": [{"variable": "flag"}]}},
            {"id": "if", "data": {"type": "if-else", "cases": [{
                "case_id": "true",
                "conditions": [{
                    "variable_selector": ["start", "flag"],
                    "comparison_operator": "is",
                    "value": "yes"
                }]
            }]}},
            {"id": "a", "data": {"type": "tool"}},
            {"id": "b", "data": {"type": "tool"}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "from_a", "value_selector": ["a", "result"]}
            ]}}
        ],
        "edges": [
            {"id": "e_start_if", "source": "start", "target": "if"},
            {"id": "e_if_a", "source": "if", "sourceHandle": "true", "target": "a"},
            {"id": "e_if_b", "source": "if", "sourceHandle": "false", "target": "b"},
            {"id": "e_a_end", "source": "a", "target": "end"},
            {"id": "e_b_end", "source": "b", "target": "end"}
        ]
    })
}

fn build_engine(raw: Value, services: NodeServices, flag: &str) -> GraphEngine {
    let services = Arc::new(services);
    let factory = NodeFactory::new(Arc::clone(&services));
    let graph = Graph::init(&graph(raw), &factory, None).unwrap();
    let pool = VariablePool::new().with_user_inputs(inputs(json!({"flag": flag})));
    let state = GraphRuntimeState::new("exec-a", pool, chrono::Utc::now());
    GraphEngine::new(
        Arc::new(graph),
        state,
        Arc::new(EngineConfig::default()),
        services,
        EventEmitter::detached(),
    )
}

#[tokio::test]
async fn test_branch_selection_skips_unselected_path() {
    let handler = RecordingHandler::new();
    let services = services_with_handler(&Repos::new(), handler.clone());
    let mut engine = build_engine(branch_graph(), services, "yes");

    let outcome = engine.run().await;
    let GraphRunOutcome::Succeeded { outputs } = outcome else {
        panic!("unexpected outcome: {:?}", outcome);
    };
    assert_eq!(outputs["from_a"], json!("a"));
    assert_eq!(handler.calls(), vec!["a".to_string()]);

    let state = engine.runtime_state().state_manager();
    assert_eq!(state.node_state("a"), NodeState::Succeeded);
    assert_eq!(state.node_state("b"), NodeState::Skipped);
    assert_eq!(state.edge_state("e_if_b"), EdgeState::Skipped);
    assert_eq!(state.edge_state("e_b_end"), EdgeState::Skipped);
    assert_eq!(state.edge_state("e_a_end"), EdgeState::Taken);
    assert_eq!(state.node_state("end"), NodeState::Succeeded);
}

#[tokio::test]
async fn test_other_branch_runs_when_condition_is_false() {
    let handler = RecordingHandler::new();
    let services = services_with_handler(&Repos::new(), handler.clone());
    let mut engine = build_engine(branch_graph(), services, "no");

    let outcome = engine.run().await;
    assert_eq!(outcome.status(), WorkflowExecutionStatus::Succeeded);
    assert_eq!(outcome.outputs().unwrap()["from_a"], Value::Null);
    assert_eq!(handler.calls(), vec!["b".to_string()]);
    assert_eq!(
        engine.runtime_state().state_manager().node_state("a"),
        NodeState::Skipped
    );
}

#[tokio::test]
async fn test_skip_cascades_down_a_long_dead_branch() {
    let mut nodes = vec![
        json!({"id": "start", "data": {"type": "start", "variables": [{"variable": "flag"}]}}),
        json!({"id": "if", "data": {"type": "if-else", "cases": [{
            "case_id": "true",
            "conditions": [{"variable_selector": ["start", "flag"], "comparison_operator": "is", "value": "yes"}]
        }]}}),
        json!({"id": "live", "data": {"type": "answer", "answer": "live"}}),
    ];
    let mut edges = vec![
        json!({"source": "start", "target": "if"}),
        json!({"source": "if", "sourceHandle": "true", "target": "live"}),
        json!({"source": "if", "sourceHandle": "false", "target": "dead_0"}),
    ];
    for i in 0..50 {
        nodes.push(json!({"id": format!("dead_{}", i), "data": {"type": "answer", "answer": "x"}}));
        if i > 0 {
            edges.push(json!({"source": format!("dead_{}", i - 1), "target": format!("dead_{}", i)}));
        }
    }
    let raw = json!({"nodes": nodes, "edges": edges});
    let mut engine = build_engine(raw, NodeServices::default(), "yes");

    let outcome = engine.run().await;
    assert_eq!(outcome.outputs().unwrap()["answer"], json!("live"));
    let state = engine.runtime_state().state_manager();
    for i in 0..50 {
        assert_eq!(state.node_state(&format!("dead_{}", i)), NodeState::Skipped);
    }
}

#[tokio::test]
async fn test_every_node_runs_once_in_a_diamond() {
    let handler = RecordingHandler::new();
    let repos = Repos::new();
    let config = graph(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "left", "data": {"type": "tool"}},
            {"id": "right", "data": {"type": "tool"}},
            {"id": "join", "data": {"type": "tool"}},
            {"id": "tail", "data": {"type": "tool"}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "tail", "value_selector": ["tail", "result"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "left"},
            {"source": "start", "target": "right"},
            {"source": "left", "target": "join"},
            {"source": "right", "target": "join"},
            {"source": "join", "target": "tail"},
            {"source": "tail", "target": "end"}
        ]
    }));
    let entry = WorkflowEntry::builder(config)
        .services(services_with_handler(&repos, handler.clone()))
        .layer(repos.persistence_layer())
        .build()
        .await
        .unwrap();
    let execution_id = entry.execution_id().to_string();
    let (events, outcome) = entry.run().collect().await.unwrap();

    assert_eq!(outcome.status(), WorkflowExecutionStatus::Succeeded);
    let mut started = started_nodes(&events);
    started.sort();
    assert_eq!(started, vec!["end", "join", "left", "right", "start", "tail"]);
    for node in ["left", "right", "join", "tail"] {
        assert_eq!(handler.call_count(node), 1, "{} ran more than once", node);
    }

    use graphflow::WorkflowNodeExecutionRepository;
    let rows = repos
        .node_executions
        .list_by_execution(&execution_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);
}

#[tokio::test]
async fn test_parallel_iteration_continues_past_failed_item() {
    let handler = RecordingHandler::new();
    let config = graph(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start", "variables": [{"variable": "items"}]}},
            {"id": "iter", "data": {
                "type": "iteration",
                "iterator_selector": ["start", "items"],
                "output_selector": ["times_ten", "result"],
                "is_parallel": true,
                "parallel_nums": 2,
                "error_handle_mode": "continue-on-error",
                "start_node_id": "iter_start",
                "sub_graph": {
                    "nodes": [
                        {"id": "iter_start", "data": {"type": "iteration-start"}},
                        {"id": "times_ten", "data": {
                            "type": "tool",
                            "input": ["iter", "item"],
                            "fail_on": 2
                        }}
                    ],
                    "edges": [{"source": "iter_start", "target": "times_ten"}]
                }
            }},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "results", "value_selector": ["iter", "output"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "iter"},
            {"source": "iter", "target": "end"}
        ]
    }));
    let entry = WorkflowEntry::builder(config)
        .services(services_with_handler(&Repos::new(), handler.clone()))
        .user_inputs(inputs(json!({"items": [1, 2, 3]})))
        .build()
        .await
        .unwrap();
    let (events, outcome) = entry.run().collect().await.unwrap();

    assert_eq!(outcome.status(), WorkflowExecutionStatus::Succeeded);
    assert_eq!(outcome.outputs().unwrap()["results"], json!([10, null, 30]));
    assert_eq!(handler.call_count("times_ten"), 3);
    assert!(handler.max_running() <= 2);

    let failed: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            GraphEngineEvent::IterationItemFailed { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![1]);
    assert!(events
        .iter()
        .any(|e| matches!(e, GraphEngineEvent::IterationStarted { total: 3, .. })));
}

#[tokio::test]
async fn test_undefined_selector_fails_run_with_not_found() {
    let handler = RecordingHandler::new();
    let config = graph(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "reader", "data": {"type": "tool", "input": ["sys", "missing"]}},
            {"id": "end", "data": {"type": "end"}}
        ],
        "edges": [
            {"source": "start", "target": "reader"},
            {"source": "reader", "target": "end"}
        ]
    }));
    let entry = WorkflowEntry::builder(config)
        .services(services_with_handler(&Repos::new(), handler))
        .build()
        .await
        .unwrap();
    let (events, outcome) = entry.run().collect().await.unwrap();

    let GraphRunOutcome::Failed { error, .. } = outcome else {
        panic!("unexpected outcome: {:?}", outcome);
    };
    assert_eq!(error.node_id(), Some("reader"));
    assert!(error.to_string().contains("Variable not found"));
    assert!(matches!(
        events.last(),
        Some(GraphEngineEvent::GraphRunFailed { node_id: Some(id), .. }) if id == "reader"
    ));
    assert!(!started_nodes(&events).contains(&"end".to_string()));
}

#[tokio::test]
async fn test_same_inputs_give_same_outputs() {
    let config = json!({
        "nodes": [
            {"id": "start", "data": {"type": "start", "variables": [{"variable": "name"}]}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "name", "value_selector": ["start", "name"]},
                {"variable": "env", "value_selector": ["env", "region"]}
            ]}}
        ],
        "edges": [{"source": "start", "target": "end"}]
    });
    let mut seen = Vec::new();
    for _ in 0..2 {
        let entry = WorkflowEntry::builder(graph(config.clone()))
            .user_inputs(inputs(json!({"name": "ada"})))
            .environment_vars(inputs(json!({"region": "eu"})))
            .build()
            .await
            .unwrap();
        let outcome = entry.run().wait().await.unwrap();
        seen.push(outcome.outputs().unwrap().clone());
    }
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0]["env"], json!("eu"));
}

#[tokio::test]
async fn test_configuration_errors_surface_before_running() {
    let missing_handler = graph(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "llm", "data": {"type": "llm"}}
        ],
        "edges": [{"source": "start", "target": "llm"}]
    }));
    assert!(matches!(
        WorkflowEntry::builder(missing_handler).build().await,
        Err(WorkflowError::InvalidNodeConfig { node_id, .. }) if node_id == "llm"
    ));

    let bad_selector = graph(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "a", "data": {"type": "tool"}},
            {"id": "end", "data": {"type": "end", "outputs": [
                {"variable": "x", "value_selector": ["a", "nope"]}
            ]}}
        ],
        "edges": [
            {"source": "start", "target": "a"},
            {"source": "a", "target": "end"}
        ]
    }));
    let result = WorkflowEntry::builder(bad_selector)
        .services(services_with_handler(&Repos::new(), RecordingHandler::new()))
        .build()
        .await;
    assert!(matches!(
        result,
        Err(WorkflowError::InvalidNodeConfig { node_id, .. }) if node_id == "end"
    ));

    let bad_pattern = graph(json!({
        "nodes": [
            {"id": "start", "data": {"type": "start"}},
            {"id": "ask", "data": {
                "type": "human-input",
                "inputs": [{"variable": "code", "pattern": "("}],
                "user_actions": [{"id": "continue"}]
            }}
        ],
        "edges": [{"source": "start", "target": "ask"}]
    }));
    assert!(matches!(
        WorkflowEntry::builder(bad_pattern).build().await,
        Err(WorkflowError::InvalidNodeConfig { node_id, .. }) if node_id == "ask"
    ));

    assert!(matches!(
        graphflow::dsl::graph_config_from_value(json!({"nodes": {}})),
        Err(WorkflowError::GraphConfig(_))
    ));
}
