use proptest::prelude::*;
use strata_graph::prelude::*;

fn node_name(i: usize) -> String {
    format!("n{i}")
}

fn declare(node_count: usize, edges: &[(usize, usize)]) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    for i in 0..node_count {
        let mut decl = ResourceDecl::new(node_name(i), "test.resource");
        for (k, (from, to)) in edges.iter().enumerate() {
            if *to == i && *from < node_count {
                decl = decl.property(format!("dep{k}"), Value::reference(node_name(*from), "id"));
            }
        }
        builder.add_node(decl);
    }
    builder
}

proptest! {
    #[test]
    fn prop_forward_edges_always_build_and_plan_respects_edges(
        node_count in 1..25usize,
        raw_edges in proptest::collection::vec((0..25usize, 0..25usize), 0..60)
    ) {
        // Only keep edges from a lower to a higher index, which cannot form a cycle
        let edges: Vec<(usize, usize)> = raw_edges
            .into_iter()
            .filter(|(a, b)| a < b && *b < node_count)
            .collect();
        let graph = declare(node_count, &edges).build().expect("forward edges are acyclic");
        let plan = graph.plan();

        prop_assert!(plan.respects(&graph));
        prop_assert_eq!(plan.node_count(), node_count);
        for edge in graph.edges() {
            prop_assert!(plan.batch_of(&edge.from) < plan.batch_of(&edge.to));
        }
    }

    #[test]
    fn prop_arbitrary_edges_either_cycle_or_valid_plan(
        node_count in 1..15usize,
        raw_edges in proptest::collection::vec((0..15usize, 0..15usize), 0..40)
    ) {
        let edges: Vec<(usize, usize)> = raw_edges
            .into_iter()
            .filter(|(a, b)| *a < node_count && *b < node_count)
            .collect();
        match declare(node_count, &edges).build() {
            Ok(graph) => prop_assert!(graph.plan().respects(&graph)),
            Err(GraphError::Cycle { path }) => {
                prop_assert!(path.len() >= 2);
                prop_assert_eq!(path.first(), path.last());
            }
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }

    #[test]
    fn prop_injected_cycle_is_always_rejected(node_count in 2..20usize) {
        // Chain n0 -> n1 -> ... -> n(k-1) -> n0
        let mut edges: Vec<(usize, usize)> = (0..node_count - 1).map(|i| (i, i + 1)).collect();
        edges.push((node_count - 1, 0));
        let result = declare(node_count, &edges).build();
        prop_assert!(matches!(result, Err(GraphError::Cycle { .. })), "expected a cycle error");
    }
}

#[test]
fn batches_have_no_internal_edges() {
    let graph = declare(6, &[(0, 2), (1, 2), (2, 3), (2, 4), (4, 5)]).build().unwrap();
    let plan = graph.plan();
    for batch in plan.batches() {
        for a in batch {
            for b in batch {
                assert!(!graph.dependencies(a).contains(&b), "{a} and {b} share a batch");
            }
        }
    }
}
