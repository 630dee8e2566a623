//! Future read-set computation: which KVS keys a DAG's not-yet-run
//! successors will read, given only their static arguments.

use std::collections::BTreeSet;

use dagflow_types::Schedule;

/// BFS over `schedule.dag.connections` starting at `schedule.target_function`,
/// collecting every reference key named in a descendant node's static
/// arguments. The target function's own arguments are excluded: this is a
/// *future* read set, used to widen a causal snapshot or seed a prefetch
/// ahead of execution, not a description of what's being read right now.
pub fn compute_future_read_set(schedule: &Schedule) -> BTreeSet<String> {
    let mut children = BTreeSet::new();
    let mut frontier: BTreeSet<&str> = BTreeSet::new();
    frontier.insert(schedule.target_function.as_str());

    while !frontier.is_empty() {
        let mut next = BTreeSet::new();
        for conn in &schedule.dag.connections {
            if frontier.contains(conn.source.as_str()) {
                children.insert(conn.sink.as_str());
                next.insert(conn.sink.as_str());
            }
        }
        frontier = next;
    }

    let mut read_set = BTreeSet::new();
    for child in children {
        let Some(arglist) = schedule.arguments.get(child) else { continue };
        for raw in arglist.iter() {
            let Ok(value) = dagflow_serde::load(raw) else { continue };
            if let Some(reference) = value.as_reference() {
                read_set.insert(reference.key.clone());
            }
        }
    }
    read_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagflow_serde::Value;
    use dagflow_types::{ArgList, Connection, Dag, FunctionNode, Reference};
    use std::collections::BTreeMap;

    fn schedule_with(target: &str, connections: Vec<Connection>, arguments: BTreeMap<String, ArgList>) -> Schedule {
        Schedule {
            id: uuid::Uuid::nil(),
            dag: Dag {
                name: "d".into(),
                functions: vec![FunctionNode::normal("a"), FunctionNode::normal("b"), FunctionNode::normal("c")],
                connections,
            },
            target_function: target.into(),
            arguments,
            locations: Default::default(),
            output_key: None,
            response_address: None,
            continuation: None,
            client_id: 0,
            consistency: dagflow_types::Consistency::Normal,
            start_time: chrono::Utc::now(),
        }
    }

    #[test]
    fn collects_reference_keys_from_descendants_excluding_self() {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "a".into(),
            ArgList(vec![dagflow_serde::dump(&Value::Reference(Reference::new("own-arg", true))).unwrap()]),
        );
        arguments.insert(
            "b".into(),
            ArgList(vec![dagflow_serde::dump(&Value::Reference(Reference::new("b-key", true))).unwrap()]),
        );
        arguments.insert(
            "c".into(),
            ArgList(vec![dagflow_serde::dump(&Value::Reference(Reference::new("c-key", true))).unwrap()]),
        );
        let schedule = schedule_with(
            "a",
            vec![Connection { source: "a".into(), sink: "b".into() }, Connection { source: "b".into(), sink: "c".into() }],
            arguments,
        );

        let read_set = compute_future_read_set(&schedule);
        assert_eq!(read_set, BTreeSet::from(["b-key".to_string(), "c-key".to_string()]));
    }

    #[test]
    fn sink_node_has_empty_future_read_set() {
        let schedule = schedule_with("a", vec![], Default::default());
        assert!(compute_future_read_set(&schedule).is_empty());
    }
}
