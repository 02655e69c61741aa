//! Caller-facing view of an executed tree
//!
//! Each node is reduced to its first data field; a node whose operation
//! returned errors parses to a [`NodeFailure`] in its slot, so one failed
//! child never hides the results of its siblings.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use vault_core::GraphQLError;

use crate::node::Linked;
use crate::snapshot::NodeResponse;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", summary(.errors))]
pub struct NodeFailure {
    pub name: Option<String>,
    pub errors: Vec<GraphQLError>,
}

fn summary(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ParsedResult = std::result::Result<ParsedNode, NodeFailure>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    /// Value of the first field of `data`
    pub value: Option<Value>,
    pub data: Option<Value>,
    pub extensions: Map<String, Value>,
    /// Node still waiting for eventual delivery
    pub eventual: bool,
    pub linked: BTreeMap<String, Linked<ParsedResult>>,
}

impl ParsedNode {
    pub fn get(&self, field: &str) -> Option<&Linked<ParsedResult>> {
        self.linked.get(field)
    }

    /// Single child under `field`, if it parsed successfully
    pub fn child(&self, field: &str) -> Option<&ParsedNode> {
        match self.linked.get(field)? {
            Linked::One(Ok(node)) => Some(node),
            _ => None,
        }
    }
}

impl NodeResponse {
    pub fn parse(&self) -> ParsedResult {
        if !self.outcome.errors.is_empty() {
            return Err(NodeFailure {
                name: self.outcome.name.clone(),
                errors: self.outcome.errors.clone(),
            });
        }

        let value = self
            .outcome
            .data
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|data| data.values().next().cloned());

        Ok(ParsedNode {
            value,
            data: self.outcome.data.clone(),
            extensions: self.outcome.extensions.clone(),
            eventual: self.exists_eventual(),
            linked: self
                .linked
                .iter()
                .map(|(field, linked)| (field.clone(), linked.map(NodeResponse::parse)))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(data: Value) -> NodeResponse {
        let mut response = NodeResponse::default();
        response.outcome.data = Some(data);
        response
    }

    #[test]
    fn test_value_is_first_data_field() {
        let parsed = node(json!({"createOrder": {"id": 9}, "other": 1})).parse().unwrap();
        assert_eq!(parsed.value, Some(json!({"id": 9})));
    }

    #[test]
    fn test_failed_child_does_not_hide_siblings() {
        let mut failed = NodeResponse::default();
        failed.outcome.name = Some("Pay".into());
        failed.outcome.errors = vec![GraphQLError::new("card declined")];

        let mut root = node(json!({"order": 1}));
        root.linked.insert("pay".into(), Linked::One(failed));
        root.linked
            .insert("ship".into(), Linked::Many(vec![node(json!({"ship": true}))]));

        let parsed = root.parse().unwrap();
        match parsed.get("pay") {
            Some(Linked::One(Err(failure))) => {
                assert_eq!(failure.to_string(), "card declined");
                assert_eq!(failure.name.as_deref(), Some("Pay"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parsed.get("ship") {
            Some(Linked::Many(items)) => {
                assert_eq!(items[0].as_ref().unwrap().value, Some(json!(true)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_root_errors_fail_parse() {
        let mut root = NodeResponse::default();
        root.outcome.errors = vec![GraphQLError::new("a"), GraphQLError::new("b")];
        assert_eq!(root.parse().unwrap_err().to_string(), "a; b");
    }
}
