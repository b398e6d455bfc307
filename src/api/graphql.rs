//! Minimal GraphQL operation builder.
//!
//! Operations address a single top-level field. Every argument is passed as a
//! variable of the same name, so
//!
//! ```text
//! Operation::query("schedule").argument("ID", "Int!", json!(7)).select("ID name")
//! ```
//!
//! renders as `query($ID: Int!) { schedule(ID: $ID) { ID name } }`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::ProviderError;

/// Whether an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A read-only query.
    Query,
    /// A mutation.
    Mutation,
}

#[derive(Debug, Clone, PartialEq)]
struct Argument {
    name: String,
    graphql_type: String,
}

/// A single-field GraphQL query or mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    kind: OperationKind,
    field: String,
    arguments: Vec<Argument>,
    selection: String,
    variables: Map<String, Value>,
}

impl Operation {
    fn new(kind: OperationKind, field: &str) -> Self {
        Self {
            kind,
            field: field.to_string(),
            arguments: Vec::new(),
            selection: String::new(),
            variables: Map::new(),
        }
    }

    /// Start a query on `field`.
    pub fn query(field: &str) -> Self {
        Self::new(OperationKind::Query, field)
    }

    /// Start a mutation on `field`.
    pub fn mutation(field: &str) -> Self {
        Self::new(OperationKind::Mutation, field)
    }

    /// Pass `value` as argument `name` of GraphQL type `graphql_type`.
    pub fn argument(mut self, name: &str, graphql_type: &str, value: Value) -> Self {
        self.arguments.push(Argument {
            name: name.to_string(),
            graphql_type: graphql_type.to_string(),
        });
        self.variables.insert(name.to_string(), value);
        self
    }

    /// Set the selection set of the field.
    pub fn select(mut self, selection: &str) -> Self {
        self.selection = selection.split_whitespace().collect::<Vec<_>>().join(" ");
        self
    }

    /// The top-level field this operation addresses.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Render the operation document.
    pub fn render(&self) -> String {
        let keyword = match self.kind {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        };

        let mut doc = String::from(keyword);
        if !self.arguments.is_empty() {
            let declarations: Vec<String> = self
                .arguments
                .iter()
                .map(|a| format!("${}: {}", a.name, a.graphql_type))
                .collect();
            doc.push_str(&format!("({})", declarations.join(", ")));
        }

        doc.push_str(" { ");
        doc.push_str(&self.field);
        if !self.arguments.is_empty() {
            let passed: Vec<String> = self
                .arguments
                .iter()
                .map(|a| format!("{}: ${}", a.name, a.name))
                .collect();
            doc.push_str(&format!("({})", passed.join(", ")));
        }
        if !self.selection.is_empty() {
            doc.push_str(&format!(" {{ {} }}", self.selection));
        }
        doc.push_str(" }");
        doc
    }

    /// The JSON request body.
    pub fn body(&self) -> Value {
        json!({
            "query": self.render(),
            "variables": Value::Object(self.variables.clone()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Pull the operation's field out of a GraphQL response body.
pub(super) fn extract<T: DeserializeOwned>(
    operation: &Operation,
    body: &str,
) -> Result<T, ProviderError> {
    let response: GraphqlResponse = serde_json::from_str(body)?;

    if !response.errors.is_empty() {
        let message = response
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if message.to_ascii_lowercase().contains("not found") {
            return Err(ProviderError::NotFound(message));
        }
        return Err(ProviderError::Api {
            status: 200,
            message,
        });
    }

    let value = response
        .data
        .and_then(|mut data| data.remove(operation.field()))
        .unwrap_or(Value::Null);
    if value.is_null() && operation.kind() == OperationKind::Query {
        return Err(ProviderError::NotFound(format!(
            "{} returned no data",
            operation.field()
        )));
    }
    Ok(serde_json::from_value(value)?)
}
