//! Text rendering of definition and response trees, for logs and debugging

use crate::node::OrchestrationNode;
use crate::snapshot::NodeResponse;

trait TreeSource {
    fn title(&self, is_root: bool) -> String;
    fn metadata(&self) -> Vec<String>;
    fn fields(&self) -> Vec<(&str, Vec<&Self>, bool)>;
}

impl TreeSource for OrchestrationNode {
    fn title(&self, is_root: bool) -> String {
        let symbol = if is_root {
            "ROOT"
        } else if self.operation.is_none() {
            "NO-OP"
        } else {
            "OPERATION"
        };
        format!("{}: {}{}", symbol, self.label(), key_suffix(self.key.as_deref()))
    }

    fn metadata(&self) -> Vec<String> {
        let mut meta = vec![format!("Variables: {}", self.variables.label())];
        if let Some(skip) = &self.skip {
            meta.push(format!("Can Skip: {}", skip.label()));
        }
        meta.push(format!(
            "Breaker: {} | On Failure: {}",
            if self.breaker.is_some() { "Yes" } else { "No" },
            self.on_failure.as_str()
        ));
        meta.push(format!(
            "Execution: {}",
            if self.parallel { "PARALLEL" } else { "SEQUENTIAL" }
        ));
        if self.eventualize.is_some() {
            meta.push("Eventualize: Callback".to_string());
        }
        meta
    }

    fn fields(&self) -> Vec<(&str, Vec<&Self>, bool)> {
        self.linked
            .iter()
            .map(|(field, linked)| {
                let children = linked.iter().map(|child| &**child).collect();
                (field.as_str(), children, linked.is_many())
            })
            .collect()
    }
}

impl TreeSource for NodeResponse {
    fn title(&self, is_root: bool) -> String {
        let outcome = &self.outcome;
        let symbol = if is_root {
            "ROOT"
        } else if outcome.status.skipped {
            "SKIPPED"
        } else if outcome.operation.is_none() {
            "NO-OP"
        } else {
            "OPERATION"
        };
        let name = outcome.name.as_deref().unwrap_or("NO_OP");
        format!("{}: {}{}", symbol, name, key_suffix(outcome.key.as_deref()))
    }

    fn metadata(&self) -> Vec<String> {
        let outcome = &self.outcome;
        let mut meta = Vec::new();

        let status = if outcome.exists_eventual_delivery_task {
            "EVENTUAL DELIVERY".to_string()
        } else if !outcome.errors.is_empty() {
            format!("ERROR ({}x)", outcome.errors.len())
        } else if outcome.status.skipped {
            "SKIPPED".to_string()
        } else if outcome.data.is_some() || outcome.status.resolved {
            "RESOLVED".to_string()
        } else {
            outcome.status.phase.as_str().to_uppercase()
        };
        meta.push(format!("Status: {}", status));

        if let Some(time) = outcome.status.time_ms {
            meta.push(format!("Time: {}ms", time));
        }
        if outcome.status.previously_resolved {
            meta.push("Resumed".to_string());
        }
        meta
    }

    fn fields(&self) -> Vec<(&str, Vec<&Self>, bool)> {
        self.linked
            .iter()
            .map(|(field, linked)| (field.as_str(), linked.iter().collect(), linked.is_many()))
            .collect()
    }
}

fn key_suffix(key: Option<&str>) -> String {
    key.map(|k| format!(" (key {})", k)).unwrap_or_default()
}

fn branch(is_last: bool) -> &'static str {
    if is_last {
        "└── "
    } else {
        "├── "
    }
}

fn rail(is_last: bool) -> &'static str {
    if is_last {
        "    "
    } else {
        "│   "
    }
}

fn render<T: TreeSource>(node: &T, indent: &str, connection: &str, out: &mut String) {
    let is_root = connection.is_empty() && indent.is_empty();
    out.push_str(&format!("{}{}{}\n", indent, connection, node.title(is_root)));

    let inner = format!("{}    ", indent);
    let meta = node.metadata();
    if !meta.is_empty() {
        out.push_str(&format!("{}{}\n", inner, meta.join(" | ")));
    }

    let fields = node.fields();
    let count = fields.len();
    for (idx, (field, children, is_list)) in fields.into_iter().enumerate() {
        let last_field = idx + 1 == count;
        out.push_str(&format!(
            "{}{}FIELD '{}'{}:\n",
            inner,
            branch(last_field),
            field,
            if is_list { " [LIST]" } else { "" }
        ));
        let field_indent = format!("{}{}", inner, rail(last_field));

        if is_list {
            let items = children.len();
            for (item_idx, child) in children.into_iter().enumerate() {
                let last_item = item_idx + 1 == items;
                out.push_str(&format!("{}{}ITEM [{}]:\n", field_indent, branch(last_item), item_idx));
                let item_indent = format!("{}{}", field_indent, rail(last_item));
                render(child, &item_indent, branch(true), out);
            }
        } else {
            for child in children {
                render(child, &field_indent, branch(true), out);
            }
        }
    }
}

pub fn render_definition(node: &OrchestrationNode) -> String {
    let mut out = String::new();
    render(node, "", "", &mut out);
    out
}

pub fn render_response(response: &NodeResponse) -> String {
    let mut out = String::new();
    render(response, "", "", &mut out);
    out
}

impl std::fmt::Display for NodeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render_response(self))
    }
}
