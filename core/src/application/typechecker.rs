// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Typechecking of submitted task code against the synthesized tool
//! declarations. Degrades to success when no real checking engine is wired
//! in, by construction: [`NullChecker`] is the default and always reports ok.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::tool::ToolDescriptor;

const PRELUDE_LINES: usize = 4;
const FUNCTION_HEADER_LINES: usize = 1;

#[derive(Debug, Clone)]
pub struct TypecheckDiagnostic {
    pub line: Option<u32>,
    pub message: String,
}

impl std::fmt::Display for TypecheckDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "Line {line}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypecheckResult {
    pub ok: bool,
    pub errors: Vec<TypecheckDiagnostic>,
}

impl TypecheckResult {
    pub fn success() -> Self {
        Self { ok: true, errors: Vec::new() }
    }
}

/// A raw diagnostic straight from the checking engine, in the engine's own
/// coordinate space (line numbers over the *checked unit*, not user code).
pub struct RawDiagnostic {
    pub line: Option<u32>,
    pub message: String,
}

#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, checked_unit: &str) -> Vec<RawDiagnostic>;
}

/// Default checker: degrades to success unconditionally. Swapping in a real
/// engine only requires implementing [`Checker`] and wiring it in place of
/// this type — callers never need to know which is active.
#[derive(Default)]
pub struct NullChecker;

#[async_trait]
impl Checker for NullChecker {
    async fn check(&self, _checked_unit: &str) -> Vec<RawDiagnostic> {
        Vec::new()
    }
}

/// Builds the checked unit (alias block + `declare const tools` + prelude +
/// wrapped user code) and runs it through `checker`, remapping line numbers
/// back onto the user's original source.
pub async fn typecheck_code(code: &str, tools: &[ToolDescriptor], checker: &dyn Checker) -> TypecheckResult {
    let (checked_unit, alias_line_count) = build_checked_unit(code, tools);
    let diagnostics = checker.check(&checked_unit).await;

    if diagnostics.is_empty() {
        return TypecheckResult::success();
    }

    let offset = alias_line_count + PRELUDE_LINES + FUNCTION_HEADER_LINES;
    let errors = diagnostics
        .into_iter()
        .map(|d| {
            let remapped = d.line.and_then(|line| {
                let relative = line as i64 - offset as i64;
                if relative > 0 {
                    Some(relative as u32)
                } else {
                    None
                }
            });
            TypecheckDiagnostic {
                line: remapped,
                message: d.message,
            }
        })
        .collect();

    TypecheckResult { ok: false, errors }
}

fn build_checked_unit(code: &str, tools: &[ToolDescriptor]) -> (String, usize) {
    let mut aliases: HashMap<String, String> = HashMap::new();
    for tool in tools {
        if let Some(schema_types) = &tool.schema_types {
            for (name, body) in schema_types {
                aliases.entry(name.clone()).or_insert_with(|| body.clone());
            }
        }
    }

    let mut alias_lines: Vec<String> = aliases
        .into_iter()
        .map(|(name, body)| format!("type {name} = {body};"))
        .collect();
    alias_lines.sort();
    let alias_block = alias_lines.join("\n");
    let alias_line_count = alias_lines.len();

    let tools_decl = build_tools_declaration(tools);

    let prelude = [
        "declare const console: { log(...a: unknown[]): void; info(...a: unknown[]): void; warn(...a: unknown[]): void; error(...a: unknown[]): void; };",
        "declare function setTimeout(fn: () => void, ms: number): number;",
        "declare function clearTimeout(id: number): void;",
        &tools_decl,
    ]
    .join("\n");

    let checked_unit = if alias_line_count > 0 {
        format!("{alias_block}\n{prelude}\nasync function __task__() {{\n{code}\n}}\n")
    } else {
        format!("{prelude}\nasync function __task__() {{\n{code}\n}}\n")
    };

    (checked_unit, alias_line_count)
}

/// Nests each dot-separated tool path segment into type literals, e.g.
/// `stripe.customers.create` becomes `{ stripe: { customers: { create(...): ... } } }`.
fn build_tools_declaration(tools: &[ToolDescriptor]) -> String {
    #[derive(Default)]
    struct Node {
        children: HashMap<String, Node>,
        leaf: Option<(String, String)>,
    }

    let mut root = Node::default();
    for tool in tools {
        let segments: Vec<&str> = tool.path.split('.').collect();
        let mut node = &mut root;
        for segment in &segments[..segments.len().saturating_sub(1)] {
            node = node.children.entry(segment.to_string()).or_default();
        }
        if let Some(last) = segments.last() {
            let args = tool.args_type.clone().unwrap_or_else(|| "Record<string, unknown>".to_string());
            let returns = tool.returns_type.clone().unwrap_or_else(|| "unknown".to_string());
            node.children.entry(last.to_string()).or_default().leaf = Some((args, returns));
        }
    }

    fn render(node: &Node) -> String {
        let mut entries: Vec<String> = Vec::new();
        let mut keys: Vec<&String> = node.children.keys().collect();
        keys.sort();
        for key in keys {
            let child = &node.children[key];
            if let Some((args, returns)) = &child.leaf {
                entries.push(format!("{key}(input: {args}): Promise<{returns}>;"));
            } else {
                entries.push(format!("{key}: {};", render(child)));
            }
        }
        format!("{{ {} }}", entries.join(" "))
    }

    format!("declare const tools: {};", render(&root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool::ApprovalRequirement;

    #[tokio::test]
    async fn null_checker_always_succeeds() {
        let tools = vec![ToolDescriptor::new("stripe.customers.create".into(), "".into(), ApprovalRequirement::Required)];
        let result = typecheck_code("await tools.stripe.customers.create({});", &tools, &NullChecker).await;
        assert!(result.ok);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn tools_declaration_nests_by_dot_segment() {
        let tools = vec![ToolDescriptor::new("stripe.customers.create".into(), "".into(), ApprovalRequirement::Required)];
        let decl = build_tools_declaration(&tools);
        assert!(decl.contains("stripe"));
        assert!(decl.contains("customers"));
        assert!(decl.contains("create"));
    }

    #[test]
    fn non_positive_remapped_lines_drop_the_prefix() {
        let diag = TypecheckDiagnostic { line: None, message: "boom".into() };
        assert_eq!(diag.to_string(), "boom");
        let diag = TypecheckDiagnostic { line: Some(3), message: "boom".into() };
        assert_eq!(diag.to_string(), "Line 3: boom");
    }
}
