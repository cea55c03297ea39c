// Phase bodies. Each phase issues its backend calls through the router and
// folds the answers into one output map. Failures are captured in
// `PhaseOutcome::error`, never returned.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Map, Value};

use crate::error::GatewayError;
use crate::router::McpRouter;

use super::PhaseName;

/// Inputs shared by every phase of a session run.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseContext {
    pub owner: String,
    pub repo: String,
    pub directory: Option<String>,
    /// Fan `test.run` out per group.
    pub parallel: bool,
    /// File one issue per TODO category.
    pub create_issues: bool,
}

impl PhaseContext {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            directory: None,
            parallel: false,
            create_issues: true,
        }
    }

    /// Apply per-call overrides (`directory`, `parallel`, `createIssues`).
    /// Values of the wrong type are ignored.
    pub fn with_overrides(mut self, args: &Map<String, Value>) -> Self {
        if let Some(dir) = args.get("directory").and_then(Value::as_str) {
            self.directory = Some(dir.to_string());
        }
        if let Some(parallel) = args.get("parallel").and_then(Value::as_bool) {
            self.parallel = parallel;
        }
        if let Some(create) = args.get("createIssues").and_then(Value::as_bool) {
            self.create_issues = create;
        }
        self
    }

    fn base_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("owner".into(), Value::String(self.owner.clone()));
        params.insert("repo".into(), Value::String(self.repo.clone()));
        if let Some(dir) = &self.directory {
            params.insert("directory".into(), Value::String(dir.clone()));
        }
        params
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOutcome {
    pub output: Map<String, Value>,
    pub error: Option<String>,
}

impl PhaseOutcome {
    fn new(output: Value, error: Option<String>) -> Self {
        let output = match output {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { output, error }
    }
}

pub(crate) async fn run(router: &McpRouter, phase: PhaseName, ctx: &PhaseContext) -> PhaseOutcome {
    match phase {
        PhaseName::Testing => testing(router, ctx).await,
        PhaseName::Issues => issues(router, ctx).await,
        PhaseName::Todos => todos(router, ctx).await,
    }
}

// ── testing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TestTally {
    passed: u64,
    failed: u64,
    failures: Vec<Value>,
}

impl TestTally {
    fn absorb(&mut self, report: &Value) {
        let passed = report.get("passed").and_then(Value::as_u64).unwrap_or(0);
        let failures = report
            .get("failures")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let failed = report
            .get("failed")
            .and_then(Value::as_u64)
            .unwrap_or(failures.len() as u64);
        self.passed += passed;
        self.failed += failed;
        self.failures.extend(failures);
    }
}

async fn testing(router: &McpRouter, ctx: &PhaseContext) -> PhaseOutcome {
    let empty = || json!({ "total": 0, "passed": 0, "failed": 0, "failures": [], "groups": [] });

    let discovered = match router.call("test.discover", ctx.base_params()).await {
        Ok(v) => v,
        Err(e) => return PhaseOutcome::new(empty(), Some(format!("test discovery failed: {e}"))),
    };
    let groups = test_groups(&discovered);
    if groups.is_empty() {
        tracing::warn!(owner = %ctx.owner, repo = %ctx.repo, "workflow: no tests found");
        return PhaseOutcome::new(empty(), Some("no tests found".to_string()));
    }
    let names: Vec<String> = groups.iter().map(group_name).collect();

    // Completion order: the first failure recorded is the first one observed.
    let reports: Vec<Result<Value, GatewayError>> = if ctx.parallel {
        groups
            .iter()
            .map(|group| {
                let mut params = ctx.base_params();
                params.insert("group".into(), group.clone());
                router.call("test.run", params)
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await
    } else {
        let mut params = ctx.base_params();
        match discovered.get("groups") {
            Some(Value::Array(_)) => params.insert("groups".into(), Value::Array(groups.clone())),
            _ => params.insert("tests".into(), Value::Array(discovered_tests(&discovered).to_vec())),
        };
        vec![router.call("test.run", params).await]
    };

    let mut tally = TestTally::default();
    let mut first_error = None;
    for report in reports {
        match report {
            Ok(r) => tally.absorb(&r),
            Err(e) if first_error.is_none() => first_error = Some(format!("test run failed: {e}")),
            Err(_) => {}
        }
    }

    let error = first_error.or_else(|| (tally.failed > 0).then(|| format!("{} tests failed", tally.failed)));
    PhaseOutcome::new(
        json!({
            "total": tally.passed + tally.failed,
            "passed": tally.passed,
            "failed": tally.failed,
            "failures": tally.failures,
            "groups": names,
        }),
        error,
    )
}

/// `{"tests": [...]}` or a bare array.
fn discovered_tests(discovered: &Value) -> &[Value] {
    discovered
        .get("tests")
        .and_then(Value::as_array)
        .or_else(|| discovered.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `{"groups": [...]}` as given, otherwise every discovered test as one group.
fn test_groups(discovered: &Value) -> Vec<Value> {
    if let Some(groups) = discovered.get("groups").and_then(Value::as_array) {
        return groups.clone();
    }
    match discovered_tests(discovered) {
        [] => Vec::new(),
        tests => vec![json!({ "name": "all", "tests": tests })],
    }
}

fn group_name(group: &Value) -> String {
    group
        .as_str()
        .or_else(|| group.get("name").and_then(Value::as_str))
        .unwrap_or("unnamed")
        .to_string()
}

// ── issues ──────────────────────────────────────────────────────────────────

async fn issues(router: &McpRouter, ctx: &PhaseContext) -> PhaseOutcome {
    let mut params = ctx.base_params();
    params.remove("directory");
    params.insert("state".into(), json!("open"));

    let listed = match router.call("github.issues.list", params).await {
        Ok(v) => list_field(v, "issues"),
        Err(e) => {
            return PhaseOutcome::new(
                json!({ "count": 0, "prioritized": [] }),
                Some(format!("listing issues failed: {e}")),
            );
        }
    };
    if listed.is_empty() {
        return PhaseOutcome::new(json!({ "count": 0, "prioritized": [] }), None);
    }

    let mut params = ctx.base_params();
    params.remove("directory");
    params.insert("issues".into(), Value::Array(listed.clone()));

    let (deps, error) = match router.call("github.issues.dependencies", params).await {
        Ok(v) => (dependency_map(&v), None),
        Err(e) => (HashMap::new(), Some(format!("resolving issue dependencies failed: {e}"))),
    };

    let prioritized = prioritize(&listed, &deps);
    PhaseOutcome::new(
        json!({ "count": listed.len(), "prioritized": prioritized }),
        error,
    )
}

/// `{"<number>": [numbers]}`, optionally nested under `dependencies`.
fn dependency_map(value: &Value) -> HashMap<u64, Vec<u64>> {
    let map = value
        .get("dependencies")
        .and_then(Value::as_object)
        .or_else(|| value.as_object());
    let Some(map) = map else {
        return HashMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let number = k.parse::<u64>().ok()?;
            let on: Vec<u64> = v.as_array()?.iter().filter_map(Value::as_u64).collect();
            Some((number, on))
        })
        .collect()
}

/// Dependency-first ordering: an issue comes after every listed issue it
/// depends on. Otherwise listing order is kept; cycles break at first visit.
pub(crate) fn prioritize(issues: &[Value], deps: &HashMap<u64, Vec<u64>>) -> Vec<Value> {
    let by_number: HashMap<u64, &Value> = issues
        .iter()
        .filter_map(|i| Some((i.get("number")?.as_u64()?, i)))
        .collect();

    fn visit(
        number: u64,
        by_number: &HashMap<u64, &Value>,
        deps: &HashMap<u64, Vec<u64>>,
        seen: &mut HashSet<u64>,
        out: &mut Vec<Value>,
    ) {
        if !seen.insert(number) {
            return;
        }
        for dep in deps.get(&number).into_iter().flatten() {
            if by_number.contains_key(dep) {
                visit(*dep, by_number, deps, seen, out);
            }
        }
        if let Some(issue) = by_number.get(&number) {
            out.push((*issue).clone());
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(issues.len());
    for issue in issues {
        match issue.get("number").and_then(Value::as_u64) {
            Some(n) => visit(n, &by_number, deps, &mut seen, &mut out),
            None => out.push(issue.clone()),
        }
    }
    out
}

// ── todos ───────────────────────────────────────────────────────────────────

async fn todos(router: &McpRouter, ctx: &PhaseContext) -> PhaseOutcome {
    let empty = || json!({ "found": 0, "categories": {}, "created": [] });

    let found = match router.call("todo.scan", ctx.base_params()).await {
        Ok(v) => list_field(v, "todos"),
        Err(e) => return PhaseOutcome::new(empty(), Some(format!("scanning TODOs failed: {e}"))),
    };
    if found.is_empty() {
        return PhaseOutcome::new(empty(), None);
    }

    let mut params = Map::new();
    params.insert("todos".into(), Value::Array(found.clone()));
    let categorized = match router.call("todo.categorize", params).await {
        Ok(v) => categories(&v),
        Err(e) => {
            return PhaseOutcome::new(
                json!({ "found": found.len(), "categories": {}, "created": [] }),
                Some(format!("categorizing TODOs failed: {e}")),
            );
        }
    };

    let counts: Map<String, Value> = categorized
        .iter()
        .map(|(name, items)| (name.clone(), json!(items.len())))
        .collect();

    let mut created = Vec::new();
    let mut first_error = None;
    if ctx.create_issues {
        for (category, items) in &categorized {
            let mut params = ctx.base_params();
            params.remove("directory");
            params.insert("title".into(), json!(format!("TODO: {} tasks", capitalize(category))));
            params.insert("body".into(), json!(issue_body(items)));
            params.insert("labels".into(), json!([category]));

            match router.call("github.issues.create", params).await {
                Ok(issue) => created.push(issue),
                Err(e) => {
                    tracing::warn!(category = %category, "workflow: creating TODO issue failed: {}", e);
                    if first_error.is_none() {
                        first_error = Some(format!("creating issue for '{category}' failed: {e}"));
                    }
                }
            }
        }
    }

    PhaseOutcome::new(
        json!({ "found": found.len(), "categories": counts, "created": created }),
        first_error,
    )
}

/// `{category: [todo]}`, optionally nested under `categories`.
fn categories(value: &Value) -> BTreeMap<String, Vec<Value>> {
    let map = value
        .get("categories")
        .and_then(Value::as_object)
        .or_else(|| value.as_object());
    map.into_iter()
        .flatten()
        .filter_map(|(name, items)| Some((name.clone(), items.as_array()?.clone())))
        .filter(|(_, items)| !items.is_empty())
        .collect()
}

fn issue_body(items: &[Value]) -> String {
    items
        .iter()
        .map(|todo| {
            let text = todo
                .get("text")
                .and_then(Value::as_str)
                .or_else(|| todo.as_str())
                .unwrap_or("(no text)");
            match (todo.get("file").and_then(Value::as_str), todo.get("line")) {
                (Some(file), Some(line)) => format!("- {text} ({file}:{line})"),
                (Some(file), None) => format!("- {text} ({file})"),
                _ => format!("- {text}"),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A bare array, or the array under `field`.
fn list_field(value: Value, field: &str) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::envelope::RpcError;
    use crate::registry::{BackendDescriptor, CapabilityMap, NamespaceCapability, ServerRegistry};
    use crate::retry::RetryPolicy;
    use crate::transport::testing::{unreachable, Reply, ScriptedTransport};

    async fn router(transport: ScriptedTransport) -> (McpRouter, Arc<ScriptedTransport>) {
        let registry = ServerRegistry::new();
        registry
            .register(BackendDescriptor::new("github", "http://gh"))
            .await
            .unwrap();
        let mut caps = CapabilityMap::new();
        caps.insert("test".into(), NamespaceCapability::new("1.0", ["discover", "run"]));
        caps.insert("todo".into(), NamespaceCapability::new("1.0", ["scan", "categorize"]));
        registry
            .register(BackendDescriptor::new("main", "http://main").with_capabilities(caps))
            .await
            .unwrap();
        let transport = Arc::new(transport);
        let router = McpRouter::new(registry, transport.clone(), RetryPolicy::new(1, Duration::from_millis(1)));
        (router, transport)
    }

    fn issue(n: u64) -> Value {
        json!({ "number": n, "title": format!("issue {n}") })
    }

    fn numbers(issues: &[Value]) -> Vec<u64> {
        issues.iter().filter_map(|i| i["number"].as_u64()).collect()
    }

    #[test]
    fn prioritize_puts_dependencies_first() {
        let issues = vec![issue(1), issue(2), issue(3)];
        let deps = HashMap::from([(1, vec![3]), (3, vec![2])]);
        assert_eq!(numbers(&prioritize(&issues, &deps)), vec![2, 3, 1]);
    }

    #[test]
    fn prioritize_survives_cycles_and_unknown_deps() {
        let issues = vec![issue(1), issue(2)];
        let deps = HashMap::from([(1, vec![2, 99]), (2, vec![1])]);
        assert_eq!(numbers(&prioritize(&issues, &deps)), vec![2, 1]);
    }

    #[test]
    fn overrides_only_apply_well_typed_values() {
        let mut args = Map::new();
        args.insert("directory".into(), json!("/src"));
        args.insert("parallel".into(), json!("yes"));
        args.insert("createIssues".into(), json!(false));
        let ctx = PhaseContext::new("acme", "widget").with_overrides(&args);
        assert_eq!(ctx.directory.as_deref(), Some("/src"));
        assert!(!ctx.parallel);
        assert!(!ctx.create_issues);
    }

    #[test]
    fn issue_body_lists_locations() {
        let body = issue_body(&[
            json!({ "text": "handle EOF", "file": "src/lib.rs", "line": 12 }),
            json!("bare"),
        ]);
        assert_eq!(body, "- handle EOF (src/lib.rs:12)\n- bare");
        assert_eq!(capitalize("refactor"), "Refactor");
    }

    #[tokio::test]
    async fn parallel_testing_fans_out_and_aggregates() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply("test.discover", Reply::Result(json!({ "groups": ["unit", "integration"] })))
                .queue("test.run", Reply::Result(json!({ "passed": 4, "failed": 0 })))
                .queue(
                    "test.run",
                    Reply::Result(json!({ "passed": 1, "failed": 1, "failures": [{ "name": "io" }] })),
                ),
        )
        .await;

        let mut ctx = PhaseContext::new("acme", "widget");
        ctx.parallel = true;
        let outcome = run(&router, PhaseName::Testing, &ctx).await;

        assert_eq!(transport.calls_to("test.run"), 2);
        assert_eq!(outcome.output["total"], 6);
        assert_eq!(outcome.output["passed"], 5);
        assert_eq!(outcome.output["failed"], 1);
        assert_eq!(outcome.output["groups"], json!(["unit", "integration"]));
        assert_eq!(outcome.error.as_deref(), Some("1 tests failed"));
    }

    #[tokio::test]
    async fn parallel_testing_runs_every_group_despite_failure() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply("test.discover", Reply::Result(json!({ "groups": ["a", "b", "c"] })))
                .queue("test.run", Reply::Error(RpcError::new(-32010, "runner crashed")))
                .reply("test.run", Reply::Result(json!({ "passed": 2 }))),
        )
        .await;

        let mut ctx = PhaseContext::new("acme", "widget");
        ctx.parallel = true;
        let outcome = run(&router, PhaseName::Testing, &ctx).await;

        assert_eq!(transport.calls_to("test.run"), 3);
        assert_eq!(outcome.output["passed"], 4);
        assert!(outcome.error.unwrap().contains("runner crashed"));
    }

    #[tokio::test]
    async fn parallel_testing_records_first_failure_to_complete() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply("test.discover", Reply::Result(json!({ "groups": ["slow", "fast"] })))
                .for_group(
                    "slow",
                    Duration::from_millis(100),
                    Reply::Error(RpcError::new(-32010, "slow runner crashed")),
                )
                .for_group("fast", Duration::ZERO, Reply::Error(RpcError::new(-32010, "fast runner crashed"))),
        )
        .await;

        let mut ctx = PhaseContext::new("acme", "widget");
        ctx.parallel = true;
        let outcome = run(&router, PhaseName::Testing, &ctx).await;

        assert_eq!(transport.calls_to("test.run"), 2);
        assert_eq!(outcome.output["groups"], json!(["slow", "fast"]));
        assert!(outcome.error.unwrap().contains("fast runner crashed"));
    }

    #[tokio::test]
    async fn sequential_testing_issues_one_run() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply("test.discover", Reply::Result(json!({ "tests": ["t1", "t2"] })))
                .reply("test.run", Reply::Result(json!({ "passed": 2, "failed": 0 }))),
        )
        .await;

        let outcome = run(&router, PhaseName::Testing, &PhaseContext::new("acme", "widget")).await;
        assert_eq!(transport.calls_to("test.run"), 1);
        assert_eq!(outcome.output["groups"], json!(["all"]));
        assert!(outcome.error.is_none());

        let runs: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|(_, r)| r.method == "test.run")
            .collect();
        assert_eq!(runs[0].1.params["tests"], json!(["t1", "t2"]));
        assert_eq!(runs[0].1.params["owner"], "acme");
    }

    #[tokio::test]
    async fn sequential_testing_forwards_discovered_groups() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply("test.discover", Reply::Result(json!({ "groups": ["unit", "e2e"] })))
                .reply("test.run", Reply::Result(json!({ "passed": 5 }))),
        )
        .await;

        let outcome = run(&router, PhaseName::Testing, &PhaseContext::new("acme", "widget")).await;
        assert!(outcome.error.is_none());
        let (_, request) = transport
            .requests()
            .into_iter()
            .find(|(_, r)| r.method == "test.run")
            .unwrap();
        assert_eq!(request.params["groups"], json!(["unit", "e2e"]));
        assert!(request.params.get("tests").is_none());
    }

    #[tokio::test]
    async fn empty_discovery_fails_without_running() {
        let (router, transport) = router(
            ScriptedTransport::new().reply("test.discover", Reply::Result(json!({ "tests": [] }))),
        )
        .await;

        let outcome = run(&router, PhaseName::Testing, &PhaseContext::new("acme", "widget")).await;
        assert_eq!(outcome.error.as_deref(), Some("no tests found"));
        assert_eq!(outcome.output["total"], 0);
        assert_eq!(transport.calls_to("test.run"), 0);
    }

    #[tokio::test]
    async fn issues_phase_orders_by_dependency() {
        let (router, _) = router(
            ScriptedTransport::new()
                .reply("github.issues.list", Reply::Result(json!([issue(10), issue(11)])))
                .reply(
                    "github.issues.dependencies",
                    Reply::Result(json!({ "dependencies": { "10": [11] } })),
                ),
        )
        .await;

        let outcome = run(&router, PhaseName::Issues, &PhaseContext::new("acme", "widget")).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.output["count"], 2);
        let prioritized = outcome.output["prioritized"].as_array().unwrap();
        assert_eq!(numbers(prioritized), vec![11, 10]);
    }

    #[tokio::test]
    async fn issues_phase_fails_when_listing_is_unreachable() {
        let (router, transport) =
            router(ScriptedTransport::new().reply("github.issues.list", unreachable("github"))).await;

        let outcome = run(&router, PhaseName::Issues, &PhaseContext::new("acme", "widget")).await;
        assert!(outcome.error.unwrap().contains("listing issues failed"));
        assert_eq!(transport.calls_to("github.issues.list"), 2);
        assert_eq!(transport.calls_to("github.issues.dependencies"), 0);
    }

    #[tokio::test]
    async fn todos_phase_creates_one_issue_per_category() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply(
                    "todo.scan",
                    Reply::Result(json!({ "todos": [
                        { "text": "split module", "file": "a.rs", "line": 1 },
                        { "text": "fix leak", "file": "b.rs", "line": 2 },
                        { "text": "rename", "file": "c.rs", "line": 3 },
                    ] })),
                )
                .reply(
                    "todo.categorize",
                    Reply::Result(json!({
                        "bug": [{ "text": "fix leak", "file": "b.rs", "line": 2 }],
                        "refactor": [
                            { "text": "split module", "file": "a.rs", "line": 1 },
                            { "text": "rename", "file": "c.rs", "line": 3 },
                        ],
                    })),
                )
                .queue("github.issues.create", unreachable("github"))
                .queue("github.issues.create", Reply::Result(json!({ "number": 77 }))),
        )
        .await;

        let outcome = run(&router, PhaseName::Todos, &PhaseContext::new("acme", "widget")).await;

        assert_eq!(outcome.output["found"], 3);
        assert_eq!(outcome.output["categories"], json!({ "bug": 1, "refactor": 2 }));
        assert_eq!(outcome.output["created"], json!([{ "number": 77 }]));
        assert!(outcome.error.unwrap().contains("'bug'"));

        let creates: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|(_, r)| r.method == "github.issues.create")
            .collect();
        assert_eq!(creates.len(), 2);
        assert_eq!(creates[1].1.params["title"], "TODO: Refactor tasks");
        assert_eq!(creates[1].1.params["labels"], json!(["refactor"]));
        assert_eq!(
            creates[1].1.params["body"],
            "- split module (a.rs:1)\n- rename (c.rs:3)"
        );
    }

    #[tokio::test]
    async fn todos_phase_skips_creation_when_disabled() {
        let (router, transport) = router(
            ScriptedTransport::new()
                .reply("todo.scan", Reply::Result(json!([{ "text": "x" }])))
                .reply("todo.categorize", Reply::Result(json!({ "docs": [{ "text": "x" }] }))),
        )
        .await;

        let mut ctx = PhaseContext::new("acme", "widget");
        ctx.create_issues = false;
        let outcome = run(&router, PhaseName::Todos, &ctx).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.output["categories"], json!({ "docs": 1 }));
        assert_eq!(transport.calls_to("github.issues.create"), 0);
    }
}
