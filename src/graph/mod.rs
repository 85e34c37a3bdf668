//! A small state graph: named steps joined by plain and conditional edges,
//! walked from an entry point until every branch reaches [`END`].

mod error;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use error::{BoxError, GraphError};

/// Terminal marker. Routing here ends the branch.
pub const END: &str = "__end__";

/// Default cap on node executions per invoke.
pub const DEFAULT_STEP_LIMIT: usize = 25;

/// A unit of work that mutates the shared state.
#[async_trait]
pub trait Step<S>: Send + Sync {
    async fn run(&self, cancel: &CancellationToken, state: &mut S) -> Result<(), BoxError>;
}

/// Chooses the successors of a node from the state it left behind.
#[async_trait]
pub trait Router<S>: Send + Sync {
    async fn route(&self, cancel: &CancellationToken, state: &S) -> Result<Vec<String>, BoxError>;
}

enum Transition<S> {
    Edge(String),
    Conditional(Arc<dyn Router<S>>),
}

pub struct StateGraph<S> {
    nodes: HashMap<String, Arc<dyn Step<S>>>,
    transitions: HashMap<String, Transition<S>>,
    entry_point: Option<String>,
    // Wiring mistakes are collected while building and reported by `compile`.
    errors: Vec<GraphError>,
}

impl<S> Default for StateGraph<S> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            transitions: HashMap::new(),
            entry_point: None,
            errors: Vec::new(),
        }
    }
}

impl<S: Send + Sync + 'static> StateGraph<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>, step: impl Step<S> + 'static) -> &mut Self {
        let name = name.into();
        if name == END {
            self.errors.push(GraphError::ReservedName(name));
        } else if self.nodes.contains_key(&name) {
            self.errors.push(GraphError::DuplicateNode(name));
        } else {
            self.nodes.insert(name, Arc::new(step));
        }
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.add_transition(from.into(), Transition::Edge(to.into()))
    }

    pub fn add_conditional_edges(&mut self, from: impl Into<String>, router: impl Router<S> + 'static) -> &mut Self {
        self.add_transition(from.into(), Transition::Conditional(Arc::new(router)))
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        match &self.entry_point {
            Some(first) => self.errors.push(GraphError::MultipleEntryPoints {
                first: first.clone(),
                second: name,
            }),
            None => self.entry_point = Some(name),
        }
        self
    }

    fn add_transition(&mut self, from: String, transition: Transition<S>) -> &mut Self {
        if self.transitions.contains_key(&from) {
            self.errors.push(GraphError::AmbiguousTransition(from));
        } else {
            self.transitions.insert(from, transition);
        }
        self
    }

    /// Validates the wiring and freezes it into a runnable plan.
    ///
    /// Cycles are allowed; the step limit on the compiled graph bounds them.
    pub fn compile(mut self) -> Result<CompiledGraph<S>, GraphError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }

        let entry_point = self.entry_point.ok_or(GraphError::MissingEntryPoint)?;
        if !self.nodes.contains_key(&entry_point) {
            return Err(GraphError::DanglingEdge {
                from: "<entry>".to_string(),
                to: entry_point.clone(),
                missing: entry_point,
            });
        }

        for (from, transition) in &self.transitions {
            let known_source = self.nodes.contains_key(from);
            match transition {
                Transition::Edge(to) => {
                    if !known_source {
                        return Err(GraphError::DanglingEdge {
                            from: from.clone(),
                            to: to.clone(),
                            missing: from.clone(),
                        });
                    }
                    if to != END && !self.nodes.contains_key(to) {
                        return Err(GraphError::DanglingEdge {
                            from: from.clone(),
                            to: to.clone(),
                            missing: to.clone(),
                        });
                    }
                }
                Transition::Conditional(_) if !known_source => {
                    return Err(GraphError::DanglingRouter(from.clone()));
                }
                Transition::Conditional(_) => {}
            }
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            transitions: self.transitions,
            entry_point,
            step_limit: DEFAULT_STEP_LIMIT,
        })
    }
}

pub struct CompiledGraph<S> {
    nodes: HashMap<String, Arc<dyn Step<S>>>,
    transitions: HashMap<String, Transition<S>>,
    entry_point: String,
    step_limit: usize,
}

impl<S: Send + Sync + 'static> CompiledGraph<S> {
    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Runs the graph against `state` in place.
    ///
    /// The first failing step or router aborts the run; whatever earlier steps
    /// wrote to `state` stays there.
    pub async fn invoke(&self, cancel: &CancellationToken, state: &mut S) -> Result<(), GraphError> {
        let started = Instant::now();
        let mut frontier = VecDeque::from([self.entry_point.clone()]);
        let mut steps = 0;

        while let Some(current) = frontier.pop_front() {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            if steps == self.step_limit {
                return Err(GraphError::StepLimitExceeded(self.step_limit));
            }
            steps += 1;

            let step = self.nodes.get(&current).ok_or_else(|| GraphError::UnknownNode {
                from: "<frontier>".to_string(),
                to: current.clone(),
            })?;

            debug!(node = %current, step = steps, "Running node");
            let node_started = Instant::now();
            step.run(cancel, state).await.map_err(|source| GraphError::NodeFailed {
                node: current.clone(),
                source,
            })?;
            debug!(
                node = %current,
                duration_ms = %node_started.elapsed().as_millis(),
                "Node finished"
            );

            for next in self.successors(cancel, &current, state).await? {
                frontier.push_back(next);
            }
        }

        info!(
            steps,
            duration_ms = %started.elapsed().as_millis(),
            "Workflow finished"
        );
        Ok(())
    }

    async fn successors(&self, cancel: &CancellationToken, current: &str, state: &S) -> Result<Vec<String>, GraphError> {
        let next = match self.transitions.get(current) {
            None => Vec::new(),
            Some(Transition::Edge(to)) => vec![to.clone()],
            Some(Transition::Conditional(router)) => {
                router
                    .route(cancel, state)
                    .await
                    .map_err(|source| GraphError::RouterFailed {
                        node: current.to_string(),
                        source,
                    })?
            }
        };
        debug!(node = %current, next = ?next, "Routing");

        if next.iter().any(|name| name == END) {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut ordered = Vec::with_capacity(next.len());
        for name in next {
            if !self.nodes.contains_key(&name) {
                return Err(GraphError::UnknownNode {
                    from: current.to_string(),
                    to: name,
                });
            }
            if seen.insert(name.clone()) {
                ordered.push(name);
            }
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        visited: Vec<String>,
        counter: usize,
    }

    struct Record(&'static str);

    #[async_trait]
    impl Step<Trace> for Record {
        async fn run(&self, _cancel: &CancellationToken, state: &mut Trace) -> Result<(), BoxError> {
            state.visited.push(self.0.to_string());
            state.counter += 1;
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl Step<Trace> for Fail {
        async fn run(&self, _cancel: &CancellationToken, state: &mut Trace) -> Result<(), BoxError> {
            state.visited.push("fail".to_string());
            Err("boom".into())
        }
    }

    struct Fixed(Vec<&'static str>);

    #[async_trait]
    impl Router<Trace> for Fixed {
        async fn route(&self, _cancel: &CancellationToken, _state: &Trace) -> Result<Vec<String>, BoxError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    /// Loops back to `loop` until the counter reaches the bound.
    struct Until(usize);

    #[async_trait]
    impl Router<Trace> for Until {
        async fn route(&self, _cancel: &CancellationToken, state: &Trace) -> Result<Vec<String>, BoxError> {
            if state.counter >= self.0 {
                Ok(vec![END.to_string()])
            } else {
                Ok(vec!["loop".to_string()])
            }
        }
    }

    struct CancelOnRun(CancellationToken);

    #[async_trait]
    impl Step<Trace> for CancelOnRun {
        async fn run(&self, _cancel: &CancellationToken, state: &mut Trace) -> Result<(), BoxError> {
            state.visited.push("cancel".to_string());
            self.0.cancel();
            Ok(())
        }
    }

    fn linear() -> StateGraph<Trace> {
        let mut graph = StateGraph::new();
        graph
            .add_node("a", Record("a"))
            .add_node("b", Record("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a");
        graph
    }

    #[tokio::test]
    async fn linear_graph_runs_each_node_once_in_order() {
        let compiled = linear().compile().unwrap();
        let mut trace = Trace::default();
        compiled.invoke(&CancellationToken::new(), &mut trace).await.unwrap();
        assert_eq!(trace.visited, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failing_node_stops_the_run() {
        let mut graph = StateGraph::new();
        graph
            .add_node("a", Fail)
            .add_node("b", Record("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a");
        let compiled = graph.compile().unwrap();

        let mut trace = Trace::default();
        let err = compiled.invoke(&CancellationToken::new(), &mut trace).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeFailed { ref node, .. } if node == "a"));
        assert_eq!(err.node_source().unwrap().to_string(), "boom");
        assert_eq!(trace.visited, vec!["fail"]);
    }

    #[tokio::test]
    async fn router_returning_end_terminates() {
        let mut graph = StateGraph::new();
        graph
            .add_node("a", Record("a"))
            .add_node("b", Record("b"))
            .add_conditional_edges("a", Fixed(vec![END]))
            .add_edge("b", END)
            .set_entry_point("a");
        let compiled = graph.compile().unwrap();

        let mut trace = Trace::default();
        compiled.invoke(&CancellationToken::new(), &mut trace).await.unwrap();
        assert_eq!(trace.visited, vec!["a"]);
    }

    #[tokio::test]
    async fn empty_decision_terminates() {
        let mut graph = StateGraph::new();
        graph
            .add_node("a", Record("a"))
            .add_conditional_edges("a", Fixed(vec![]))
            .set_entry_point("a");
        let mut trace = Trace::default();
        graph
            .compile()
            .unwrap()
            .invoke(&CancellationToken::new(), &mut trace)
            .await
            .unwrap();
        assert_eq!(trace.visited, vec!["a"]);
    }

    #[tokio::test]
    async fn fan_out_runs_every_branch() {
        let mut graph = StateGraph::new();
        graph
            .add_node("root", Record("root"))
            .add_node("left", Record("left"))
            .add_node("right", Record("right"))
            .add_node("join", Record("join"))
            .add_conditional_edges("root", Fixed(vec!["left", "right"]))
            .add_edge("left", "join")
            .add_edge("right", END)
            .add_edge("join", END)
            .set_entry_point("root");
        let mut trace = Trace::default();
        graph
            .compile()
            .unwrap()
            .invoke(&CancellationToken::new(), &mut trace)
            .await
            .unwrap();
        assert_eq!(trace.visited, vec!["root", "left", "right", "join"]);
    }

    #[tokio::test]
    async fn cycle_is_bounded_by_step_limit() {
        let mut graph = StateGraph::new();
        graph
            .add_node("loop", Record("loop"))
            .add_conditional_edges("loop", Fixed(vec!["loop"]))
            .set_entry_point("loop");
        let compiled = graph.compile().unwrap().with_step_limit(5);

        let mut trace = Trace::default();
        let err = compiled.invoke(&CancellationToken::new(), &mut trace).await.unwrap_err();
        assert!(matches!(err, GraphError::StepLimitExceeded(5)));
        assert_eq!(trace.visited.len(), 5);
    }

    #[tokio::test]
    async fn cycle_ends_when_router_says_so() {
        let mut graph = StateGraph::new();
        graph
            .add_node("loop", Record("loop"))
            .add_conditional_edges("loop", Until(3))
            .set_entry_point("loop");
        let mut trace = Trace::default();
        graph
            .compile()
            .unwrap()
            .invoke(&CancellationToken::new(), &mut trace)
            .await
            .unwrap();
        assert_eq!(trace.counter, 3);
    }

    #[tokio::test]
    async fn router_naming_unknown_node_fails() {
        let mut graph = StateGraph::new();
        graph
            .add_node("a", Record("a"))
            .add_conditional_edges("a", Fixed(vec!["ghost"]))
            .set_entry_point("a");
        let err = graph
            .compile()
            .unwrap()
            .invoke(&CancellationToken::new(), &mut Trace::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { ref to, .. } if to == "ghost"));
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_node() {
        let cancel = CancellationToken::new();
        let mut graph = StateGraph::new();
        graph
            .add_node("a", CancelOnRun(cancel.clone()))
            .add_node("b", Record("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a");

        let mut trace = Trace::default();
        let err = graph.compile().unwrap().invoke(&cancel, &mut trace).await.unwrap_err();
        assert!(matches!(err, GraphError::Cancelled));
        assert_eq!(trace.visited, vec!["cancel"]);
    }

    #[test]
    fn structural_errors_are_reported_at_compile() {
        let mut graph = linear();
        graph.add_node("a", Record("again"));
        assert!(matches!(graph.compile(), Err(GraphError::DuplicateNode(name)) if name == "a"));

        let mut graph = StateGraph::<Trace>::new();
        graph.add_node("a", Record("a")).add_edge("a", END);
        assert!(matches!(graph.compile(), Err(GraphError::MissingEntryPoint)));

        let mut graph = linear();
        graph.add_edge("missing", "a");
        assert!(matches!(
            graph.compile(),
            Err(GraphError::DanglingEdge { missing, .. }) if missing == "missing"
        ));

        let mut graph = StateGraph::<Trace>::new();
        graph
            .add_node("a", Record("a"))
            .add_edge("a", "nowhere")
            .set_entry_point("a");
        assert!(matches!(
            graph.compile(),
            Err(GraphError::DanglingEdge { missing, .. }) if missing == "nowhere"
        ));

        let mut graph = linear();
        graph.set_entry_point("b");
        assert!(matches!(graph.compile(), Err(GraphError::MultipleEntryPoints { .. })));

        let mut graph = linear();
        graph.add_conditional_edges("a", Fixed(vec!["b"]));
        assert!(matches!(graph.compile(), Err(GraphError::AmbiguousTransition(name)) if name == "a"));

        let mut graph = linear();
        graph.add_node(END, Record("end"));
        assert!(matches!(graph.compile(), Err(GraphError::ReservedName(_))));

        let mut graph = linear();
        graph.add_conditional_edges("ghost", Fixed(vec![END]));
        assert!(matches!(graph.compile(), Err(GraphError::DanglingRouter(name)) if name == "ghost"));
    }

    #[test]
    fn cyclic_graph_compiles() {
        let mut graph = StateGraph::<Trace>::new();
        graph
            .add_node("a", Record("a"))
            .add_node("b", Record("b"))
            .add_edge("a", "b")
            .add_edge("b", "a")
            .set_entry_point("a");
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.step_limit(), DEFAULT_STEP_LIMIT);
        assert_eq!(compiled.entry_point(), "a");
    }
}
