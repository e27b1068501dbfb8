use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::diagnostic::{
    DEPENDENCIES_SEPARATOR, DEPENDENCIES_TAG, Diagnostic, DiagnosticContext, ProfileModel,
    ReportedError,
};

/// Snapshot of a workflow's root context after every task was folded into it.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileModel>,
    pub errors: Vec<ReportedError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tracking: BTreeMap<String, serde_json::Value>,
}

impl DiagnosticReport {
    pub(crate) fn from_context(context: &DiagnosticContext) -> Self {
        let span = context.span();
        let profile = span
            .start_time()
            .map(|origin| span.to_model(origin));

        Self {
            name: context.name().to_owned(),
            profile,
            errors: context.errors().to_vec(),
            diagnostics: context.diagnostics().to_vec(),
            tracking: context
                .tracking_entries()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        }
    }

    pub fn has_severe_errors(&self) -> bool {
        self.errors.iter().any(|error| error.severe)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Profile entry of the task called `name`.
    pub fn task(&self, name: &str) -> Option<&ProfileModel> {
        self.profile.as_ref()?.child(name)
    }

    /// Renders the task graph as a Mermaid diagram. Each task is filled on a
    /// green to red scale from the fastest to the slowest task of the
    /// request; tasks without timing are light blue.
    ///
    /// Edges point from a task to the tasks that consumed its result.
    pub fn render_mermaid(&self) -> String {
        let mut f = String::new();
        writeln!(f, "graph LR").unwrap();

        let Some(profile) = &self.profile else {
            return f;
        };

        let mut graph: DiGraph<&ProfileModel, ()> = DiGraph::new();
        let mut by_name: HashMap<&str, NodeIndex> = HashMap::new();

        by_name.insert(&profile.name, graph.add_node(profile));
        for task in &profile.children {
            by_name.insert(&task.name, graph.add_node(task));
        }

        for task in &profile.children {
            let Some(callers) = task.data.get(DEPENDENCIES_TAG) else {
                continue;
            };
            for caller in callers.split(DEPENDENCIES_SEPARATOR) {
                if let Some(&caller) = by_name.get(caller) {
                    graph.add_edge(by_name[task.name.as_str()], caller, ());
                }
            }
        }

        let scale = DurationScale::of(&profile.children);

        for index in graph.node_indices() {
            let task = graph[index];
            let name = task.name.replace('"', "\\\"");
            let (timing, fill) = match task.duration_micros {
                Some(micros) => (format!("{:.2}ms", micros as f64 / 1000.0), scale.fill(micros)),
                None => ("n/a".to_string(), NOT_RUN_FILL.to_string()),
            };

            writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, timing).unwrap();
            writeln!(f, "    style {} fill:{}", index.index(), fill).unwrap();
        }

        for edge in graph.edge_indices() {
            let Some((source, target)) = graph.edge_endpoints(edge) else {
                continue;
            };
            writeln!(f, "    {} --> {}", source.index(), target.index()).unwrap();
        }

        f
    }
}

const NOT_RUN_FILL: &str = "#ADD8E6";

/// Durations of the tasks that ran, mapped onto a green to red gradient.
struct DurationScale {
    fastest: u64,
    slowest: u64,
}

impl DurationScale {
    fn of(tasks: &[ProfileModel]) -> Self {
        let mut durations = tasks.iter().filter_map(|task| task.duration_micros);
        let Some(first) = durations.next() else {
            return Self { fastest: 0, slowest: 0 };
        };
        let (fastest, slowest) =
            durations.fold((first, first), |(lo, hi), micros| (lo.min(micros), hi.max(micros)));
        Self { fastest, slowest }
    }

    /// 0.0 for the fastest task, 1.0 for the slowest, 0.0 when all match.
    fn position(&self, micros: u64) -> f64 {
        let spread = self.slowest - self.fastest;
        if spread == 0 {
            return 0.0;
        }
        (micros.saturating_sub(self.fastest) as f64 / spread as f64).min(1.0)
    }

    fn fill(&self, micros: u64) -> String {
        let position = self.position(micros);
        let red = (2.0 * position).min(1.0) * 255.0;
        let green = (2.0 * (1.0 - position)).min(1.0) * 255.0;
        format!("#{:02X}{:02X}00", red as u8, green as u8)
    }
}
