//! Benchmark command
//!
//! Times engine operations over synthetic templates: manifest load,
//! template validation (compilation), registry search, and full renders.
//! Iterations split across a bounded number of concurrent tasks; output
//! renders as a table, JSON, or CSV.

use super::OutputFormat;
use crate::engine::renderer::{RenderContext, TemplateRenderer};
use crate::engine::value::Value;
use crate::registry::{TemplateManifest, TemplateRegistry};
use clap::ValueEnum;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Operations the benchmark can time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BenchOperation {
    /// Manifest parsing.
    Load,
    /// Template compilation (block extraction).
    Validate,
    /// Registry search.
    Search,
    /// Full renders.
    Generate,
}

impl BenchOperation {
    fn name(&self) -> &'static str {
        match self {
            BenchOperation::Load => "load",
            BenchOperation::Validate => "validate",
            BenchOperation::Search => "search",
            BenchOperation::Generate => "generate",
        }
    }
}

impl std::fmt::Display for BenchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Benchmark options.
#[derive(Debug, Clone)]
pub struct BenchmarkOptions {
    /// Synthetic templates to build.
    pub templates: usize,
    /// Operations to time.
    pub operations: Vec<BenchOperation>,
    /// Iterations per operation.
    pub iterations: usize,
    /// Concurrent tasks.
    pub concurrency: usize,
    /// Output format.
    pub output: OutputFormat,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            templates: 10,
            operations: vec![
                BenchOperation::Load,
                BenchOperation::Validate,
                BenchOperation::Search,
                BenchOperation::Generate,
            ],
            iterations: 100,
            concurrency: 4,
            output: OutputFormat::Table,
        }
    }
}

/// Timing for one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationTiming {
    /// Operation name.
    pub operation: String,
    /// Completed iterations.
    pub iterations: usize,
    /// Total wall time in microseconds.
    pub total_micros: u128,
    /// Mean per-iteration time in microseconds.
    pub avg_micros: u128,
    /// Iterations per second.
    pub ops_per_sec: f64,
}

/// The whole benchmark result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchmarkReport {
    /// Timing per operation.
    pub results: Vec<OperationTiming>,
}

impl BenchmarkReport {
    /// Render the report in the requested format.
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
            }
            OutputFormat::Csv => {
                let mut out = String::from("operation,iterations,total_us,avg_us,ops_per_sec\n");
                for r in &self.results {
                    out.push_str(&format!(
                        "{},{},{},{},{:.1}\n",
                        r.operation, r.iterations, r.total_micros, r.avg_micros, r.ops_per_sec
                    ));
                }
                out
            }
            OutputFormat::Table => {
                let mut out = format!(
                    "{:<10} {:>10} {:>12} {:>10} {:>12}\n",
                    "operation", "iters", "total (us)", "avg (us)", "ops/sec"
                );
                for r in &self.results {
                    out.push_str(&format!(
                        "{:<10} {:>10} {:>12} {:>10} {:>12.1}\n",
                        r.operation, r.iterations, r.total_micros, r.avg_micros, r.ops_per_sec
                    ));
                }
                out
            }
        }
    }
}

fn synthetic_manifest(index: usize) -> String {
    format!(
        "name: bench-template-{index}\nversion: 1.{index}.0\ndescription: Synthetic benchmark template {index}\ntags: [bench, synthetic]\n",
    )
}

fn synthetic_template(index: usize) -> String {
    format!(
        "# bench {index}\n{{{{#if enabled}}}}feature on{{{{else}}}}feature off{{{{/if}}}}\n{{{{#each items}}}}- {{{{@index}}}}: {{{{this}}}}\n{{{{/each}}}}name: {{{{ project }}}}\n",
    )
}

fn render_context() -> RenderContext {
    let mut variables = std::collections::BTreeMap::new();
    variables.insert("enabled".to_string(), Value::Bool(true));
    variables.insert(
        "items".to_string(),
        Value::List(vec![
            Value::Text("alpha".into()),
            Value::Text("beta".into()),
        ]),
    );
    variables.insert("project".to_string(), Value::Text("bench".into()));
    RenderContext {
        variables,
        // Cache hits would make every iteration after the first free.
        cache_enabled: false,
        ..RenderContext::default()
    }
}

/// Run the benchmark.
pub async fn run(options: &BenchmarkOptions) -> BenchmarkReport {
    let template_count = options.templates.max(1);
    let manifests: Vec<String> = (0..template_count).map(synthetic_manifest).collect();
    let templates: Vec<String> = (0..template_count).map(synthetic_template).collect();

    let registry = Arc::new(TemplateRegistry::new());
    for manifest in &manifests {
        if let Ok(parsed) = serde_yaml::from_str::<TemplateManifest>(manifest) {
            registry.register(parsed, PathBuf::from("/bench"));
        }
    }
    let renderer = Arc::new(TemplateRenderer::new());

    let mut report = BenchmarkReport::default();
    for operation in &options.operations {
        let timing = time_operation(
            *operation,
            options,
            Arc::clone(&registry),
            Arc::clone(&renderer),
            Arc::new(manifests.clone()),
            Arc::new(templates.clone()),
        )
        .await;
        report.results.push(timing);
    }
    report
}

async fn time_operation(
    operation: BenchOperation,
    options: &BenchmarkOptions,
    registry: Arc<TemplateRegistry>,
    renderer: Arc<TemplateRenderer>,
    manifests: Arc<Vec<String>>,
    templates: Arc<Vec<String>>,
) -> OperationTiming {
    let iterations = options.iterations.max(1);
    let concurrency = options.concurrency.max(1).min(iterations);
    let per_task = iterations / concurrency;
    let remainder = iterations % concurrency;

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(concurrency);
    for worker in 0..concurrency {
        let count = per_task + usize::from(worker < remainder);
        let registry = Arc::clone(&registry);
        let renderer = Arc::clone(&renderer);
        let manifests = Arc::clone(&manifests);
        let templates = Arc::clone(&templates);
        tasks.push(tokio::spawn(async move {
            for i in 0..count {
                let index = (worker + i) % manifests.len();
                match operation {
                    BenchOperation::Load => {
                        let _ = serde_yaml::from_str::<TemplateManifest>(&manifests[index]);
                    }
                    BenchOperation::Validate => {
                        let _ = renderer.compile(&templates[index]);
                    }
                    BenchOperation::Search => {
                        let _ = registry.search("bench");
                    }
                    BenchOperation::Generate => {
                        let _ = renderer.render(&templates[index], &render_context());
                    }
                }
            }
        }));
    }
    futures::future::join_all(tasks).await;

    let total = started.elapsed();
    let total_micros = total.as_micros();
    OperationTiming {
        operation: operation.name().to_string(),
        iterations,
        total_micros,
        avg_micros: total_micros / iterations as u128,
        ops_per_sec: if total.as_secs_f64() > 0.0 {
            iterations as f64 / total.as_secs_f64()
        } else {
            0.0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_benchmark_runs_all_operations() {
        let options = BenchmarkOptions {
            templates: 3,
            iterations: 8,
            concurrency: 2,
            ..Default::default()
        };
        let report = run(&options).await;
        assert_eq!(report.results.len(), 4);
        for timing in &report.results {
            assert_eq!(timing.iterations, 8);
        }
    }

    #[tokio::test]
    async fn test_output_formats() {
        let options = BenchmarkOptions {
            templates: 2,
            operations: vec![BenchOperation::Validate],
            iterations: 4,
            concurrency: 1,
            output: OutputFormat::Table,
        };
        let report = run(&options).await;

        let table = report.render(OutputFormat::Table);
        assert!(table.contains("validate"));

        let csv = report.render(OutputFormat::Csv);
        assert!(csv.starts_with("operation,"));
        assert_eq!(csv.lines().count(), 2);

        let json = report.render(OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["results"].is_array());
    }

    #[test]
    fn test_synthetic_template_is_valid() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render(&synthetic_template(0), &render_context());
        assert!(result.ok, "{:?}", result.errors);
        assert!(result.text.contains("feature on"));
        assert!(result.text.contains("0: alpha"));
    }
}
