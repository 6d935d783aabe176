//! Command-line driver: builds a seeded random graph and runs a traversal query.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use matrixgraph::algebra::AlgebraicExpression;
use matrixgraph::config::EngineConfig;
use matrixgraph::graph::{Graph, SharedGraph};
use matrixgraph::primitives::cron::Cron;
use matrixgraph::query::{
    CondTraverseOp, ExecutionPlan, NodeScanOp, ProjectOp, SkipLimitOp, SortKey, SortOp, Value,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mgraph", version, about = "Matrix-backed graph traversal driver")]
struct Cli {
    #[arg(long, global = true, env = "MATRIXGRAPH_CONFIG", help = "Engine config file (TOML)")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Traverse `knows` from every node and report the oldest neighbours.
    Traverse {
        #[arg(long, default_value_t = 1000, help = "Number of nodes")]
        nodes: u64,
        #[arg(long, default_value_t = 4, help = "Outgoing edges per node")]
        degree: u64,
        #[arg(long, default_value_t = 7, help = "RNG seed")]
        seed: u64,
        #[arg(long, help = "Override the traversal batch size")]
        batch_size: Option<usize>,
        #[arg(long, default_value_t = 10, help = "Rows to print")]
        limit: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = EngineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Traverse {
            nodes,
            degree,
            seed,
            batch_size,
            limit,
        } => {
            if let Some(size) = batch_size {
                if size == 0 {
                    return Err("--batch-size must be positive".into());
                }
                config.execution.batch_size = size;
            }
            let build = Instant::now();
            let graph = build_graph(&config, nodes, degree, seed)?;
            let (node_count, edge_count) = {
                let g = graph.read();
                (g.node_count(), g.edge_count())
            };
            info!(nodes = node_count, edges = edge_count, elapsed_ms = build.elapsed().as_millis() as u64, "graph built");

            let (person, knows) = {
                let g = graph.read();
                (
                    g.label_id("Person").ok_or("label missing")?,
                    g.relation_id("knows").ok_or("relation missing")?,
                )
            };
            // (a:Person)-[:knows]->(b) ORDER BY b.age DESC, b.name LIMIT n
            let scan = NodeScanOp::by_label(0, person);
            let traverse = CondTraverseOp::new(Box::new(scan), AlgebraicExpression::relation(knows), 0, 1);
            let age = ProjectOp::new(Box::new(traverse), 1, "age", 2);
            let name = ProjectOp::new(Box::new(age), 1, "name", 3);
            let sort = SortOp::new(Box::new(name), vec![SortKey::desc(2), SortKey::asc(3)]).with_limit(0, limit);
            let root = SkipLimitOp::new(Box::new(sort), 0, Some(limit));
            let mut plan = ExecutionPlan::new(Box::new(root), config.execution.clone());

            let cron = Cron::start();
            let started = Instant::now();
            let result = plan.execute_shared(&graph, Some(&cron))?;
            let elapsed = started.elapsed();

            println!("nodes: {node_count}");
            println!("edges: {edge_count}");
            println!("batch size: {}", config.execution.batch_size);
            println!("rows: {}", result.records.len());
            println!("timed out: {}", result.timed_out);
            println!("elapsed: {:.3} ms", elapsed.as_secs_f64() * 1000.0);
            for record in &result.records {
                let src = record.node(0).map_or(-1, |id| id.0 as i64);
                let dst = record.node(1).map_or(-1, |id| id.0 as i64);
                println!("  {src} -> {dst}  age={}  name={}", render(&record.value(2)), render(&record.value(3)));
            }
        }
    }
    Ok(())
}

fn build_graph(config: &EngineConfig, nodes: u64, degree: u64, seed: u64) -> Result<SharedGraph, Box<dyn Error>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut graph = Graph::new(config.graph_options());
    let person = graph.add_label("Person")?;
    let knows = graph.add_relation("knows")?;
    let mut ids = Vec::with_capacity(nodes as usize);
    for idx in 0..nodes {
        let props = vec![
            ("age", Value::Int(rng.gen_range(18..90))),
            ("name", Value::from(format!("person-{idx}"))),
        ];
        ids.push(graph.create_node(&[person], props)?);
    }
    if !ids.is_empty() {
        for &src in &ids {
            for _ in 0..degree {
                let dst = ids[rng.gen_range(0..ids.len())];
                graph.create_edge(src, dst, knows)?;
            }
        }
    }
    graph.sync()?;
    Ok(SharedGraph::new(graph))
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::String(s) => s.to_string(),
        Value::List(items) => format!("[{}]", items.iter().map(render).collect::<Vec<_>>().join(", ")),
    }
}
