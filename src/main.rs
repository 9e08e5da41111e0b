//! remedy CLI: neurosymbolic drug repurposing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use remedy::config::EngineConfig;
use remedy::engine::{Engine, TrainRequest};
use remedy::graph::explore::{DEFAULT_LISTING_LIMIT, DEFAULT_RELATED_LIMIT};
use remedy::graph::{GraphNode, Neo4jConfig};
use remedy::paths::RemedyPaths;
use remedy::train::EpochReport;

#[derive(Parser)]
#[command(name = "remedy", version, about = "Neurosymbolic drug repurposing")]
struct Cli {
    /// Config file. Defaults to `$XDG_CONFIG_HOME/remedy/config.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local graph document (JSON with `nodes` and `edges`).
    #[arg(long, global = true)]
    graph: Option<PathBuf>,

    /// Neo4j HTTP endpoint, e.g. http://localhost:7474. Takes precedence over --graph.
    #[arg(long, global = true)]
    neo4j_uri: Option<String>,

    /// Directory checkpoints are read from and written to.
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the effective configuration to the global config file.
    Init,

    /// Train the model on the graph and write checkpoints.
    Train {
        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f64>,

        /// Checkpoint to resume from.
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Score one (compound, disease) pair.
    Predict {
        compound_id: String,
        disease_id: String,

        /// Print the prediction as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rank repurposing candidates for a disease.
    Rank {
        disease_id: String,

        #[arg(long, default_value = "10")]
        top_k: usize,

        /// Print the ranking as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the symbolic rules that match a pair.
    Explain {
        compound_id: String,
        disease_id: String,
    },

    /// Show model and cache status.
    Info,

    /// Show knowledge graph statistics.
    Stats,

    /// List diseases by name.
    Diseases {
        #[arg(long, default_value_t = DEFAULT_LISTING_LIMIT)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// List compounds by name.
    Compounds {
        #[arg(long, default_value_t = DEFAULT_LISTING_LIMIT)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show a disease with similar diseases, shared genes and top candidates.
    Profile {
        disease_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show compounds or diseases related to an entity.
    Related {
        id: String,

        /// Most entities per relation.
        #[arg(long, default_value_t = DEFAULT_RELATED_LIMIT)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show how a compound connects to a disease.
    Paths {
        compound_id: String,
        disease_id: String,

        /// Most paths per category.
        #[arg(long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{out}");
    Ok(())
}

fn print_listing(nodes: &[GraphNode]) {
    for node in nodes {
        println!("  {:<16} {}", node.id, node.name.as_deref().unwrap_or("-"));
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let global = RemedyPaths::resolve()
                .ok()
                .map(|p| p.global_config_file())
                .filter(|p| p.is_file());
            match global {
                Some(path) => EngineConfig::load(&path)?,
                None => EngineConfig::default(),
            }
        }
    };

    if let Some(graph) = &cli.graph {
        config.graph_file = Some(graph.clone());
    }
    if let Some(uri) = &cli.neo4j_uri {
        config.neo4j = Some(Neo4jConfig::new(uri.clone()));
    }
    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoint_dir = Some(dir.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init => {
            config.validate()?;
            let paths = RemedyPaths::resolve().into_diagnostic()?;
            paths.ensure_dirs().into_diagnostic()?;
            let path = cli.config.unwrap_or_else(|| paths.global_config_file());
            config.save(&path)?;
            println!("Wrote configuration to {}", path.display());
        }

        Commands::Train {
            epochs,
            batch_size,
            learning_rate,
            resume,
        } => {
            let engine = Engine::from_config(config)?;
            let request = TrainRequest {
                epochs,
                batch_size,
                learning_rate,
                resume_from: resume,
            };
            let summary = engine.train(request, |r: &EpochReport| {
                println!(
                    "epoch {:>3}/{}  loss {:.4}  val_auc {:.4}  val_ap {:.4}  lr {:.2e}{}",
                    r.epoch,
                    r.total_epochs,
                    r.train_loss,
                    r.val.auc,
                    r.val.ap,
                    r.learning_rate,
                    if r.improved { "  *" } else { "" }
                );
            })?;
            println!();
            println!("Training finished after {} epochs", summary.epochs_completed);
            if summary.stopped_early {
                println!("  stopped early (no validation improvement)");
            }
            println!("  best AUC:         {:.4}", summary.best_auc);
            println!("  best checkpoint:  {}", summary.best_checkpoint.display());
            println!("  final checkpoint: {}", summary.final_checkpoint.display());
        }

        Commands::Predict {
            compound_id,
            disease_id,
            json,
        } => {
            let engine = Engine::from_config(config)?;
            let prediction = engine.predict_with_confidence(&compound_id, &disease_id);
            if json {
                let out = serde_json::to_string_pretty(&prediction).into_diagnostic()?;
                println!("{out}");
            } else {
                println!("{compound_id} -> {disease_id}");
                println!("  score:      {:.4}", prediction.score);
                println!("  confidence: {}", prediction.confidence.as_str());
                if prediction.is_fallback() {
                    println!("  model:      fallback (hash-based)");
                }
            }
        }

        Commands::Rank {
            disease_id,
            top_k,
            json,
        } => {
            let engine = Engine::from_config(config)?;
            let ranked = engine.rank(&disease_id, top_k)?;
            if json {
                let out = serde_json::to_string_pretty(&ranked).into_diagnostic()?;
                println!("{out}");
            } else if ranked.is_empty() {
                println!("No repurposing candidates for {disease_id}.");
            } else {
                println!("Candidates for {disease_id} (top {top_k}):");
                for (i, c) in ranked.iter().enumerate() {
                    println!(
                        "  {:>2}. {:<12} {:<30} {:.4} (neural {:.4})",
                        i + 1,
                        c.compound_id,
                        c.compound_name,
                        c.score,
                        c.neural_score
                    );
                    for e in &c.explanations {
                        println!("        {e}");
                    }
                }
            }
        }

        Commands::Explain {
            compound_id,
            disease_id,
        } => {
            let engine = Engine::from_config(config)?;
            let explanations = engine.explain(&compound_id, &disease_id)?;
            if explanations.is_empty() {
                println!("No rules match {compound_id} -> {disease_id}.");
            } else {
                println!("Rules matching {compound_id} -> {disease_id}:");
                for e in &explanations {
                    println!("  {e}");
                }
            }
        }

        Commands::Info => {
            let engine = Engine::from_config(config)?;
            print!("{}", engine.model_info());
            println!();
            println!("{}", engine.cache_stats());
        }

        Commands::Stats => {
            let engine = Engine::from_config(config)?;
            print!("{}", engine.graph_stats()?);
        }

        Commands::Diseases { limit, json } => {
            let engine = Engine::from_config(config)?;
            let diseases = engine.diseases(limit)?;
            if json {
                print_json(&diseases)?;
            } else {
                println!("{} diseases:", diseases.len());
                print_listing(&diseases);
            }
        }

        Commands::Compounds { limit, json } => {
            let engine = Engine::from_config(config)?;
            let compounds = engine.compounds(limit)?;
            if json {
                print_json(&compounds)?;
            } else {
                println!("{} compounds:", compounds.len());
                print_listing(&compounds);
            }
        }

        Commands::Profile { disease_id, json } => {
            let engine = Engine::from_config(config)?;
            let profile = engine.disease_profile(&disease_id)?;
            if json {
                print_json(&profile)?;
            } else {
                let s = &profile.summary;
                println!("{} ({})", s.name.as_deref().unwrap_or(&s.id), s.id);
                println!("  genes:       {}", s.gene_count);
                println!("  treatments:  {}", s.treatment_count);
                if !s.anatomy.is_empty() {
                    println!("  anatomy:     {}", s.anatomy.join(", "));
                }
                if !profile.indications.is_empty() {
                    println!("Predicted indications:");
                    for c in &profile.indications {
                        println!("  {:<12} {:<30} {:.4}", c.compound_id, c.compound_name, c.score);
                    }
                }
                if !profile.similar_diseases.is_empty() {
                    println!("Similar diseases:");
                    for d in &profile.similar_diseases {
                        println!(
                            "  {:<16} {:<30} shared genes {:<4} treatments {}",
                            d.id,
                            d.name.as_deref().unwrap_or("-"),
                            d.shared_genes,
                            d.treatment_count
                        );
                    }
                }
                if !profile.shared_genes.is_empty() {
                    println!("Shared genes:");
                    for g in &profile.shared_genes {
                        println!(
                            "  {:<16} {:<12} {}",
                            g.id,
                            g.name.as_deref().unwrap_or("-"),
                            g.related_diseases.join(", ")
                        );
                    }
                }
            }
        }

        Commands::Related { id, limit, json } => {
            let engine = Engine::from_config(config)?;
            let report = engine.related(&id, limit)?;
            if json {
                print_json(&report)?;
            } else if report.related.is_empty() {
                println!("Nothing related to {id} ({}).", report.entity.kind);
            } else {
                println!("Related to {id} ({}):", report.entity.kind);
                for r in &report.related {
                    print!(
                        "  {:<18} {:<16} {:<30} {}",
                        r.relation,
                        r.id,
                        r.name.as_deref().unwrap_or("-"),
                        r.score
                    );
                    if r.shared.is_empty() {
                        println!();
                    } else {
                        println!("  via {}", r.shared.join(", "));
                    }
                }
            }
        }

        Commands::Paths {
            compound_id,
            disease_id,
            limit,
            json,
        } => {
            let engine = Engine::from_config(config)?;
            let report = engine.connecting_paths(&compound_id, &disease_id, limit)?;
            if json {
                print_json(&report)?;
            } else if report.paths.is_empty() {
                println!("No paths connect {compound_id} to {disease_id}.");
            } else {
                println!("Paths from {compound_id} to {disease_id}:");
                for p in &report.paths {
                    println!("  {:<18} {}", p.category.label(), p.path.describe());
                }
            }
        }
    }

    Ok(())
}
