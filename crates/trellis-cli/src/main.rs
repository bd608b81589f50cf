use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt};
use trellis_runtime::host::Document;
use trellis_runtime::{App, StateBackends};

mod manifest;

use manifest::Manifest;

#[derive(Parser)]
#[command(name = "trellis", about = "Trellis: inspect and exercise route manifests")]
struct Cli {
    /// Route manifest (TOML)
    #[arg(long, short, default_value = "trellis.toml")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the compiled route table
    Routes,
    /// Match paths against the route table and print the result as JSON
    Match {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Start the app headlessly and navigate, printing the document after each step
    Navigate {
        /// Location the document starts at
        #[arg(long, default_value = "/")]
        start: String,

        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    fmt()
        .with_env_filter(EnvFilter::from_env("TRELLIS_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manifest = Manifest::load(&cli.manifest)?;
    tracing::debug!(manifest = %cli.manifest.display(), routes = manifest.routes.len(), "Manifest loaded");

    match cli.command {
        Command::Routes => {
            let app = build_app(&manifest, "/")?;
            for entry in app.router().routes() {
                println!("{}\t{}", entry.pattern, entry.tag);
            }
        }
        Command::Match { paths } => {
            let app = build_app(&manifest, "/")?;
            let mut unmatched = 0;
            for path in &paths {
                match app.router().find_matching_route(path) {
                    Ok(matched) => println!("{}", serde_json::to_string(&matched)?),
                    Err(e) => {
                        eprintln!("{e}");
                        unmatched += 1;
                    }
                }
            }
            if unmatched > 0 {
                bail!("{unmatched} of {} path(s) matched no route", paths.len());
            }
        }
        Command::Navigate { start, paths } => {
            let app = build_app(&manifest, &start)?;
            app.run()?;
            app.settle().await;
            println!("== {}", app.document().location());
            print!("{}", app.document().outline());

            for path in &paths {
                app.navigate_to(path, Value::Null)?;
                app.settle().await;
                println!("== {}", app.document().location());
                print!("{}", app.document().outline());
            }
        }
    }

    Ok(())
}

fn build_app(manifest: &Manifest, start: &str) -> Result<App> {
    let backends = if manifest.runtime.state.durable_path.is_some() {
        StateBackends::from_config(&manifest.runtime.state)
    } else {
        StateBackends::in_memory()
    };
    let app = App::builder()
        .config(manifest.runtime.clone())
        .document(Document::new(start))
        .backends(backends)
        .build();

    for (id, template) in &manifest.templates {
        app.template(id.clone(), template.clone());
    }
    app.routes(manifest.routes())?;
    Ok(app)
}
