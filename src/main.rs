use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use gracl::authz::store::MemoryEntityStore;
use gracl::authz::types::Uid;
use gracl::errors::GraclError;
use gracl::{settings, storage, AuthzState, Gracl};

#[derive(Parser, Debug)]
#[command(
    name = "gracl",
    version,
    about = "Hierarchical access control resolution and query synthesis"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile the schema and print collections, depths and actions
    Schema,
    /// Print the broader permission types implied by a permission
    Parents { permission: String },
    /// Merge explicit allow/deny values into a subject -> resource edge
    Grant {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        resource: String,
        /// `permission=true|false`, e.g. `view-post=true`
        #[arg(required = true)]
        access: Vec<String>,
    },
    /// List edges held by or granted on a uid
    Edges { uid: String },
    /// Delete every edge held by or granted on a uid
    Purge { uid: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let state = storage::load_state(&settings.schema)?;

    match cli.command {
        Command::Schema => print_schema(&state),
        Command::Parents { permission } => {
            let permission = state.catalog.parse(&permission)?;
            let parents = state.catalog.parents(&permission)?;
            for parent in parents {
                println!("{parent}");
            }
        }
        command => {
            let db = storage::init(&settings.database).await?;
            let gracl = Gracl::new(
                Arc::new(state),
                db,
                Arc::new(MemoryEntityStore::new()),
                settings.upsert_policy(),
            );
            run_edge_command(&gracl, command).await?;
        }
    }
    Ok(())
}

async fn run_edge_command(gracl: &Gracl, command: Command) -> Result<(), GraclError> {
    match command {
        Command::Grant {
            subject,
            resource,
            access,
        } => {
            let patch = access
                .iter()
                .map(String::as_str)
                .map(parse_access)
                .collect::<Result<Vec<_>, _>>()?;
            let resource = parse_uid(gracl.state(), &resource)?;
            let subject = parse_uid(gracl.state(), &subject)?;
            let edge = gracl.update_permissions(&resource, patch, &subject).await?;
            println!("{}", serde_json::to_string_pretty(&edge)?);
        }
        Command::Edges { uid } => {
            let edges = gracl.edges_for(&parse_uid(gracl.state(), &uid)?).await?;
            println!("{}", serde_json::to_string_pretty(&edges)?);
        }
        Command::Purge { uid } => {
            let removed = gracl.remove_all_for(&parse_uid(gracl.state(), &uid)?).await?;
            println!("removed {removed} edge(s)");
        }
        Command::Schema | Command::Parents { .. } => {}
    }
    Ok(())
}

fn print_schema(state: &AuthzState) {
    let graph = &state.graph;
    for def in graph.collections() {
        let mut roles = Vec::new();
        if let Some(depth) = graph.resources().depth(&def.name) {
            roles.push(format!("resource depth {depth}"));
        }
        if let Some(depth) = graph.subjects().depth(&def.name) {
            roles.push(format!("subject depth {depth}"));
        }
        println!("{} ({}): {}", def.name, def.code, roles.join(", "));
    }
    for action in state.catalog.actions() {
        match &action.collection {
            Some(collection) => println!("action {} on {collection}", action.name),
            None => println!("action {}", action.name),
        }
    }
}

fn parse_uid(state: &AuthzState, s: &str) -> Result<Uid, GraclError> {
    let (collection, id) = state.parse_uid(s)?;
    Ok(state.uid(&collection, &id)?)
}

fn parse_access(entry: &str) -> Result<(&str, bool), GraclError> {
    let (permission, value) = entry
        .split_once('=')
        .ok_or_else(|| GraclError::BadRequest(format!("expected `permission=bool`, got `{entry}`")))?;
    let allowed = value
        .parse::<bool>()
        .map_err(|_| GraclError::BadRequest(format!("`{value}` is not true or false")))?;
    Ok((permission, allowed))
}
