use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use procrasti::config::ClientConfig;
use procrasti::projects::NewProject;
use procrasti::ClientState;

#[derive(Parser)]
#[command(name = "procrasti")]
#[command(about = "Command-line client for the procrastination planner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides PROCRASTI_API_URL.
    #[arg(short, long, global = true)]
    url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Whoami,
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    Stats,
}

#[derive(Subcommand)]
enum ProjectCommands {
    List,
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long = "tech")]
        technologies: Vec<String>,
        #[arg(short, long = "feature")]
        functionality: Vec<String>,
    },
    Delete {
        id: String,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "procrasti=debug,reqwest=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    // logs go to stderr so command output stays pipeable
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.url {
        Some(url) => {
            let url = url.parse().with_context(|| format!("invalid --url {url:?}"))?;
            ClientConfig::new(url).with_env_overrides()
        }
        None => ClientConfig::from_env()?,
    };
    let state = ClientState::init(config)?;
    state.session.activate().await;

    match cli.command {
        Commands::Login { email, password } => {
            let user = state.session.login(&email, &password).await?;
            println!("Signed in as {}", user.label());
        }
        Commands::Logout => {
            state.session.logout().await?;
            println!("Signed out");
        }
        Commands::Whoami => match state.session.user() {
            Some(user) => println!("{} <{}>", user.label(), user.email),
            None => bail!("not signed in"),
        },
        Commands::Projects { command } => {
            require_user(&state)?;
            run_projects(&state, command).await?;
        }
        Commands::Stats => {
            let user = require_user(&state)?;
            let entry = state.profile.stats(&user.id).await;
            match (entry.data, entry.error) {
                (Some(stats), _) => {
                    println!("Projects:     {}", stats.total_projects);
                    println!("Ideas:        {}", stats.total_ideas);
                    if let Some(since) = stats.member_since {
                        println!("Member since: {}", since.date());
                    }
                }
                (None, Some(error)) => bail!(error),
                (None, None) => bail!("no statistics available"),
            }
        }
    }

    Ok(())
}

fn require_user(state: &ClientState) -> anyhow::Result<procrasti::auth::User> {
    state
        .session
        .user()
        .context("not signed in; run `procrasti login` first")
}

async fn run_projects(state: &ClientState, command: ProjectCommands) -> anyhow::Result<()> {
    match command {
        ProjectCommands::List => {
            let view = state.projects.load().await;
            if let Some(error) = view.error {
                bail!(error);
            }
            if view.projects.is_empty() {
                println!("No projects yet");
            }
            for project in &view.projects {
                println!("{}  {}", project.id, project.name);
                if let Some(idea) = project.latest_idea() {
                    println!("    latest idea: {}", idea.text);
                }
            }
        }
        ProjectCommands::Create {
            name,
            description,
            technologies,
            functionality,
        } => {
            let mut input = NewProject::new(name)
                .with_technologies(technologies)
                .with_functionality(functionality);
            if let Some(description) = description {
                input = input.with_description(description);
            }
            match state.projects.create_project(&input).await? {
                Some(project) => println!("Created {} ({})", project.name, project.id),
                None => println!("Created"),
            }
        }
        ProjectCommands::Delete { id } => {
            state.projects.delete_project(&id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}
