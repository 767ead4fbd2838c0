use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use micro_kit::auth::{issue_token, ROLE_ADMIN, ROLE_AUTHENTICATED};
use micro_kit::config::AppConfig;
use micro_kit::database::{Entity, Filter, OrderBy, Repository};
use micro_kit::ids::new_id;
use micro_kit::notify::Notification;
use micro_kit::router::handle_with;
use micro_kit::validation::{Validate, Validator};
use micro_kit::{App, AppError, AppInfo, RequestContext};

#[derive(Parser)]
#[command(name = "micro-kit")]
#[command(about = "Demo server for the micro-kit scaffolding")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Override the configured port")]
        port: Option<u16>,
    },

    #[command(about = "Sign a bearer token with JWT_SECRET")]
    Token {
        #[arg(long)]
        sub: String,

        #[arg(long, default_value = "user")]
        role: String,

        #[arg(long, help = "Lifetime in hours, defaults to the configured expiry")]
        hours: Option<i64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    id: String,
    owner: String,
    title: String,
    #[serde(default)]
    body: String,
}

impl Entity for Note {
    const TABLE: &'static str = "notes";
    const FIELDS: &'static [&'static str] = &["id", "owner", "title", "body"];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
struct NewNote {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
}

impl Validate for NewNote {
    fn validate(&self, v: &mut Validator) {
        v.required("Title", &self.title).max_len("Title", &self.title, 120);
        v.max_len("Body", &self.body, 4096);
    }
}

async fn list_notes(rc: RequestContext) -> Result<Vec<Note>, AppError> {
    let notes = Repository::<Note>::from_ctx(&rc.ctx());
    let mine = Filter::new().eq("owner", rc.auth().id.as_str());
    Ok(notes.find_all_by(&OrderBy::asc("title"), &mine).await?)
}

async fn get_note(rc: RequestContext) -> Result<Note, AppError> {
    let id = rc.path_param("id").unwrap_or_default();
    Repository::<Note>::from_ctx(&rc.ctx())
        .find_by_id(id)
        .await
        .filter(|n| n.owner == rc.auth().id)
        .ok_or_else(|| AppError::not_found("note.not_found"))
}

async fn create_note(rc: RequestContext) -> Result<Note, AppError> {
    let input: NewNote = rc.should_bind()?;
    let note = Note {
        id: new_id("note"),
        owner: rc.auth().id.clone(),
        title: input.title,
        body: input.body,
    };
    Repository::<Note>::from_ctx(&rc.ctx()).create(&note).await?;
    Ok(note)
}

async fn delete_note(rc: RequestContext) -> Result<(), AppError> {
    let id = rc.path_param("id").unwrap_or_default().to_string();
    let owner = rc.auth().id.clone();
    rc.env()
        .with_transaction(|tx| async move {
            let notes = Repository::<Note>::new(tx);
            match notes.try_find_by_id(&id).await? {
                Some(note) if note.owner == owner => Ok(notes.delete_by_id(&id).await?),
                Some(_) => Err(AppError::forbidden("note.not_owned")),
                None => Err(AppError::RecordNotFound),
            }
        })
        .await
}

async fn announce(input: NewNote, rc: RequestContext) -> Result<(), AppError> {
    rc.env()
        .send_notification(Notification::text(input.title))
        .await
        .map_err(|e| AppError::technical("notify.failed", e.to_string()))
}

async fn count_notes(rc: RequestContext) -> Result<i64, AppError> {
    Ok(Repository::<Note>::from_ctx(&rc.ctx())
        .count_by(&Filter::new())
        .await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    micro_kit::app::init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::load();

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Token { sub, role, hours } => {
            let secret = config
                .security
                .jwt_secret
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("JWT_SECRET is not set"))?;
            let hours = hours.unwrap_or(config.security.jwt_expiry_hours as i64);
            println!("{}", issue_token(secret, sub, role, chrono::Duration::hours(hours))?);
            Ok(())
        }
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let info = AppInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            let mut app = App::new(config, info).await?;

            let router = app.router();
            router
                .group("/notes", [ROLE_AUTHENTICATED])
                .get("/", list_notes)
                .post("/", create_note)
                .get("/:id", get_note)
                .delete("/:id", delete_note);
            router
                .group("/admin", [ROLE_ADMIN])
                .get("/notes/count", count_notes);
            router.post("/announce", handle_with([ROLE_ADMIN], announce));

            app.serve().await
        }
    }
}
