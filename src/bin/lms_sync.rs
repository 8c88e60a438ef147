use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use lms_sync::application::services::{WizardAutosave, WizardController};
use lms_sync::domain::entities::{CourseDraft, CourseSection, FilePart, page::total_pages};
use lms_sync::domain::value_objects::{AccessToken, CollectionName, EntityKey, PageRequest};
use lms_sync::shared::config::AppConfig;
use lms_sync::{AppState, init_logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lms-sync")]
#[command(about = "Command-line client for the LMS admin API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Bearer token for the admin API
    #[arg(long, env = "LMS_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List one page of a resource
    List {
        /// Resource path, e.g. `course` or `news`
        resource: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Page size (defaults to LMS_PAGE_TAKE)
        #[arg(long)]
        take: Option<u32>,
    },
    /// Show a single entity
    Get { resource: String, id: i64 },
    /// Delete an entity
    Delete {
        resource: String,
        id: i64,
        /// Send `{ id, language }` in the request body
        #[arg(long)]
        with_language: bool,
    },
    /// Run the course wizard and submit the course
    CreateCourse {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category_id: Option<i64>,
        /// Section title; repeat for several sections
        #[arg(long = "section")]
        sections: Vec<String>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Cover image to upload with the course
        #[arg(long)]
        cover: Option<PathBuf>,
        /// Continue from the autosaved draft instead of starting fresh
        #[arg(long)]
        resume: bool,
    },
    /// Inspect or discard the autosaved course draft
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand)]
enum DraftAction {
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = AppConfig::from_env();
    config.validate().map_err(|e| anyhow!(e))?;

    if let Commands::Draft { action } = &cli.command {
        return run_draft(&config, action).await;
    }

    let token = cli
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("An access token is required (--token or LMS_ACCESS_TOKEN)"))
        .and_then(|raw| AccessToken::new(raw).map_err(|e| anyhow!(e)))?;
    let state = AppState::new(config, token).await?;

    match cli.command {
        Commands::List {
            resource,
            page,
            take,
        } => {
            let collection = collection(&resource)?;
            let take = take.unwrap_or(state.config.pagination.default_take);
            let request = PageRequest::new(page, take).map_err(|e| anyhow!(e))?;
            let listing = state.coordinator.fetch_page(&collection, request).await?;
            for entity in &listing.items {
                println!("{}", entity.to_json());
            }
            println!(
                "page {} of {} ({} total)",
                page,
                total_pages(listing.total_count, take),
                listing.total_count
            );
        }
        Commands::Get { resource, id } => {
            let collection = collection(&resource)?;
            let entity = state.coordinator.fetch_one(&collection, id).await?;
            println!("{}", serde_json::to_string_pretty(&entity.to_json())?);
        }
        Commands::Delete {
            resource,
            id,
            with_language,
        } => {
            let collection = collection(&resource)?;
            state.coordinator.fetch_one(&collection, id).await?;
            let key = EntityKey::Server(id);
            let handle = if with_language {
                state.coordinator.delete_with_language(&collection, key)?
            } else {
                state.coordinator.delete(&collection, key)?
            };
            handle.outcome().await?;
            info!("Deleted {} {}", collection, id);
        }
        Commands::CreateCourse {
            name,
            description,
            category_id,
            sections,
            start_date,
            end_date,
            cover,
            resume,
        } => {
            let input = CourseInput {
                name,
                description,
                category_id,
                sections,
                start_date,
                end_date,
                cover,
            };
            create_course(&state, input, resume).await?;
        }
        Commands::Draft { action } => run_draft(&state.config, &action).await?,
    }

    Ok(())
}

fn collection(resource: &str) -> Result<CollectionName> {
    CollectionName::new(resource).map_err(|e| anyhow!(e))
}

async fn run_draft(config: &AppConfig, action: &DraftAction) -> Result<()> {
    let drafts = AppState::open_drafts(config).await?;
    let key = &config.autosave.storage_key;
    match action {
        DraftAction::Show => match drafts.load(key).await? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("No draft saved under {key}"),
        },
        DraftAction::Clear => {
            drafts.clear(key).await?;
            info!("Cleared draft {}", key);
        }
    }
    Ok(())
}

struct CourseInput {
    name: Option<String>,
    description: Option<String>,
    category_id: Option<i64>,
    sections: Vec<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    cover: Option<PathBuf>,
}

async fn create_course(state: &AppState, input: CourseInput, resume: bool) -> Result<()> {
    let storage_key = state.config.autosave.storage_key.clone();
    let restored = if resume {
        WizardController::<CourseDraft>::restore(state.drafts.as_ref(), &storage_key).await?
    } else {
        None
    };
    let wizard = Arc::new(Mutex::new(
        restored.unwrap_or_else(|| WizardController::new(CourseDraft::new())),
    ));

    let autosave = state.config.autosave.enabled.then(|| {
        WizardAutosave::spawn(
            wizard.clone(),
            state.drafts.clone(),
            storage_key.clone(),
            state.config.autosave.interval(),
        )
    });

    let cover = match &input.cover {
        Some(path) => Some(read_cover(path).await?),
        None => None,
    };

    wizard.lock().await.update_draft(|draft| {
        if let Some(name) = input.name {
            draft.basic_info.name = name;
        }
        if let Some(description) = input.description {
            draft.basic_info.description = description;
        }
        if input.category_id.is_some() {
            draft.basic_info.category_id = input.category_id;
        }
        draft
            .sections
            .extend(input.sections.into_iter().map(|title| CourseSection {
                title,
                ..Default::default()
            }));
        if input.start_date.is_some() {
            draft.publish.start_date = input.start_date;
        }
        if input.end_date.is_some() {
            draft.publish.end_date = input.end_date;
        }
        if cover.is_some() {
            draft.cover_image = cover;
        }
    })?;

    loop {
        let mut guard = wizard.lock().await;
        let step = guard.current_step();
        if step + 1 >= guard.step_count() {
            break;
        }
        if !guard.next() {
            let messages = guard.validate(step).messages().join(", ");
            let step_name = guard.step_name(step).unwrap_or("unknown");
            // keep what was entered so far for --resume
            state.drafts.save(&storage_key, &guard.snapshot()?).await?;
            bail!("Step {step_name} is incomplete: {messages}");
        }
    }

    // no autosave write may land after the draft is pruned
    if let Some(autosave) = autosave {
        autosave.stop().await;
    }

    let mut guard = wizard.lock().await;
    let entity = match guard
        .submit_and_prune(&state.coordinator, state.drafts.as_ref(), &storage_key)
        .await
    {
        Ok(entity) => entity,
        Err(err) => {
            state.drafts.save(&storage_key, &guard.snapshot()?).await?;
            return Err(err.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&entity.to_json())?);
    Ok(())
}

async fn read_cover(path: &Path) -> Result<FilePart> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let content_type = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => {
            warn!("Unknown image type for {}, sending as binary", path.display());
            "application/octet-stream"
        }
    };
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("cover")
        .to_string();
    Ok(FilePart {
        field: "coverImage".to_string(),
        file_name,
        content_type: content_type.to_string(),
        bytes,
    })
}
