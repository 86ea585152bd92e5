use std::collections::HashMap;
use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quill_core::auth::{Identity, SharedIdentity};
use quill_core::config::SyncSettings;
use quill_core::connectivity::{Connectivity, TcpProbe};
use quill_core::remote::{HttpRemote, RemoteStore};
use quill_core::services::{NoteService, ReplicaService};
use quill_core::util::normalize_text_option;
use quill_core::{Label, LabelId, Note, OwnerId, SyncStatus};
use serde::Serialize;

use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

/// Owner used when no profile is configured
pub const LOCAL_OWNER: &str = "local";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything a command needs: the owner's notes and, when configured, the remote
pub struct Session {
    pub profile_name: String,
    pub notes: NoteService,
    pub remote: Option<Arc<dyn RemoteStore>>,
    pub connectivity: Option<Arc<dyn Connectivity>>,
    pub settings: SyncSettings,
}

impl Session {
    /// Replica-only session; nothing leaves this device
    pub fn local(db_path: &Path, owner: OwnerId) -> Result<Self, CliError> {
        let replica = ReplicaService::open_path(db_path)?;
        Ok(Self {
            profile_name: "local".to_string(),
            notes: NoteService::new(replica, owner),
            remote: None,
            connectivity: None,
            settings: SyncSettings::default(),
        })
    }

    pub fn owner(&self) -> &OwnerId {
        self.notes.owner()
    }

    pub fn replica(&self) -> &ReplicaService {
        self.notes.replica()
    }

    pub fn require_remote(&self) -> Result<Arc<dyn RemoteStore>, CliError> {
        self.remote.clone().ok_or(CliError::SyncNotConfigured)
    }
}

/// Open the replica and wire the profile's API client, if it has one
pub fn open_session(db_path: &Path, profile: Option<&str>) -> Result<Session, CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile);
    let settings = SyncSettings::from_env().map_err(|error| CliError::Config(error.to_string()))?;

    let Some((api_url, owner, token)) = config
        .profile(&profile_name)
        .and_then(|profile| profile.remote_settings())
    else {
        tracing::debug!(profile = %profile_name, "No remote configured; working offline");
        let mut session = Session::local(db_path, OwnerId::new(LOCAL_OWNER))?;
        session.profile_name = profile_name;
        session.settings = settings;
        return Ok(session);
    };

    let owner = OwnerId::new(owner);
    let identity = SharedIdentity::new(Identity::new(owner.clone(), token));
    let remote: Arc<dyn RemoteStore> =
        Arc::new(HttpRemote::new(&api_url, identity, settings.call_timeout)?);
    let connectivity: Arc<dyn Connectivity> = Arc::new(TcpProbe::for_url(&api_url, PROBE_TIMEOUT)?);

    let replica = ReplicaService::open_path(db_path)?;
    let notes = NoteService::new(replica, owner).with_remote(
        remote.clone(),
        connectivity.clone(),
        settings.call_timeout,
    );
    tracing::debug!(profile = %profile_name, api_url = %api_url, "Remote configured");

    Ok(Session {
        profile_name,
        notes,
        remote: Some(remote),
        connectivity: Some(connectivity),
        settings,
    })
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("QUILL_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("quill").join("replica.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub preview: String,
    pub labels: Vec<String>,
    pub sync_status: SyncStatus,
    pub push_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

/// Label id to name, including deleted labels so old links still render
pub async fn label_names(session: &Session) -> Result<HashMap<LabelId, String>, CliError> {
    Ok(session
        .replica()
        .list_labels(session.owner(), true)
        .await?
        .into_iter()
        .map(|label| (label.id, label.name))
        .collect())
}

/// Resolve names or ids given on the command line
pub async fn resolve_labels(session: &Session, raw: &[String]) -> Result<Vec<LabelId>, CliError> {
    let mut ids = Vec::with_capacity(raw.len());
    for value in raw {
        ids.push(session.notes.resolve_label(value).await?.id);
    }
    Ok(ids)
}

pub fn note_to_list_item(note: &Note, names: &HashMap<LabelId, String>) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        body: note.body.clone(),
        preview: note_preview(note, 80),
        labels: sorted_label_names(note, names),
        sync_status: note.sync_status,
        push_error: note.push_error.clone(),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
    }
}

pub fn format_note_lines(notes: &[Note], names: &HashMap<LabelId, String>) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let marker = sync_marker(note.sync_status, note.push_error.is_some());
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now_ms);
            let labels = sorted_label_names(note, names)
                .into_iter()
                .map(|name| format!("#{name}"))
                .collect::<Vec<_>>()
                .join(" ");

            if labels.is_empty() {
                format!("{short_id:<13} {marker} {preview:<40}  {relative_time}")
            } else {
                format!("{short_id:<13} {marker} {preview:<40}  {relative_time:<10}  {labels}")
            }
        })
        .collect()
}

pub fn format_label_lines(labels: &[Label]) -> Vec<String> {
    labels
        .iter()
        .map(|label| {
            let marker = sync_marker(label.sync_status, label.push_error.is_some());
            let line = format!("{marker} {}  {}", label.color, label.name);
            match label.push_error.as_deref() {
                Some(error) => format!("{line}  ({error})"),
                None => line,
            }
        })
        .collect()
}

/// `!` rejected, `*` waiting to be pushed, blank when synced
pub const fn sync_marker(status: SyncStatus, rejected: bool) -> char {
    if rejected {
        '!'
    } else if matches!(status, SyncStatus::Synced) {
        ' '
    } else {
        '*'
    }
}

fn sorted_label_names(note: &Note, names: &HashMap<LabelId, String>) -> Vec<String> {
    let mut labels = note
        .label_ids
        .iter()
        .filter_map(|id| names.get(id).cloned())
        .collect::<Vec<_>>();
    labels.sort_by_key(|name| name.to_lowercase());
    labels
}

/// Title when present, otherwise the first line of the body
pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let source = note
        .title
        .as_deref()
        .or_else(|| note.body.as_deref().and_then(|body| body.lines().next()))
        .unwrap_or("")
        .trim();
    let collapsed = source.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;

    let diff = now_ms.saturating_sub(timestamp_ms);
    if diff < MINUTE {
        "just now".to_string()
    } else if diff < HOUR {
        format!("{}m ago", diff / MINUTE)
    } else if diff < DAY {
        format!("{}h ago", diff / HOUR)
    } else if diff < WEEK {
        format!("{}d ago", diff / DAY)
    } else {
        format!("{}w ago", diff / WEEK)
    }
}

/// Body from arguments, falling back to piped stdin
pub fn resolve_body(parts: &[String]) -> Result<Option<String>, CliError> {
    if let Some(body) = normalize_text_option(Some(parts.join(" "))) {
        return Ok(Some(body));
    }
    read_piped_stdin()
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_text_option(Some(buffer)))
}

pub fn normalize_search_query(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySearchQuery)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}
