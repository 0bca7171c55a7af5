//! Background cleanup: stale temp files, old log rows, unassigned files and file versions
//! outside their relation's retention policy.

use crate::data::sql::{files_record_table, files_table, files_version_table};
use crate::schema::SharedSchema;
use crate::settings::Settings;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use uuid::Uuid;

const SECONDS_PER_DAY: i64 = 86_400;
const BATCH_SIZE: i64 = 100;
const TEMP_MAX_AGE: Duration = Duration::from_secs(SECONDS_PER_DAY as u64);

#[derive(Clone, Debug)]
pub struct RetentionSettings {
    pub interval: Duration,
    /// 0 keeps logs forever.
    pub logs_keep_days: u64,
    pub files_keep_days_deleted: u64,
    pub files_path: PathBuf,
    pub temp_path: PathBuf,
}

impl From<&Settings> for RetentionSettings {
    fn from(s: &Settings) -> Self {
        RetentionSettings {
            interval: s.cleanup_interval,
            logs_keep_days: s.logs_keep_days,
            files_keep_days_deleted: s.files_keep_days_deleted,
            files_path: s.files_path.clone(),
            temp_path: s.temp_path.clone(),
        }
    }
}

/// Per files attribute: what is needed to prune it, copied out of the schema cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileTarget {
    attribute_id: Uuid,
    retention_count: Option<i32>,
    retention_days: Option<i32>,
}

/// Run [`run_once`] every `settings.interval`. Failures are logged; the next tick tries again.
pub fn spawn_cleanup(pool: PgPool, schema: SharedSchema, settings: RetentionSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_once(&pool, &schema, &settings).await;
        }
    })
}

pub async fn run_once(pool: &PgPool, schema: &SharedSchema, settings: &RetentionSettings) {
    match clean_temp(&settings.temp_path, SystemTime::now()).await {
        Ok(removed) if removed > 0 => tracing::info!(removed, "temp files removed"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, path = %settings.temp_path.display(), "temp cleanup failed"),
    }

    let now = chrono::Utc::now();
    if settings.logs_keep_days > 0 {
        let cutoff = now.timestamp_millis() - settings.logs_keep_days as i64 * SECONDS_PER_DAY * 1000;
        match sqlx::query("DELETE FROM instance.log WHERE date_milli < $1").bind(cutoff).execute(pool).await {
            Ok(done) => tracing::debug!(removed = done.rows_affected(), "log rows pruned"),
            Err(e) => tracing::error!(error = %e, "log cleanup failed"),
        }
    }

    let targets: Vec<FileTarget> = {
        let cache = schema.read().await;
        cache
            .files_attributes()
            .into_iter()
            .map(|(atr, rel)| FileTarget {
                attribute_id: atr.id,
                retention_count: rel.retention_count,
                retention_days: rel.retention_days,
            })
            .collect()
    };
    for target in targets {
        if let Err(e) = clean_files(pool, &settings.files_path, target, settings.files_keep_days_deleted, now.timestamp()).await {
            tracing::error!(error = %e, attribute_id = %target.attribute_id, "file cleanup failed");
        }
    }
}

/// Remove entries of `dir` last modified more than a day before `now`. A missing directory is not an error.
async fn clean_temp(dir: &Path, now: SystemTime) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !is_expired(meta.modified()?, now, TEMP_MAX_AGE) {
            continue;
        }
        if meta.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
        removed += 1;
    }
    Ok(removed)
}

fn is_expired(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    now.duration_since(modified).map_or(false, |age| age > max_age)
}

/// Unix seconds `days` before `now`.
fn cutoff_secs(now: i64, days: u64) -> i64 {
    now - days as i64 * SECONDS_PER_DAY
}

/// `{files}/{attribute}/{first 3 chars of file id}/{file id}_{version}`.
pub fn version_path(files_path: &Path, attribute_id: Uuid, file_id: Uuid, version: i32) -> PathBuf {
    file_dir(files_path, attribute_id, file_id).join(format!("{}_{}", file_id, version))
}

pub fn thumbnail_path(files_path: &Path, attribute_id: Uuid, file_id: Uuid) -> PathBuf {
    file_dir(files_path, attribute_id, file_id).join(format!("{}.webp", file_id))
}

fn file_dir(files_path: &Path, attribute_id: Uuid, file_id: Uuid) -> PathBuf {
    let id = file_id.to_string();
    files_path.join(attribute_id.to_string()).join(&id[..3])
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[derive(Debug, thiserror::Error)]
enum CleanupError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("file system: {0}")]
    Io(#[from] std::io::Error),
}

fn delete_assignments_sql(atr_id: Uuid) -> String {
    format!(
        "DELETE FROM {} WHERE \"date_delete\" IS NOT NULL AND \"date_delete\" < $1",
        files_record_table(atr_id)
    )
}

fn unassigned_files_sql(atr_id: Uuid) -> String {
    format!(
        "SELECT f.\"id\" FROM {} AS f WHERE NOT EXISTS (SELECT 1 FROM {} AS r WHERE r.\"file_id\" = f.\"id\") LIMIT {}",
        files_table(atr_id),
        files_record_table(atr_id),
        BATCH_SIZE
    )
}

/// Versions that are not the latest, have more than `$1` newer versions and were changed before `$2`.
fn expired_versions_sql(atr_id: Uuid) -> String {
    let versions = files_version_table(atr_id);
    format!(
        "SELECT v.\"file_id\", v.\"version\" FROM {t} AS v \
         WHERE v.\"version\" <> (SELECT MAX(l.\"version\") FROM {t} AS l WHERE l.\"file_id\" = v.\"file_id\") \
         AND (SELECT COUNT(*) FROM {t} AS n WHERE n.\"file_id\" = v.\"file_id\" AND n.\"version\" > v.\"version\") > $1 \
         AND v.\"date_change\" < $2 \
         ORDER BY v.\"file_id\", v.\"version\" DESC LIMIT {b}",
        t = versions,
        b = BATCH_SIZE
    )
}

async fn clean_files(
    pool: &PgPool,
    files_path: &Path,
    target: FileTarget,
    keep_days_deleted: u64,
    now: i64,
) -> Result<(), CleanupError> {
    let atr_id = target.attribute_id;

    let done = sqlx::query(&delete_assignments_sql(atr_id))
        .bind(cutoff_secs(now, keep_days_deleted))
        .execute(pool)
        .await?;
    tracing::debug!(attribute_id = %atr_id, removed = done.rows_affected(), "deleted file assignments pruned");

    let versions = files_version_table(atr_id);
    loop {
        let file_ids: Vec<Uuid> = sqlx::query_scalar(&unassigned_files_sql(atr_id)).fetch_all(pool).await?;
        for file_id in &file_ids {
            let numbers: Vec<i32> = sqlx::query_scalar(&format!("SELECT \"version\" FROM {} WHERE \"file_id\" = $1", versions))
                .bind(file_id)
                .fetch_all(pool)
                .await?;
            for version in numbers {
                remove_if_exists(&version_path(files_path, atr_id, *file_id, version)).await?;
            }
            remove_if_exists(&thumbnail_path(files_path, atr_id, *file_id)).await?;

            let mut tx = pool.begin().await?;
            sqlx::query(&format!("DELETE FROM {} WHERE \"file_id\" = $1", versions))
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!("DELETE FROM {} WHERE \"id\" = $1", files_table(atr_id)))
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        if file_ids.len() < BATCH_SIZE as usize {
            if !file_ids.is_empty() {
                tracing::info!(attribute_id = %atr_id, files = file_ids.len(), "unassigned files removed");
            }
            break;
        }
    }

    if target.retention_count.is_none() && target.retention_days.is_none() {
        return Ok(());
    }
    let keep_count = target.retention_count.unwrap_or(0).max(0) as i64;
    let keep_days = target.retention_days.unwrap_or(0).max(0) as u64;
    let before = cutoff_secs(now, keep_days);
    loop {
        let expired: Vec<(Uuid, i32)> = sqlx::query_as(&expired_versions_sql(atr_id))
            .bind(keep_count)
            .bind(before)
            .fetch_all(pool)
            .await?;
        for (file_id, version) in &expired {
            remove_if_exists(&version_path(files_path, atr_id, *file_id, *version)).await?;
            sqlx::query(&format!("DELETE FROM {} WHERE \"file_id\" = $1 AND \"version\" = $2", versions))
                .bind(file_id)
                .bind(version)
                .execute(pool)
                .await?;
        }
        tracing::debug!(attribute_id = %atr_id, versions = expired.len(), "file versions pruned");
        if expired.len() < BATCH_SIZE as usize {
            break;
        }
    }
    Ok(())
}
