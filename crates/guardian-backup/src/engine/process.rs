//! Adapter that shells out to the vendor dump and restore tools

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use guardian_core::{GuardianConfig, S3Settings};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info};

use super::storage::ArtifactStorage;
use super::{BackupArtifact, BackupEngine};
use crate::error::EngineError;
use crate::models::{
    Backup, BackupConfig, BackupManifest, DatabaseConnection, EngineType, RestoreOptions,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `pg_dump`, `mysqldump`, `mongodump` and `sqlite3` (and their restore
/// counterparts) as child processes. Children are killed when the run is
/// dropped.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    staging_dir: PathBuf,
    storage: ArtifactStorage,
}

/// A dump sitting in the per-run staging directory
struct StagedDump {
    path: PathBuf,
    items: Vec<String>,
    compressed: bool,
}

impl ProcessEngine {
    pub fn new(staging_dir: impl Into<PathBuf>, s3: Option<S3Settings>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            storage: ArtifactStorage::new(s3),
        }
    }

    pub fn from_config(config: &GuardianConfig) -> Self {
        Self::new(config.staging_dir(), config.s3.clone())
    }

    async fn workdir(&self) -> Result<TempDir, EngineError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.staging_dir)
            .map_err(EngineError::from)
    }

    async fn dump_postgres(
        &self,
        conn: &DatabaseConnection,
        config: &BackupConfig,
        dest: PathBuf,
    ) -> Result<StagedDump, EngineError> {
        let mut cmd = Command::new("pg_dump");
        cmd.arg("--format=custom")
            .arg(if config.compress {
                "--compress=6"
            } else {
                "--compress=0"
            })
            .arg("--no-password")
            .arg("--host")
            .arg(&conn.host)
            .arg("--port")
            .arg(port_arg(conn))
            .arg("--username")
            .arg(&conn.username)
            .arg("--dbname")
            .arg(&conn.database)
            .arg("--file")
            .arg(&dest)
            .env("PGPASSWORD", &conn.password);
        run_tool(cmd, "pg_dump").await?;

        let mut list = Command::new("pg_restore");
        list.arg("--list").arg(&dest);
        let output = run_tool(list, "pg_restore").await?;

        Ok(StagedDump {
            path: dest,
            items: parse_pg_restore_list(&String::from_utf8_lossy(&output.stdout)),
            compressed: config.compress,
        })
    }

    async fn dump_mysql(
        &self,
        conn: &DatabaseConnection,
        config: &BackupConfig,
        dest: PathBuf,
    ) -> Result<StagedDump, EngineError> {
        let mut cmd = Command::new("mysqldump");
        cmd.arg("--single-transaction")
            .arg("--routines")
            .arg("--host")
            .arg(&conn.host)
            .arg("--port")
            .arg(port_arg(conn))
            .arg("--user")
            .arg(&conn.username)
            .arg(&conn.database)
            .env("MYSQL_PWD", &conn.password);
        let output = run_tool(cmd, "mysqldump").await?;

        let items = parse_create_tables(&String::from_utf8_lossy(&output.stdout));
        let dest = with_gz(dest, config.compress);
        write_artifact(dest.clone(), output.stdout, config.compress).await?;

        Ok(StagedDump {
            path: dest,
            items,
            compressed: config.compress,
        })
    }

    async fn dump_mongodb(
        &self,
        conn: &DatabaseConnection,
        config: &BackupConfig,
        dest: PathBuf,
    ) -> Result<StagedDump, EngineError> {
        let mut cmd = Command::new("mongodump");
        cmd.arg(format!("--uri={}", mongo_uri(conn)))
            .arg(format!("--db={}", conn.database))
            .arg(format!("--archive={}", dest.display()));
        if config.compress {
            cmd.arg("--gzip");
        }
        let output = run_tool(cmd, "mongodump").await?;

        // mongodump reports progress on stderr
        let items = parse_mongodump_log(&String::from_utf8_lossy(&output.stderr), &conn.database);
        Ok(StagedDump {
            path: dest,
            items,
            compressed: config.compress,
        })
    }

    async fn dump_sqlite(
        &self,
        conn: &DatabaseConnection,
        config: &BackupConfig,
        dest: PathBuf,
    ) -> Result<StagedDump, EngineError> {
        ensure_sqlite_file(conn).await?;

        let mut cmd = Command::new("sqlite3");
        cmd.arg(&conn.database)
            .arg(format!(".backup '{}'", sqlite_quote(&dest)));
        run_tool(cmd, "sqlite3").await?;

        let mut tables = Command::new("sqlite3");
        tables.arg(&conn.database).arg(".tables");
        let output = run_tool(tables, "sqlite3").await?;
        let mut items: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        items.sort();
        items.dedup();

        let path = if config.compress {
            let gz = with_gz(dest.clone(), true);
            gzip_file(dest.clone(), gz.clone()).await?;
            tokio::fs::remove_file(&dest).await?;
            gz
        } else {
            dest
        };

        Ok(StagedDump {
            path,
            items,
            compressed: config.compress,
        })
    }

    async fn restore_postgres(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        options: &RestoreOptions,
    ) -> Result<(), EngineError> {
        let mut cmd = Command::new("pg_restore");
        cmd.arg("--no-password")
            .arg("--host")
            .arg(&conn.host)
            .arg("--port")
            .arg(port_arg(conn))
            .arg("--username")
            .arg(&conn.username)
            .arg("--dbname")
            .arg(&conn.database)
            .env("PGPASSWORD", &conn.password);
        if options.drop_existing {
            cmd.arg("--clean").arg("--if-exists");
        }
        if options.selective_restore {
            for item in &options.items {
                cmd.arg("--table").arg(item);
            }
        }
        cmd.arg(artifact);

        info!("Running pg_restore for database {}", conn.database);
        run_tool(cmd, "pg_restore").await.map(|_| ())
    }

    async fn restore_mysql(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        options: &RestoreOptions,
    ) -> Result<(), EngineError> {
        if options.selective_restore {
            return Err(EngineError::Unsupported(
                "Selective restore is not supported for mysql backups".to_string(),
            ));
        }

        if options.drop_existing {
            let db = conn.database.replace('`', "``");
            let mut reset = mysql_command(conn);
            reset.arg("--execute").arg(format!(
                "DROP DATABASE IF EXISTS `{}`; CREATE DATABASE `{}`;",
                db, db
            ));
            run_tool(reset, "mysql").await?;
        }

        let data = read_artifact(artifact.to_path_buf()).await?;
        let mut cmd = mysql_command(conn);
        cmd.arg(&conn.database);
        run_tool_with_input(cmd, "mysql", data).await.map(|_| ())
    }

    async fn restore_mongodb(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        manifest: &BackupManifest,
        options: &RestoreOptions,
    ) -> Result<(), EngineError> {
        let mut cmd = Command::new("mongorestore");
        cmd.arg(format!("--uri={}", mongo_uri(conn)))
            .arg(format!("--archive={}", artifact.display()));
        if manifest.compressed {
            cmd.arg("--gzip");
        }
        if options.drop_existing {
            cmd.arg("--drop");
        }
        if options.selective_restore {
            for item in &options.items {
                cmd.arg(format!("--nsInclude={}.{}", manifest.database, item));
            }
        } else {
            cmd.arg(format!("--nsInclude={}.*", manifest.database));
        }
        // Restore into the target connection's database
        if manifest.database != conn.database {
            cmd.arg(format!("--nsFrom={}.*", manifest.database))
                .arg(format!("--nsTo={}.*", conn.database));
        }
        run_tool(cmd, "mongorestore").await.map(|_| ())
    }

    async fn restore_sqlite(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        workdir: &Path,
        options: &RestoreOptions,
    ) -> Result<(), EngineError> {
        if options.selective_restore {
            return Err(EngineError::Unsupported(
                "Selective restore is not supported for sqlite backups".to_string(),
            ));
        }

        let source = if is_gz(artifact) {
            let plain = workdir.join("restore.db");
            gunzip_file(artifact.to_path_buf(), plain.clone()).await?;
            plain
        } else {
            artifact.to_path_buf()
        };

        let mut cmd = Command::new("sqlite3");
        cmd.arg(&conn.database)
            .arg(format!(".restore '{}'", sqlite_quote(&source)));
        run_tool(cmd, "sqlite3").await.map(|_| ())
    }
}

#[async_trait]
impl BackupEngine for ProcessEngine {
    async fn perform_backup(
        &self,
        connection: &DatabaseConnection,
        config: &BackupConfig,
    ) -> Result<BackupArtifact, EngineError> {
        let workdir = self.workdir().await?;
        let stem = format!(
            "{}-{}",
            file_stem(&connection.database),
            Utc::now().format("%Y%m%dT%H%M%S")
        );

        let staged = match connection.engine {
            EngineType::Postgresql => {
                let dest = workdir.path().join(format!("{}.dump", stem));
                self.dump_postgres(connection, config, dest).await?
            }
            EngineType::Mysql => {
                let dest = workdir.path().join(format!("{}.sql", stem));
                self.dump_mysql(connection, config, dest).await?
            }
            EngineType::Mongodb => {
                let dest = workdir.path().join(format!("{}.archive", stem));
                self.dump_mongodb(connection, config, dest).await?
            }
            EngineType::Sqlite => {
                let dest = workdir.path().join(format!("{}.db", stem));
                self.dump_sqlite(connection, config, dest).await?
            }
        };

        let size_bytes = tokio::fs::metadata(&staged.path).await?.len();
        let file_name = staged
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.clone());
        let storage_path = self.storage.store(config, &staged.path, &file_name).await?;
        debug!(
            "Backup of {} stored at {} ({} bytes, {} items)",
            connection.database,
            storage_path,
            size_bytes,
            staged.items.len()
        );

        Ok(BackupArtifact {
            size_bytes,
            storage_path,
            manifest: BackupManifest {
                engine: connection.engine,
                database: connection.database.clone(),
                compressed: staged.compressed,
                items: staged.items,
            },
        })
    }

    async fn perform_restore(
        &self,
        connection: &DatabaseConnection,
        backup: &Backup,
        options: &RestoreOptions,
    ) -> Result<(), EngineError> {
        let path = backup.path.as_deref().ok_or_else(|| {
            EngineError::Artifact(format!("Backup {} has no stored artifact", backup.id))
        })?;
        let manifest = backup.manifest.as_ref().ok_or_else(|| {
            EngineError::Artifact(format!("Backup {} has no manifest", backup.id))
        })?;

        let workdir = self.workdir().await?;
        let artifact = self.storage.fetch(path, workdir.path()).await?;

        match connection.engine {
            EngineType::Postgresql => self.restore_postgres(connection, &artifact, options).await,
            EngineType::Mysql => self.restore_mysql(connection, &artifact, options).await,
            EngineType::Mongodb => {
                self.restore_mongodb(connection, &artifact, manifest, options)
                    .await
            }
            EngineType::Sqlite => {
                self.restore_sqlite(connection, &artifact, workdir.path(), options)
                    .await
            }
        }
    }

    async fn test_connection(&self, connection: &DatabaseConnection) -> Result<(), EngineError> {
        if connection.engine == EngineType::Sqlite {
            return ensure_sqlite_file(connection).await;
        }

        let address = connection.address();
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(EngineError::Connection(format!(
                "Could not connect to {}: {}",
                address, e
            ))),
            Err(_) => Err(EngineError::Connection(format!(
                "Connection to {} timed out",
                address
            ))),
        }
    }
}

async fn run_tool(mut cmd: Command, tool: &str) -> Result<Output, EngineError> {
    cmd.kill_on_drop(true).stdin(Stdio::null());
    let output = cmd.output().await.map_err(|e| spawn_error(tool, e))?;
    check_status(tool, output)
}

async fn run_tool_with_input(
    mut cmd: Command,
    tool: &str,
    input: Vec<u8>,
) -> Result<Output, EngineError> {
    cmd.kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&input).await?;
    }
    let output = child.wait_with_output().await?;
    check_status(tool, output)
}

fn spawn_error(tool: &str, err: std::io::Error) -> EngineError {
    EngineError::Internal(format!(
        "Failed to execute {}: {}. Make sure {} is installed and in PATH",
        tool, err, tool
    ))
}

fn check_status(tool: &str, output: Output) -> Result<Output, EngineError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(classify_failure(tool, &String::from_utf8_lossy(&output.stderr)))
    }
}

/// Map tool stderr onto the engine error taxonomy
fn classify_failure(tool: &str, stderr: &str) -> EngineError {
    let message = format!("{} failed: {}", tool, stderr.trim());
    let lowered = stderr.to_lowercase();
    if lowered.contains("authentication failed")
        || lowered.contains("access denied")
        || lowered.contains("password")
    {
        EngineError::Authentication(message)
    } else if lowered.contains("could not connect")
        || lowered.contains("can't connect")
        || lowered.contains("connection refused")
        || lowered.contains("no reachable servers")
        || lowered.contains("timed out")
    {
        EngineError::Connection(message)
    } else if lowered.contains("not a valid archive")
        || lowered.contains("input file does not appear")
        || lowered.contains("file is not a database")
    {
        EngineError::Artifact(message)
    } else {
        EngineError::Internal(message)
    }
}

fn mysql_command(conn: &DatabaseConnection) -> Command {
    let mut cmd = Command::new("mysql");
    cmd.arg("--host")
        .arg(&conn.host)
        .arg("--port")
        .arg(port_arg(conn))
        .arg("--user")
        .arg(&conn.username)
        .env("MYSQL_PWD", &conn.password);
    cmd
}

fn port_arg(conn: &DatabaseConnection) -> String {
    conn.effective_port()
        .map(|p| p.to_string())
        .unwrap_or_default()
}

fn mongo_uri(conn: &DatabaseConnection) -> String {
    format!(
        "mongodb://{}:{}@{}/?authSource=admin",
        urlencoding::encode(&conn.username),
        urlencoding::encode(&conn.password),
        conn.address()
    )
}

async fn ensure_sqlite_file(conn: &DatabaseConnection) -> Result<(), EngineError> {
    match tokio::fs::metadata(&conn.database).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(EngineError::Connection(format!(
            "SQLite database file {} does not exist",
            conn.database
        ))),
    }
}

fn sqlite_quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

/// Database names may be file paths (SQLite); keep only the file stem
fn file_stem(database: &str) -> String {
    let base = Path::new(database)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| database.to_string());
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "backup".to_string()
    } else {
        cleaned
    }
}

fn with_gz(path: PathBuf, compress: bool) -> PathBuf {
    if compress {
        let mut name = path.into_os_string();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

async fn write_artifact(path: PathBuf, data: Vec<u8>, compress: bool) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&path)?;
        if compress {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
        } else {
            file.write_all(&data)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Internal(format!("Compression task failed: {}", e)))??;
    Ok(())
}

async fn read_artifact(path: PathBuf) -> Result<Vec<u8>, EngineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let raw = std::fs::read(&path)?;
        if is_gz(&path) {
            let mut decoded = Vec::new();
            GzDecoder::new(&raw[..]).read_to_end(&mut decoded)?;
            Ok(decoded)
        } else {
            Ok(raw)
        }
    })
    .await
    .map_err(|e| EngineError::Internal(format!("Decompression task failed: {}", e)))?
    .map_err(|e| EngineError::Artifact(format!("Backup artifact is unreadable: {}", e)))
}

async fn gzip_file(src: PathBuf, dest: PathBuf) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut input = std::fs::File::open(&src)?;
        let output = std::fs::File::create(&dest)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Internal(format!("Compression task failed: {}", e)))??;
    Ok(())
}

async fn gunzip_file(src: PathBuf, dest: PathBuf) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let input = std::fs::File::open(&src)?;
        let mut decoder = GzDecoder::new(input);
        let mut output = std::fs::File::create(&dest)?;
        std::io::copy(&mut decoder, &mut output)?;
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Internal(format!("Decompression task failed: {}", e)))?
    .map_err(|e| EngineError::Artifact(format!("Backup artifact is unreadable: {}", e)))
}

/// Table names from `pg_restore --list` output
fn parse_pg_restore_list(listing: &str) -> Vec<String> {
    let mut items: Vec<String> = listing
        .lines()
        .filter(|line| !line.trim_start().starts_with(';'))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            // "<id>; <oid> <oid> TABLE <schema> <name> <owner>"
            if tokens.len() >= 6 && tokens[3] == "TABLE" && tokens[4] != "DATA" {
                Some(tokens[5].to_string())
            } else {
                None
            }
        })
        .collect();
    items.sort();
    items.dedup();
    items
}

/// Table names from the `CREATE TABLE` statements of a SQL dump
fn parse_create_tables(dump: &str) -> Vec<String> {
    let mut items: Vec<String> = dump
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("CREATE TABLE "))
        .map(|rest| rest.trim_start_matches("IF NOT EXISTS ").trim_start())
        .filter_map(|rest| rest.split_whitespace().next())
        .map(|name| name.trim_matches('`').to_string())
        .filter(|name| !name.is_empty())
        .collect();
    items.sort();
    items.dedup();
    items
}

/// Collection names from mongodump's "done dumping <db>.<coll>" lines
fn parse_mongodump_log(log: &str, database: &str) -> Vec<String> {
    let prefix = format!("{}.", database);
    let mut items: Vec<String> = log
        .lines()
        .filter_map(|line| line.split_once("done dumping "))
        .filter_map(|(_, rest)| rest.split_whitespace().next())
        .filter_map(|ns| ns.strip_prefix(&prefix))
        .map(str::to_string)
        .collect();
    items.sort();
    items.dedup();
    items
}
