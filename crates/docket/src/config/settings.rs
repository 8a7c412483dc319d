//! Resolved application settings.

use std::path::PathBuf;

use super::{GateSection, OcrSection, DEFAULT_DATABASE_FILENAME, OBJECTS_SUBDIR};
use crate::repository::util::is_postgres_url;
use crate::repository::{DbContext, DieselError, Repositories};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Overrides data_dir/database_filename when set.
    pub database_url: Option<String>,
    /// Root of the filesystem object store.
    pub objects_dir: PathBuf,
    pub gate: GateSection,
    pub ocr: OcrSection,
    /// External parser executable. `None` selects the built-in line parser.
    pub parser_command: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        // Local data dir -> home dir -> current dir
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docket");
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            objects_dir: data_dir.join(OBJECTS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            gate: GateSection::default(),
            ocr: OcrSection::default(),
            parser_command: None,
        }
    }

    /// The database URL, built from the data dir when not set explicitly.
    pub fn database_url(&self) -> String {
        match self.database_url {
            Some(ref url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_ref()
            .is_some_and(|url| is_postgres_url(url))
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.objects_dir)?;
        Ok(())
    }

    pub fn db_context(&self) -> Result<DbContext, DieselError> {
        DbContext::from_url(&self.database_url())
    }

    pub fn repositories(&self) -> Result<Repositories, DieselError> {
        Ok(self.db_context()?.repositories())
    }
}
