use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".tabsentinel"))
            .unwrap_or_else(|| PathBuf::from(".tabsentinel"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Flat key-value settings shared by the daemon and the CLI.
    pub fn settings_file(&self) -> PathBuf {
        self.base.join("settings.json")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.base.join("profiles")
    }

    pub fn browser_profile(&self, engine: &str) -> PathBuf {
        self.profiles_dir().join(engine)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.profiles_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
