#![allow(dead_code)]
use async_trait::async_trait;
use mef_fields::runtime::fetcher::Fetcher;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn fixtures_dir() -> String {
    format!("{}/tests/fixtures", env!("CARGO_MANIFEST_DIR"))
}

pub fn load_fixture(filename: &str) -> String {
    let path = Path::new(&fixtures_dir()).join(filename);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", path.display(), e))
}

pub fn form_stylesheet(form_id: &str, selects: &[&str]) -> String {
    let body: String = selects
        .iter()
        .map(|select| format!("      <xsl:value-of select=\"{select}\"/>\n"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:param name="FormData" select="$RtnDoc/{form_id}"/>
  <xsl:template match="/">
    <div>
{body}    </div>
  </xsl:template>
</xsl:stylesheet>
"#
    )
}

/// A scratch directory laid out like an unpacked MeF package.
pub struct MefTree {
    dir: TempDir,
}

impl MefTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fixture dirs");
        }
        std::fs::write(&path, content).expect("Failed to write fixture file");
        path
    }

    pub fn copy_fixture(&self, fixture: &str, relative: &str) -> PathBuf {
        self.write(relative, &load_fixture(fixture))
    }
}

#[derive(Clone)]
pub struct MockFetcher {
    pub fixtures: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            fixtures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn add_fixture(&self, url: &str, content: Vec<u8>) {
        self.fixtures
            .lock()
            .unwrap()
            .insert(url.to_string(), content);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, String> {
        self.fixtures
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| format!("HTTP error 404 fetching {url}"))
    }
}
