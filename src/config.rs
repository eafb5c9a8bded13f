use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use tracing::warn;
use url::Url;

use crate::http::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {path:?}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {error}")]
    Parse {
        path: PathBuf,
        error: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which kind of imagery is downloaded for every point.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Four perspective images around the capture point.
    Directional,
    /// One stitched equirectangular panorama.
    Panoramic,
}

/// How the four directional headings are anchored.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HeadingSource {
    /// Relative to the direction of travel at capture time.
    Movedir,
    /// Fixed compass headings 0/90/180/270.
    Absolute,
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub max_retries: u32,
    #[serde(deserialize_with = "seconds")]
    pub retry_delay: Duration,
    #[serde(deserialize_with = "seconds")]
    pub timeout: Duration,
    pub headers: IndexMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let headers = [
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36",
            ),
            ("Referer", "https://map.baidu.com/"),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
            ),
            ("Accept-Encoding", "gzip, deflate, br"),
            ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
        ];
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    pub fovy: u32,
    pub quality: u32,
    pub pitch: i32,
    pub width: u32,
    pub height: u32,
    /// Valid levels are 1..=5; anything else falls back to 3.
    pub panorama_zoom: i64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            fovy: 90,
            quality: 100,
            pitch: 0,
            width: 500,
            height: 500,
            panorama_zoom: 3,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Endpoints {
    /// Serves id lookup, metadata, directional images and tiles.
    pub street_view: Url,
    /// Remote coordinate conversion, used only by `compare`.
    pub geoconv: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            street_view: Url::parse("https://mapsv0.bdimg.com/").expect("static url"),
            geoconv: Url::parse("https://api.map.baidu.com/geoconv/v1/").expect("static url"),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Paths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub image_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            input: "data/input/sample_points.csv".into(),
            output: "data/output/csv/results.csv".into(),
            image_dir: "data/output/images".into(),
            temp_dir: "data/temp".into(),
        }
    }
}

impl Paths {
    pub fn directional_dir(&self) -> PathBuf {
        self.image_dir.join("directional")
    }

    pub fn panoramic_dir(&self) -> PathBuf {
        self.image_dir.join("panoramic")
    }

    /// `<temp_dir>/<output file name>.progress`
    pub fn checkpoint(&self) -> PathBuf {
        let name = self
            .output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        self.temp_dir.join(format!("{name}.progress"))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub heading_source: HeadingSource,
    /// Capture year to travel to, `None` for the latest capture.
    pub target_year: Option<String>,
    pub batch_size: usize,
    #[serde(deserialize_with = "seconds")]
    pub batch_delay: Duration,
    pub resume: bool,
    pub http: HttpConfig,
    pub image: ImageConfig,
    pub endpoints: Endpoints,
    pub paths: Paths,
    /// Key for the remote conversion API.
    pub api_key: Option<String>,
    /// Largest tolerated disagreement between local and remote conversion.
    pub max_divergence_m: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Panoramic,
            heading_source: HeadingSource::Movedir,
            target_year: None,
            batch_size: 50,
            batch_delay: Duration::from_secs(5),
            resume: false,
            http: HttpConfig::default(),
            image: ImageConfig::default(),
            endpoints: Endpoints::default(),
            paths: Paths::default(),
            api_key: None,
            max_divergence_m: 1.0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|error| Error::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(&text).map_err(|error| Error::Parse {
            path: path.to_owned(),
            error,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// The requested capture year, ignoring blank values.
    pub fn target_year(&self) -> Option<&str> {
        self.target_year
            .as_deref()
            .map(str::trim)
            .filter(|year| !year.is_empty())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::Invalid("batch_size must be positive".into()));
        }
        if !self.max_divergence_m.is_finite() || self.max_divergence_m < 0.0 {
            return Err(Error::Invalid(format!(
                "max_divergence_m must be a non-negative number, got {}",
                self.max_divergence_m
            )));
        }
        if !(1..=5).contains(&self.image.panorama_zoom) {
            warn!(
                zoom = self.image.panorama_zoom,
                "panorama_zoom outside 1..=5, zoom 3 will be used"
            );
        }
        Ok(())
    }
}
