use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use indexmap::IndexMap;
use image::{DynamicImage, GenericImageView as _, ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};
use url::Url;

use crate::{
    acquire::Acquirer,
    config::{Config, HeadingSource, Mode, Paths},
    coordinate::{self, CoordinateTransform, LocalTransform, MercatorCoordinate},
    http::{self, Fetch},
    job::{
        BatchJob, JobError, ProcessStatus, SamplePoint, Table,
        outcome::{BD_ID, PROCESS_STATUS},
    },
    panorama::PanoramaId,
    progress::{BatchPhase, NullReporter, PointStatus, ProgressReporter},
};

const TILE_WIDTH: u32 = 16;
const TILE_HEIGHT: u32 = 8;

fn tile() -> Bytes {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(
        TILE_WIDTH,
        TILE_HEIGHT,
        Rgb([0, 0, 0]),
    ))
    .write_to(&mut buffer, ImageFormat::Png)
    .unwrap();
    Bytes::from(buffer.into_inner())
}

fn sdata(move_dir: f64, timeline: Value) -> Value {
    json!({
        "result": {"error": 0},
        "content": [{"MoveDir": move_dir, "TimeLine": timeline, "Rname": "长安街"}]
    })
}

/// In-memory street view endpoint.
struct FakeProvider {
    /// Panorama returned by every spatial lookup, `None` for no coverage.
    panorama: Option<&'static str>,
    metadata: Vec<(&'static str, Value)>,
    /// `pos` values (`row_col`) whose tile download fails.
    missing_tiles: Vec<&'static str>,
    no_tiles: bool,
    broken_headings: Vec<&'static str>,
    /// After this many spatial lookups a directory is put at the given path.
    obstruct_after: Option<(usize, PathBuf)>,
    requests: Mutex<Vec<String>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            panorama: Some("PANO"),
            metadata: vec![
                (
                    "PANO",
                    sdata(
                        87.5,
                        json!([{"Year": "2019", "ID": "PANO"}, {"Year": "2015", "ID": "OLD"}]),
                    ),
                ),
                ("OLD", sdata(12.0, json!([{"Year": "2015", "ID": "OLD"}]))),
            ],
            missing_tiles: Vec::new(),
            no_tiles: false,
            broken_headings: Vec::new(),
            obstruct_after: None,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    fn requests(&self, qt: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| *request == qt)
            .count()
    }
}

fn param<'p>(params: &'p [(&str, String)], name: &str) -> &'p str {
    params
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.as_str())
        .unwrap_or_default()
}

fn exhausted(url: &Url) -> http::Error {
    http::Error::Exhausted {
        url: url.clone(),
        attempts: 4,
        last: "unexpected status 404 Not Found".into(),
    }
}

impl Fetch for FakeProvider {
    async fn get(&self, url: &Url, params: &[(&str, String)]) -> Result<Bytes, http::Error> {
        let qt = param(params, "qt");
        self.requests.lock().unwrap().push(qt.to_owned());
        match qt {
            "qsdata" => {
                if let Some((after, path)) = &self.obstruct_after {
                    if self.requests("qsdata") == *after {
                        std::fs::create_dir_all(path).unwrap();
                    }
                }
                let content = match self.panorama {
                    Some(id) => json!({"id": id}),
                    None => json!({}),
                };
                Ok(Bytes::from(json!({"content": content}).to_string()))
            }
            "sdata" => self
                .metadata
                .iter()
                .find(|(sid, _)| *sid == param(params, "sid"))
                .map(|(_, body)| Bytes::from(format!("/**/jsonp.cb_1({body})")))
                .ok_or_else(|| exhausted(url)),
            "pdata" => {
                let pos = param(params, "pos");
                if self.no_tiles || self.missing_tiles.iter().any(|missing| *missing == pos) {
                    Err(exhausted(url))
                } else {
                    Ok(tile())
                }
            }
            "pr3d" => {
                let heading = param(params, "heading");
                if self.broken_headings.iter().any(|broken| *broken == heading) {
                    Err(exhausted(url))
                } else {
                    Ok(Bytes::from(format!("jpeg {heading}")))
                }
            }
            _ => Err(exhausted(url)),
        }
    }
}

/// Keeps every phase it is told about.
#[derive(Default)]
struct Phases(Mutex<Vec<BatchPhase>>);

impl ProgressReporter for Phases {
    fn set_phase(&self, phase: BatchPhase) {
        self.0.lock().unwrap().push(phase);
    }
    fn register_points(&self, _total: usize) {}
    fn update_point(&self, _pid: &str, _status: PointStatus) {}
    fn finish(&self, _status_counts: &IndexMap<String, usize>) {}
}

struct Exploding;

impl CoordinateTransform for Exploding {
    async fn transform(&self, _: f64, _: f64) -> Result<MercatorCoordinate, coordinate::Error> {
        panic!("transform exploded")
    }
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("panocrawl-scenario-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(dir: &Path, mode: Mode) -> Config {
    Config {
        mode,
        heading_source: HeadingSource::Movedir,
        batch_size: 2,
        batch_delay: Duration::ZERO,
        paths: Paths {
            input: dir.join("input/points.csv"),
            output: dir.join("output/results.csv"),
            image_dir: dir.join("images"),
            temp_dir: dir.join("temp"),
        },
        ..Default::default()
    }
}

fn job<'a, T: CoordinateTransform>(
    provider: &'a FakeProvider,
    transform: &'a T,
    config: &'a Config,
) -> BatchJob<'a, FakeProvider, T> {
    BatchJob {
        fetch: provider,
        transform,
        config,
        acquirer: Acquirer::from_config(config),
        reporter: Arc::new(NullReporter),
    }
}

fn tiananmen() -> SamplePoint {
    SamplePoint {
        pid: "A1".into(),
        lon: 116.397428,
        lat: 39.90923,
    }
}

const INPUT: &str = "PID,Lon,Lat,district\n\
A1,116.397428,39.90923,东城\n\
A2,121.4952,31.2424,浦东\n\
A3,x,31.2424,浦东\n";

const FOUR_POINTS: &str = "PID,Lon,Lat\n\
A1,116.397428,39.90923\n\
A2,121.4952,31.2424\n\
A3,113.3172,23.1192\n\
A4,114.0552,22.5435\n";

fn write_input(config: &Config, text: &str) {
    let path = &config.paths.input;
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn pids(table: &Table) -> Vec<&str> {
    table.rows().iter().map(|row| row["PID"].as_str()).collect()
}

#[tokio::test]
async fn panoramic_capture_of_tiananmen() {
    let dir = scratch("panoramic");
    let config = config(&dir, Mode::Panoramic);
    let provider = FakeProvider::default();
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::Success);
    assert_eq!(outcome.bd_id, Some(PanoramaId::new("PANO")));
    assert_eq!(outcome.move_dir, Some(87.5));
    assert_eq!(outcome.content.as_ref().unwrap()["Rname"], "长安街");
    assert_eq!(
        outcome.image_paths,
        vec![dir.join("images/panoramic/A1_116.397428_39.90923.jpg")]
    );
    let panorama = image::open(&outcome.image_paths[0]).unwrap();
    assert_eq!(panorama.dimensions(), (4 * TILE_WIDTH, 2 * TILE_HEIGHT));
    assert_eq!(provider.requests("pdata"), 8);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn missing_tiles_are_filled_blank() {
    let dir = scratch("missing-tiles");
    let config = config(&dir, Mode::Panoramic);
    let provider = FakeProvider {
        missing_tiles: vec!["0_1", "1_3"],
        ..Default::default()
    };
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::Success);
    let panorama = image::open(&outcome.image_paths[0]).unwrap().to_rgb8();
    assert_eq!(panorama.dimensions(), (64, 16));
    let brightness = |x: u32, y: u32| panorama.get_pixel(x, y).0.iter().map(|c| *c as u32).sum::<u32>();
    // (0, 1) spans x 16..32 of the first row, (1, 3) x 48..64 of the second.
    assert!(brightness(24, 4) > 700);
    assert!(brightness(56, 12) > 700);
    assert!(brightness(4, 4) < 60);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn no_tiles_is_image_failure() {
    let dir = scratch("no-tiles");
    let config = config(&dir, Mode::Panoramic);
    let provider = FakeProvider {
        no_tiles: true,
        ..Default::default()
    };
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::ImageFailure);
    assert_eq!(outcome.bd_id, Some(PanoramaId::new("PANO")));
    assert!(outcome.image_paths.is_empty());
    assert!(!dir.join("images/panoramic/A1_116.397428_39.90923.jpg").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn uncovered_location_is_no_panorama() {
    let dir = scratch("no-panorama");
    let config = config(&dir, Mode::Panoramic);
    let provider = FakeProvider {
        panorama: None,
        ..Default::default()
    };
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::NoPanorama);
    assert_eq!(outcome.bd_id, None);
    assert_eq!(provider.requests("sdata"), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn absent_year_is_metadata_failure() {
    let dir = scratch("absent-year");
    let mut config = config(&dir, Mode::Panoramic);
    config.target_year = Some("2013".into());
    let provider = FakeProvider::default();
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::MetadataFailure);
    assert_eq!(outcome.bd_id, Some(PanoramaId::new("PANO")));
    assert_eq!(outcome.content, None);
    assert_eq!(provider.requests("pdata"), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn target_year_travels_to_older_capture() {
    let dir = scratch("year-redirect");
    let mut config = config(&dir, Mode::Panoramic);
    config.target_year = Some("2015".into());
    let provider = FakeProvider::default();
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::Success);
    assert_eq!(outcome.bd_id, Some(PanoramaId::new("OLD")));
    assert_eq!(outcome.move_dir, Some(12.0));
    assert_eq!(provider.requests("sdata"), 2);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn directional_capture_keeps_partial_results() {
    let dir = scratch("directional");
    let config = config(&dir, Mode::Directional);
    let provider = FakeProvider {
        broken_headings: vec!["177.5"],
        ..Default::default()
    };
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::Success);
    let names: Vec<_> = outcome
        .image_paths
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        [
            "A1_87.5_116.397428_39.90923.jpg",
            "A1_267.5_116.397428_39.90923.jpg",
            "A1_357.5_116.397428_39.90923.jpg",
        ]
    );
    assert_eq!(provider.requests("pr3d"), 4);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn unparsable_coordinate_is_coordinate_failure() {
    let dir = scratch("coordinate");
    let config = config(&dir, Mode::Panoramic);
    let provider = FakeProvider::default();
    let point = SamplePoint {
        lon: f64::NAN,
        ..tiananmen()
    };
    let outcome = job(&provider, &LocalTransform, &config)
        .process_point(&point)
        .await;

    assert_eq!(outcome.status, ProcessStatus::CoordinateFailure);
    assert!(provider.requests.lock().unwrap().is_empty());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn panic_becomes_error_status() {
    let dir = scratch("panic");
    let config = config(&dir, Mode::Panoramic);
    let provider = FakeProvider::default();
    let outcome = job(&provider, &Exploding, &config)
        .process_point(&tiananmen())
        .await;

    assert_eq!(outcome.status, ProcessStatus::Error("transform exploded".into()));
    assert_eq!(outcome.status.to_string(), "error: transform exploded");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn full_run_writes_results_and_drops_checkpoint() {
    let dir = scratch("full-run");
    let config = config(&dir, Mode::Panoramic);
    write_input(&config, INPUT);
    let provider = FakeProvider::default();
    let summary = job(&provider, &LocalTransform, &config).run().await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.status_counts["success"], 2);
    assert_eq!(summary.status_counts["coordinate_failure"], 1);

    let output = Table::read(&config.paths.output).await.unwrap();
    assert_eq!(
        output.headers(),
        [
            "PID",
            "Lon",
            "Lat",
            "district",
            "BD_ID",
            "BD_MoveDir",
            "BD_Content",
            "BD_ImagePaths",
            "process_status"
        ]
    );
    assert_eq!(pids(&output), ["A1", "A2", "A3"]);
    assert_eq!(output.rows()[0]["district"], "东城");
    assert_eq!(output.rows()[0][BD_ID], "PANO");
    assert_eq!(output.rows()[0]["BD_MoveDir"], "87.5");
    assert_eq!(output.rows()[2][PROCESS_STATUS], "coordinate_failure");
    let content: Value = serde_json::from_str(&output.rows()[1]["BD_Content"]).unwrap();
    assert_eq!(content["MoveDir"], 87.5);
    assert!(!config.paths.checkpoint().exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn resume_continues_after_flushed_rows() {
    let dir = scratch("resume-output");
    let mut config = config(&dir, Mode::Panoramic);
    write_input(&config, INPUT);
    std::fs::create_dir_all(dir.join("output")).unwrap();
    std::fs::write(
        &config.paths.output,
        "PID,Lon,Lat,district,BD_ID,BD_MoveDir,BD_Content,BD_ImagePaths,process_status\n\
         A1,116.397428,39.90923,东城,,,,,no_panorama\n",
    )
    .unwrap();
    config.resume = true;
    let provider = FakeProvider::default();

    let summary = job(&provider, &LocalTransform, &config).run().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.total_rows, 3);
    let output = Table::read(&config.paths.output).await.unwrap();
    assert_eq!(pids(&output), ["A1", "A2", "A3"]);
    assert_eq!(output.rows()[0][PROCESS_STATUS], "no_panorama");
    assert_eq!(output.rows()[1][PROCESS_STATUS], "success");
    assert_eq!(provider.requests("qsdata"), 1);

    // Everything is processed now; a second resume does nothing.
    let provider = FakeProvider::default();
    let summary = job(&provider, &LocalTransform, &config).run().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.total_rows, 3);
    assert!(provider.requests.lock().unwrap().is_empty());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn resume_from_checkpoint_without_output() {
    let dir = scratch("resume-checkpoint");
    let mut config = config(&dir, Mode::Panoramic);
    write_input(&config, INPUT);
    std::fs::create_dir_all(dir.join("temp")).unwrap();
    std::fs::write(config.paths.checkpoint(), "A1\nA2\n").unwrap();
    config.resume = true;
    let provider = FakeProvider::default();

    let summary = job(&provider, &LocalTransform, &config).run().await.unwrap();
    assert_eq!(summary.processed, 1);
    let output = Table::read(&config.paths.output).await.unwrap();
    assert_eq!(pids(&output), ["A3"]);
    assert!(provider.requests.lock().unwrap().is_empty());
    assert!(!config.paths.checkpoint().exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn fresh_run_replaces_previous_output() {
    let dir = scratch("replace");
    let config = config(&dir, Mode::Panoramic);
    write_input(&config, INPUT);
    std::fs::create_dir_all(dir.join("output")).unwrap();
    std::fs::write(&config.paths.output, "PID,process_status\nZ9,success\n").unwrap();
    let provider = FakeProvider::default();

    job(&provider, &LocalTransform, &config).run().await.unwrap();
    let output = Table::read(&config.paths.output).await.unwrap();
    assert_eq!(pids(&output), ["A1", "A2", "A3"]);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn input_without_coordinates_is_fatal() {
    let dir = scratch("bad-input");
    let config = config(&dir, Mode::Panoramic);
    write_input(&config, "PID,Longitude,Latitude\nA1,116.4,39.9\n");
    let provider = FakeProvider::default();

    let error = job(&provider, &LocalTransform, &config)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Input(_)));
    assert!(!config.paths.output.exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn delay_only_between_batches() {
    let dir = scratch("delays");
    let mut config = config(&dir, Mode::Directional);
    config.batch_delay = Duration::from_millis(10);
    write_input(&config, INPUT);
    let provider = FakeProvider::default();
    let phases = Arc::new(Phases::default());
    let job = BatchJob {
        reporter: phases.clone(),
        ..job(&provider, &LocalTransform, &config)
    };

    job.run().await.unwrap();
    let phases = phases.0.lock().unwrap();
    let waits = phases
        .iter()
        .filter(|phase| matches!(phase, BatchPhase::Waiting(_)))
        .count();
    assert_eq!(waits, 1);
    assert_eq!(
        phases[phases.len() - 2..],
        [
            BatchPhase::Processing {
                batch: 2,
                batches: 2
            },
            BatchPhase::Completed
        ]
    );
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn interrupted_run_keeps_flushed_rows_and_checkpoint() {
    let dir = scratch("interrupted");
    let mut config = config(&dir, Mode::Directional);
    write_input(&config, FOUR_POINTS);
    let staging = dir.join("output/results.csv.tmp");
    // The third lookup belongs to the second batch, so only its flush fails.
    let provider = FakeProvider {
        obstruct_after: Some((3, staging.clone())),
        ..Default::default()
    };

    let error = job(&provider, &LocalTransform, &config)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Output(_)));
    let output = Table::read(&config.paths.output).await.unwrap();
    assert_eq!(pids(&output), ["A1", "A2"]);
    assert_eq!(
        std::fs::read_to_string(config.paths.checkpoint()).unwrap(),
        "A1\nA2\nA3\nA4\n"
    );

    std::fs::remove_dir_all(&staging).unwrap();
    config.resume = true;
    let provider = FakeProvider::default();
    let summary = job(&provider, &LocalTransform, &config).run().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(provider.requests("qsdata"), 2);
    let output = Table::read(&config.paths.output).await.unwrap();
    assert_eq!(pids(&output), ["A1", "A2", "A3", "A4"]);
    assert!(!config.paths.checkpoint().exists());
    std::fs::remove_dir_all(&dir).unwrap();
}
