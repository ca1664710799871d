/// Landslide pipeline entry point. No arguments; run daily from cron.
///
/// Resolves which orbital path (if any) was observed, acquires the latest
/// scene per row, builds the cloud-free composite, runs change detection
/// against the previous composite, and rotates the scene library.
/// A day without an overpass, or with no scene published yet, exits 0.

use std::path::Path;
use std::process;

use chrono::{Duration, Utc};

use slidemon_service::codec;
use slidemon_service::composite;
use slidemon_service::config::{CONFIG_FILE, RunContext};
use slidemon_service::detect;
use slidemon_service::ingest::landsat::{self, SceneLibrary};
use slidemon_service::logging::{self, DataSource, LogLevel};
use slidemon_service::model::MonitorError;
use slidemon_service::regions::{self, REGION};
use slidemon_service::state::{StateLock, StatePaths};

fn main() {
    logging::init_logger(LogLevel::Info, None);
    process::exit(match run() {
        Ok(()) => 0,
        Err(err) => {
            logging::error(DataSource::System, None, &err.to_string());
            1
        }
    });
}

fn run() -> Result<(), MonitorError> {
    let ctx = RunContext::initialize(Path::new(CONFIG_FILE), Utc::now())?;
    logging::init_logger(LogLevel::Info, ctx.config.log_file.as_deref());

    // Scenes for an overpass finish publishing hours after acquisition;
    // looking back 18 hours keeps an early-morning cron on yesterday's
    // pass until today's is complete.
    let observed = (ctx.started_at - Duration::hours(18)).date_naive();
    let Some(scene_path) = regions::path_for_date(observed) else {
        logging::info(
            DataSource::Scene,
            None,
            &format!("no overpass over {} on {}", REGION.name, observed),
        );
        return Ok(());
    };
    logging::info(
        DataSource::Scene,
        None,
        &format!(
            "path {} observed on {} ({} row(s))",
            scene_path.path,
            observed,
            scene_path.rows.len()
        ),
    );

    let _lock = StateLock::acquire(&ctx.config.scene_dir)?;
    let library = SceneLibrary::open(&ctx.config.scene_dir);
    let slope_path = StatePaths::new(&ctx.config.state_dir).aux_grid(REGION.slope_mask_file);
    let slope = codec::read_grid(&slope_path).map_err(|e| MonitorError::StateCorruption {
        path: slope_path.display().to_string(),
        reason: e.to_string(),
    })?;

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .map_err(|e| MonitorError::Acquisition(format!("cannot build HTTP client: {}", e)))?;

    for &row in scene_path.rows {
        process_row(&ctx, &client, &library, &slope, scene_path.path, row, observed)?;
    }
    Ok(())
}

fn process_row(
    ctx: &RunContext,
    client: &reqwest::blocking::Client,
    library: &SceneLibrary,
    slope: &slidemon_service::raster::Grid,
    path: &str,
    row: &str,
    observed: chrono::NaiveDate,
) -> Result<(), MonitorError> {
    let subject = format!("{}/{}", path, row);

    let Some(id) = landsat::latest_scene_id(client, &ctx.config.scene_base_url, path, row)?
    else {
        logging::info(DataSource::Scene, Some(&subject), "no scene published yet");
        return Ok(());
    };
    let expected_id = landsat::scene_id(path, row, observed);
    if id != expected_id {
        logging::info(
            DataSource::Scene,
            Some(&subject),
            &format!("newest published scene is {}, not today's {}", id, expected_id),
        );
        return Ok(());
    }
    let reference = library.load_reference(path, row)?;
    if reference.as_ref().map(|r| r.id == id).unwrap_or(false) {
        logging::info(DataSource::Scene, Some(&subject), "latest scene already processed");
        return Ok(());
    }

    if let Err(err) = landsat::fetch_scene(
        client,
        &ctx.config.scene_base_url,
        &id,
        &library.current_dir(path, row),
    ) {
        logging::log_scene_failure(&id, "scene fetch", &err);
        return Err(err);
    }
    let current = library.load_current(path, row)?.ok_or_else(|| {
        MonitorError::Acquisition(format!("scene {} vanished after download", id))
    })?;
    let historicals = library.load_historicals(path, row)?;
    logging::info(
        DataSource::Scene,
        Some(&subject),
        &format!(
            "compositing {} against {} historical scene(s)",
            id,
            historicals.len()
        ),
    );

    let result = composite::composite(&current, &historicals, ctx.config.backfill_depth)?;
    logging::info(
        DataSource::Scene,
        Some(&subject),
        &format!(
            "{} scene(s) consulted, {} cell(s) unresolved",
            result.scenes_used,
            result.unresolved.count_nonzero()
        ),
    );

    match &reference {
        Some(reference) => match detect::detect(&result, reference, slope)? {
            Some(detection) => {
                let date = current.captured;
                let out = ctx
                    .config
                    .output_dir
                    .join("detections")
                    .join(date.format("%Y").to_string())
                    .join(date.format("%m").to_string())
                    .join(date.format("%d").to_string())
                    .join(format!("detection_{}_{}.asc", path, row));
                codec::write_grid(&out, &detection)?;
                logging::warn(
                    DataSource::Scene,
                    Some(&subject),
                    &format!(
                        "full-confidence change detected in {} cell(s); raster at {}",
                        detection.count_nonzero(),
                        out.display()
                    ),
                );
            }
            None => {
                logging::info(
                    DataSource::Scene,
                    Some(&subject),
                    "no full-confidence change against the reference",
                );
            }
        },
        None => {
            logging::warn(
                DataSource::Scene,
                Some(&subject),
                "no reference composite yet; building stock, skipping detection",
            );
        }
    }

    library.promote(path, row, &id, &result, ctx.config.backfill_depth)?;
    Ok(())
}
