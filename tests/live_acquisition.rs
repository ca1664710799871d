//! Live Acquisition Integration Tests
//!
//! These tests hit the configured data services to verify the acquisition
//! contract end to end: listings resolve, payloads parse, footprints match
//! the region. They are marked #[ignore] so normal CI builds do not depend
//! on external service availability.
//!
//! To run manually (with slidemon.toml pointing at real endpoints):
//!   cargo test --test live_acquisition -- --ignored

use std::path::Path;

use chrono::Utc;

use slidemon_service::config::{CONFIG_FILE, RunContext};
use slidemon_service::ingest::{gpm, landsat};
use slidemon_service::regions::{REGION, SCENE_PATHS};

fn live_context() -> RunContext {
    RunContext::initialize(Path::new(CONFIG_FILE), Utc::now())
        .expect("slidemon.toml must be present and valid for live tests")
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("client")
}

#[test]
#[ignore] // Don't run in CI - depends on external service
fn precip_listing_resolves_and_keys_parse() {
    let ctx = live_context();
    let keys = gpm::new_keys_since(&client(), &ctx.config.precip_base_url, None, Utc::now().date_naive())
        .expect("listing fetch should succeed");
    // A fresh-marker query returns at most the single newest key.
    assert!(keys.len() <= 1);
}

#[test]
#[ignore] // Don't run in CI - depends on external service
fn newest_precip_payload_matches_region_footprint() {
    let ctx = live_context();
    let c = client();
    let keys = gpm::new_keys_since(&c, &ctx.config.precip_base_url, None, Utc::now().date_naive())
        .expect("listing fetch should succeed");
    let Some(key) = keys.last() else {
        eprintln!("no payload published yet; skipping");
        return;
    };
    let grid = gpm::fetch_epoch(&c, &ctx.config.precip_base_url, key, &REGION.precip_footprint())
        .expect("payload should fetch and decode");
    assert_eq!(grid.footprint.rows, REGION.precip_footprint().rows);
}

#[test]
#[ignore] // Don't run in CI - depends on external service
fn scene_listings_resolve_for_every_registered_path() {
    let ctx = live_context();
    let c = client();
    for entry in SCENE_PATHS {
        for row in entry.rows {
            // A missing listing (no scene yet) is fine; an HTTP or parse
            // failure is not.
            let result = landsat::latest_scene_id(&c, &ctx.config.scene_base_url, entry.path, row);
            assert!(
                result.is_ok(),
                "scene listing for {}/{} failed: {:?}",
                entry.path,
                row,
                result.err()
            );
        }
    }
}
