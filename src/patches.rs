//! # Patch initialization and processing
//!
//! Both stages fan the per-patch work out on a dedicated, bounded `rayon` pool of
//! `min(max_workers, patch_count)` threads, built for the run and dropped at its end.
//! Results are collected in ephemeris order, and each worker owns the patch it works on.
//!
//! ## Initialization
//!
//! [`initialize_patches`] issues one cone search per ephemeris row and wraps the answer in a
//! [`SkyPatch`]. The search window is [`search_window`] of the instrument field of view. A
//! failed cone search aborts the whole batch.
//!
//! ## Processing
//!
//! [`process_patches`] runs [`process_patch`] on every patch: source derivation
//! (deduplication, coordinates, separations), then the background cutout. A patch whose
//! sources cannot be derived keeps the failure on the patch and the batch goes on; a failed
//! cutout aborts the batch, since the mosaic needs every image.
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::PlannerConfig;
use crate::constants::{ArcMin, FOV_WIDENING_ARCMIN, SMALL_FOV_ARCMIN};
use crate::ephemeris::EphemerisRow;
use crate::progress::{PipelineStage, ProgressObserver};
use crate::services::{CatalogService, ConeSearch, CutoutService};
use crate::sky_patch::SkyPatch;
use crate::skypatch_errors::SkyPatchError;

/// Catalog search window for an instrument field of view.
///
/// Windows of one arcminute or less return too few sources, so they are widened by one
/// arcminute.
pub fn search_window(fov: ArcMin) -> ArcMin {
    if fov <= SMALL_FOV_ARCMIN {
        fov + FOV_WIDENING_ARCMIN
    } else {
        fov
    }
}

fn worker_pool(config: &PlannerConfig, n_patches: usize) -> Result<ThreadPool, SkyPatchError> {
    let threads = config.pool_size(n_patches);
    log::debug!("building a pool of {threads} workers for {n_patches} patches");
    Ok(ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("skypatch-worker-{i}"))
        .build()?)
}

/// Cone-search the catalog around every ephemeris row.
///
/// Arguments
/// -----------------
/// * `rows`: the ephemeris, in chronological order.
/// * `config`: catalog, instrument field of view and pool bound.
/// * `catalog`: the cone-search service.
/// * `progress`: notified after each patch.
///
/// Return
/// ----------
/// * One [`SkyPatch`] per row, `index` following the row order.
/// * The first catalog error otherwise; no partial collection is returned.
pub fn initialize_patches(
    rows: &[EphemerisRow],
    config: &PlannerConfig,
    catalog: &dyn CatalogService,
    progress: &dyn ProgressObserver,
) -> Result<Vec<SkyPatch>, SkyPatchError> {
    let width = search_window(config.instrument_fov);
    if width != config.instrument_fov {
        log::info!(
            "field of view {}' widened to a {width}' catalog search window",
            config.instrument_fov
        );
    }

    let pool = worker_pool(config, rows.len())?;
    let done = AtomicUsize::new(0);
    let total = rows.len();

    pool.install(|| {
        rows.par_iter()
            .enumerate()
            .map(|(index, row)| {
                let query = ConeSearch {
                    center: row.coord(),
                    width,
                    height: width,
                    catalog: &config.catalog,
                };
                let raw = catalog.cone_search(&query)?;
                if raw.is_empty() {
                    log::warn!("no {} source around {}", config.catalog.name, row.coord());
                }
                let patch = SkyPatch::new(index, row, config, width, raw);
                progress.patch_done(
                    PipelineStage::Catalog,
                    done.fetch_add(1, Ordering::Relaxed) + 1,
                    total,
                );
                Ok(patch)
            })
            .collect()
    })
}

/// Derive the sources of one patch and attach its background cutout.
pub fn process_patch(
    mut patch: SkyPatch,
    config: &PlannerConfig,
    cutouts: &dyn CutoutService,
) -> Result<SkyPatch, SkyPatchError> {
    match patch.derive_sources(&config.catalog) {
        Ok(derived) => patch.apply_sources(derived),
        Err(e) => {
            log::warn!("{patch}: sources unavailable: {e}");
            patch.mark_source_error(e.to_string());
        }
    }

    let cutout = cutouts.cutout(&patch.cutout_request(config))?;
    patch.attach_cutout(cutout);
    log::debug!(
        "{patch}: {} sources, cutout attached",
        patch.source_coords().len()
    );
    Ok(patch)
}

/// Run [`process_patch`] on every patch of the collection.
pub fn process_patches(
    patches: Vec<SkyPatch>,
    config: &PlannerConfig,
    cutouts: &dyn CutoutService,
    progress: &dyn ProgressObserver,
) -> Result<Vec<SkyPatch>, SkyPatchError> {
    let pool = worker_pool(config, patches.len())?;
    let done = AtomicUsize::new(0);
    let total = patches.len();

    pool.install(|| {
        patches
            .into_par_iter()
            .map(|patch| {
                let patch = process_patch(patch, config, cutouts)?;
                progress.patch_done(
                    PipelineStage::Processing,
                    done.fetch_add(1, Ordering::Relaxed) + 1,
                    total,
                );
                Ok(patch)
            })
            .collect()
    })
}
