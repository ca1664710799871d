/// Acquisition collaborators: thin, fallible clients for the two remote
/// sources. Errors surface to the caller; nothing here retries.
///
/// Submodules:
/// - `gpm` — half-hourly precipitation grids, with marker-based catch-up.
/// - `landsat` — multi-band scenes and the local scene library.

pub mod gpm;
pub mod landsat;
