//! # rimsync
//!
//! Incremental product-photo publishing for a wheel-rim catalog. A Dropbox
//! namespace full of studio shots is the data source: new photos are
//! mirrored locally, run through background removal, turned into a fixed
//! set of web derivatives, and republished to an FTP web host — all as one
//! unattended batch job.
//!
//! # Architecture: Walk, Stage, Derive, Publish
//!
//! ```text
//! 1. Walk     Dropbox tree  →  folder listings   (paginated, depth-first)
//! 2. Filter   listings      →  "new" files       (watermark + rules)
//! 3. Stage    new files     →  staging/          (local mirror)
//! 4. Derive   staged batch  →  cutout/thumb/icon (matting service)
//! 5. Publish  batch         →  FTP host          (idempotent mirror)
//! ```
//!
//! The stages are connected by two pieces of durable state in the staging
//! directory:
//!
//! - **Watermark** (`.last-run`): the start instant of the last fully
//!   successful run. Only files *strictly newer* are considered; the file
//!   is only rewritten after everything succeeded, so a failed run means
//!   the next one re-covers the same window (at-least-once).
//! - **Retry list** (`.retry.json`): downloads that failed while they still
//!   qualified. Re-attempted on the next run regardless of the watermark,
//!   so a transient network error cannot make a file permanently invisible.
//!
//! Every downstream step tolerates reprocessing: staging overwrites,
//! derivative output is deterministic, and publishing skips files the host
//! already has.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`remote`] | [`remote::RemoteStore`] trait and the blocking Dropbox client (namespace and shared-link roots) |
//! | [`walker`] | Work-stack depth-first traversal with pagination draining and per-subtree failure isolation |
//! | [`filter`] | Pure change-detection rules: extension allowlist, watermark comparison, numeric suffix, folder gate |
//! | [`stage`] | Downloads selected files into the local mirror, isolating per-file failures |
//! | [`imaging`] | Fit-and-pad geometry and raster operations on top of the `image` crate |
//! | [`matting`] | Background removal as a black box: the [`matting::Matting`] trait and the rembg HTTP client |
//! | [`pipeline`] | Derivative pipeline: pre-normalize, matting, full-size cutout, thumbnail, first-wins icon, cleanup |
//! | [`publish`] | FTP republish with typed outcomes and skip/replace conflict policies |
//! | [`watermark`] | Durable run state: watermark file and retry list |
//! | [`sync`] | Run orchestration tying the stages together, plus the run report |
//! | [`config`] | `rimsync.toml` loading and validation; credentials from the environment |
//!
//! # Design Decisions
//!
//! ## One Pipeline, Configured
//!
//! Thumbnails, icons, and the matting pre-normalization are all the same
//! operation — shrink-only aspect-preserving resize, centered on a
//! fixed-size canvas — differing only in box size and fill color. There is
//! exactly one implementation ([`imaging::fit_and_pad`]) and one pipeline
//! parameterized by [`pipeline::DerivativeConfig`]. Independent-axis
//! stretching, the classic product-shot distortion bug, is impossible by
//! construction.
//!
//! ## Background Removal as a Service
//!
//! Segmentation models are heavy, GPU-hungry, and versioned independently
//! of this tool, so matting stays behind an HTTP boundary
//! ([`matting::RembgClient`]) instead of being linked in. Inputs are
//! bounded to a white 6000×4000 canvas first; the larger model profiles
//! exhaust memory on raw studio shots.
//!
//! ## Explicit Run State
//!
//! Per-run facts — which folders already received an icon — live in an
//! explicit [`pipeline::RunContext`] passed through the pipeline, not in
//! process-wide statics. State resets between runs by construction, and
//! tests can exercise the first-wins icon policy without process isolation.
//!
//! ## Blocking by Design
//!
//! The job is a nightly batch: one remote tree, one matting service, one
//! FTP session. Sequential blocking I/O keeps failure handling linear and
//! the logs readable; there is no concurrency to get wrong.

pub mod config;
pub mod filter;
pub mod imaging;
pub mod matting;
pub mod pipeline;
pub mod publish;
pub mod remote;
pub mod stage;
pub mod sync;
pub mod walker;
pub mod watermark;
