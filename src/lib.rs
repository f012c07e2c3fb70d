#![deny(missing_docs)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Quadbrot renderer
//!
//! Quadbrot renders an escape-time fractal by recursively carving a
//! square pixel surface into quadrants.  When a quadrant's side length
//! drops to the minimum box size it becomes a leaf tile, and a compute
//! task colors every pixel inside it.  Subdivision steps and leaf tiles
//! are both plain units of work, and a dispatcher decides how they run:
//!
//! * the fork/join dispatcher spawns a scoped thread per unit and blocks
//!   until a level's four quadrants finish, so a render call returns
//!   only when the whole surface is painted;
//! * the pooled dispatcher hands units to a fixed-size worker pool and
//!   returns immediately, falling back to the calling thread whenever
//!   the pool refuses the work.
//!
//! Tiles never overlap, so the surface needs no per-pixel locking; each
//! finished tile is blitted under a single lock acquisition.

extern crate crossbeam;
#[macro_use]
extern crate failure;
extern crate itertools;
#[macro_use]
extern crate log;
extern crate num;

pub mod dispatch;
pub mod engine;
pub mod mandel;
pub mod plane;
pub mod pool;
pub mod surface;
pub mod tiles;

pub use dispatch::{Dispatch, ForkJoinDispatcher, PooledDispatcher};
pub use engine::{Engine, Session, Work};
pub use mandel::{Mandelbrot, PixelColorer};
pub use plane::{ConfigError, RenderParams};
pub use pool::{PoolState, WorkerPool, DEFAULT_POOL_SIZE, SHUTDOWN_GRACE};
pub use surface::PixelSurface;
pub use tiles::Rect;
