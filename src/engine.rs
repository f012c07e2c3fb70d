// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The render engine: the recursive quadrant partition, the leaf tile
//! compute task, and the session object that owns the dispatcher for
//! its whole lifetime.
//!
//! A render clears the surface and dispatches one `Split` covering it.
//! Splitting a rectangle at or below the minimum box size dispatches a
//! `Paint` instead; anything larger dispatches four child `Split`s.
//! The engine also counts outstanding units so that a fire-and-forget
//! render, which returns before the surface is painted, still has an
//! observable completion point (`wait_idle`).

use dispatch::Dispatch;
use itertools::iproduct;
use mandel::PixelColorer;
use plane::RenderParams;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use surface::PixelSurface;
use tiles::Rect;

/// One dispatchable unit: descend into a rectangle, or paint a leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Work {
    /// Subdivide the rectangle (or hand it off for painting once it is
    /// small enough).
    Split(Rect),
    /// Compute every pixel of a leaf tile.
    Paint(Rect),
}

/// The shared heart of a render session: parameters, surface, colorer,
/// dispatcher, and the outstanding-work count.
pub struct Engine {
    params: RenderParams,
    surface: Arc<PixelSurface>,
    colorer: Box<dyn PixelColorer>,
    dispatcher: Box<dyn Dispatch>,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

/// Keeps the engine's outstanding-unit count honest: created when a
/// unit is dispatched, decremented on drop.  Dropping happens when the
/// unit finishes, when it panics, and when a forced pool shutdown
/// discards it unrun, so the count cannot leak.
pub struct PendingGuard {
    engine: Arc<Engine>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut outstanding = self.engine.outstanding.lock().unwrap();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.engine.idle.notify_all();
        }
    }
}

impl Engine {
    /// Build an engine and its surface.
    pub fn new(
        params: RenderParams,
        colorer: Box<dyn PixelColorer>,
        dispatcher: Box<dyn Dispatch>,
    ) -> Arc<Engine> {
        Arc::new(Engine {
            surface: Arc::new(PixelSurface::new(params.pixel_dim)),
            params,
            colorer,
            dispatcher,
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    /// The session parameters.
    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    /// The shared drawing target.
    pub fn surface(&self) -> &PixelSurface {
        &self.surface
    }

    /// Clear the surface and start a render from the full-surface
    /// rectangle.  Under the fork/join policy this returns with the
    /// surface complete; under the pooled policy it returns immediately
    /// and the tiles fill in behind it.  Re-rendering while a previous
    /// pass is still in flight is harmless: both passes write the same
    /// shades.
    pub fn render(engine: &Arc<Engine>) {
        engine.surface.clear();
        let root = engine.params.full_rect();
        engine.dispatcher.dispatch(engine, vec![Work::Split(root)]);
    }

    /// Execute one unit of work.  Called by the dispatchers, on
    /// whatever thread the policy picked.
    pub fn run_unit(engine: &Arc<Engine>, work: Work) {
        match work {
            Work::Split(rect) => {
                if rect.width <= engine.params.min_box_size {
                    engine.dispatcher.dispatch(engine, vec![Work::Paint(rect)]);
                } else {
                    let children = rect
                        .quadrants()
                        .iter()
                        .map(|quad| Work::Split(*quad))
                        .collect();
                    engine.dispatcher.dispatch(engine, children);
                }
            }
            Work::Paint(rect) => engine.paint(&rect),
        }
    }

    /// Register a dispatched unit.  Dispatchers call this once per unit
    /// and move the guard into the unit's closure.
    pub fn begin_unit(engine: &Arc<Engine>) -> PendingGuard {
        *engine.outstanding.lock().unwrap() += 1;
        PendingGuard {
            engine: Arc::clone(engine),
        }
    }

    /// Number of dispatched units that have not finished yet.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock().unwrap()
    }

    /// Block until every dispatched unit has finished, or until the
    /// timeout elapses.  Returns true when the engine went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.outstanding.lock().unwrap();
        while *outstanding > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .idle
                .wait_timeout(outstanding, deadline - now)
                .unwrap();
            outstanding = next;
        }
        true
    }

    /// Tear down the dispatcher's execution resources.
    pub fn close(&self, grace: Duration) {
        self.dispatcher.shutdown(grace);
    }

    // The leaf compute task: color every pixel of the tile into a local
    // buffer, then blit it in one synchronized call.
    fn paint(&self, rect: &Rect) {
        let mut tile = Vec::with_capacity(rect.area());
        for (j, i) in iproduct!(
            rect.y..rect.y + rect.height,
            rect.x..rect.x + rect.width
        ) {
            let point = self.params.pixel_to_point(i, j);
            tile.push(self.colorer.evaluate(point.re, point.im));
        }
        self.surface.blit(rect, &tile);
    }
}

/// A render session: one engine, one dispatcher, one surface, reused
/// across renders.  The session is closed explicitly when the host is
/// done with it; nothing hides in a process-exit hook.
pub struct Session {
    engine: Arc<Engine>,
}

impl Session {
    /// Build a session from validated parameters, a pixel colorer, and
    /// the dispatch policy chosen for its lifetime.
    pub fn new(
        params: RenderParams,
        colorer: Box<dyn PixelColorer>,
        dispatcher: Box<dyn Dispatch>,
    ) -> Session {
        Session {
            engine: Engine::new(params, colorer, dispatcher),
        }
    }

    /// Render one frame; see [`Engine::render`].
    pub fn render(&self) {
        Engine::render(&self.engine);
    }

    /// Block until the current frame is fully painted, up to `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.engine.wait_idle(timeout)
    }

    /// Side length of the surface in pixels.
    pub fn pixel_dim(&self) -> usize {
        self.engine.params.pixel_dim
    }

    /// A copy of the surface contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.engine.surface.snapshot()
    }

    /// Tear the session down, granting in-flight work `grace` to
    /// finish.
    pub fn close(&self, grace: Duration) {
        self.engine.close(grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::{ForkJoinDispatcher, PooledDispatcher};
    use mandel::Mandelbrot;
    use pool::WorkerPool;
    use std::thread;

    // Records every point it is asked to color; the shade is the call
    // count for that pixel, which makes double-computation visible in
    // the surface itself.
    struct Recording {
        calls: Mutex<Vec<(f64, f64)>>,
    }

    impl Recording {
        fn new() -> Recording {
            Recording {
                calls: Mutex::new(vec![]),
            }
        }
    }

    impl PixelColorer for Recording {
        fn evaluate(&self, re: f64, im: f64) -> u8 {
            self.calls.lock().unwrap().push((re, im));
            7
        }
    }

    // Runs splits inline and collects the leaves instead of painting
    // them, exposing the partition tree's fringe.
    struct LeafCollector {
        leaves: Mutex<Vec<Rect>>,
    }

    impl Dispatch for LeafCollector {
        fn dispatch(&self, engine: &Arc<Engine>, batch: Vec<Work>) {
            for work in batch {
                match work {
                    Work::Split(_) => {
                        let _pending = Engine::begin_unit(engine);
                        Engine::run_unit(engine, work);
                    }
                    Work::Paint(rect) => self.leaves.lock().unwrap().push(rect),
                }
            }
        }

        fn shutdown(&self, _grace: Duration) {}
    }

    fn params(pixel_dim: usize, min_box: usize) -> RenderParams {
        RenderParams::new(-2.0, -1.5, 3.0, pixel_dim, min_box, 2).unwrap()
    }

    fn leaves_of(pixel_dim: usize, min_box: usize) -> Vec<Rect> {
        let collector = Arc::new(LeafCollector {
            leaves: Mutex::new(vec![]),
        });
        let engine = Engine::new(
            params(pixel_dim, min_box),
            Box::new(Mandelbrot::new(50)),
            Box::new(SharedCollector(collector.clone())),
        );
        Engine::render(&engine);
        let leaves = collector.leaves.lock().unwrap().clone();
        leaves
    }

    // LeafCollector must be observable after the engine takes the
    // dispatcher by value, hence this forwarding wrapper.
    struct SharedCollector(Arc<LeafCollector>);

    impl Dispatch for SharedCollector {
        fn dispatch(&self, engine: &Arc<Engine>, batch: Vec<Work>) {
            self.0.dispatch(engine, batch);
        }

        fn shutdown(&self, grace: Duration) {
            self.0.shutdown(grace);
        }
    }

    #[test]
    fn leaves_tile_the_surface_exactly() {
        for &(dim, min_box) in &[(7usize, 2usize), (16, 4), (9, 3), (64, 8)] {
            let leaves = leaves_of(dim, min_box);
            let mut claims = vec![0u8; dim * dim];
            for leaf in &leaves {
                assert!(leaf.width >= 1 && leaf.height >= 1);
                for y in leaf.y..leaf.y + leaf.height {
                    for x in leaf.x..leaf.x + leaf.width {
                        claims[y * dim + x] += 1;
                    }
                }
            }
            assert!(
                claims.iter().all(|&count| count == 1),
                "dim {} min {}: some pixel not claimed exactly once",
                dim,
                min_box
            );
        }
    }

    #[test]
    fn a_four_by_four_surface_with_min_box_two_makes_four_leaves() {
        let mut leaves = leaves_of(4, 2);
        leaves.sort_by_key(|leaf| (leaf.y, leaf.x));
        assert_eq!(
            leaves,
            vec![
                Rect::new(0, 0, 2, 2),
                Rect::new(2, 0, 2, 2),
                Rect::new(0, 2, 2, 2),
                Rect::new(2, 2, 2, 2),
            ]
        );
    }

    #[test]
    fn a_min_box_at_or_above_the_surface_yields_one_leaf() {
        assert_eq!(leaves_of(8, 8), vec![Rect::new(0, 0, 8, 8)]);
        assert_eq!(leaves_of(8, 64), vec![Rect::new(0, 0, 8, 8)]);
    }

    #[test]
    fn every_pixel_is_evaluated_at_its_plane_point_exactly_once() {
        let colorer = Arc::new(Recording::new());
        let engine = Engine::new(
            params(4, 2),
            Box::new(SharedRecording(colorer.clone())),
            Box::new(ForkJoinDispatcher::new()),
        );
        Engine::render(&engine);

        let mut calls = colorer.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 16);
        let mut expected = vec![];
        for j in 0..4 {
            for i in 0..4 {
                expected.push((-2.0 + (i as f64) * 0.75, -1.5 + (j as f64) * 0.75));
            }
        }
        let key = |&(re, im): &(f64, f64)| (re.to_bits(), im.to_bits());
        calls.sort_by_key(key);
        expected.sort_by_key(key);
        assert_eq!(calls, expected);
    }

    struct SharedRecording(Arc<Recording>);

    impl PixelColorer for SharedRecording {
        fn evaluate(&self, re: f64, im: f64) -> u8 {
            self.0.evaluate(re, im)
        }
    }

    #[test]
    fn fork_join_render_returns_with_the_surface_complete() {
        let session = Session::new(
            params(16, 4),
            Box::new(Recording::new()),
            Box::new(ForkJoinDispatcher::new()),
        );
        session.render();
        // The recording colorer paints everything 7; if any tile were
        // still outstanding when render returned, background pixels
        // would remain.
        assert_eq!(session.engine.outstanding(), 0);
        assert!(session.snapshot().iter().all(|&shade| shade == 7));
    }

    #[test]
    fn render_is_idempotent() {
        let session = Session::new(
            params(16, 4),
            Box::new(Mandelbrot::new(100)),
            Box::new(ForkJoinDispatcher::new()),
        );
        session.render();
        let first = session.snapshot();
        session.render();
        assert_eq!(session.snapshot(), first);
    }

    #[test]
    fn pooled_render_completes_and_matches_fork_join() {
        let reference = Session::new(
            params(16, 4),
            Box::new(Mandelbrot::new(100)),
            Box::new(ForkJoinDispatcher::new()),
        );
        reference.render();

        let pooled = Session::new(
            params(16, 4),
            Box::new(Mandelbrot::new(100)),
            Box::new(PooledDispatcher::new(4)),
        );
        pooled.render();
        assert!(pooled.wait_idle(Duration::from_secs(10)));
        assert_eq!(pooled.snapshot(), reference.snapshot());
        pooled.close(Duration::from_secs(5));
    }

    #[test]
    fn a_shut_down_pool_degrades_to_synchronous_rendering() {
        let reference = Session::new(
            params(16, 4),
            Box::new(Mandelbrot::new(100)),
            Box::new(ForkJoinDispatcher::new()),
        );
        reference.render();

        let pool = WorkerPool::new(2);
        pool.shutdown(Duration::from_secs(5));
        let session = Session::new(
            params(16, 4),
            Box::new(Mandelbrot::new(100)),
            Box::new(PooledDispatcher::with_pool(pool)),
        );
        session.render();
        // Every unit ran on the calling thread, so the render finished
        // before the call returned.
        assert_eq!(session.engine.outstanding(), 0);
        assert_eq!(session.snapshot(), reference.snapshot());
    }

    #[test]
    fn refused_submissions_fall_back_without_losing_work() {
        // One worker that is mostly asleep plus a one-slot queue forces
        // constant rejection; the counting colorer proves no pixel is
        // lost or recomputed.
        struct Slow(Arc<Recording>);

        impl PixelColorer for Slow {
            fn evaluate(&self, re: f64, im: f64) -> u8 {
                thread::sleep(Duration::from_millis(2));
                self.0.evaluate(re, im)
            }
        }

        let colorer = Arc::new(Recording::new());
        let pool = WorkerPool::with_queue_depth(1, 1);
        let session = Session::new(
            params(8, 2),
            Box::new(Slow(colorer.clone())),
            Box::new(PooledDispatcher::with_pool(pool)),
        );
        session.render();
        assert!(session.wait_idle(Duration::from_secs(30)));

        let calls = colorer.calls.lock().unwrap();
        assert_eq!(calls.len(), 64);
        session.close(Duration::from_secs(5));
    }

    #[test]
    fn a_panicking_worker_abandons_only_its_own_branch() {
        use surface::BACKGROUND;

        // Panics on the surface's corner point; every other pixel gets
        // a recognizable shade.
        struct Faulty;

        impl PixelColorer for Faulty {
            fn evaluate(&self, re: f64, im: f64) -> u8 {
                if re == -2.0 && im == -1.5 {
                    panic!("unreachable point");
                }
                7
            }
        }

        let session = Session::new(
            params(4, 2),
            Box::new(Faulty),
            Box::new(ForkJoinDispatcher::new()),
        );
        session.render();

        // The failed worker's siblings were joined and the engine
        // drained; only the failed tile's pixels stay background.
        assert_eq!(session.engine.outstanding(), 0);
        let pixels = session.snapshot();
        assert_eq!(pixels.iter().filter(|&&shade| shade == 7).count(), 12);
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(pixels[y * 4 + x], BACKGROUND);
            }
        }
    }
}
