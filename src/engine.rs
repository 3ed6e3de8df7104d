//! Frame driver: owns a frame source and decides when it renders.
//!
//! The host loop (a winit event loop, a test) calls [`Engine::poll`] once per
//! display refresh. While running, every poll renders one frame.

use std::time::{Duration, Instant};

use crate::config::DriverConfig;
use crate::error::Result;

/// Anything that can draw frame `frame_id`.
pub trait FrameSource {
    fn render(&mut self, frame_id: u64) -> Result<()>;
}

type Listener = Box<dyn FnMut(u64)>;

pub struct Engine<S: FrameSource> {
    source: Option<S>,
    paused: bool,
    resume_at: Option<Instant>,
    frame_id: u64,
    frame_id_max: u64,
    pre_render: Vec<Listener>,
    after_render: Vec<Listener>,
}

impl<S: FrameSource> Engine<S> {
    pub fn new(source: S, frame_id_max: u64) -> Self {
        Self {
            source: Some(source),
            paused: true,
            resume_at: None,
            frame_id: 0,
            frame_id_max: frame_id_max.max(1),
            pre_render: Vec::new(),
            after_render: Vec::new(),
        }
    }

    pub fn from_config(source: S, config: &DriverConfig) -> Self {
        Self::new(source, u64::from(config.frame_id_max))
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn frame_id_max(&self) -> u64 {
        self.frame_id_max
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> Option<&mut S> {
        self.source.as_mut()
    }

    pub fn on_pre_render(&mut self, listener: impl FnMut(u64) + 'static) {
        self.pre_render.push(Box::new(listener));
    }

    pub fn on_after_render(&mut self, listener: impl FnMut(u64) + 'static) {
        self.after_render.push(Box::new(listener));
    }

    pub fn start(&mut self) {
        self.resume();
    }

    /// Stops ticking and cancels any delayed resume.
    pub fn pause(&mut self) {
        self.paused = true;
        self.resume_at = None;
    }

    /// Starts ticking from the next poll. No-op while running.
    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        log::debug!("driver resumed at frame {}", self.frame_id);
    }

    /// Resumes once `delay` has elapsed since `now`.
    pub fn resume_after(&mut self, now: Instant, delay: Duration) {
        self.resume_at = Some(now + delay);
    }

    /// Jumps to `progress` (clamped to `[0, 0.999]`) of the frame range
    /// and resumes.
    pub fn play(&mut self, progress: f64) {
        let progress = progress.clamp(0.0, 0.999);
        self.frame_id = (progress * self.frame_id_max as f64) as u64;
        self.resume();
    }

    /// Renders one frame with the counter wrapped into range.
    pub fn update(&mut self) -> Result<()> {
        self.frame_id %= self.frame_id_max;
        if let Some(source) = &mut self.source {
            source.render(self.frame_id)?;
        }
        self.frame_id += 1;
        Ok(())
    }

    /// Fires a due delayed resume, then renders a frame when running.
    /// Returns whether a frame was rendered.
    pub fn poll(&mut self, now: Instant) -> Result<bool> {
        if self.resume_at.is_some_and(|at| now >= at) {
            self.resume_at = None;
            self.resume();
        }
        if self.paused || self.source.is_none() {
            return Ok(false);
        }

        let frame_id = self.frame_id % self.frame_id_max;
        for listener in &mut self.pre_render {
            listener(frame_id);
        }
        self.update()?;
        for listener in &mut self.after_render {
            listener(frame_id);
        }
        Ok(true)
    }

    /// Stops the driver and hands back the frame source for teardown.
    pub fn dispose(&mut self) -> Option<S> {
        self.pause();
        self.pre_render.clear();
        self.after_render.clear();
        self.source.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<u64>,
    }

    impl FrameSource for Recorder {
        fn render(&mut self, frame_id: u64) -> Result<()> {
            self.frames.push(frame_id);
            Ok(())
        }
    }

    fn frames(engine: &Engine<Recorder>) -> &[u64] {
        &engine.source().unwrap().frames
    }

    #[test]
    fn test_starts_paused() {
        let mut engine = Engine::new(Recorder::default(), 10);
        assert!(engine.is_paused());
        assert!(!engine.poll(Instant::now()).unwrap());
        assert!(frames(&engine).is_empty());
    }

    #[test]
    fn test_counter_wraps() {
        let mut engine = Engine::new(Recorder::default(), 3);
        engine.start();
        let now = Instant::now();
        for _ in 0..5 {
            engine.poll(now).unwrap();
        }
        assert_eq!(frames(&engine), &[0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut engine = Engine::new(Recorder::default(), 100);
        let now = Instant::now();
        engine.start();
        engine.poll(now).unwrap();
        engine.pause();
        engine.poll(now).unwrap();
        engine.resume();
        engine.resume();
        engine.poll(now).unwrap();
        assert_eq!(frames(&engine), &[0, 1]);
    }

    #[test]
    fn test_play_clamps_progress() {
        let mut engine = Engine::new(Recorder::default(), 1000);
        engine.play(0.5);
        assert_eq!(engine.frame_id(), 500);
        assert!(!engine.is_paused());

        engine.pause();
        engine.play(2.0);
        assert_eq!(engine.frame_id(), 999);
        engine.play(-1.0);
        assert_eq!(engine.frame_id(), 0);
    }

    #[test]
    fn test_delayed_resume_and_cancel() {
        let mut engine = Engine::new(Recorder::default(), 100);
        let start = Instant::now();
        engine.resume_after(start, Duration::from_millis(50));
        assert!(!engine.poll(start).unwrap());
        assert!(engine.poll(start + Duration::from_millis(50)).unwrap());

        engine.pause();
        engine.resume_after(start, Duration::from_millis(10));
        engine.pause();
        assert!(!engine.poll(start + Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_listeners_see_rendered_frame() {
        let mut engine = Engine::new(Recorder::default(), 2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let pre = Rc::clone(&seen);
        engine.on_pre_render(move |id| pre.borrow_mut().push(("pre", id)));
        let after = Rc::clone(&seen);
        engine.on_after_render(move |id| after.borrow_mut().push(("after", id)));

        engine.start();
        let now = Instant::now();
        engine.poll(now).unwrap();
        engine.poll(now).unwrap();
        engine.poll(now).unwrap();
        assert_eq!(
            *seen.borrow(),
            [("pre", 0), ("after", 0), ("pre", 1), ("after", 1), ("pre", 0), ("after", 0)]
        );
    }

    #[test]
    fn test_dispose_returns_source() {
        let mut engine = Engine::new(Recorder::default(), 10);
        engine.start();
        engine.poll(Instant::now()).unwrap();
        let source = engine.dispose().unwrap();
        assert_eq!(source.frames, [0]);
        assert!(engine.is_paused());
        assert!(!engine.poll(Instant::now()).unwrap());
    }
}
