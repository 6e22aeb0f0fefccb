#![allow(dead_code)]

use std::time::Duration;

use cvep_core::Placement;
use cvep_marker::{MarkerEmitter, MarkerLog, MemoryOutlet};
use cvep_render::assets::generate_state;
use cvep_render::{Display, HeadlessDisplay, StateStyle, StimulusRenderer};
use cvep_speller::{
    AbortHandle, PresentationConfig, PresentationScheduler, SignalHandle, abort_channel,
};
use cvep_timing::ManualTimer;

pub const FRAME_NS: u64 = 16_666_667;
const BACKGROUND: [u8; 4] = [40, 40, 40, 255];

/// Headless display whose swap takes one 60 Hz frame on a manual clock. It can
/// raise a signal after a given number of swaps, and fail a given swap.
pub struct VsyncDisplay {
    pub inner: HeadlessDisplay,
    timer: ManualTimer,
    abort_after: Option<(u64, AbortHandle)>,
    pub signal_after: Option<(u64, SignalHandle)>,
    /// 1-based index of the swap that returns an error.
    pub fail_on: Option<u64>,
}

impl Display for VsyncDisplay {
    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn frame_mut(&mut self) -> &mut [u8] {
        self.inner.frame_mut()
    }

    fn present(&mut self) -> anyhow::Result<()> {
        self.timer.advance(Duration::from_nanos(FRAME_NS));
        if self.fail_on == Some(self.inner.presents() + 1) {
            anyhow::bail!("swap chain lost");
        }
        self.inner.present()?;
        for (n, handle) in self.abort_after.iter().chain(self.signal_after.iter()) {
            if self.inner.presents() == *n {
                handle.request();
            }
        }
        Ok(())
    }
}

pub struct Harness {
    pub scheduler: PresentationScheduler<VsyncDisplay, ManualTimer>,
    pub log: MarkerLog,
    pub abort: AbortHandle,
    pub timer: ManualTimer,
}

/// Symbols `A` (left), `B` (right) and `C` (top) with black/white/green states.
pub fn harness(config: PresentationConfig, abort_after: Option<u64>) -> Harness {
    let timer = ManualTimer::new();
    let (abort, listener) = abort_channel();
    let display = VsyncDisplay {
        // Sample points at the centres of A, B and C.
        inner: HeadlessDisplay::new(64, 48)
            .with_sample_points(vec![(16, 24), (48, 24), (32, 8)]),
        timer: timer.clone(),
        abort_after: abort_after.map(|n| (n, abort.clone())),
        signal_after: None,
        fail_on: None,
    };

    let mut renderer = StimulusRenderer::with_timer(display, timer.clone()).unwrap();
    renderer.set_background(BACKGROUND);
    for (name, position) in [("A", (-16.0, 0.0)), ("B", (16.0, 0.0)), ("C", (0.0, 16.0))] {
        let states = StateStyle::speller_keys()
            .into_iter()
            .map(|s| generate_state((10, 10), s, None).unwrap())
            .collect();
        renderer
            .add_symbol(name, states, Placement::new(position, (10.0, 10.0)))
            .unwrap();
    }

    let outlet = MemoryOutlet::new();
    let log = outlet.log();
    let emitter = MarkerEmitter::new(outlet, timer.clone());
    let scheduler = PresentationScheduler::new(renderer, emitter, listener, config).unwrap();
    Harness {
        scheduler,
        log,
        abort,
        timer,
    }
}

impl Harness {
    pub fn display_mut(&mut self) -> &mut VsyncDisplay {
        self.scheduler.renderer_mut().display_mut()
    }

    pub fn presents(&self) -> u64 {
        self.scheduler.renderer().display().inner.presents()
    }

    /// State shown at sample point `point` on every present; `None` when the symbol was not drawn.
    pub fn shown(&self, point: usize) -> Vec<Option<u8>> {
        self.scheduler
            .renderer()
            .display()
            .inner
            .samples()
            .iter()
            .map(|sample| match sample[point] {
                [0, 0, 0, 255] => Some(0),
                [255, 255, 255, 255] => Some(1),
                [0, 128, 0, 255] => Some(2),
                BACKGROUND => None,
                other => panic!("unexpected pixel {other:?}"),
            })
            .collect()
    }
}
